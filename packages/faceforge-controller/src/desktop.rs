use std::{thread::sleep, time::Duration};

use anyhow::{anyhow, Result};
use enigo::{
    Button,
    Coordinate::Abs,
    Direction::{Click, Press, Release},
    Enigo, Keyboard, Mouse, Settings,
};
use image::DynamicImage;
use log::info;
use xcap::{Monitor, Window};

use crate::{Controller, Key};

/// Drives the host desktop: enigo for input, xcap for capture.
///
/// `connect` looks the target application up by name, clicks it into focus and
/// binds to the primary monitor. Every click coordinate is in monitor pixels.
pub struct DesktopController {
    monitor: Monitor,
    width: u32,
    height: u32,
}

impl DesktopController {
    pub fn connect(app_name: &str) -> Result<Self> {
        let needle = app_name.to_lowercase();
        let window = Window::all()?
            .into_iter()
            .filter(|w| !w.is_minimized())
            .find(|w| {
                w.app_name().to_lowercase().contains(&needle)
                    || w.title().to_lowercase().contains(&needle)
            })
            .ok_or_else(|| anyhow!("no window matching `{app_name}`"))?;
        info!(
            "found window `{}` ({}) at ({}, {}), {}x{}",
            window.title(),
            window.app_name(),
            window.x(),
            window.y(),
            window.width(),
            window.height()
        );

        let monitor = Monitor::all()?
            .into_iter()
            .find(|m| m.is_primary())
            .ok_or_else(|| anyhow!("no primary monitor"))?;
        let (width, height) = (monitor.width(), monitor.height());

        let controller = Self {
            monitor,
            width,
            height,
        };

        // Click-to-focus, then let the window settle before the first capture.
        let cx = window.x() + window.width() as i32 / 2;
        let cy = window.y() + window.height() as i32 / 2;
        controller.move_to(cx.max(0) as u32, cy.max(0) as u32)?;
        sleep(Duration::from_millis(100));
        controller.click()?;
        sleep(Duration::from_millis(500));

        Ok(controller)
    }

    fn enigo() -> Result<Enigo> {
        Ok(Enigo::new(&Settings::default())?)
    }
}

impl Controller for DesktopController {
    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn screencap(&self) -> Result<DynamicImage> {
        let img = self.monitor.capture_image()?;
        Ok(DynamicImage::ImageRgba8(img))
    }

    fn move_to(&self, x: u32, y: u32) -> Result<()> {
        let mut enigo = Self::enigo()?;
        enigo.move_mouse(x as i32, y as i32, Abs)?;
        Ok(())
    }

    fn click(&self) -> Result<()> {
        let mut enigo = Self::enigo()?;
        enigo.button(Button::Left, Click)?;
        Ok(())
    }

    fn drag(&self, start: (u32, u32), end: (i32, i32), duration: Duration) -> Result<()> {
        let mut enigo = Self::enigo()?;
        enigo.move_mouse(start.0 as i32, start.1 as i32, Abs)?;
        enigo.button(Button::Left, Press)?;

        let steps = 20;
        let step_sleep = duration / steps;
        let x_step = (end.0 - start.0 as i32) as f64 / steps as f64;
        let y_step = (end.1 - start.1 as i32) as f64 / steps as f64;
        for i in 1..=steps {
            enigo.move_mouse(
                start.0 as i32 + (x_step * i as f64) as i32,
                start.1 as i32 + (y_step * i as f64) as i32,
                Abs,
            )?;
            sleep(step_sleep);
        }

        enigo.button(Button::Left, Release)?;
        Ok(())
    }

    fn key_tap(&self, key: Key) -> Result<()> {
        let mut enigo = Self::enigo()?;
        let key = match key {
            Key::Down => enigo::Key::DownArrow,
            Key::Enter => enigo::Key::Return,
            Key::Tab => enigo::Key::Tab,
        };
        enigo.key(key, Click)?;
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<()> {
        let mut enigo = Self::enigo()?;
        enigo.text(text)?;
        Ok(())
    }
}
