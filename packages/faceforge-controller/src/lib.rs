//! Screen capture and synthetic input.
//!
//! [`Controller`] is the only surface the automation engine sees; the desktop
//! implementation drives the real mouse, keyboard and monitor, while tests
//! substitute scripted fakes.

pub mod desktop;

use std::{thread::sleep, time::Duration};

use anyhow::Result;
use image::DynamicImage;

pub use desktop::DesktopController;

/// Keys the automation actually presses. Kept deliberately small so backends
/// other than enigo stay trivial to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Down,
    Enter,
    Tab,
}

pub trait Controller {
    /// Device screen size in pixels; the coordinate space of every click.
    fn screen_size(&self) -> (u32, u32);

    /// Capture the full screen.
    fn screencap(&self) -> Result<DynamicImage>;

    fn move_to(&self, x: u32, y: u32) -> Result<()>;

    /// Click at the current pointer position.
    fn click(&self) -> Result<()>;

    /// Press-drag-release from `start` to `end` over `duration`.
    fn drag(&self, start: (u32, u32), end: (i32, i32), duration: Duration) -> Result<()>;

    fn key_tap(&self, key: Key) -> Result<()>;

    fn type_text(&self, text: &str) -> Result<()>;

    /// Move, give the cursor a beat to land, then click. Fast move+click gets
    /// swallowed by some targets, hence the pause.
    fn move_click(&self, x: u32, y: u32) -> Result<()> {
        self.move_to(x, y)?;
        sleep(Duration::from_millis(100));
        self.click()
    }
}
