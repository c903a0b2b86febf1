//! Screen navigation for the emulator: scrolling, the shared-folder route,
//! back/exit clicks and bounded element polling.

use std::{thread::sleep, time::Duration};

use faceforge_controller::Key;
use image::DynamicImage;
use log::{debug, info};

use faceforge_cv::{images_similar, LocateError, Located};

use crate::{coords::ScreenCoords, EnhanceError, Session};

/// Drags shorter than this register as taps, not scrolls.
pub const MIN_DRAG: i32 = 50;

/// Confidence bar on the first two gallery icon candidates; the last
/// fallback accepts whatever clears the locator floor.
const GALLERY_CONFIDENCE: f32 = 0.9;

const DRAG_DURATION: Duration = Duration::from_millis(300);
const SETTLE_SHORT: Duration = Duration::from_millis(500);
const SETTLE_LONG: Duration = Duration::from_millis(1000);

/// Clamp a drag to the minimum magnitude, keeping its direction.
fn clamp_drag(scroll_by: i32) -> i32 {
    if scroll_by >= 0 {
        scroll_by.max(MIN_DRAG)
    } else {
        scroll_by.min(-MIN_DRAG)
    }
}

impl Session {
    fn scroll(&mut self, scroll_by: i32) -> Result<(), EnhanceError> {
        let center = self.screen_center();
        self.controller.move_to(center.x, center.y)?;
        sleep(Duration::from_millis(100));
        let by = clamp_drag(scroll_by);
        self.controller.drag(
            (center.x, center.y),
            (center.x as i32, center.y as i32 + by),
            DRAG_DURATION,
        )?;
        Ok(())
    }

    pub fn scroll_up(&mut self, by: u32) -> Result<(), EnhanceError> {
        self.scroll(by as i32)
    }

    pub fn scroll_down(&mut self, by: u32) -> Result<(), EnhanceError> {
        self.scroll(-(by as i32))
    }

    /// Scroll, compare the screen before and after, then revert. A screen
    /// that did not change means the list is exhausted in that direction.
    fn can_scroll(&mut self, scroll_by: i32) -> Result<bool, EnhanceError> {
        let by = clamp_drag(scroll_by);
        let center = self.screen_center();

        let pre = self.controller.screencap()?;
        self.controller.move_to(center.x, center.y)?;
        self.controller.drag(
            (center.x, center.y),
            (center.x as i32, center.y as i32 + by),
            DRAG_DURATION,
        )?;
        sleep(SETTLE_SHORT);
        let post = self.controller.screencap()?;

        self.controller.move_to(center.x, center.y)?;
        self.controller.drag(
            (center.x, center.y),
            (center.x as i32, center.y as i32 - by),
            DRAG_DURATION,
        )?;
        sleep(SETTLE_SHORT);

        Ok(!images_similar(&pre, &post))
    }

    pub fn can_scroll_up(&mut self, by: u32) -> Result<bool, EnhanceError> {
        self.can_scroll(by as i32)
    }

    pub fn can_scroll_down(&mut self, by: u32) -> Result<bool, EnhanceError> {
        self.can_scroll(-(by as i32))
    }

    /// From the emulator home screen into the shared media folder gallery.
    pub fn move_to_shared_folder_from_home(&mut self) -> Result<(), EnhanceError> {
        // The gallery icon sits near the top; make sure it is on screen.
        self.scroll_up(50)?;

        let gallery = match self.coords_cache.get("gallery") {
            Some(coords) => coords,
            None => {
                let screen = self.controller.screencap()?;
                let located = self.locate_gallery_icon(&screen)?;
                let coords = ScreenCoords {
                    x: located.x,
                    y: located.y,
                };
                self.coords_cache.put("gallery", coords);
                coords
            }
        };
        self.move_click(gallery)?;
        sleep(SETTLE_LONG);

        let folder_filter = self.cached_locate("folder-filter", "folder-filter.png")?;
        self.move_click(folder_filter)?;
        sleep(SETTLE_LONG);

        self.enter_shared_folder()?;
        sleep(SETTLE_LONG);
        Ok(())
    }

    /// The gallery icon renders differently across emulator themes; walk the
    /// candidates in order, holding the first two to a 0.9 confidence bar.
    fn locate_gallery_icon(&mut self, screen: &DynamicImage) -> Result<Located, EnhanceError> {
        let candidates = ["gallery.png", "gallery-2.png", "gallery-3.png"];
        for (idx, name) in candidates.iter().enumerate() {
            match self.locate_in(name, screen) {
                Ok(located) => {
                    let last = idx == candidates.len() - 1;
                    if last || located.confidence >= GALLERY_CONFIDENCE {
                        info!(
                            "gallery control via {name} at ({}, {}), confidence {:.3}",
                            located.x, located.y, located.confidence
                        );
                        return Ok(located);
                    }
                    debug!(
                        "{name} below gallery bar ({:.3} < {GALLERY_CONFIDENCE})",
                        located.confidence
                    );
                }
                Err(EnhanceError::Locate(err)) => debug!("{err}"),
                Err(err) => return Err(err),
            }
        }
        Err(LocateError::NotFound {
            template: "gallery".to_string(),
        }
        .into())
    }

    /// Open the shared folder inside the gallery's folder filter: click its
    /// tile when the template resolves, otherwise fall back to the fixed
    /// keyboard route (third entry down, enter, tab).
    fn enter_shared_folder(&mut self) -> Result<(), EnhanceError> {
        match self.locate("shared-folder.png") {
            Ok(located) => {
                self.move_click(ScreenCoords {
                    x: located.x,
                    y: located.y,
                })?;
            }
            Err(EnhanceError::Locate(_)) | Err(EnhanceError::Asset { .. }) => {
                debug!("shared folder tile not located, using keyboard navigation");
                for _ in 0..3 {
                    self.controller.key_tap(Key::Down)?;
                }
                self.controller.key_tap(Key::Enter)?;
                self.controller.key_tap(Key::Tab)?;
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Click the OS back control (cached after the first locate).
    pub fn os_back_click(&mut self) -> Result<(), EnhanceError> {
        let back = self.cached_locate("osback", "os-back.png")?;
        self.move_click(back)?;
        sleep(SETTLE_LONG);
        Ok(())
    }

    /// Back out of the current screen; when backing out discards edits, a
    /// confirmation modal appears and its exit control is clicked too.
    pub fn exit_screen(&mut self, exit_modal: bool) -> Result<(), EnhanceError> {
        self.os_back_click()?;
        if exit_modal {
            sleep(SETTLE_LONG);
            let exit = self.cached_locate("exit", "exit.png")?;
            self.move_click(exit)?;
            sleep(SETTLE_LONG);
        }
        Ok(())
    }

    /// Poll for a template to appear, `attempts` times with `interval`
    /// between captures. `Ok(false)` when it never shows.
    pub fn wait_for_element(
        &mut self,
        template: &str,
        interval: Duration,
        attempts: u32,
    ) -> Result<bool, EnhanceError> {
        for _ in 0..attempts {
            sleep(interval);
            let screen = self.controller.screencap()?;
            match self.locate_in(template, &screen) {
                Ok(_) => return Ok(true),
                Err(EnhanceError::Locate(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(false)
    }
}


#[cfg(test)]
mod test {
    use std::{fs, time::Duration};

    use image::{Rgba, RgbaImage};

    use crate::resource::AssetStore;

    use super::test_support::{flat_screen, gradient_screen, Action, ScriptedController};
    use super::*;

    fn session_with(controller: ScriptedController, assets_root: &str) -> Session {
        Session::new(Box::new(controller), AssetStore::new(assets_root))
    }

    #[test]
    fn static_screen_cannot_scroll() {
        let screen = gradient_screen(160, 120, false);
        let controller = ScriptedController::new((160, 120), vec![screen]);
        let mut session = session_with(controller, "/nonexistent-assets");

        assert!(!session.can_scroll_up(300).unwrap());
    }

    #[test]
    fn changing_screen_can_scroll() {
        let controller = ScriptedController::new(
            (160, 120),
            vec![
                gradient_screen(160, 120, false),
                gradient_screen(160, 120, true),
            ],
        );
        let mut session = session_with(controller, "/nonexistent-assets");

        assert!(session.can_scroll_up(300).unwrap());
    }

    #[test]
    fn drags_are_clamped_to_the_minimum() {
        assert_eq!(clamp_drag(10), 50);
        assert_eq!(clamp_drag(-10), -50);
        assert_eq!(clamp_drag(0), 50);
        assert_eq!(clamp_drag(300), 300);
        assert_eq!(clamp_drag(-300), -300);
    }

    #[test]
    fn scroll_down_drags_upwards_from_center() {
        let controller = ScriptedController::new((200, 100), vec![flat_screen(200, 100, 128)]);
        let log = controller.action_log();
        let mut session = session_with(controller, "/nonexistent-assets");

        session.scroll_down(10).unwrap();

        let actions = log.borrow();
        assert_eq!(actions[0], Action::Move(100, 50));
        assert_eq!(actions[1], Action::Drag((100, 50), (100, 0)));
    }

    #[test]
    fn can_scroll_reverts_the_probe_drag() {
        let controller = ScriptedController::new((200, 100), vec![flat_screen(200, 100, 90)]);
        let log = controller.action_log();
        let mut session = session_with(controller, "/nonexistent-assets");

        session.can_scroll_up(60).unwrap();

        let drags: Vec<_> = log
            .borrow()
            .iter()
            .filter_map(|a| match a {
                Action::Drag(start, end) => Some((*start, *end)),
                _ => None,
            })
            .collect();
        assert_eq!(drags, vec![((100, 50), (100, 110)), ((100, 50), (100, -10))]);
    }

    #[test]
    fn wait_for_element_gives_up_after_attempts() {
        let dir = std::env::temp_dir().join(format!("nav-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        // A noisy marker no flat screen will ever contain.
        let mut marker = RgbaImage::new(12, 12);
        let mut state = 0x12345678u32;
        for px in marker.pixels_mut() {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let v = (state >> 24) as u8;
            *px = Rgba([v, v, v, 255]);
        }
        marker.save(dir.join("marker.png")).unwrap();

        let controller = ScriptedController::new((160, 120), vec![flat_screen(160, 120, 40)]);
        let log = controller.action_log();
        let mut session = session_with(controller, dir.to_str().unwrap());

        let found = session
            .wait_for_element("marker.png", Duration::ZERO, 3)
            .unwrap();
        assert!(!found);
        let captures = log
            .borrow()
            .iter()
            .filter(|a| **a == Action::Screencap)
            .count();
        assert_eq!(captures, 3);

        fs::remove_dir_all(&dir).unwrap();
    }
}
