//! The automation engine: session state, navigation, enhancement selection
//! and the enhancement run itself.

pub mod catalog;
pub mod coords;
pub mod detector;
pub mod facedata;
pub mod limiter;
pub mod navigation;
pub mod resource;
pub mod runner;
pub mod search;
pub mod selector;

use std::path::PathBuf;

use image::DynamicImage;
use log::warn;
use thiserror::Error;

use faceforge_controller::Controller;
use faceforge_cv::{LocateError, Located, TemplateLocator};

use crate::{coords::CoordsCache, coords::ScreenCoords, resource::AssetStore};

#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error(transparent)]
    Locate(#[from] LocateError),
    #[error("controller: {0}")]
    Controller(#[from] anyhow::Error),
    #[error("asset `{path}`: {source}")]
    Asset {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("config: {0}")]
    Config(String),
    #[error("face detector: {0}")]
    Detector(String),
    #[error("face search: {0}")]
    Search(String),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything a run holds onto between actions: the controller, the reference
/// images, the locator and the coordinate cache. One session per process.
pub struct Session {
    pub controller: Box<dyn Controller>,
    pub assets: AssetStore,
    pub locator: TemplateLocator,
    pub coords_cache: CoordsCache,
    pub debug_dir: Option<PathBuf>,
}

impl Session {
    pub fn new(controller: Box<dyn Controller>, assets: AssetStore) -> Self {
        let (width, height) = controller.screen_size();
        Self {
            controller,
            assets,
            locator: TemplateLocator::new(width, height),
            coords_cache: CoordsCache::default(),
            debug_dir: None,
        }
    }

    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    pub fn screen_center(&self) -> ScreenCoords {
        let (w, h) = self.controller.screen_size();
        ScreenCoords { x: w / 2, y: h / 2 }
    }

    /// Locate a reference image inside an already captured screenshot.
    pub fn locate_in(
        &mut self,
        template: &str,
        screen: &DynamicImage,
    ) -> Result<Located, EnhanceError> {
        let reference = self.assets.get(template)?;
        Ok(self.locator.locate(template, &reference, screen)?)
    }

    /// Capture the screen and locate a reference image in it.
    pub fn locate(&mut self, template: &str) -> Result<Located, EnhanceError> {
        let screen = self.controller.screencap()?;
        self.locate_in(template, &screen)
    }

    /// Locate with success-only memoization keyed on the cache key. Controls
    /// that never move (back button, apply, save) resolve once per process.
    pub fn cached_locate(&mut self, key: &str, template: &str) -> Result<ScreenCoords, EnhanceError> {
        if let Some(coords) = self.coords_cache.get(key) {
            return Ok(coords);
        }
        let located = self.locate(template)?;
        let coords = ScreenCoords {
            x: located.x,
            y: located.y,
        };
        self.coords_cache.put(key, coords);
        Ok(coords)
    }

    /// [`Session::cached_locate`] against an already captured screenshot.
    pub fn cached_locate_in(
        &mut self,
        key: &str,
        template: &str,
        screen: &DynamicImage,
    ) -> Result<ScreenCoords, EnhanceError> {
        if let Some(coords) = self.coords_cache.get(key) {
            return Ok(coords);
        }
        let located = self.locate_in(template, screen)?;
        let coords = ScreenCoords {
            x: located.x,
            y: located.y,
        };
        self.coords_cache.put(key, coords);
        Ok(coords)
    }

    pub fn move_click(&mut self, coords: ScreenCoords) -> Result<(), EnhanceError> {
        self.controller.move_click(coords.x, coords.y)?;
        Ok(())
    }

    /// Best-effort screenshot dump for post-mortems; a failed write is logged
    /// and otherwise ignored.
    pub fn debug_dump(&self, name: &str, img: &DynamicImage) {
        let Some(dir) = &self.debug_dir else {
            return;
        };
        let path = dir.join(format!("{name}.png"));
        if let Err(err) = img.save(&path) {
            warn!("failed to write debug dump {}: {err}", path.display());
        }
    }
}
