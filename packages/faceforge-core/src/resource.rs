use std::{collections::HashMap, path::PathBuf};

use image::DynamicImage;

use crate::EnhanceError;

/// Lowercase, spaces to hyphens: `"Full beard"` becomes `"full-beard"`.
pub fn slug(name: &str) -> String {
    name.to_lowercase().replace(' ', "-")
}

/// Reference image file for an enhancement category.
pub fn category_template(category: &str) -> String {
    format!("enhancement-{}.png", slug(category))
}

/// Reference image file for a type inside a category.
pub fn type_template(category: &str, type_name: &str) -> String {
    format!("etype-{}-{}.png", slug(category), slug(type_name))
}

/// Reference images loaded from a directory, cached after first use.
pub struct AssetStore {
    root: PathBuf,
    cache: HashMap<String, DynamicImage>,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: HashMap::new(),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Load `name` (a file name like `gallery.png`) from the asset root.
    pub fn get(&mut self, name: &str) -> Result<DynamicImage, EnhanceError> {
        if let Some(img) = self.cache.get(name) {
            return Ok(img.clone());
        }
        let path = self.root.join(name);
        let img = image::open(&path).map_err(|source| EnhanceError::Asset {
            path: path.clone(),
            source,
        })?;
        self.cache.insert(name.to_string(), img.clone());
        Ok(img)
    }
}
