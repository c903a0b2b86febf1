use std::{fs, path::Path};

use log::info;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

use crate::{facedata::Gender, EnhanceError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancementType {
    pub name: String,
    pub probability: f64,
    /// Horizontal scroll distance, in device pixels, needed before this
    /// type's icon enters the carousel viewport. Zero means visible upfront.
    #[serde(default)]
    pub scroll_requirement: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enhancement {
    pub name: String,
    pub probability: f64,
    #[serde(default)]
    pub gender_requirement: Option<Gender>,
    pub types: Vec<EnhancementType>,
}

impl Enhancement {
    /// A shuffled copy of the types; the caller's rng decides the order.
    pub fn shuffle_types(&self, rng: &mut impl Rng) -> Vec<EnhancementType> {
        let mut types = self.types.clone();
        types.shuffle(rng);
        types
    }

    /// The first type that needs no scrolling; its icon anchors the carousel
    /// drags that reveal the off-screen types.
    pub fn scroll_reference(&self) -> Option<&EnhancementType> {
        self.types.iter().find(|t| t.scroll_requirement == 0)
    }
}

/// The enhancement catalog, in on-screen carousel order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub enhancements: Vec<Enhancement>,
}

impl Catalog {
    /// Load a TOML override if one exists at `path`, otherwise the built-in
    /// table.
    pub fn load(path: &Path) -> Result<Self, EnhanceError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let catalog = toml::from_str::<Catalog>(&raw)
            .map_err(|err| EnhanceError::Config(format!("catalog {}: {err}", path.display())))?;
        info!("loaded enhancement catalog from {}", path.display());
        Ok(catalog)
    }

    /// Force every probability to 1 so a debug run exercises each category
    /// and every type is reachable on the first draw.
    pub fn force_certain(mut self) -> Self {
        for enhancement in &mut self.enhancements {
            enhancement.probability = 1.0;
            for t in &mut enhancement.types {
                t.probability = 1.0;
            }
        }
        self
    }
}

impl Default for Catalog {
    fn default() -> Self {
        fn etype(name: &str, probability: f64) -> EnhancementType {
            EnhancementType {
                name: name.to_string(),
                probability,
                scroll_requirement: 0,
            }
        }
        fn etype_scrolled(name: &str, probability: f64, scroll: u32) -> EnhancementType {
            EnhancementType {
                name: name.to_string(),
                probability,
                scroll_requirement: scroll,
            }
        }

        Catalog {
            enhancements: vec![
                Enhancement {
                    name: "Beards".to_string(),
                    probability: 0.5,
                    gender_requirement: Some(Gender::Male),
                    types: vec![
                        etype("Full beard", 0.3),
                        etype("Hipster", 0.2),
                        etype("Goatee", 0.2),
                        etype("Mustache", 0.2),
                        etype("Grand goatee", 0.2),
                        etype("Lion", 0.05),
                        etype("Petite Goatee", 0.05),
                    ],
                },
                Enhancement {
                    name: "Makeup".to_string(),
                    probability: 0.5,
                    gender_requirement: Some(Gender::Female),
                    types: vec![
                        etype("Makeup 3", 0.05),
                        etype("Makeup 4", 0.05),
                        etype("Contouring", 0.1),
                        etype("Blush", 0.05),
                        etype("Eyelashes", 0.2),
                        etype("Eyebrows", 0.3),
                        etype("Eyeliner", 0.1),
                        etype("Foundation", 0.1),
                        etype("No makeup", 0.5),
                        etype("Glossy", 0.1),
                        etype("Eyeshadows", 0.1),
                        etype_scrolled("Dark Matte", 0.1, 800),
                        etype_scrolled("Dark", 0.1, 800),
                        etype_scrolled("Bright Glossy", 0.1, 800),
                        etype_scrolled("Dark Glossy", 0.1, 800),
                    ],
                },
                Enhancement {
                    name: "Sizes".to_string(),
                    probability: 0.3,
                    gender_requirement: None,
                    types: vec![
                        etype("Big Face", 0.5),
                        etype("Cheekbones", 0.1),
                        etype("Small Face", 0.01),
                    ],
                },
            ],
        }
    }
}
