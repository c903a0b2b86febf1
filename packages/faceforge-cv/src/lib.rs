//! Vision primitives for screen automation: a multi-scale template locator
//! and a perceptual-hash screen comparator.

pub mod locator;
pub mod similarity;

pub use locator::{LocateError, Located, TemplateLocator};
pub use similarity::{dhash, hamming_distance, images_similar};
