use std::{collections::HashMap, fs, path::Path};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::EnhanceError;

/// Characters whose age range starts below this are never enhanced.
pub const MIN_AGE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

/// Face attribute records, one JSON file per face, in the shape the analysis
/// service emits (`{"FaceDetails": [{...}]}` with PascalCase keys).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaceData {
    #[serde(default)]
    pub face_details: Vec<FaceDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaceDetail {
    pub age_range: AgeRange,
    pub gender: GenderAttribute,
    #[serde(default)]
    pub beard: BoolAttribute,
    #[serde(default)]
    pub mustache: BoolAttribute,
    #[serde(default)]
    pub eyeglasses: BoolAttribute,
    #[serde(default)]
    pub sunglasses: BoolAttribute,
}

impl FaceDetail {
    pub fn is_underage(&self) -> bool {
        self.age_range.low < MIN_AGE
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgeRange {
    pub low: u32,
    pub high: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GenderAttribute {
    pub value: Gender,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BoolAttribute {
    pub value: bool,
}

/// All face records for a run, keyed by external image id (the file stem).
#[derive(Debug, Default)]
pub struct FaceDataSet(HashMap<String, FaceDetail>);

impl FaceDataSet {
    /// Read every `*.json` under `dir`. Records that fail to parse or carry
    /// no face details are logged and skipped, not fatal.
    pub fn load(dir: &Path) -> Result<Self, EnhanceError> {
        let mut map = HashMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = fs::read_to_string(&path)?;
            match serde_json::from_str::<FaceData>(&raw) {
                Ok(data) => match data.face_details.into_iter().next() {
                    Some(detail) => {
                        map.insert(stem.to_string(), detail);
                    }
                    None => warn!("no face details in {}", path.display()),
                },
                Err(err) => warn!("skipping {}: {err}", path.display()),
            }
        }
        Ok(Self(map))
    }

    pub fn get(&self, external_id: &str) -> Option<&FaceDetail> {
        self.0.get(external_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, external_id: impl Into<String>, detail: FaceDetail) {
        self.0.insert(external_id.into(), detail);
    }
}
