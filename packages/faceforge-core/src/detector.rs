use std::{fs::File, io::BufReader, path::Path};

use image::DynamicImage;
use log::debug;

use crate::EnhanceError;

/// Gallery thumbnails and post-save detections must be at least this wide to
/// count as a face; smaller hits are hair, jewellery and background noise.
pub const FACE_MIN_WIDTH: u32 = 300;

/// An axis-aligned face bounding box, in screenshot pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Component-wise average of a set of rects; the fallback position when a
    /// post-save screen refuses to yield a clean single detection.
    pub fn average(rects: &[FaceRect]) -> Option<FaceRect> {
        if rects.is_empty() {
            return None;
        }
        let n = rects.len() as u32;
        let sum = |f: fn(&FaceRect) -> u32| rects.iter().map(f).sum::<u32>() / n;
        Some(FaceRect {
            x: sum(|r| r.x),
            y: sum(|r| r.y),
            width: sum(|r| r.width),
            height: sum(|r| r.height),
        })
    }
}

/// SeetaFace-backed detector with a minimum-width validity filter.
pub struct FaceDetector {
    model: rustface::Model,
}

impl FaceDetector {
    pub fn from_model_file(path: &Path) -> Result<Self, EnhanceError> {
        let file = File::open(path)?;
        let model = rustface::read_model(BufReader::new(file))
            .map_err(|err| EnhanceError::Detector(format!("{}: {err}", path.display())))?;
        Ok(Self { model })
    }

    /// Detect faces at least `min_width` pixels wide in `img`.
    pub fn detect(&self, img: &DynamicImage, min_width: u32) -> Vec<FaceRect> {
        let gray = img.to_luma8();
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(20);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let image_data = rustface::ImageData::new(gray.as_raw(), gray.width(), gray.height());
        let faces = detector.detect(&image_data);
        debug!("detector found {} raw faces", faces.len());

        faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                let rect = FaceRect {
                    x: bbox.x().max(0) as u32,
                    y: bbox.y().max(0) as u32,
                    width: bbox.width(),
                    height: bbox.height(),
                };
                (rect.width > min_width).then_some(rect)
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn center_of_rect() {
        let rect = FaceRect {
            x: 100,
            y: 50,
            width: 40,
            height: 60,
        };
        assert_eq!(rect.center(), (120, 80));
    }

    #[test]
    fn average_of_rects() {
        let rects = [
            FaceRect {
                x: 100,
                y: 100,
                width: 300,
                height: 300,
            },
            FaceRect {
                x: 200,
                y: 120,
                width: 320,
                height: 340,
            },
        ];
        assert_eq!(
            FaceRect::average(&rects),
            Some(FaceRect {
                x: 150,
                y: 110,
                width: 310,
                height: 320,
            })
        );
        assert_eq!(FaceRect::average(&[]), None);
    }
}
