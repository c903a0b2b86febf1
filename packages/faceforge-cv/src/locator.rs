use std::time::Instant;

use color_print::cprintln;
use image::{
    imageops::{self, FilterType},
    DynamicImage, ImageBuffer, Luma,
};
use imageproc::template_matching::{find_extremes, Extremes};
use thiserror::Error;

type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Matches below this confidence are never accepted, at any scale.
pub const CONFIDENCE_FLOOR: f32 = 0.5;

/// Number of downscale steps tried against the screenshot.
const SCALE_STEPS: u32 = 10;

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("cannot find `{template}` on screen")]
    NotFound { template: String },
}

/// A successful template match, in device coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Located {
    pub x: u32,
    pub y: u32,
    pub confidence: f32,
}

/// Multi-scale template locator.
///
/// Reference images are captured at design resolution while live screenshots
/// come in at whatever size the capture backend produces, so the screenshot is
/// correlated against the template at a ladder of descending scales and the
/// best-scoring scale wins. The returned center is expressed in device pixels.
pub struct TemplateLocator {
    device_width: u32,
    device_height: u32,
}

impl TemplateLocator {
    pub fn new(device_width: u32, device_height: u32) -> Self {
        Self {
            device_width,
            device_height,
        }
    }

    /// Map a point in `source`-sized screenshot space onto the device screen,
    /// scaling proportionally and rounding to the nearest pixel.
    pub fn to_device_coords(&self, x: u32, y: u32, source_w: u32, source_h: u32) -> (u32, u32) {
        let dx = (x as f64 / source_w as f64 * self.device_width as f64).round() as u32;
        let dy = (y as f64 / source_h as f64 * self.device_height as f64).round() as u32;
        (dx, dy)
    }

    /// Search `screenshot` for `template` across the scale ladder.
    ///
    /// Scale `i` resizes the screenshot to `(1 - i/10)` of its width with the
    /// aspect ratio preserved; the ladder stops as soon as the candidate is
    /// smaller than the template in either dimension. The best match must beat
    /// every other scale strictly and clear [`CONFIDENCE_FLOOR`].
    pub fn locate(
        &self,
        name: &str,
        template: &DynamicImage,
        screenshot: &DynamicImage,
    ) -> Result<Located, LocateError> {
        let template = template.to_luma32f();
        let screen = screenshot.to_luma32f();

        let start = Instant::now();
        // (confidence, match center in candidate space, candidate dims)
        let mut best: Option<(f32, (u32, u32), (u32, u32))> = None;
        for i in 0..SCALE_STEPS {
            let factor = 1.0 - i as f64 / SCALE_STEPS as f64;
            let scaled_w = (screen.width() as f64 * factor).round() as u32;
            let scaled_h =
                (screen.height() as f64 * scaled_w as f64 / screen.width() as f64).round() as u32;
            if scaled_w < template.width() || scaled_h < template.height() {
                // Every later step is smaller still.
                break;
            }

            let candidate = if scaled_w == screen.width() {
                screen.clone()
            } else {
                imageops::resize(&screen, scaled_w, scaled_h, FilterType::Lanczos3)
            };

            let res = match_template_ccoeff_normed(&candidate, &template);
            let Extremes {
                max_value,
                max_value_location,
                ..
            } = find_extremes(&res);

            if max_value > CONFIDENCE_FLOOR && best.map_or(true, |(c, _, _)| max_value > c) {
                let center = (
                    max_value_location.0 + template.width() / 2,
                    max_value_location.1 + template.height() / 2,
                );
                best = Some((max_value, center, (scaled_w, scaled_h)));
            }
        }

        match best {
            Some((confidence, (cx, cy), (src_w, src_h))) => {
                let (x, y) = self.to_device_coords(cx, cy, src_w, src_h);
                cprintln!(
                    "<dim>[TemplateLocator]: {} found at ({}, {}), confidence {:.3}, cost: {:?}</dim>",
                    name,
                    x,
                    y,
                    confidence,
                    start.elapsed()
                );
                Ok(Located { x, y, confidence })
            }
            None => {
                cprintln!(
                    "<dim>[TemplateLocator]: {} not found ({}x{} in {}x{}), cost: {:?}</dim>",
                    name,
                    template.width(),
                    template.height(),
                    screen.width(),
                    screen.height(),
                    start.elapsed()
                );
                Err(LocateError::NotFound {
                    template: name.to_string(),
                })
            }
        }
    }
}

/// Zero-mean normalized cross-correlation, anchored on the top left.
///
/// Both the template and each window are centered on their own mean before
/// correlating, so a window of flat or merely bright pixels scores near zero
/// instead of inheriting a high score from its DC component. Output values lie
/// in `[-1, 1]`.
pub fn match_template_ccoeff_normed(image: &GrayF32, template: &GrayF32) -> GrayF32 {
    assert!(
        image.width() >= template.width() && image.height() >= template.height(),
        "image must be at least as large as the template"
    );

    let (tw, th) = template.dimensions();
    let n = (tw * th) as f32;
    let t_mean = template.as_raw().iter().sum::<f32>() / n;
    let t_centered: Vec<f32> = template.as_raw().iter().map(|p| p - t_mean).collect();
    let t_sq_sum: f32 = t_centered.iter().map(|v| v * v).sum();

    let res_w = image.width() - tw + 1;
    let res_h = image.height() - th + 1;
    let mut out = Vec::with_capacity((res_w * res_h) as usize);
    for y in 0..res_h {
        for x in 0..res_w {
            let mut sum = 0.0;
            for ty in 0..th {
                for tx in 0..tw {
                    sum += image.get_pixel(x + tx, y + ty)[0];
                }
            }
            let w_mean = sum / n;

            let mut num = 0.0;
            let mut w_sq_sum = 0.0;
            for ty in 0..th {
                for tx in 0..tw {
                    let wv = image.get_pixel(x + tx, y + ty)[0] - w_mean;
                    num += wv * t_centered[(ty * tw + tx) as usize];
                    w_sq_sum += wv * wv;
                }
            }

            let denom = (t_sq_sum * w_sq_sum).sqrt();
            out.push(if denom > f32::EPSILON { num / denom } else { 0.0 });
        }
    }
    ImageBuffer::from_vec(res_w, res_h, out).unwrap()
}

#[cfg(test)]
mod test {
    use image::{DynamicImage, Rgba, RgbaImage};

    use super::*;

    // Deterministic low-frequency pattern with a little noise on top; smooth
    // enough to survive Lanczos resampling, busy enough to match uniquely.
    fn synthetic_screen(width: u32, height: u32, seed: u32) -> DynamicImage {
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
        let mut img = RgbaImage::new(width, height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let noise = (state >> 24) as f32 / 255.0 * 20.0;
            let v = 110.0
                + 70.0 * (x as f32 * 0.17).sin() * (y as f32 * 0.13).cos()
                + 45.0 * ((x + 2 * y) as f32 * 0.05).sin()
                + noise;
            let v = v.clamp(0.0, 255.0) as u8;
            *px = Rgba([v, v, v, 255]);
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn locates_exact_crop_at_native_scale() {
        let screen = synthetic_screen(160, 120, 7);
        let template = screen.crop_imm(60, 40, 24, 20);

        // Device runs at twice the screenshot resolution.
        let locator = TemplateLocator::new(320, 240);
        let located = locator.locate("crop", &template, &screen).unwrap();

        assert!(located.confidence > 0.9, "confidence {}", located.confidence);
        // Crop center (72, 50) in a 160x120 capture maps to (144, 100).
        assert!(located.x.abs_diff(144) <= 3, "x = {}", located.x);
        assert!(located.y.abs_diff(100) <= 3, "y = {}", located.y);
    }

    #[test]
    fn locates_template_captured_at_smaller_scale() {
        // The reference was cropped from a 200x150 design; the live screenshot
        // is the same content captured 1.5x larger.
        let design = synthetic_screen(200, 150, 3);
        let template = design.crop_imm(80, 60, 30, 30);
        let live = DynamicImage::ImageRgba8(imageops::resize(
            &design.to_rgba8(),
            300,
            225,
            FilterType::Lanczos3,
        ));

        let locator = TemplateLocator::new(200, 150);
        let located = locator.locate("scaled-crop", &template, &live).unwrap();

        // Template center sits at fraction (0.475, 0.5) of the design.
        assert!(located.x.abs_diff(95) <= 8, "x = {}", located.x);
        assert!(located.y.abs_diff(75) <= 8, "y = {}", located.y);
    }

    fn noise_image(width: u32, height: u32, seed: u32) -> DynamicImage {
        let mut state = seed.wrapping_mul(747796405).wrapping_add(2891336453);
        let mut img = RgbaImage::new(width, height);
        for px in img.pixels_mut() {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let v = (state >> 24) as u8;
            *px = Rgba([v, v, v, 255]);
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn unrelated_template_is_not_found() {
        let screen = synthetic_screen(120, 90, 1);
        let template = noise_image(24, 24, 99);

        let locator = TemplateLocator::new(120, 90);
        let err = locator.locate("stranger", &template, &screen).unwrap_err();
        assert!(matches!(err, LocateError::NotFound { template } if template == "stranger"));
    }

    #[test]
    fn oversized_template_terminates_with_not_found() {
        let screen = synthetic_screen(100, 80, 5);
        let template = synthetic_screen(200, 200, 5);

        let locator = TemplateLocator::new(100, 80);
        assert!(locator.locate("too-big", &template, &screen).is_err());
    }

    #[test]
    fn device_transform_rounds_to_nearest() {
        let locator = TemplateLocator::new(1920, 1080);
        // 100/333 * 1920 = 576.57..., 50/333 * 1080 = 162.16...
        assert_eq!(locator.to_device_coords(100, 50, 333, 333), (577, 162));
        assert_eq!(locator.to_device_coords(0, 0, 333, 333), (0, 0));
    }

    #[test]
    fn ccoeff_ignores_brightness_offset() {
        let screen_img = synthetic_screen(80, 60, 11);
        let screen = screen_img.to_luma32f();
        let template = screen_img.crop_imm(30, 20, 16, 16).to_luma32f();

        let brightened = ImageBuffer::from_fn(screen.width(), screen.height(), |x, y| {
            Luma([screen.get_pixel(x, y)[0] + 0.2])
        });

        let res = match_template_ccoeff_normed(&brightened, &template);
        let Extremes {
            max_value,
            max_value_location,
            ..
        } = find_extremes(&res);
        assert!(max_value > 0.95, "max {}", max_value);
        assert_eq!(max_value_location, (30, 20));
    }
}
