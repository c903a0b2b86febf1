use image::{imageops::FilterType, DynamicImage};

/// Hashes at or below this Hamming distance count as the same screen.
const HAMMING_THRESHOLD: u32 = 10;

/// Images whose aspect ratios differ by more than this are never similar.
const ASPECT_TOLERANCE: f64 = 0.05;

/// 64-bit difference hash: shrink to 9x8 luma, emit one bit per pixel pair,
/// set when the left pixel is brighter than its right neighbour.
pub fn dhash(img: &DynamicImage) -> u64 {
    let small = img.resize_exact(9, 8, FilterType::Triangle).to_luma8();
    let mut hash = 0u64;
    for y in 0..8 {
        for x in 0..8 {
            hash <<= 1;
            if small.get_pixel(x, y)[0] > small.get_pixel(x + 1, y)[0] {
                hash |= 1;
            }
        }
    }
    hash
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Perceptual similarity decision: aspect ratios within 5% of each other and
/// hash distance within [`HAMMING_THRESHOLD`]. Symmetric in its arguments.
pub fn images_similar(a: &DynamicImage, b: &DynamicImage) -> bool {
    let ratio_a = a.width() as f64 / a.height() as f64;
    let ratio_b = b.width() as f64 / b.height() as f64;
    if (ratio_a - ratio_b).abs() / ratio_a.max(ratio_b) >= ASPECT_TOLERANCE {
        return false;
    }
    hamming_distance(dhash(a), dhash(b)) <= HAMMING_THRESHOLD
}

#[cfg(test)]
mod test {
    use image::{Rgba, RgbaImage};

    use super::*;

    fn gradient(width: u32, height: u32, invert: bool) -> DynamicImage {
        let mut img = RgbaImage::new(width, height);
        for (x, _, px) in img.enumerate_pixels_mut() {
            let v = (x * 255 / width.max(1)) as u8;
            let v = if invert { 255 - v } else { v };
            *px = Rgba([v, v, v, 255]);
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn similar_to_itself() {
        let img = gradient(120, 80, false);
        assert!(images_similar(&img, &img));
        assert_eq!(hamming_distance(dhash(&img), dhash(&img)), 0);
    }

    #[test]
    fn symmetric() {
        let a = gradient(120, 80, false);
        let b = gradient(120, 80, true);
        assert_eq!(images_similar(&a, &b), images_similar(&b, &a));
        assert_eq!(
            hamming_distance(dhash(&a), dhash(&b)),
            hamming_distance(dhash(&b), dhash(&a))
        );
    }

    #[test]
    fn inverted_gradient_is_different() {
        let a = gradient(120, 80, false);
        let b = gradient(120, 80, true);
        assert!(!images_similar(&a, &b));
    }

    #[test]
    fn mild_brightness_change_is_similar() {
        let a = gradient(120, 80, false);
        let mut b = a.to_rgba8();
        for px in b.pixels_mut() {
            px.0 = [
                px.0[0].saturating_add(12),
                px.0[1].saturating_add(12),
                px.0[2].saturating_add(12),
                255,
            ];
        }
        assert!(images_similar(&a, &DynamicImage::ImageRgba8(b)));
    }

    #[test]
    fn aspect_ratio_gate_rejects_resized_canvas() {
        // Same content, but a 4:3 capture is never the same screen as 16:9.
        let a = gradient(160, 120, false);
        let b = gradient(160, 90, false);
        assert!(!images_similar(&a, &b));
    }
}
