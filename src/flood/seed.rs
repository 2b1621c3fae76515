use image::RgbImage;

use super::{PixelBox, luma};
use crate::settings::{BackgroundThresholds, FloodSettings};

/// Starting pixel and target colour of one fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Seed {
    pub x: u32,
    pub y: u32,
    pub target: [u8; 3],
}

/// Averages the ring just outside a text box, ignoring ink-dark pixels.
/// Returns the mean colour and the ring pixel closest to it.
pub(crate) fn sample_ring(
    image: &RgbImage,
    text: &PixelBox,
    settings: &FloodSettings,
) -> Option<([u8; 3], (u32, u32))> {
    let (width, height) = image.dimensions();
    let ring = text.expand(settings.ring_px, width, height);
    let mut sum = [0u64; 3];
    let mut pixels = Vec::new();
    for y in ring.y0..ring.y1 {
        for x in ring.x0..ring.x1 {
            if text.contains(x, y) {
                continue;
            }
            let colour = image.get_pixel(x, y).0;
            if luma(colour) < settings.ink_luma as f32 {
                continue;
            }
            for channel in 0..3 {
                sum[channel] += colour[channel] as u64;
            }
            pixels.push((x, y, colour));
        }
    }
    if pixels.is_empty() {
        return None;
    }
    let n = pixels.len() as u64;
    let mean = [
        (sum[0] / n) as u8,
        (sum[1] / n) as u8,
        (sum[2] / n) as u8,
    ];
    let (x, y, _) = pixels
        .iter()
        .min_by(|a, b| distance(a.2, mean).total_cmp(&distance(b.2, mean)))
        .copied()?;
    Some((mean, (x, y)))
}

/// Bright and nearly grey, or one of the tinted papers balloons are often
/// printed on.
pub(crate) fn is_plausible_background(colour: [u8; 3], thresholds: &BackgroundThresholds) -> bool {
    let [r, g, b] = colour;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let saturation = if max == 0 {
        0.0
    } else {
        (max - min) as f32 / max as f32
    };
    if luma(colour) >= thresholds.min_brightness as f32 && saturation <= thresholds.max_saturation {
        return true;
    }

    let [yr, yg, yb] = thresholds.yellow_min;
    let pale_yellow = r >= yr && g >= yg && b >= yb && b <= g;
    let [br, bg, bb] = thresholds.blue_min;
    let pale_blue = r >= br && g >= bg && b >= bb && b >= r;
    pale_yellow || pale_blue
}

/// Uses the pixel under `(x, y)` when it is bright enough, otherwise scans
/// the perimeter of growing squares for the first bright pixel.
pub(crate) fn spiral_search(image: &RgbImage, x: u32, y: u32, settings: &FloodSettings) -> Option<Seed> {
    let (width, height) = image.dimensions();
    let bright = |px: i64, py: i64| -> Option<Seed> {
        if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
            return None;
        }
        let colour = image.get_pixel(px as u32, py as u32).0;
        (luma(colour) > settings.seed_min_luma as f32).then_some(Seed {
            x: px as u32,
            y: py as u32,
            target: colour,
        })
    };

    let (cx, cy) = (x as i64, y as i64);
    if let Some(seed) = bright(cx, cy) {
        return Some(seed);
    }
    let step = settings.seed_search_step.max(1) as usize;
    for radius in (step..=settings.seed_search_radius as usize).step_by(step) {
        let r = radius as i64;
        for dx in -r..=r {
            if let Some(seed) = bright(cx + dx, cy - r).or_else(|| bright(cx + dx, cy + r)) {
                return Some(seed);
            }
        }
        for dy in (-r + 1)..r {
            if let Some(seed) = bright(cx - r, cy + dy).or_else(|| bright(cx + r, cy + dy)) {
                return Some(seed);
            }
        }
    }
    None
}

pub(crate) fn distance(a: [u8; 3], b: [u8; 3]) -> f32 {
    let dr = a[0] as f32 - b[0] as f32;
    let dg = a[1] as f32 - b[1] as f32;
    let db = a[2] as f32 - b[2] as f32;
    (dr * dr + dg * dg + db * db).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::solid_page;

    #[test]
    fn background_plausibility() {
        let thresholds = BackgroundThresholds::default();
        assert!(is_plausible_background([255, 255, 255], &thresholds));
        assert!(is_plausible_background([235, 235, 230], &thresholds));
        assert!(is_plausible_background([250, 235, 170], &thresholds), "aged paper");
        assert!(is_plausible_background([190, 215, 240], &thresholds), "thought bubble");
        assert!(!is_plausible_background([40, 40, 40], &thresholds));
        assert!(!is_plausible_background([230, 30, 30], &thresholds));
    }

    #[test]
    fn ring_sampling_skips_ink() {
        // Text box at (10,10)-(20,20) with a dark glyph touching its edge.
        let page = solid_page(40, 40, [250, 250, 250], &[(8, 12, 3, 3, [0, 0, 0])]);
        let text = PixelBox {
            x0: 10,
            y0: 10,
            x1: 20,
            y1: 20,
        };
        let (mean, (x, y)) = sample_ring(&page, &text, &FloodSettings::default()).expect("ring");
        assert_eq!(mean, [250, 250, 250]);
        assert!(!text.contains(x, y));
    }

    #[test]
    fn spiral_search_escapes_dark_pixels() {
        let page = solid_page(60, 60, [255, 255, 255], &[(20, 20, 9, 9, [0, 0, 0])]);
        let settings = FloodSettings::default();
        let seed = spiral_search(&page, 24, 24, &settings).expect("seed");
        assert_eq!(seed.target, [255, 255, 255]);
        assert!(!(20..29).contains(&seed.x) || !(20..29).contains(&seed.y));

        let dark = solid_page(60, 60, [0, 0, 0], &[]);
        assert_eq!(spiral_search(&dark, 30, 30, &settings), None);
    }
}
