use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{BorderType, find_contours};
use tracing::debug;

use crate::geometry::{NormalizedRect, Point, Polygon, polygon_area, simplify_closed};
use crate::model::{MergedBalloon, RefinedBalloon, Rgb};
use crate::settings::RefineSettings;

mod colour_model;

use colour_model::{Colour, ColourModel};

/// Pixel rectangle, end-exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl PixelRect {
    fn from_normalized(rect: &NormalizedRect, width: u32, height: u32) -> Option<Self> {
        if !(rect.width > 0.0 && rect.height > 0.0) {
            return None;
        }
        let w = width as f32;
        let h = height as f32;
        let x0 = (rect.x * w).floor().clamp(0.0, w) as u32;
        let y0 = (rect.y * h).floor().clamp(0.0, h) as u32;
        let x1 = (rect.max_x() * w).ceil().clamp(0.0, w) as u32;
        let y1 = (rect.max_y() * h).ceil().clamp(0.0, h) as u32;
        // A seed needs an interior to segment.
        if x1 < x0 + 3 || y1 < y0 + 3 {
            return None;
        }
        Some(Self { x0, y0, x1, y1 })
    }

    fn expand(&self, margin: u32, width: u32, height: u32) -> Self {
        Self {
            x0: self.x0.saturating_sub(margin),
            y0: self.y0.saturating_sub(margin),
            x1: self.x1.saturating_add(margin).min(width),
            y1: self.y1.saturating_add(margin).min(height),
        }
    }

    fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    fn on_edge(&self, x: u32, y: u32) -> bool {
        self.contains(x, y) && (x == self.x0 || y == self.y0 || x + 1 == self.x1 || y + 1 == self.y1)
    }
}

/// Foreground mask over a window of the page.
struct Segmentation {
    window: PixelRect,
    mask: GrayImage,
}

/// Traces the balloon seeded by `seed` and returns its outline, normalized
/// to the page. An empty polygon means no usable outline was found.
pub fn refine(image: &RgbImage, seed: &NormalizedRect, settings: &RefineSettings) -> Polygon {
    match segment(image, seed, settings) {
        Some(segmentation) => segmentation.outline(image.width(), image.height(), settings.epsilon_px),
        None => Polygon::empty(),
    }
}

/// Refines one merged balloon. The fill colour is sampled from the traced
/// region when enabled, white otherwise.
pub fn refine_balloon(
    image: &RgbImage,
    merged: MergedBalloon,
    settings: &RefineSettings,
) -> RefinedBalloon {
    let segmentation = segment(image, &merged.geometry, settings);
    let contour = segmentation
        .as_ref()
        .map(|s| s.outline(image.width(), image.height(), settings.epsilon_px))
        .unwrap_or_else(Polygon::empty);
    let background_color = if settings.sample_background {
        segmentation
            .as_ref()
            .and_then(|s| s.fill_colour(image))
            .unwrap_or(Rgb::WHITE)
    } else {
        Rgb::WHITE
    };
    if contour.is_empty() {
        debug!(id = merged.id.0, "no contour traced; rounded-rect fallback");
    } else {
        debug!(id = merged.id.0, points = contour.len(), "contour traced");
    }
    RefinedBalloon {
        merged,
        contour,
        background_color,
    }
}

fn segment(image: &RgbImage, seed: &NormalizedRect, settings: &RefineSettings) -> Option<Segmentation> {
    let (width, height) = image.dimensions();
    let seed = PixelRect::from_normalized(seed, width, height)?;
    let window = seed.expand(settings.margin_px, width, height);
    let (cw, ch) = (window.width(), window.height());

    let mut colours: Vec<Colour> = Vec::with_capacity((cw * ch) as usize);
    let mut inside = Vec::with_capacity((cw * ch) as usize);
    for y in window.y0..window.y1 {
        for x in window.x0..window.x1 {
            let [r, g, b] = image.get_pixel(x, y).0;
            colours.push([r as f32, g as f32, b as f32]);
            inside.push(seed.contains(x, y));
        }
    }

    // Everything inside the seed starts as probable foreground; everything
    // outside is fixed background.
    let mut foreground = inside.clone();
    let mut bg_samples: Vec<Colour> = colours
        .iter()
        .zip(&inside)
        .filter(|(_, inside)| !**inside)
        .map(|(c, _)| *c)
        .collect();
    if bg_samples.is_empty() {
        // Seed covers the whole window; its own rim is the best guess.
        for y in window.y0..window.y1 {
            for x in window.x0..window.x1 {
                if seed.on_edge(x, y) {
                    bg_samples.push(colours[((y - window.y0) * cw + (x - window.x0)) as usize]);
                }
            }
        }
    }
    let fg_samples: Vec<Colour> = colours
        .iter()
        .zip(&foreground)
        .filter(|(_, fg)| **fg)
        .map(|(c, _)| *c)
        .collect();

    // The background model stays fitted to the fixed pixels; only the
    // foreground model follows the labelling.
    let clusters = settings.clusters.max(1);
    let bg_model = ColourModel::fit(&bg_samples, clusters);
    let mut fg_model = ColourModel::fit(&fg_samples, clusters);

    for round in 0..settings.iterations.max(1) {
        let previous = foreground.clone();
        for (index, colour) in colours.iter().enumerate() {
            if inside[index] {
                foreground[index] = fg_model.cost(colour) <= bg_model.cost(colour);
            }
        }
        smooth(&mut foreground, &inside, cw, ch);

        let fg_samples: Vec<Colour> = colours
            .iter()
            .zip(&foreground)
            .filter(|(_, fg)| **fg)
            .map(|(c, _)| *c)
            .collect();
        if fg_samples.is_empty() {
            debug!(round, "foreground emptied; keeping previous labelling");
            foreground = previous;
            break;
        }
        fg_model = ColourModel::fit(&fg_samples, clusters);
    }

    let mut mask = GrayImage::new(cw, ch);
    for (index, fg) in foreground.iter().enumerate() {
        if *fg {
            let index = index as u32;
            mask.put_pixel(index % cw, index / cw, Luma([255]));
        }
    }
    Some(Segmentation { window, mask })
}

/// Largest outer contour of a binary mask placed at `offset` on the page,
/// simplified and normalized to the page. Of equal-area contours the first
/// found wins.
pub(crate) fn trace_mask(
    mask: &GrayImage,
    offset: (u32, u32),
    page: (u32, u32),
    epsilon: f32,
) -> Polygon {
    // Foreground touching the mask edge still needs a border to trace.
    let (mw, mh) = mask.dimensions();
    let mut padded = GrayImage::new(mw + 2, mh + 2);
    for (x, y, pixel) in mask.enumerate_pixels() {
        padded.put_pixel(x + 1, y + 1, *pixel);
    }

    let best = find_contours::<u32>(&padded)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .map(|contour| {
            let points: Vec<Point> = contour
                .points
                .iter()
                .map(|p| Point::new(p.x as f32 - 1.0, p.y as f32 - 1.0))
                .collect();
            let area = polygon_area(&points);
            (points, area)
        })
        .fold(None::<(Vec<Point>, f32)>, |best, candidate| match best {
            Some(current) if current.1 >= candidate.1 => Some(current),
            _ => Some(candidate),
        });
    let Some((points, _)) = best else {
        return Polygon::empty();
    };
    let simplified = simplify_closed(&points, epsilon.max(0.0));
    if simplified.len() < 3 {
        return Polygon::empty();
    }

    let (ox, oy) = (offset.0 as f32, offset.1 as f32);
    let (w, h) = (page.0.max(1) as f32, page.1.max(1) as f32);
    Polygon::new(
        simplified
            .into_iter()
            .map(|p| Point::new((p.x + ox) / w, (p.y + oy) / h).clamp_unit())
            .collect(),
    )
}

/// Majority vote over each probable pixel's 3x3 neighbourhood. Pulls the
/// labelling towards coherent regions the way a pairwise term would.
fn smooth(labels: &mut [bool], probable: &[bool], width: u32, height: u32) {
    let snapshot = labels.to_vec();
    let (w, h) = (width as i64, height as i64);
    for y in 0..h {
        for x in 0..w {
            let index = (y * w + x) as usize;
            if !probable[index] {
                continue;
            }
            let mut votes = 0;
            let mut total = 0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    total += 1;
                    if snapshot[(ny * w + nx) as usize] {
                        votes += 1;
                    }
                }
            }
            labels[index] = votes * 2 > total;
        }
    }
}

impl Segmentation {
    fn outline(&self, page_width: u32, page_height: u32, epsilon: f32) -> Polygon {
        trace_mask(
            &self.mask,
            (self.window.x0, self.window.y0),
            (page_width, page_height),
            epsilon,
        )
    }

    /// Per-channel median of the bright foreground pixels; text ink is
    /// excluded so it cannot tint the fill.
    fn fill_colour(&self, image: &RgbImage) -> Option<Rgb> {
        let mut channels: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for (x, y, pixel) in self.mask.enumerate_pixels() {
            if pixel[0] == 0 {
                continue;
            }
            let colour = *image.get_pixel(self.window.x0 + x, self.window.y0 + y);
            if Rgb(colour.0).luma() < 128.0 {
                continue;
            }
            for (channel, values) in channels.iter_mut().enumerate() {
                values.push(colour.0[channel]);
            }
        }
        if channels[0].is_empty() {
            return None;
        }
        let mut median = [0u8; 3];
        for (channel, values) in channels.iter_mut().enumerate() {
            values.sort_unstable();
            median[channel] = values[values.len() / 2];
        }
        Some(Rgb(median))
    }
}
