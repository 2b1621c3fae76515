//! Flood-fill balloon segmentation. Works from OCR text boxes and loose seed
//! points alone, so it needs no trained detector.

use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use crate::geometry::{NormalizedRect, Point, Polygon};
use crate::refine::trace_mask;
use crate::settings::FloodSettings;

mod seed;

use seed::{Seed, distance, is_plausible_background, sample_ring, spiral_search};

/// Balloon silhouette as row-span rectangles. Rows with identical extents
/// are folded into one taller span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalloonRegion {
    pub spans: Vec<NormalizedRect>,
    pub bounds: NormalizedRect,
    pub pixel_count: usize,
}

impl BalloonRegion {
    /// Traced outline of the spans, for callers that need a single polygon.
    pub fn outline(&self, width: u32, height: u32, epsilon: f32) -> Polygon {
        let Some(window) = PixelBox::from_normalized(&self.bounds, width, height) else {
            return Polygon::empty();
        };
        let mut mask = GrayImage::new(window.x1 - window.x0, window.y1 - window.y0);
        for span in &self.spans {
            let Some(span) = PixelBox::from_normalized(span, width, height) else {
                continue;
            };
            for y in span.y0.max(window.y0)..span.y1.min(window.y1) {
                for x in span.x0.max(window.x0)..span.x1.min(window.x1) {
                    mask.put_pixel(x - window.x0, y - window.y0, Luma([255]));
                }
            }
        }
        trace_mask(&mask, (window.x0, window.y0), (width, height), epsilon)
    }

    fn merge(&mut self, other: BalloonRegion) {
        self.spans.extend(other.spans);
        self.bounds = self.bounds.union(&other.bounds);
        self.pixel_count += other.pixel_count;
    }
}

/// End-exclusive pixel box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PixelBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelBox {
    fn from_normalized(rect: &NormalizedRect, width: u32, height: u32) -> Option<Self> {
        let (w, h) = (width as f32, height as f32);
        let x0 = (rect.x * w).round().clamp(0.0, w) as u32;
        let y0 = (rect.y * h).round().clamp(0.0, h) as u32;
        let x1 = (rect.max_x() * w).round().clamp(0.0, w) as u32;
        let y1 = (rect.max_y() * h).round().clamp(0.0, h) as u32;
        (x1 > x0 && y1 > y0).then_some(Self { x0, y0, x1, y1 })
    }

    fn inset(&self, amount: u32) -> Option<Self> {
        let inner = Self {
            x0: self.x0 + amount,
            y0: self.y0 + amount,
            x1: self.x1.saturating_sub(amount),
            y1: self.y1.saturating_sub(amount),
        };
        (inner.x1 > inner.x0 && inner.y1 > inner.y0).then_some(inner)
    }

    pub(crate) fn expand(&self, amount: u32, width: u32, height: u32) -> Self {
        Self {
            x0: self.x0.saturating_sub(amount),
            y0: self.y0.saturating_sub(amount),
            x1: self.x1.saturating_add(amount).min(width),
            y1: self.y1.saturating_add(amount).min(height),
        }
    }

    pub(crate) fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    fn center(&self) -> (u32, u32) {
        ((self.x0 + self.x1) / 2, (self.y0 + self.y1) / 2)
    }
}

pub(crate) fn luma(colour: [u8; 3]) -> f32 {
    0.299 * colour[0] as f32 + 0.587 * colour[1] as f32 + 0.114 * colour[2] as f32
}

/// Grows one region per usable seed and merges the overlapping results.
/// `extra_seeds` are normalized page points.
pub fn segment(
    image: &RgbImage,
    text_regions: &[NormalizedRect],
    extra_seeds: &[Point],
    settings: &FloodSettings,
) -> Vec<BalloonRegion> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let text_boxes: Vec<PixelBox> = text_regions
        .iter()
        .filter_map(|rect| PixelBox::from_normalized(rect, width, height))
        .collect();
    let mut filler = Filler::new(image, &text_boxes, settings);

    let mut seeds = Vec::new();
    for text in &text_boxes {
        let Some((target, fallback)) = sample_ring(image, text, settings) else {
            debug!(?text, "no background around text box");
            continue;
        };
        if !is_plausible_background(target, &settings.background) {
            debug!(?text, ?target, "implausible balloon background; not seeding");
            continue;
        }
        let (cx, cy) = text.center();
        let (x, y) = if filler.accepts_start(cx, cy, target) {
            (cx, cy)
        } else {
            fallback
        };
        seeds.push(Seed { x, y, target });
    }
    for point in extra_seeds {
        let x = ((point.x * width as f32) as u32).min(width - 1);
        let y = ((point.y * height as f32) as u32).min(height - 1);
        match spiral_search(image, x, y, settings) {
            Some(seed) => seeds.push(seed),
            None => debug!(x, y, "no bright pixel near seed point; dropped"),
        }
    }

    let mut regions = Vec::new();
    for seed in seeds {
        if let Some(pixels) = filler.grow(seed)
            && pixels.len() >= settings.min_region_pixels
        {
            regions.push(region_from_pixels(&pixels, width, height));
        }
    }
    let found = regions.len();
    let merged = merge_regions(regions, settings.merge_overlap);
    debug!(found, merged = merged.len(), "flood segmentation finished");
    merged
}

/// [`segment`], traced to simplified normalized outlines.
pub fn segment_outlines(
    image: &RgbImage,
    text_regions: &[NormalizedRect],
    extra_seeds: &[Point],
    settings: &FloodSettings,
    epsilon: f32,
) -> Vec<Polygon> {
    let (width, height) = image.dimensions();
    segment(image, text_regions, extra_seeds, settings)
        .iter()
        .map(|region| region.outline(width, height, epsilon))
        .filter(|outline| !outline.is_empty())
        .collect()
}

/// Grows the balloon around one text box and returns its bounds.
pub fn expand_text_region(
    image: &RgbImage,
    text: &NormalizedRect,
    settings: &FloodSettings,
) -> Option<NormalizedRect> {
    segment(image, std::slice::from_ref(text), &[], settings)
        .into_iter()
        .filter(|region| region.bounds.intersection_area(text) > 0.0)
        .max_by(|a, b| a.pixel_count.cmp(&b.pixel_count))
        .map(|region| region.bounds)
}

/// Flat per-page buffers shared by every fill on the page.
struct Filler<'a> {
    image: &'a RgbImage,
    settings: &'a FloodSettings,
    text_mask: Vec<bool>,
    /// Fill generation that last visited each pixel.
    visited: Vec<u32>,
    /// Pixels already claimed by an earlier region.
    claimed: Vec<bool>,
    generation: u32,
}

impl<'a> Filler<'a> {
    fn new(image: &'a RgbImage, text_boxes: &[PixelBox], settings: &'a FloodSettings) -> Self {
        let (width, height) = image.dimensions();
        let len = (width * height) as usize;
        let mut text_mask = vec![false; len];
        for text in text_boxes {
            // Inset so the balloon border is never mistaken for text.
            let Some(inner) = text.inset(settings.text_inset_px) else {
                continue;
            };
            for y in inner.y0..inner.y1 {
                let row = (y * width) as usize;
                text_mask[row + inner.x0 as usize..row + inner.x1 as usize].fill(true);
            }
        }
        Self {
            image,
            settings,
            text_mask,
            visited: vec![0; len],
            claimed: vec![false; len],
            generation: 0,
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y * self.image.width() + x) as usize
    }

    /// Colour used for comparisons. Ink under a text box takes the target
    /// colour so glyphs never wall off the fill.
    fn effective(&self, index: usize, x: u32, y: u32, target: [u8; 3]) -> Option<[u8; 3]> {
        let colour = self.image.get_pixel(x, y).0;
        if self.text_mask[index] {
            let ink = luma(colour) < self.settings.ink_luma as f32
                || distance(colour, target) > self.settings.global_tolerance;
            return Some(if ink { target } else { colour });
        }
        if luma(colour) < self.settings.hard_border_luma as f32 {
            return None;
        }
        Some(colour)
    }

    fn accepts_start(&self, x: u32, y: u32, target: [u8; 3]) -> bool {
        let index = self.index(x, y);
        self.effective(index, x, y, target)
            .is_some_and(|colour| distance(colour, target) <= self.settings.global_tolerance)
    }

    /// 4-connected breadth-first fill under the dual tolerance rule. Glyph
    /// ink darker than a hard border is crossed but left out of the region.
    fn grow(&mut self, seed: Seed) -> Option<Vec<usize>> {
        let (width, height) = self.image.dimensions();
        let start = self.index(seed.x, seed.y);
        if self.claimed[start] {
            return None;
        }
        let start_colour = self.effective(start, seed.x, seed.y, seed.target)?;
        if distance(start_colour, seed.target) > self.settings.global_tolerance {
            return None;
        }

        self.generation += 1;
        let generation = self.generation;
        let mut pixels = Vec::new();
        let mut frontier = VecDeque::new();
        self.visited[start] = generation;
        frontier.push_back((seed.x, seed.y, start_colour));

        let hard_border = self.settings.hard_border_luma as f32;
        while let Some((x, y, colour)) = frontier.pop_front() {
            if luma(self.image.get_pixel(x, y).0) >= hard_border {
                pixels.push(self.index(x, y));
            }
            let neighbours = [
                (x.wrapping_sub(1), y),
                (x + 1, y),
                (x, y.wrapping_sub(1)),
                (x, y + 1),
            ];
            for (nx, ny) in neighbours {
                if nx >= width || ny >= height {
                    continue;
                }
                let index = self.index(nx, ny);
                if self.visited[index] == generation {
                    continue;
                }
                let Some(next) = self.effective(index, nx, ny, seed.target) else {
                    continue;
                };
                if distance(next, seed.target) > self.settings.global_tolerance
                    || distance(next, colour) > self.settings.local_tolerance
                {
                    continue;
                }
                self.visited[index] = generation;
                frontier.push_back((nx, ny, next));
            }
        }

        for &index in &pixels {
            self.claimed[index] = true;
        }
        Some(pixels)
    }
}

fn region_from_pixels(pixels: &[usize], width: u32, height: u32) -> BalloonRegion {
    let w = width as usize;
    let mut rows: Vec<Option<(usize, usize)>> = vec![None; height as usize];
    for &index in pixels {
        let (x, y) = (index % w, index / w);
        rows[y] = Some(match rows[y] {
            Some((min, max)) => (min.min(x), max.max(x)),
            None => (x, x),
        });
    }

    let (wf, hf) = (width as f32, height as f32);
    let mut spans: Vec<NormalizedRect> = Vec::new();
    let mut current: Option<(usize, usize, usize, usize)> = None;
    for (y, row) in rows.iter().enumerate() {
        match (current, row) {
            (Some((top, bottom, min, max)), Some(extent)) if bottom + 1 == y && *extent == (min, max) => {
                current = Some((top, y, min, max));
            }
            (_, row) => {
                if let Some((top, bottom, min, max)) = current.take() {
                    spans.push(span_rect(top, bottom, min, max, wf, hf));
                }
                current = row.map(|(min, max)| (y, y, min, max));
            }
        }
    }
    if let Some((top, bottom, min, max)) = current {
        spans.push(span_rect(top, bottom, min, max, wf, hf));
    }

    let bounds = spans
        .iter()
        .copied()
        .reduce(|a, b| a.union(&b))
        .unwrap_or_default();
    BalloonRegion {
        spans,
        bounds,
        pixel_count: pixels.len(),
    }
}

fn span_rect(top: usize, bottom: usize, min: usize, max: usize, w: f32, h: f32) -> NormalizedRect {
    NormalizedRect::new(
        min as f32 / w,
        top as f32 / h,
        (max + 1 - min) as f32 / w,
        (bottom + 1 - top) as f32 / h,
    )
}

/// Folds together any two regions whose bounds overlap by at least
/// `threshold` of the smaller one, until no such pair is left. Each merge
/// removes a region, so the loop terminates.
pub fn merge_regions(mut regions: Vec<BalloonRegion>, threshold: f32) -> Vec<BalloonRegion> {
    while let Some((keep, absorb)) = find_mergeable(&regions, threshold) {
        let other = regions.remove(absorb);
        regions[keep].merge(other);
    }
    regions
}

fn find_mergeable(regions: &[BalloonRegion], threshold: f32) -> Option<(usize, usize)> {
    for i in 0..regions.len() {
        for j in (i + 1)..regions.len() {
            let (a, b) = (&regions[i].bounds, &regions[j].bounds);
            let smaller = a.area().min(b.area());
            if smaller <= 0.0 {
                continue;
            }
            if a.intersection_area(b) >= threshold * smaller {
                return Some((i, j));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{balloon_page, solid_page};

    fn ring_page() -> RgbImage {
        // White page, black ring (outer radius 40, thickness 4) around the
        // centre, a few grey glyph-like blocks inside.
        let mut page = balloon_page(120, 120, (60.0, 60.0), (40.0, 40.0), 4.0);
        for pixel in page.pixels_mut() {
            if pixel.0 == [120, 120, 120] {
                pixel.0 = [255, 255, 255];
            }
        }
        for (x, y) in [(50u32, 55u32), (58, 55), (66, 55)] {
            for dy in 0..8 {
                for dx in 0..5 {
                    page.put_pixel(x + dx, y + dy, image::Rgb([20, 20, 20]));
                }
            }
        }
        page
    }

    #[test]
    fn text_box_grows_into_its_balloon() {
        let page = ring_page();
        let text = NormalizedRect::from_pixels(&NormalizedRect::new(46.0, 50.0, 30.0, 18.0), 120, 120);
        let bounds = expand_text_region(&page, &text, &FloodSettings::default()).expect("region");
        // Interior of the ring spans roughly 24..96 on both axes.
        assert!((bounds.x * 120.0 - 24.0).abs() <= 2.0, "{:?}", bounds);
        assert!((bounds.max_x() * 120.0 - 96.0).abs() <= 2.0, "{:?}", bounds);
        assert!((bounds.y * 120.0 - 24.0).abs() <= 2.0, "{:?}", bounds);
    }

    #[test]
    fn hard_border_pixels_never_join_a_region() {
        let mut state = 7u32;
        let mut next = move |bound: u32| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) % bound
        };
        let settings = FloodSettings::default();
        for _ in 0..8 {
            let radius = 15.0 + next(20) as f32;
            let size = (radius as u32) * 2 + 20;
            let c = size as f32 / 2.0;
            let mut page = balloon_page(size, size, (c, c), (radius, radius), 3.0);
            for pixel in page.pixels_mut() {
                if pixel.0 == [120, 120, 120] {
                    // Outside is nearly the same colour as the inside.
                    pixel.0 = [250, 250, 250];
                }
            }
            let seeds: Vec<Point> = (0..4)
                .map(|_| Point::new(next(1000) as f32 / 1000.0, next(1000) as f32 / 1000.0))
                .collect();
            let text_boxes: Vec<PixelBox> = Vec::new();
            let mut filler = Filler::new(&page, &text_boxes, &settings);
            for point in &seeds {
                let x = (point.x * size as f32) as u32;
                let y = (point.y * size as f32) as u32;
                let Some(seed) = spiral_search(&page, x, y, &settings) else {
                    continue;
                };
                let Some(pixels) = filler.grow(seed) else {
                    continue;
                };
                for index in pixels {
                    let colour = page.get_pixel(index as u32 % size, index as u32 / size).0;
                    assert!(luma(colour) >= 60.0);
                }
            }
        }
    }

    #[test]
    fn glyph_ink_is_crossed_but_not_recorded() {
        let page = ring_page();
        let settings = FloodSettings::default();
        let text_boxes = vec![PixelBox {
            x0: 46,
            y0: 50,
            x1: 76,
            y1: 68,
        }];
        let mut filler = Filler::new(&page, &text_boxes, &settings);
        let pixels = filler
            .grow(Seed {
                x: 60,
                y: 52,
                target: [255, 255, 255],
            })
            .expect("region");
        assert!(pixels.len() > 1000);
        for index in &pixels {
            let colour = page.get_pixel(*index as u32 % 120, *index as u32 / 120).0;
            assert!(luma(colour) >= 60.0, "{:?}", colour);
        }
        // Below the glyphs, reached through them or around them.
        assert!(pixels.contains(&(64 * 120 + 60)));

        let text = NormalizedRect::from_pixels(&NormalizedRect::new(46.0, 50.0, 30.0, 18.0), 120, 120);
        let regions = segment(&page, &[text], &[], &settings);
        assert_eq!(regions.len(), 1);
        let glyph_pixels = 3 * 5 * 8;
        let ring_interior = regions[0].bounds.area() * 120.0 * 120.0;
        assert!((regions[0].pixel_count as f32) < ring_interior - glyph_pixels as f32);
    }

    #[test]
    fn implausible_backgrounds_are_not_seeded() {
        let page = solid_page(80, 80, [200, 20, 20], &[(30, 30, 20, 10, [0, 0, 0])]);
        let text = NormalizedRect::new(0.35, 0.35, 0.3, 0.15);
        assert!(segment(&page, &[text], &[], &FloodSettings::default()).is_empty());
    }

    #[test]
    fn small_regions_are_dropped() {
        // 5x5 white pocket inside black.
        let page = solid_page(40, 40, [0, 0, 0], &[(10, 10, 5, 5, [255, 255, 255])]);
        let seeds = [Point::new(12.0 / 40.0, 12.0 / 40.0)];
        assert!(segment(&page, &[], &seeds, &FloodSettings::default()).is_empty());

        let settings = FloodSettings {
            min_region_pixels: 25,
            ..FloodSettings::default()
        };
        let regions = segment(&page, &[], &seeds, &settings);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].pixel_count, 25);
        assert_eq!(regions[0].spans.len(), 1);
        assert_eq!(regions[0].bounds, NormalizedRect::new(0.25, 0.25, 0.125, 0.125));
    }

    fn region(x: f32, y: f32, w: f32, h: f32) -> BalloonRegion {
        let rect = NormalizedRect::new(x, y, w, h);
        BalloonRegion {
            spans: vec![rect],
            bounds: rect,
            pixel_count: 100,
        }
    }

    #[test]
    fn merge_reaches_a_fixed_point() {
        let regions = vec![
            region(0.1, 0.1, 0.2, 0.2),
            region(0.12, 0.12, 0.1, 0.1),
            region(0.5, 0.5, 0.2, 0.2),
            region(0.55, 0.5, 0.2, 0.2),
            region(0.8, 0.0, 0.1, 0.1),
        ];
        let once = merge_regions(regions, 0.9);
        assert_eq!(once.len(), 4);
        assert_eq!(once[0].spans.len(), 2);
        assert_eq!(once[0].pixel_count, 200);
        let twice = merge_regions(once.clone(), 0.9);
        assert_eq!(once, twice);
    }

    #[test]
    fn outline_covers_the_spans() {
        let page = solid_page(40, 40, [0, 0, 0], &[(8, 8, 20, 12, [255, 255, 255])]);
        let regions = segment(&page, &[], &[Point::new(0.4, 0.3)], &FloodSettings::default());
        assert_eq!(regions.len(), 1);
        let outline = regions[0].outline(40, 40, 1.0);
        let bounds = outline.bounding_box().expect("outline");
        assert!((bounds.x - 0.2).abs() < 0.03);
        assert!((bounds.y - 0.2).abs() < 0.03);
        assert!((bounds.max_x() - 27.0 / 40.0).abs() < 0.03, "{:?}", bounds);
        assert!((bounds.max_y() - 19.0 / 40.0).abs() < 0.03, "{:?}", bounds);

        let outlines = segment_outlines(&page, &[], &[Point::new(0.4, 0.3)], &FloodSettings::default(), 1.0);
        assert_eq!(outlines, vec![outline]);
    }
}
