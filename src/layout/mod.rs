//! Fits a string inside an arbitrary closed outline: binary search over the
//! font size, with a scanline word packer deciding whether a size fits.

use tracing::debug;

use crate::geometry::{NormalizedRect, Point, Polygon};
use crate::model::{LayoutLine, TextLayout};
use crate::settings::LayoutSettings;

mod font;

pub use font::{EstimatedMetrics, FontMetrics, load_family, load_font_metrics, resolve_measure};

/// Font metrics in pixels for a given size. Descent is a positive distance
/// below the baseline.
pub trait TextMeasure: Send + Sync {
    fn width(&self, text: &str, font_size: f32) -> f32;
    fn ascent(&self, font_size: f32) -> f32;
    fn descent(&self, font_size: f32) -> f32;
}

/// Largest integer size in `[min_size, max_size]` the binary search finds a
/// layout for, or `None` when even `min_size` does not fit. `shape` is in
/// pixel coordinates.
///
/// Feasibility is only roughly monotonic in the size (scanline rows are
/// quantized), so the search can settle below the true maximum.
pub fn layout(
    text: &str,
    shape: &Polygon,
    measure: &dyn TextMeasure,
    min_size: u32,
    max_size: u32,
    settings: &LayoutSettings,
) -> Option<TextLayout> {
    let min_size = min_size.max(1);
    if min_size > max_size {
        return None;
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let bounds = shape.bounding_box()?;
    if words.is_empty() {
        return Some(TextLayout {
            lines: Vec::new(),
            font_size: max_size,
            total_height: 0.0,
        });
    }

    let mut low = min_size;
    let mut high = max_size;
    let mut best = None;
    while low <= high {
        let size = low + (high - low) / 2;
        match attempt(&words, shape, &bounds, measure, size, settings) {
            Some(found) => {
                best = Some(found);
                low = size + 1;
            }
            None => {
                if size == min_size {
                    break;
                }
                high = size - 1;
            }
        }
    }
    match &best {
        Some(found) => debug!(size = found.font_size, lines = found.lines.len(), "text laid out"),
        None => debug!(words = words.len(), min_size, "text does not fit"),
    }
    best
}

/// Lays out with the font resolved from `settings` and its configured size
/// range.
pub fn layout_with_settings(text: &str, shape: &Polygon, settings: &LayoutSettings) -> Option<TextLayout> {
    let measure = resolve_measure(settings);
    layout(
        text,
        shape,
        measure.as_ref(),
        settings.min_font_size,
        settings.max_font_size,
        settings,
    )
}

/// One fixed-size attempt. Succeeds only if every word is placed.
fn attempt(
    words: &[&str],
    shape: &Polygon,
    bounds: &NormalizedRect,
    measure: &dyn TextMeasure,
    font_size: u32,
    settings: &LayoutSettings,
) -> Option<TextLayout> {
    let size = font_size as f32;
    let line_height = size * settings.line_height_factor;
    if line_height <= 0.0 {
        return None;
    }
    let step = settings.x_step_px.max(0.5);
    let stop = bounds.max_y() - line_height / 2.0;

    let mut lines = Vec::new();
    let mut next = 0usize;
    let mut baseline = bounds.y + line_height;
    while baseline <= stop && next < words.len() {
        let center = baseline - line_height / 2.0;
        let Some((left, right)) = horizontal_extent(shape, bounds, center, step) else {
            baseline += line_height;
            continue;
        };
        let left = left + settings.inset_px;
        let available = right - settings.inset_px - left;
        if available < size * 2.0 {
            baseline += line_height;
            continue;
        }

        let mut line = String::new();
        let mut taken = 0usize;
        while next + taken < words.len() {
            let candidate = if line.is_empty() {
                words[next + taken].to_string()
            } else {
                format!("{} {}", line, words[next + taken])
            };
            if measure.width(&candidate, size) > available {
                break;
            }
            line = candidate;
            taken += 1;
        }
        if taken == 0 {
            // This word is too wide here; a lower row may be wider.
            baseline += line_height;
            continue;
        }
        next += taken;

        let width = measure.width(&line, size);
        lines.push(LayoutLine {
            text: line,
            baseline_position: Point::new(left + (available - width) / 2.0, baseline),
            width,
        });
        baseline += line_height;
    }

    if next < words.len() {
        return None;
    }

    let (first, last) = (lines.first()?, lines.last()?);
    let top = first.baseline_position.y - measure.ascent(size);
    let bottom = last.baseline_position.y + measure.descent(size);
    let shift = bounds.center().y - (top + bottom) / 2.0;
    for line in &mut lines {
        line.baseline_position.y += shift;
    }
    Some(TextLayout {
        lines,
        font_size,
        total_height: bottom - top,
    })
}

/// Leftmost and rightmost sample inside the shape on the row at `y`.
fn horizontal_extent(shape: &Polygon, bounds: &NormalizedRect, y: f32, step: f32) -> Option<(f32, f32)> {
    let mut hits: Option<(f32, f32)> = None;
    let mut x = bounds.x;
    while x <= bounds.max_x() {
        if shape.contains(&Point::new(x, y)) {
            hits = Some(match hits {
                Some((min, max)) => (min.min(x), max.max(x)),
                None => (x, x),
            });
        }
        x += step;
    }
    hits
}
