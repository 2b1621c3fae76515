use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use ttf_parser::{Face, name_id};
use usvg::fontdb;

use super::TextMeasure;
use crate::settings::LayoutSettings;

const FALLBACK_FAMILIES: &[&str] = &["sans-serif", "Arial", "Helvetica", "DejaVu Sans", "Noto Sans"];

/// Metrics read straight from a TrueType/OpenType face.
#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    face_index: u32,
    units_per_em: u16,
    ascender: i16,
    descender: i16,
    space_advance: u16,
    family: Option<String>,
}

impl std::fmt::Debug for FontMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontMetrics")
            .field("family", &self.family)
            .field("face_index", &self.face_index)
            .field("units_per_em", &self.units_per_em)
            .finish()
    }
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    fn scale(&self, font_size: f32) -> f32 {
        font_size / self.units_per_em.max(1) as f32
    }
}

impl TextMeasure for FontMetrics {
    fn width(&self, text: &str, font_size: f32) -> f32 {
        let Ok(face) = Face::parse(&self.data, self.face_index) else {
            return estimate_text_width_units(text) * font_size;
        };
        let mut advance = 0u32;
        for ch in text.chars() {
            if ch == '\n' {
                continue;
            }
            if ch == ' ' {
                advance = advance.saturating_add(self.space_advance as u32);
                continue;
            }
            let glyph_advance = face
                .glyph_index(ch)
                .and_then(|glyph| face.glyph_hor_advance(glyph))
                .unwrap_or(self.space_advance);
            advance = advance.saturating_add(glyph_advance as u32);
        }
        advance as f32 * self.scale(font_size)
    }

    fn ascent(&self, font_size: f32) -> f32 {
        self.ascender.max(0) as f32 * self.scale(font_size)
    }

    fn descent(&self, font_size: f32) -> f32 {
        (self.descender as f32).abs() * self.scale(font_size)
    }
}

/// Character-class width estimate for when no font could be loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatedMetrics;

impl TextMeasure for EstimatedMetrics {
    fn width(&self, text: &str, font_size: f32) -> f32 {
        estimate_text_width_units(text) * font_size
    }

    fn ascent(&self, font_size: f32) -> f32 {
        font_size * 0.8
    }

    fn descent(&self, font_size: f32) -> f32 {
        font_size * 0.2
    }
}

fn estimate_char_units(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if matches!(ch as u32, 0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF) {
        1.0
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().filter(|ch| *ch != '\n').map(estimate_char_units).sum()
}

pub fn load_font_metrics(path: &Path) -> Result<FontMetrics> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    parse_font(Arc::new(data), 0)
        .with_context(|| format!("failed to parse font: {}", path.display()))
}

fn parse_font(data: Arc<Vec<u8>>, face_index: u32) -> Result<FontMetrics> {
    let face = Face::parse(&data, face_index).map_err(|err| anyhow!("{}", err))?;
    let units_per_em = face.units_per_em().max(1);
    let space_advance = face
        .glyph_index(' ')
        .and_then(|id| face.glyph_hor_advance(id))
        .unwrap_or(units_per_em / 2);
    let ascender = face.ascender();
    let descender = face.descender();
    let family = extract_family_name(&face);
    Ok(FontMetrics {
        data,
        face_index,
        units_per_em,
        ascender,
        descender,
        space_advance,
        family,
    })
}

/// Looks a family up among the system fonts. `sans-serif` maps to the
/// database's generic sans face.
pub fn load_family(db: &fontdb::Database, family: &str) -> Result<FontMetrics> {
    let families = if family.eq_ignore_ascii_case("sans-serif") {
        vec![fontdb::Family::SansSerif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let (data, face_index) = db
        .with_face_data(id, |data, index| (data.to_vec(), index))
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    parse_font(Arc::new(data), face_index)
}

/// Picks the measurer for layout: explicit font file, then the configured
/// family, then common system families. Falls back to estimates with a
/// warning so layout still runs on machines without fonts.
pub fn resolve_measure(settings: &LayoutSettings) -> Arc<dyn TextMeasure> {
    if let Some(path) = settings.font_path.as_deref() {
        match load_font_metrics(Path::new(path)) {
            Ok(metrics) => return Arc::new(metrics),
            Err(err) => warn!("{:#}", err),
        }
    }

    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    let requested = settings.font_family.as_deref().into_iter();
    for family in requested.chain(FALLBACK_FAMILIES.iter().copied()) {
        match load_family(&db, family) {
            Ok(metrics) => {
                debug!(requested = family, found = ?metrics.family(), "layout font resolved");
                return Arc::new(metrics);
            }
            Err(err) => debug!("{}", err),
        }
    }
    warn!("no usable font found; text widths are estimated");
    Arc::new(EstimatedMetrics)
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}
