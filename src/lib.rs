use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

pub mod detector;
pub mod error;
pub mod flood;
pub mod fusion;
pub mod geometry;
pub mod layout;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod refine;
pub mod remote;
pub mod render;
pub mod settings;
#[cfg(test)]
mod test_util;

pub use detector::{DetectorAdapter, EdgeDetector, FileDetector, ObjectDetector};
pub use error::{DetectError, PageError, RemoteError};
pub use fusion::{fuse, fuse_with};
pub use layout::{TextMeasure, layout as layout_text};
pub use model::{
    BalloonId, BalloonShape, DetectedRegion, GeometrySource, MergedBalloon, RefinedBalloon,
    SemanticBalloon, TextLayout,
};
pub use pipeline::{PageOutcome, PageProcessor, PageTicket, PageTracker};
pub use remote::{FileSemantic, Gemini, SemanticSource};

const KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// How balloon geometry is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Detector boxes fused with the remote balloons, then refined.
    #[default]
    Fusion,
    /// Remote boxes grown into balloons by flood fill; no detector.
    Flood,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fusion" => Ok(Mode::Fusion),
            "flood" => Ok(Mode::Flood),
            other => Err(anyhow!("unknown mode: {} (expected fusion or flood)", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub image: PathBuf,
    pub detections: Option<PathBuf>,
    pub semantic: Option<PathBuf>,
    pub mode: Mode,
    pub model: Option<String>,
    pub key: Option<String>,
    pub font_path: Option<String>,
    pub font_family: Option<String>,
    pub debug_overlay: Option<PathBuf>,
    pub settings_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct PageReport<'a> {
    balloons: Vec<BalloonReport<'a>>,
}

#[derive(Debug, Serialize)]
struct BalloonReport<'a> {
    balloon: &'a RefinedBalloon,
    layout: Option<TextLayout>,
}

/// Processes one page and returns the balloons with their text layouts as
/// pretty-printed JSON.
pub async fn run(config: Config) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    if let Some(path) = config.font_path.as_ref() {
        settings.layout.font_path = Some(path.clone());
    }
    if let Some(family) = config.font_family.as_ref() {
        settings.layout.font_family = Some(family.clone());
    }

    let page = image::open(&config.image)
        .with_context(|| format!("failed to open image: {}", config.image.display()))?
        .to_rgb8();
    let page = Arc::new(page);
    debug!(width = page.width(), height = page.height(), "page loaded");

    let detector = build_detector(&config, &settings);
    let semantic = build_semantic(&config, &settings)?;
    let processor = PageProcessor::new(detector, semantic, settings.clone());

    let tracker = PageTracker::new();
    let ticket = tracker.begin();
    let outcome = match config.mode {
        Mode::Fusion => processor.process_page_detailed(page.clone(), &ticket).await?,
        Mode::Flood => PageOutcome {
            detections: Vec::new(),
            balloons: processor.process_page_flood(page.clone(), &ticket).await?,
        },
    };

    let layouts = layout_balloons(&page, &outcome.balloons, &settings.layout);
    info!(
        balloons = outcome.balloons.len(),
        laid_out = layouts.iter().filter(|layout| layout.is_some()).count(),
        "page processed"
    );

    if let Some(path) = config.debug_overlay.as_ref() {
        let items: Vec<_> = outcome
            .balloons
            .iter()
            .zip(&layouts)
            .map(|(balloon, layout)| render::OverlayBalloon {
                balloon,
                layout: layout.as_ref(),
            })
            .collect();
        render::write_overlay(
            path,
            &page,
            &outcome.detections,
            &items,
            settings.layout.font_family.as_deref(),
        )?;
        info!(path = %path.display(), "debug overlay written");
    }

    let report = PageReport {
        balloons: outcome
            .balloons
            .iter()
            .zip(layouts)
            .map(|(balloon, layout)| BalloonReport { balloon, layout })
            .collect(),
    };
    serde_json::to_string_pretty(&report).with_context(|| "failed to serialize page report")
}

/// Lays out every translatable balloon's text inside its shape. Balloons
/// whose text does not fit get `None`.
pub fn layout_balloons(
    page: &image::RgbImage,
    balloons: &[RefinedBalloon],
    settings: &settings::LayoutSettings,
) -> Vec<Option<TextLayout>> {
    let (width, height) = page.dimensions();
    let measure = layout::resolve_measure(settings);
    balloons
        .iter()
        .map(|balloon| {
            if !balloon.merged.semantic.should_translate {
                return None;
            }
            let shape = balloon.shape_in_pixels(width, height);
            layout::layout(
                &balloon.merged.semantic.translated_text,
                &shape,
                measure.as_ref(),
                settings.min_font_size,
                settings.max_font_size,
                settings,
            )
        })
        .collect()
}

fn build_detector(config: &Config, settings: &settings::Settings) -> DetectorAdapter {
    let detector: Arc<dyn ObjectDetector> = match config.detections.as_ref() {
        Some(path) => Arc::new(FileDetector::new(path.clone(), settings.detector.origin)),
        None => Arc::new(EdgeDetector::new(settings.detector.label.clone())),
    };
    DetectorAdapter::new(detector, &settings.detector)
}

fn build_semantic(config: &Config, settings: &settings::Settings) -> Result<Arc<dyn SemanticSource>> {
    if let Some(path) = config.semantic.as_ref() {
        return Ok(Arc::new(FileSemantic::new(path.clone())));
    }
    let key = resolve_key(config.key.as_deref())
        .with_context(|| "no API key found (use --key, GEMINI_API_KEY or GOOGLE_API_KEY)")?;
    let mut gemini = Gemini::new(key, &settings.remote);
    if let Some(model) = config.model.as_ref() {
        gemini = gemini.with_model(model.clone());
    }
    Ok(Arc::new(gemini))
}

fn resolve_key(explicit: Option<&str>) -> Result<String> {
    if let Some(key) = explicit.map(str::trim).filter(|key| !key.is_empty()) {
        return Ok(key.to_string());
    }
    for name in KEY_ENV_VARS {
        if let Ok(value) = std::env::var(name) {
            let value = value.trim();
            if !value.is_empty() {
                return Ok(value.to_string());
            }
        }
    }
    Err(anyhow!("API key is not set"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Box1000, NormalizedRect, Polygon};
    use crate::test_util::{balloon_page, with_temp_home};

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Flood".parse::<Mode>().expect("mode"), Mode::Flood);
        assert_eq!(" fusion ".parse::<Mode>().expect("mode"), Mode::Fusion);
        assert!("grabcut".parse::<Mode>().is_err());
    }

    #[test]
    fn explicit_key_wins() {
        assert_eq!(resolve_key(Some("  abc ")).expect("key"), "abc");
    }

    #[test]
    fn untranslated_balloons_get_no_layout() {
        let page = balloon_page(200, 160, (100.0, 80.0), (60.0, 40.0), 3.0);
        let semantic = SemanticBalloon {
            original_text: "ドン".to_string(),
            translated_text: "BOOM".to_string(),
            should_translate: false,
            shape: BalloonShape::Jagged,
            approx_box: Box1000::from_array([250, 200, 750, 800]),
            center_point: None,
        };
        let mut balloon = RefinedBalloon {
            merged: MergedBalloon {
                id: BalloonId(0),
                semantic: semantic.clone(),
                geometry: NormalizedRect::new(0.2, 0.25, 0.6, 0.5),
                source: GeometrySource::Semantic,
                detection: None,
            },
            contour: Polygon::empty(),
            background_color: model::Rgb::WHITE,
        };
        let settings = settings::LayoutSettings {
            font_family: None,
            ..settings::LayoutSettings::default()
        };
        let skipped = layout_balloons(&page, std::slice::from_ref(&balloon), &settings);
        assert_eq!(skipped, vec![None]);

        balloon.merged.semantic.should_translate = true;
        let laid_out = layout_balloons(&page, &[balloon], &settings);
        let layout = laid_out[0].as_ref().expect("layout");
        assert_eq!(layout.lines.len(), 1);
        assert_eq!(layout.lines[0].text, "BOOM");
    }

    #[test]
    fn run_reports_balloons_from_recorded_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image_path = dir.path().join("page.png");
        balloon_page(200, 160, (100.0, 80.0), (60.0, 40.0), 3.0)
            .save(&image_path)
            .expect("save page");
        let detections_path = dir.path().join("detections.json");
        std::fs::write(
            &detections_path,
            r#"[{"x":0.18,"y":0.225,"width":0.64,"height":0.55,"confidence":0.9,"label":"balloon"}]"#,
        )
        .expect("write detections");
        let semantic_path = dir.path().join("semantic.json");
        std::fs::write(
            &semantic_path,
            r#"{"balloons":[{"original_text":"やあ","translated_text":"HI","box_2d":[250,200,750,800]}]}"#,
        )
        .expect("write semantic");

        let config = Config {
            image: image_path,
            detections: Some(detections_path),
            semantic: Some(semantic_path),
            ..Config::default()
        };
        let output = with_temp_home(|_| {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(run(config))
        })
        .expect("run");
        let value: serde_json::Value = serde_json::from_str(&output).expect("json");
        let balloons = value["balloons"].as_array().expect("balloons");
        assert_eq!(balloons.len(), 1);
        assert_eq!(balloons[0]["balloon"]["source"], "overlap");
        assert_eq!(balloons[0]["layout"]["lines"][0]["text"], "HI");
    }
}
