use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::error::{DetectError, DetectResult};
use crate::geometry::NormalizedRect;
use crate::model::DetectedRegion;
use crate::settings::DetectorSettings;

mod edge;

pub use edge::EdgeDetector;

/// Vertical origin of a model's native coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoordinateOrigin {
    #[default]
    TopLeft,
    BottomLeft,
}

/// One raw model output, normalized to the image but still in the model's
/// own coordinate convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(flatten)]
    pub rect: NormalizedRect,
    pub confidence: f32,
    pub label: String,
}

pub type DetectorFuture = Pin<Box<dyn Future<Output = DetectResult<Vec<RawDetection>>> + Send>>;

/// Black-box object detector.
pub trait ObjectDetector: Send + Sync {
    fn origin(&self) -> CoordinateOrigin;
    fn infer(&self, image: Arc<RgbImage>) -> DetectorFuture;
}

/// Wraps an [`ObjectDetector`], keeping only confident balloon-class boxes
/// converted to top-left normalized coordinates.
#[derive(Clone)]
pub struct DetectorAdapter {
    detector: Option<Arc<dyn ObjectDetector>>,
    label: String,
    min_confidence: f32,
}

impl DetectorAdapter {
    pub fn new(detector: Arc<dyn ObjectDetector>, settings: &DetectorSettings) -> Self {
        Self {
            detector: Some(detector),
            label: settings.label.clone(),
            min_confidence: settings.min_confidence,
        }
    }

    /// Adapter with no model behind it; every call reports `ModelUnavailable`.
    pub fn unavailable(settings: &DetectorSettings) -> Self {
        Self {
            detector: None,
            label: settings.label.clone(),
            min_confidence: settings.min_confidence,
        }
    }

    pub fn is_available(&self) -> bool {
        self.detector.is_some()
    }

    pub async fn detect(&self, image: Arc<RgbImage>) -> DetectResult<Vec<DetectedRegion>> {
        let detector = self.detector.as_ref().ok_or(DetectError::ModelUnavailable)?;
        let origin = detector.origin();
        let raw = detector.infer(image).await?;
        let total = raw.len();
        let regions = to_detected_regions(raw, origin, &self.label, self.min_confidence);
        debug!(raw = total, kept = regions.len(), ?origin, "detector output filtered");
        Ok(regions)
    }
}

/// Filters raw detections to one class and a confidence floor, and flips
/// bottom-left model coordinates to top-left.
pub fn to_detected_regions(
    raw: Vec<RawDetection>,
    origin: CoordinateOrigin,
    label: &str,
    min_confidence: f32,
) -> Vec<DetectedRegion> {
    raw.into_iter()
        .filter(|det| det.label.trim().eq_ignore_ascii_case(label))
        .filter(|det| det.confidence >= min_confidence)
        .filter_map(|det| {
            let rect = match origin {
                CoordinateOrigin::TopLeft => det.rect,
                CoordinateOrigin::BottomLeft => flip_vertical(&det.rect),
            }
            .clamp_unit();
            if rect.is_empty() {
                return None;
            }
            Some(DetectedRegion {
                rect,
                confidence: det.confidence,
            })
        })
        .collect()
}

fn flip_vertical(rect: &NormalizedRect) -> NormalizedRect {
    NormalizedRect {
        x: rect.x,
        y: 1.0 - rect.y - rect.height,
        width: rect.width,
        height: rect.height,
    }
}

/// Detector replaying model output recorded as JSON, either a bare array of
/// detections or `{ "detections": [...] }`.
#[derive(Debug, Clone)]
pub struct FileDetector {
    path: PathBuf,
    origin: CoordinateOrigin,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectionFile {
    List(Vec<RawDetection>),
    Wrapped { detections: Vec<RawDetection> },
}

impl FileDetector {
    pub fn new(path: impl Into<PathBuf>, origin: CoordinateOrigin) -> Self {
        Self {
            path: path.into(),
            origin,
        }
    }
}

impl ObjectDetector for FileDetector {
    fn origin(&self) -> CoordinateOrigin {
        self.origin
    }

    fn infer(&self, _image: Arc<RgbImage>) -> DetectorFuture {
        let path = self.path.clone();
        Box::pin(async move {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(DetectError::ModelUnavailable);
            }
            let content = tokio::fs::read_to_string(&path).await.map_err(|err| {
                DetectError::DetectionFailed(format!("{}: {}", path.display(), err))
            })?;
            parse_detections(&content)
        })
    }
}

pub fn parse_detections(content: &str) -> DetectResult<Vec<RawDetection>> {
    let parsed: DetectionFile = serde_json::from_str(content)
        .map_err(|err| DetectError::DetectionFailed(format!("invalid detection JSON: {}", err)))?;
    Ok(match parsed {
        DetectionFile::List(list) => list,
        DetectionFile::Wrapped { detections } => detections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(x: f32, y: f32, w: f32, h: f32, confidence: f32, label: &str) -> RawDetection {
        RawDetection {
            rect: NormalizedRect::new(x, y, w, h),
            confidence,
            label: label.to_string(),
        }
    }

    #[test]
    fn bottom_left_boxes_are_flipped() {
        // Near the bottom in a bottom-left system means near the top here.
        let regions = to_detected_regions(
            vec![raw(0.1, 0.7, 0.2, 0.25, 0.9, "balloon")],
            CoordinateOrigin::BottomLeft,
            "balloon",
            0.35,
        );
        assert_eq!(regions.len(), 1);
        let rect = regions[0].rect;
        assert!((rect.x - 0.1).abs() < 1e-6);
        assert!((rect.y - 0.05).abs() < 1e-6);
        assert!((rect.height - 0.25).abs() < 1e-6);
    }

    #[test]
    fn top_left_boxes_pass_through() {
        let regions = to_detected_regions(
            vec![raw(0.1, 0.7, 0.2, 0.25, 0.9, "balloon")],
            CoordinateOrigin::TopLeft,
            "balloon",
            0.35,
        );
        assert_eq!(regions[0].rect, NormalizedRect::new(0.1, 0.7, 0.2, 0.25));
    }

    #[test]
    fn other_labels_and_low_confidence_are_dropped() {
        let regions = to_detected_regions(
            vec![
                raw(0.1, 0.1, 0.2, 0.2, 0.34, "balloon"),
                raw(0.1, 0.1, 0.2, 0.2, 0.35, "Balloon"),
                raw(0.1, 0.1, 0.2, 0.2, 0.99, "text"),
            ],
            CoordinateOrigin::TopLeft,
            "balloon",
            0.35,
        );
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].confidence, 0.35);
    }

    #[test]
    fn parses_both_file_shapes() {
        let bare = r#"[{"x":0.1,"y":0.2,"width":0.3,"height":0.1,"confidence":0.8,"label":"balloon"}]"#;
        let wrapped = format!(r#"{{"detections":{}}}"#, bare);
        assert_eq!(parse_detections(bare).expect("bare").len(), 1);
        assert_eq!(parse_detections(&wrapped).expect("wrapped").len(), 1);
        assert!(parse_detections("{").is_err());
    }

    #[tokio::test]
    async fn missing_model_is_reported() {
        let settings = DetectorSettings::default();
        let adapter = DetectorAdapter::unavailable(&settings);
        let image = Arc::new(RgbImage::new(4, 4));
        assert!(matches!(
            adapter.detect(image.clone()).await,
            Err(DetectError::ModelUnavailable)
        ));

        let detector = FileDetector::new("/nonexistent/detections.json", CoordinateOrigin::TopLeft);
        let adapter = DetectorAdapter::new(Arc::new(detector), &settings);
        assert!(matches!(
            adapter.detect(image).await,
            Err(DetectError::ModelUnavailable)
        ));
    }

    #[tokio::test]
    async fn recorded_detections_are_read_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("detections.json");
        tokio::fs::write(
            &path,
            r#"{"detections":[{"x":0.1,"y":0.2,"width":0.3,"height":0.1,"confidence":0.8,"label":"balloon"}]}"#,
        )
        .await
        .expect("write");
        let detector = FileDetector::new(&path, CoordinateOrigin::TopLeft);
        let detections = detector.infer(Arc::new(RgbImage::new(4, 4))).await.expect("detections");
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "balloon");

        tokio::fs::write(&path, "not json").await.expect("write");
        assert!(matches!(
            detector.infer(Arc::new(RgbImage::new(4, 4))).await,
            Err(DetectError::DetectionFailed(_))
        ));
    }
}
