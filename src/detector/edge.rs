use image::{DynamicImage, RgbImage};
use std::sync::Arc;

use super::{CoordinateOrigin, DetectorFuture, ObjectDetector, RawDetection};
use crate::error::DetectError;
use crate::preprocess::detect_balloon_contours;

/// Model-free detector built on the Canny/close/contour pipeline. It has no
/// notion of confidence, so every candidate reports the same fixed score.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    label: String,
    confidence: f32,
}

impl EdgeDetector {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            confidence: 0.5,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

impl ObjectDetector for EdgeDetector {
    fn origin(&self) -> CoordinateOrigin {
        CoordinateOrigin::TopLeft
    }

    fn infer(&self, image: Arc<RgbImage>) -> DetectorFuture {
        let label = self.label.clone();
        let confidence = self.confidence;
        Box::pin(async move {
            let found = tokio::task::spawn_blocking(move || {
                detect_balloon_contours(&DynamicImage::ImageRgb8((*image).clone()))
            })
            .await
            .map_err(|err| DetectError::DetectionFailed(err.to_string()))?;
            Ok(found
                .into_iter()
                .map(|(rect, _)| RawDetection {
                    rect,
                    confidence,
                    label: label.clone(),
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorAdapter;
    use crate::settings::DetectorSettings;
    use crate::test_util::balloon_page;

    #[tokio::test]
    async fn edge_detector_feeds_the_adapter() {
        let settings = DetectorSettings::default();
        let adapter = DetectorAdapter::new(Arc::new(EdgeDetector::new("balloon")), &settings);
        let page = Arc::new(balloon_page(200, 160, (100.0, 80.0), (60.0, 40.0), 3.0));
        let regions = adapter.detect(page).await.expect("detect");
        assert!(!regions.is_empty());
        assert!(regions.iter().all(|r| r.confidence == 0.5));
    }
}
