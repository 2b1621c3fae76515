use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{RemoteError, RemoteResult};
use crate::geometry::Box1000;
use crate::model::{BalloonShape, SemanticBalloon};

mod gemini;
mod retry;

pub use gemini::Gemini;
pub use retry::RetryPolicy;

pub type SemanticFuture = Pin<Box<dyn Future<Output = RemoteResult<Vec<SemanticBalloon>>> + Send>>;

/// Remote OCR + translation service, consumed as a black box.
pub trait SemanticSource: Send + Sync {
    fn analyze(&self, image: Arc<RgbImage>) -> SemanticFuture;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BalloonPayload {
    List(Vec<Value>),
    Wrapped { balloons: Vec<Value> },
}

#[derive(Debug, Deserialize)]
struct WireBalloon {
    #[serde(default)]
    original_text: String,
    #[serde(default)]
    translated_text: String,
    #[serde(default = "default_should_translate")]
    should_translate: bool,
    #[serde(default)]
    shape: Option<String>,
    box_2d: Vec<f64>,
    #[serde(default)]
    center_point: Option<Vec<f64>>,
}

fn default_should_translate() -> bool {
    true
}

pub fn parse_semantic_response(content: &str) -> RemoteResult<Vec<SemanticBalloon>> {
    let value: Value = serde_json::from_str(content.trim())
        .map_err(|err| RemoteError::InvalidResponse(format!("not JSON: {}", err)))?;
    parse_semantic_value(value)
}

/// Reads `{ "balloons": [...] }` or a bare array. Entries without a usable
/// `box_2d` are dropped with a warning; the rest of the page survives.
pub fn parse_semantic_value(value: Value) -> RemoteResult<Vec<SemanticBalloon>> {
    let entries = match serde_json::from_value::<BalloonPayload>(value) {
        Ok(BalloonPayload::List(list)) => list,
        Ok(BalloonPayload::Wrapped { balloons }) => balloons,
        Err(err) => {
            return Err(RemoteError::InvalidResponse(format!(
                "expected a balloon list: {}",
                err
            )));
        }
    };

    let mut balloons = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let wire: WireBalloon = match serde_json::from_value(entry) {
            Ok(wire) => wire,
            Err(err) => {
                warn!("skipping balloon {}: {}", index, err);
                continue;
            }
        };
        let Some(balloon) = to_semantic(wire) else {
            warn!("skipping balloon {}: box_2d must have four values", index);
            continue;
        };
        balloons.push(balloon);
    }
    debug!(count = balloons.len(), "semantic balloons parsed");
    Ok(balloons)
}

fn to_semantic(wire: WireBalloon) -> Option<SemanticBalloon> {
    let [ymin, xmin, ymax, xmax] = <[f64; 4]>::try_from(wire.box_2d.as_slice()).ok()?;
    let approx_box = Box1000::from_array([
        ymin.round() as i64,
        xmin.round() as i64,
        ymax.round() as i64,
        xmax.round() as i64,
    ]);
    let center_point = wire.center_point.and_then(|values| match values.as_slice() {
        [y, x] => Some((grid_value(*y), grid_value(*x))),
        _ => None,
    });
    Some(SemanticBalloon {
        original_text: wire.original_text,
        translated_text: wire.translated_text,
        should_translate: wire.should_translate,
        shape: wire
            .shape
            .as_deref()
            .map(BalloonShape::parse)
            .unwrap_or_default(),
        approx_box,
        center_point,
    })
}

fn grid_value(value: f64) -> u32 {
    value.round().clamp(0.0, Box1000::GRID as f64) as u32
}

/// Downscales so the long edge is at most `max_dimension`, then encodes as
/// JPEG.
pub fn encode_page(image: &RgbImage, max_dimension: u32, quality: u8) -> RemoteResult<Vec<u8>> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(RemoteError::Encode("empty page image".to_string()));
    }
    let long_edge = width.max(height);
    let resized;
    let source = if max_dimension > 0 && long_edge > max_dimension {
        let scale = max_dimension as f32 / long_edge as f32;
        let new_width = ((width as f32 * scale).round() as u32).max(1);
        let new_height = ((height as f32 * scale).round() as u32).max(1);
        resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);
        &resized
    } else {
        image
    };

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
        .encode_image(source)
        .map_err(|err| RemoteError::Encode(err.to_string()))?;
    Ok(bytes)
}

/// Semantic source replaying a recorded response from disk.
#[derive(Debug, Clone)]
pub struct FileSemantic {
    path: PathBuf,
}

impl FileSemantic {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SemanticSource for FileSemantic {
    fn analyze(&self, _image: Arc<RgbImage>) -> SemanticFuture {
        let path = self.path.clone();
        Box::pin(async move {
            let content = tokio::fs::read_to_string(&path).await.map_err(|err| {
                RemoteError::InvalidResponse(format!("{}: {}", path.display(), err))
            })?;
            parse_semantic_response(&content)
        })
    }
}
