use serde::{Deserialize, Serialize};

use crate::geometry::{Box1000, NormalizedRect, Point, Polygon, rounded_rect};

/// Balloon region reported by the local detector, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedRegion {
    pub rect: NormalizedRect,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalloonShape {
    #[default]
    Oval,
    Rectangle,
    Cloud,
    Jagged,
}

impl BalloonShape {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "rectangle" | "rect" | "box" | "square" => BalloonShape::Rectangle,
            "cloud" | "thought" => BalloonShape::Cloud,
            "jagged" | "spiky" | "burst" | "scream" => BalloonShape::Jagged,
            _ => BalloonShape::Oval,
        }
    }
}

/// Balloon as described by the remote semantic source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticBalloon {
    pub original_text: String,
    pub translated_text: String,
    pub should_translate: bool,
    pub shape: BalloonShape,
    pub approx_box: Box1000,
    /// `(y, x)` on the 1000-grid.
    pub center_point: Option<(u32, u32)>,
}

impl SemanticBalloon {
    pub fn rect(&self) -> NormalizedRect {
        self.approx_box.to_rect()
    }

    /// `center_point` as a normalized page point.
    pub fn center_hint(&self) -> Option<Point> {
        self.center_point
            .map(|(y, x)| Point::new(x as f32 / 1000.0, y as f32 / 1000.0))
    }
}

/// Index of the originating semantic balloon in the remote source output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BalloonId(pub usize);

/// Where a merged balloon's geometry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometrySource {
    Overlap,
    NearestCenter,
    Semantic,
    /// Bounds of a flood-filled region grown from the semantic box.
    Flood,
}

impl GeometrySource {
    pub fn is_detection(&self) -> bool {
        matches!(self, GeometrySource::Overlap | GeometrySource::NearestCenter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedBalloon {
    pub id: BalloonId,
    #[serde(flatten)]
    pub semantic: SemanticBalloon,
    pub geometry: NormalizedRect,
    pub source: GeometrySource,
    /// Index of the consumed detection, if any.
    pub detection: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const WHITE: Rgb = Rgb([255, 255, 255]);

    pub fn luma(&self) -> f32 {
        let [r, g, b] = self.0;
        0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
    }

    pub fn to_hex(&self) -> String {
        let [r, g, b] = self.0;
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::WHITE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedBalloon {
    #[serde(flatten)]
    pub merged: MergedBalloon,
    /// Normalized outline; empty means "render a rounded rectangle over
    /// `geometry`".
    pub contour: Polygon,
    pub background_color: Rgb,
}

impl RefinedBalloon {
    pub fn id(&self) -> BalloonId {
        self.merged.id
    }

    pub fn has_contour(&self) -> bool {
        self.contour.len() >= 3
    }

    /// Outline to fit text into, in page pixels. Without a traced contour
    /// this is a rounded rectangle over `geometry`.
    pub fn shape_in_pixels(&self, width: u32, height: u32) -> Polygon {
        if self.has_contour() {
            return self.contour.to_pixels(width, height);
        }
        let rect = self.merged.geometry.to_pixels(width, height);
        let radius = rect.width.min(rect.height) * 0.2;
        rounded_rect(&rect, radius, 4)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutLine {
    pub text: String,
    /// Left end of the baseline, in the shape's coordinate space.
    pub baseline_position: Point,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLayout {
    pub lines: Vec<LayoutLine>,
    pub font_size: u32,
    pub total_height: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_parse_is_lenient() {
        assert_eq!(BalloonShape::parse("Oval"), BalloonShape::Oval);
        assert_eq!(BalloonShape::parse(" CLOUD "), BalloonShape::Cloud);
        assert_eq!(BalloonShape::parse("rectangle"), BalloonShape::Rectangle);
        assert_eq!(BalloonShape::parse("jagged"), BalloonShape::Jagged);
        assert_eq!(BalloonShape::parse("???"), BalloonShape::Oval);
    }

    #[test]
    fn refined_balloon_round_trips_through_json() {
        let balloon = RefinedBalloon {
            merged: MergedBalloon {
                id: BalloonId(3),
                semantic: SemanticBalloon {
                    original_text: "こんにちは".to_string(),
                    translated_text: "Hello".to_string(),
                    should_translate: true,
                    shape: BalloonShape::Cloud,
                    approx_box: Box1000::from_array([100, 100, 300, 300]),
                    center_point: Some((200, 200)),
                },
                geometry: NormalizedRect::new(0.1, 0.1, 0.2, 0.2),
                source: GeometrySource::Overlap,
                detection: Some(0),
            },
            contour: Polygon::new(vec![
                Point::new(0.1, 0.1),
                Point::new(0.3, 0.1),
                Point::new(0.2, 0.3),
            ]),
            background_color: Rgb([250, 245, 220]),
        };
        let json = serde_json::to_string(&balloon).expect("serialize");
        let decoded: RefinedBalloon = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded, balloon);

        let layout = TextLayout {
            lines: vec![LayoutLine {
                text: "Hello".to_string(),
                baseline_position: Point::new(12.5, 40.0),
                width: 33.0,
            }],
            font_size: 14,
            total_height: 18.0,
        };
        let json = serde_json::to_string(&layout).expect("serialize");
        let decoded: TextLayout = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded, layout);
    }

    #[test]
    fn missing_contour_falls_back_to_rounded_geometry() {
        let mut balloon = RefinedBalloon {
            merged: MergedBalloon {
                id: BalloonId(0),
                semantic: SemanticBalloon {
                    original_text: String::new(),
                    translated_text: "Hi".to_string(),
                    should_translate: true,
                    shape: BalloonShape::Rectangle,
                    approx_box: Box1000::from_array([0, 0, 500, 500]),
                    center_point: None,
                },
                geometry: NormalizedRect::new(0.25, 0.5, 0.5, 0.25),
                source: GeometrySource::Semantic,
                detection: None,
            },
            contour: Polygon::empty(),
            background_color: Rgb::WHITE,
        };
        let shape = balloon.shape_in_pixels(200, 100);
        let bounds = shape.bounding_box().expect("fallback shape");
        assert!((bounds.x - 50.0).abs() < 1e-3 && (bounds.width - 100.0).abs() < 1e-3);
        assert!((bounds.y - 50.0).abs() < 1e-3 && (bounds.height - 25.0).abs() < 1e-3);
        assert!(!shape.contains(&Point::new(50.5, 50.5)));

        balloon.contour = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(0.5, 0.0),
            Point::new(0.0, 0.5),
        ]);
        let traced = balloon.shape_in_pixels(200, 100);
        assert_eq!(traced.points[1], Point::new(100.0, 0.0));
    }
}
