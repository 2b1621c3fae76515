use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn clamp_unit(self) -> Self {
        Self {
            x: self.x.clamp(0.0, 1.0),
            y: self.y.clamp(0.0, 1.0),
        }
    }
}

/// Axis-aligned rectangle with a top-left origin.
///
/// Used both in normalized page space (`[0,1]`) and in pixel space; the
/// type itself does not care, callers convert with [`NormalizedRect::to_pixels`]
/// and [`NormalizedRect::from_pixels`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let min_x = x1.min(x2);
        let min_y = y1.min(y2);
        Self {
            x: min_x,
            y: min_y,
            width: (x1.max(x2) - min_x).max(0.0),
            height: (y1.max(y2) - min_y).max(0.0),
        }
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn intersection(&self, other: &NormalizedRect) -> Option<NormalizedRect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.max_x().min(other.max_x());
        let y2 = self.max_y().min(other.max_y());
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(NormalizedRect::from_corners(x1, y1, x2, y2))
    }

    pub fn intersection_area(&self, other: &NormalizedRect) -> f32 {
        self.intersection(other).map(|rect| rect.area()).unwrap_or(0.0)
    }

    pub fn union(&self, other: &NormalizedRect) -> NormalizedRect {
        NormalizedRect::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.max_x().max(other.max_x()),
            self.max_y().max(other.max_y()),
        )
    }

    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.x && point.x <= self.max_x() && point.y >= self.y && point.y <= self.max_y()
    }

    /// Clips the rectangle to the unit square.
    pub fn clamp_unit(&self) -> NormalizedRect {
        if self.x >= 0.0 && self.y >= 0.0 && self.max_x() <= 1.0 && self.max_y() <= 1.0 {
            return *self;
        }
        let x1 = self.x.clamp(0.0, 1.0);
        let y1 = self.y.clamp(0.0, 1.0);
        let x2 = self.max_x().clamp(0.0, 1.0);
        let y2 = self.max_y().clamp(0.0, 1.0);
        NormalizedRect::from_corners(x1, y1, x2, y2)
    }

    pub fn to_pixels(&self, width: u32, height: u32) -> NormalizedRect {
        NormalizedRect {
            x: self.x * width as f32,
            y: self.y * height as f32,
            width: self.width * width as f32,
            height: self.height * height as f32,
        }
    }

    pub fn from_pixels(rect: &NormalizedRect, width: u32, height: u32) -> NormalizedRect {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        NormalizedRect {
            x: rect.x / w,
            y: rect.y / h,
            width: rect.width / w,
            height: rect.height / h,
        }
        .clamp_unit()
    }

    pub fn inset(&self, dx: f32, dy: f32) -> NormalizedRect {
        NormalizedRect {
            x: self.x + dx,
            y: self.y + dy,
            width: (self.width - dx * 2.0).max(0.0),
            height: (self.height - dy * 2.0).max(0.0),
        }
    }
}

/// Intersection-over-union of two rectangles. Zero when either is empty.
pub fn iou(a: &NormalizedRect, b: &NormalizedRect) -> f32 {
    let inter = a.intersection_area(b);
    if inter <= 0.0 {
        return 0.0;
    }
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

pub fn center_distance(a: &NormalizedRect, b: &NormalizedRect) -> f32 {
    a.center().distance(&b.center())
}

/// Box on the remote source's 0-1000 virtual grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Box1000 {
    pub ymin: u32,
    pub xmin: u32,
    pub ymax: u32,
    pub xmax: u32,
}

impl Box1000 {
    pub const GRID: f32 = 1000.0;

    /// Accepts `[ymin, xmin, ymax, xmax]`, clamping to the grid and
    /// reordering swapped corners.
    pub fn from_array(values: [i64; 4]) -> Self {
        let clamp = |value: i64| value.clamp(0, Self::GRID as i64) as u32;
        let (y1, x1, y2, x2) = (
            clamp(values[0]),
            clamp(values[1]),
            clamp(values[2]),
            clamp(values[3]),
        );
        Self {
            ymin: y1.min(y2),
            xmin: x1.min(x2),
            ymax: y1.max(y2),
            xmax: x1.max(x2),
        }
    }

    pub fn to_rect(&self) -> NormalizedRect {
        NormalizedRect::from_corners(
            self.xmin as f32 / Self::GRID,
            self.ymin as f32 / Self::GRID,
            self.xmax as f32 / Self::GRID,
            self.ymax as f32 / Self::GRID,
        )
    }
}

/// Closed outline; the last point connects back to the first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon {
    pub points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn empty() -> Self {
        Self { points: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn bounding_box(&self) -> Option<NormalizedRect> {
        let first = self.points.first()?;
        let mut min_x = first.x;
        let mut min_y = first.y;
        let mut max_x = first.x;
        let mut max_y = first.y;
        for point in &self.points[1..] {
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }
        Some(NormalizedRect::from_corners(min_x, min_y, max_x, max_y))
    }

    /// Shoelace area.
    pub fn area(&self) -> f32 {
        polygon_area(&self.points)
    }

    /// Even-odd ray casting.
    pub fn contains(&self, point: &Point) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let pi = self.points[i];
            let pj = self.points[j];
            if (pi.y > point.y) != (pj.y > point.y) {
                let cross_x = (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x;
                if point.x < cross_x {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    pub fn scale(&self, sx: f32, sy: f32) -> Polygon {
        Polygon::new(
            self.points
                .iter()
                .map(|p| Point::new(p.x * sx, p.y * sy))
                .collect(),
        )
    }

    pub fn to_pixels(&self, width: u32, height: u32) -> Polygon {
        self.scale(width as f32, height as f32)
    }

    pub fn simplify(&self, epsilon: f32) -> Polygon {
        Polygon::new(simplify_closed(&self.points, epsilon))
    }
}

pub fn polygon_area(points: &[Point]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let n = points.len();
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].x * points[j].y;
        area -= points[j].x * points[i].y;
    }
    area.abs() / 2.0
}

/// Douglas-Peucker on a closed curve. The curve is split at the point
/// farthest from the first one so both halves are open polylines.
pub fn simplify_closed(points: &[Point], epsilon: f32) -> Vec<Point> {
    if points.len() <= 3 {
        return points.to_vec();
    }
    let first = points[0];
    let (split, _) = points
        .iter()
        .enumerate()
        .skip(1)
        .fold((1usize, f32::MIN), |(best, best_dist), (idx, p)| {
            let dist = p.distance(&first);
            if dist > best_dist {
                (idx, dist)
            } else {
                (best, best_dist)
            }
        });

    let mut head = douglas_peucker(&points[..=split], epsilon);
    let mut tail_points = points[split..].to_vec();
    tail_points.push(first);
    let tail = douglas_peucker(&tail_points, epsilon);

    head.pop();
    head.extend(tail);
    head.pop();
    head
}

/// Iterative Douglas-Peucker on an open polyline; keeps both endpoints.
pub fn douglas_peucker(points: &[Point], epsilon: f32) -> Vec<Point> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;
    let mut stack = vec![(0usize, points.len() - 1)];

    while let Some((start, end)) = stack.pop() {
        if end - start <= 1 {
            continue;
        }
        let mut max_dist = 0.0;
        let mut max_index = start;
        for i in (start + 1)..end {
            let dist = point_to_line_distance(&points[i], &points[start], &points[end]);
            if dist > max_dist {
                max_dist = dist;
                max_index = i;
            }
        }
        if max_dist > epsilon {
            keep[max_index] = true;
            stack.push((start, max_index));
            stack.push((max_index, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(point, kept)| kept.then_some(*point))
        .collect()
}

fn point_to_line_distance(point: &Point, line_start: &Point, line_end: &Point) -> f32 {
    let a = line_end.y - line_start.y;
    let b = line_start.x - line_end.x;
    let c = line_end.x * line_start.y - line_start.x * line_end.y;
    let denominator = (a * a + b * b).sqrt();
    if denominator == 0.0 {
        return point.distance(line_start);
    }
    (a * point.x + b * point.y + c).abs() / denominator
}

/// Polygon approximating a rounded rectangle, clockwise from the top-left
/// corner. `radius` is clamped to half the shorter side.
pub fn rounded_rect(rect: &NormalizedRect, radius: f32, segments: usize) -> Polygon {
    let r = radius.min(rect.width * 0.5).min(rect.height * 0.5).max(0.0);
    if r <= 0.0 || segments == 0 {
        return Polygon::new(vec![
            Point::new(rect.x, rect.y),
            Point::new(rect.max_x(), rect.y),
            Point::new(rect.max_x(), rect.max_y()),
            Point::new(rect.x, rect.max_y()),
        ]);
    }
    let corners = [
        (rect.x + r, rect.y + r, std::f32::consts::PI),
        (rect.max_x() - r, rect.y + r, std::f32::consts::PI * 1.5),
        (rect.max_x() - r, rect.max_y() - r, 0.0),
        (rect.x + r, rect.max_y() - r, std::f32::consts::PI * 0.5),
    ];
    let mut points = Vec::with_capacity(corners.len() * (segments + 1));
    for (cx, cy, start) in corners {
        for step in 0..=segments {
            let angle = start + std::f32::consts::FRAC_PI_2 * step as f32 / segments as f32;
            points.push(Point::new(cx + r * angle.cos(), cy + r * angle.sin()));
        }
    }
    Polygon::new(points)
}

/// Polygon approximating the ellipse inscribed in `rect`.
pub fn ellipse(rect: &NormalizedRect, segments: usize) -> Polygon {
    let center = rect.center();
    let rx = rect.width * 0.5;
    let ry = rect.height * 0.5;
    let segments = segments.max(3);
    Polygon::new(
        (0..segments)
            .map(|i| {
                let angle = std::f32::consts::TAU * i as f32 / segments as f32;
                Point::new(center.x + rx * angle.cos(), center.y + ry * angle.sin())
            })
            .collect(),
    )
}
