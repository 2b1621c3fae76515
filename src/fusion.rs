//! Reconciles the detector's precise, unlabeled boxes with the remote
//! source's labeled, approximate boxes.
//!
//! Matching is a greedy two-pass bipartite assignment: strict overlap first,
//! nearest center second. Each detection is consumed at most once.

use tracing::debug;

use crate::geometry::{center_distance, iou};
use crate::model::{BalloonId, DetectedRegion, GeometrySource, MergedBalloon, SemanticBalloon};
use crate::settings::FusionSettings;

pub fn fuse(detections: &[DetectedRegion], semantics: &[SemanticBalloon]) -> Vec<MergedBalloon> {
    fuse_with(detections, semantics, &FusionSettings::default())
}

/// Output holds one entry per semantic balloon with `should_translate`,
/// overlap matches first and the rest after; callers must not treat the
/// order as a reading order.
pub fn fuse_with(
    detections: &[DetectedRegion],
    semantics: &[SemanticBalloon],
    settings: &FusionSettings,
) -> Vec<MergedBalloon> {
    let mut consumed = vec![false; detections.len()];
    let mut merged = Vec::with_capacity(semantics.len());
    let mut deferred = Vec::new();

    for (idx, balloon) in semantics.iter().enumerate() {
        if !balloon.should_translate {
            continue;
        }
        let rect = balloon.rect();
        let mut best: Option<(usize, f32)> = None;
        for (det_idx, detection) in detections.iter().enumerate() {
            if consumed[det_idx] {
                continue;
            }
            let score = iou(&rect, &detection.rect);
            if score <= settings.iou_threshold {
                continue;
            }
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((det_idx, score));
            }
        }
        match best {
            Some((det_idx, score)) => {
                consumed[det_idx] = true;
                debug!(balloon = idx, detection = det_idx, iou = score, "overlap match");
                merged.push(merge(idx, balloon, detections, Some(det_idx), GeometrySource::Overlap));
            }
            None => deferred.push(idx),
        }
    }

    let overlap_matches = merged.len();
    for idx in deferred {
        let balloon = &semantics[idx];
        let rect = balloon.rect();
        let mut best: Option<(usize, f32)> = None;
        for (det_idx, detection) in detections.iter().enumerate() {
            if consumed[det_idx] {
                continue;
            }
            let distance = center_distance(&rect, &detection.rect);
            if distance >= settings.max_center_distance {
                continue;
            }
            if best.is_none_or(|(_, best_distance)| distance < best_distance) {
                best = Some((det_idx, distance));
            }
        }
        match best {
            Some((det_idx, distance)) => {
                consumed[det_idx] = true;
                debug!(balloon = idx, detection = det_idx, distance, "nearest-center match");
                merged.push(merge(
                    idx,
                    balloon,
                    detections,
                    Some(det_idx),
                    GeometrySource::NearestCenter,
                ));
            }
            None => {
                merged.push(merge(idx, balloon, detections, None, GeometrySource::Semantic));
            }
        }
    }

    debug!(
        total = merged.len(),
        overlap = overlap_matches,
        detections = detections.len(),
        "fusion complete"
    );
    merged
}

fn merge(
    idx: usize,
    balloon: &SemanticBalloon,
    detections: &[DetectedRegion],
    detection: Option<usize>,
    source: GeometrySource,
) -> MergedBalloon {
    let geometry = detection
        .map(|det_idx| detections[det_idx].rect)
        .unwrap_or_else(|| balloon.rect())
        .clamp_unit();
    MergedBalloon {
        id: BalloonId(idx),
        semantic: balloon.clone(),
        geometry,
        source,
        detection,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Box1000, NormalizedRect};
    use crate::model::BalloonShape;

    fn semantic(box_2d: [i64; 4], should_translate: bool) -> SemanticBalloon {
        SemanticBalloon {
            original_text: "元気".to_string(),
            translated_text: "Hi".to_string(),
            should_translate,
            shape: BalloonShape::Oval,
            approx_box: Box1000::from_array(box_2d),
            center_point: None,
        }
    }

    fn detection(x: f32, y: f32, w: f32, h: f32) -> DetectedRegion {
        DetectedRegion {
            rect: NormalizedRect::new(x, y, w, h),
            confidence: 0.9,
        }
    }

    #[test]
    fn exact_overlap_uses_detection_geometry() {
        let det = detection(0.1, 0.1, 0.2, 0.2);
        let merged = fuse(&[det], &[semantic([100, 100, 300, 300], true)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].geometry, det.rect);
        assert_eq!(merged[0].source, GeometrySource::Overlap);
        assert_eq!(merged[0].detection, Some(0));
    }

    #[test]
    fn disjoint_boxes_defer_to_nearest_center() {
        // IoU is zero but the centers are 0.2 apart.
        let det = detection(0.3, 0.1, 0.1, 0.1);
        let merged = fuse(&[det], &[semantic([100, 100, 200, 200], true)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, GeometrySource::NearestCenter);
        assert_eq!(merged[0].geometry, det.rect);
    }

    #[test]
    fn weak_overlap_is_not_an_overlap_match() {
        // 0.2x0.2 boxes offset by 0.17: IoU = 0.006/0.074, well under 0.10.
        let det = detection(0.27, 0.1, 0.2, 0.2);
        let merged = fuse_with(
            &[det],
            &[semantic([100, 100, 300, 300], true)],
            &FusionSettings {
                iou_threshold: 0.10,
                max_center_distance: 0.01,
            },
        );
        assert_eq!(merged[0].source, GeometrySource::Semantic);
        assert_eq!(merged[0].detection, None);
    }

    #[test]
    fn center_distance_gate_is_strict() {
        let origin = semantic([0, 0, 0, 0], true);
        let at_limit = detection(0.0, 0.3, 0.0, 0.0);
        let merged = fuse(&[at_limit], std::slice::from_ref(&origin));
        assert_eq!(merged[0].source, GeometrySource::Semantic);
        assert_eq!(merged[0].geometry, origin.rect());

        let inside = detection(0.0, 0.29, 0.0, 0.0);
        let merged = fuse(&[inside], &[origin]);
        assert_eq!(merged[0].source, GeometrySource::NearestCenter);
    }

    #[test]
    fn skipped_balloons_produce_nothing() {
        let merged = fuse(
            &[detection(0.1, 0.1, 0.2, 0.2)],
            &[semantic([100, 100, 300, 300], false)],
        );
        assert!(merged.is_empty());
    }

    #[test]
    fn no_detections_keeps_semantic_boxes() {
        let balloons = vec![
            semantic([100, 100, 300, 300], true),
            semantic([500, 500, 700, 900], true),
        ];
        let merged = fuse(&[], &balloons);
        assert_eq!(merged.len(), 2);
        for (entry, balloon) in merged.iter().zip(&balloons) {
            assert_eq!(entry.source, GeometrySource::Semantic);
            assert_eq!(entry.geometry, balloon.rect());
        }
    }

    #[test]
    fn tie_goes_to_first_detection() {
        let a = detection(0.1, 0.1, 0.2, 0.2);
        let merged = fuse(&[a, a], &[semantic([100, 100, 300, 300], true)]);
        assert_eq!(merged[0].detection, Some(0));
    }

    #[test]
    fn overlap_matches_come_before_fallbacks() {
        let balloons = vec![
            semantic([600, 600, 700, 700], true),
            semantic([100, 100, 300, 300], true),
        ];
        let detections = [detection(0.1, 0.1, 0.2, 0.2), detection(0.72, 0.6, 0.1, 0.1)];
        let merged = fuse(&detections, &balloons);
        assert_eq!(merged[0].id, BalloonId(1));
        assert_eq!(merged[0].source, GeometrySource::Overlap);
        assert_eq!(merged[1].id, BalloonId(0));
        assert_eq!(merged[1].source, GeometrySource::NearestCenter);
        assert_eq!(merged[1].detection, Some(1));
    }

    struct Lcg(u64);

    impl Lcg {
        fn next_f32(&mut self) -> f32 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 40) as f32) / ((1u64 << 24) as f32)
        }
    }

    #[test]
    fn detections_are_consumed_at_most_once() {
        let mut rng = Lcg(7);
        for _ in 0..200 {
            let det_count = (rng.next_f32() * 8.0) as usize;
            let sem_count = (rng.next_f32() * 8.0) as usize;
            let detections: Vec<DetectedRegion> = (0..det_count)
                .map(|_| {
                    let x = rng.next_f32() * 0.8;
                    let y = rng.next_f32() * 0.8;
                    detection(x, y, 0.05 + rng.next_f32() * 0.2, 0.05 + rng.next_f32() * 0.2)
                })
                .collect();
            let semantics: Vec<SemanticBalloon> = (0..sem_count)
                .map(|_| {
                    let y = (rng.next_f32() * 800.0) as i64;
                    let x = (rng.next_f32() * 800.0) as i64;
                    let h = 50 + (rng.next_f32() * 200.0) as i64;
                    let w = 50 + (rng.next_f32() * 200.0) as i64;
                    semantic([y, x, y + h, x + w], rng.next_f32() > 0.2)
                })
                .collect();

            let merged = fuse(&detections, &semantics);
            let expected = semantics.iter().filter(|b| b.should_translate).count();
            assert_eq!(merged.len(), expected);

            let mut used = vec![false; detections.len()];
            for entry in &merged {
                if let Some(det_idx) = entry.detection {
                    assert!(!used[det_idx], "detection {det_idx} used twice");
                    used[det_idx] = true;
                    assert_eq!(entry.geometry, detections[det_idx].rect.clamp_unit());
                }
                let r = entry.geometry;
                assert!(r.x >= 0.0 && r.y >= 0.0 && r.max_x() <= 1.0 && r.max_y() <= 1.0);
            }
        }
    }
}
