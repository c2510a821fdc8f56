// src/analysis/association.rs
//
// Detection → track assignment for one frame.
//
// Greedy nearest-first matching: every (track, detection) pair of the same
// class whose distance is under the gate is a candidate; candidates are
// consumed in ascending distance order, ties broken by lowest track id and
// then lowest detection index. Deterministic for identical inputs.

use super::spatial_grid::SpatialGrid;
use crate::types::{Detection, ObjectClass, Point};
use std::collections::{HashMap, HashSet};

/// A track's predicted position for the current frame.
#[derive(Debug, Clone, Copy)]
pub struct Prediction {
    pub track_id: u32,
    pub class: ObjectClass,
    pub position: Point,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    pub track_id: u32,
    pub detection_index: usize,
    pub distance: f32,
}

fn same_class(track: ObjectClass, detection: ObjectClass) -> bool {
    match (track, detection) {
        (ObjectClass::Vehicle, ObjectClass::Vehicle)
        | (ObjectClass::Motorcycle, ObjectClass::Motorcycle)
        | (ObjectClass::Person, ObjectClass::Person) => true,
        (ObjectClass::Vehicle | ObjectClass::Motorcycle | ObjectClass::Person, _) => false,
    }
}

/// Match detections to predicted tracks. `index` must hold the predicted
/// positions of exactly the tracks in `predictions`.
pub fn associate(
    predictions: &[Prediction],
    detections: &[Detection],
    gating_distance: f32,
    index: &SpatialGrid,
) -> Vec<Assignment> {
    let by_id: HashMap<u32, &Prediction> = predictions.iter().map(|p| (p.track_id, p)).collect();

    let mut candidates: Vec<Assignment> = Vec::new();
    for (detection_index, det) in detections.iter().enumerate() {
        let center = det.center();
        for track_id in index.query(center, gating_distance) {
            let Some(pred) = by_id.get(&track_id) else {
                continue;
            };
            if !same_class(pred.class, det.class) {
                continue;
            }
            let distance = pred.position.distance_to(&center);
            if distance <= gating_distance {
                candidates.push(Assignment {
                    track_id,
                    detection_index,
                    distance,
                });
            }
        }
    }

    candidates.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.track_id.cmp(&b.track_id))
            .then(a.detection_index.cmp(&b.detection_index))
    });

    let mut used_tracks = HashSet::new();
    let mut used_detections = HashSet::new();
    let mut assignments = Vec::new();
    for c in candidates {
        if used_tracks.contains(&c.track_id) || used_detections.contains(&c.detection_index) {
            continue;
        }
        used_tracks.insert(c.track_id);
        used_detections.insert(c.detection_index);
        assignments.push(c);
    }
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class: ObjectClass, cx: f32, cy: f32) -> Detection {
        Detection {
            frame_number: 0,
            class,
            bbox: [cx - 20.0, cy - 20.0, cx + 20.0, cy + 20.0],
            confidence: 0.9,
        }
    }

    fn setup(preds: &[Prediction]) -> SpatialGrid {
        let mut grid = SpatialGrid::new(80.0);
        for p in preds {
            grid.upsert(p.track_id, p.position);
        }
        grid
    }

    fn pred(track_id: u32, class: ObjectClass, x: f32, y: f32) -> Prediction {
        Prediction {
            track_id,
            class,
            position: Point::new(x, y),
        }
    }

    #[test]
    fn test_nearest_pairs_win() {
        let preds = [
            pred(1, ObjectClass::Vehicle, 100.0, 100.0),
            pred(2, ObjectClass::Vehicle, 200.0, 100.0),
        ];
        let grid = setup(&preds);
        let dets = [
            det(ObjectClass::Vehicle, 195.0, 100.0),
            det(ObjectClass::Vehicle, 110.0, 100.0),
        ];
        let mut out = associate(&preds, &dets, 75.0, &grid);
        out.sort_by_key(|a| a.track_id);
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].track_id, out[0].detection_index), (1, 1));
        assert_eq!((out[1].track_id, out[1].detection_index), (2, 0));
    }

    #[test]
    fn test_class_mismatch_never_matches() {
        let preds = [pred(1, ObjectClass::Person, 100.0, 100.0)];
        let grid = setup(&preds);
        let dets = [det(ObjectClass::Motorcycle, 100.0, 100.0)];
        assert!(associate(&preds, &dets, 75.0, &grid).is_empty());
    }

    #[test]
    fn test_gate_rejects_far_detection() {
        let preds = [pred(1, ObjectClass::Vehicle, 100.0, 100.0)];
        let grid = setup(&preds);
        let dets = [det(ObjectClass::Vehicle, 300.0, 100.0)];
        assert!(associate(&preds, &dets, 75.0, &grid).is_empty());
    }

    #[test]
    fn test_equal_distance_ties_go_to_lowest_track_id() {
        // Detection exactly between two tracks
        let preds = [
            pred(5, ObjectClass::Vehicle, 140.0, 100.0),
            pred(3, ObjectClass::Vehicle, 60.0, 100.0),
        ];
        let grid = setup(&preds);
        let dets = [det(ObjectClass::Vehicle, 100.0, 100.0)];
        let out = associate(&preds, &dets, 75.0, &grid);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].track_id, 3);
    }

    #[test]
    fn test_equal_distance_ties_go_to_lowest_detection_index() {
        let preds = [pred(1, ObjectClass::Vehicle, 100.0, 100.0)];
        let grid = setup(&preds);
        let dets = [
            det(ObjectClass::Vehicle, 100.0, 130.0),
            det(ObjectClass::Vehicle, 100.0, 70.0),
        ];
        let out = associate(&preds, &dets, 75.0, &grid);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].detection_index, 0);
    }
}
