// src/analysis/object_tracker.rs
//
// Multi-object tracker for fixed-camera traffic scenes.
//
// Design:
//   - One constant-velocity Kalman filter per object (kalman.rs)
//   - Candidate pairs found through the spatial grid, resolved greedily by
//     distance (association.rs)
//   - Tracks coast on frames the detector skipped: predict only, no miss
//   - Every frame appends the smoothed position to a bounded history that
//     the rules read direction and crossings from
//
// Lifecycle: Tentative → Confirmed → Lost → destroyed. A Lost track that is
// matched again goes straight back to Confirmed.

use super::association::{associate, Prediction};
use super::kalman::KalmanFilter;
use super::spatial_grid::SpatialGrid;
use crate::types::{bbox_recenter, BBox, Detection, ObjectClass, Point, TrackerConfig};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Weight of a new detection in the running track confidence.
const CONFIDENCE_EMA_ALPHA: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Tentative,
    Confirmed,
    Lost,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: u32,
    pub class: ObjectClass,
    pub state: TrackState,
    /// Last detection box, re-centered on the filter position each frame
    pub bbox: BBox,
    /// Running average of matched detection confidence
    pub confidence: f32,
    pub hits: u32,
    pub consecutive_misses: u32,
    pub age: u32,
    history: VecDeque<Point>,
    history_len: usize,
    filter: KalmanFilter,
}

impl Track {
    fn new(id: u32, det: &Detection, config: &TrackerConfig) -> Self {
        let center = det.center();
        let mut history = VecDeque::with_capacity(config.history_len);
        history.push_back(center);
        Self {
            id,
            class: det.class,
            state: TrackState::Tentative,
            bbox: det.bbox,
            confidence: det.confidence,
            hits: 1,
            consecutive_misses: 0,
            age: 1,
            history,
            history_len: config.history_len,
            filter: KalmanFilter::new(center, config),
        }
    }

    fn update_with_detection(&mut self, det: &Detection, min_hits_to_confirm: u32) {
        self.filter.update(det.center());
        self.bbox = bbox_recenter(&det.bbox, self.filter.position());
        self.confidence =
            (1.0 - CONFIDENCE_EMA_ALPHA) * self.confidence + CONFIDENCE_EMA_ALPHA * det.confidence;
        self.hits += 1;
        self.consecutive_misses = 0;

        match self.state {
            TrackState::Tentative if self.hits >= min_hits_to_confirm => {
                self.state = TrackState::Confirmed;
                debug!("✅ Track {} confirmed ({})", self.id, self.class.as_str());
            }
            TrackState::Lost => {
                self.state = TrackState::Confirmed;
                debug!("🔁 Track {} re-acquired", self.id);
            }
            _ => {}
        }
    }

    fn mark_missed(&mut self, lost_after_misses: u32) {
        self.consecutive_misses += 1;
        if self.state == TrackState::Confirmed && self.consecutive_misses >= lost_after_misses {
            self.state = TrackState::Lost;
            debug!(
                "👻 Track {} lost after {} misses",
                self.id, self.consecutive_misses
            );
        }
    }

    fn push_history(&mut self) {
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(self.filter.position());
    }

    /// Smoothed position for the current frame.
    pub fn position(&self) -> Point {
        self.filter.position()
    }

    /// Smoothed position one frame earlier, if the track is that old.
    pub fn previous_position(&self) -> Option<Point> {
        let n = self.history.len();
        (n >= 2).then(|| self.history[n - 2])
    }

    pub fn velocity(&self) -> Point {
        self.filter.velocity()
    }

    pub fn history(&self) -> &VecDeque<Point> {
        &self.history
    }

    /// Average per-frame displacement across the history window.
    pub fn mean_displacement(&self) -> f32 {
        match (self.history.front(), self.history.back()) {
            (Some(first), Some(last)) if self.history.len() >= 2 => {
                last.sub(first).norm() / (self.history.len() - 1) as f32
            }
            _ => 0.0,
        }
    }

    /// Unit direction of travel over the history window.
    pub fn direction(&self) -> Option<Point> {
        match (self.history.front(), self.history.back()) {
            (Some(first), Some(last)) if self.history.len() >= 2 => last.sub(first).normalized(),
            _ => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    /// Confirmed and with enough history for the rules to reason about.
    pub fn is_rule_ready(&self, min_history: usize) -> bool {
        self.is_confirmed() && self.history.len() >= min_history
    }
}

/// What changed in the track set during one `step`.
#[derive(Debug, Clone, Default)]
pub struct TrackerStep {
    pub created: Vec<u32>,
    pub removed: Vec<u32>,
    pub matched: usize,
}

pub struct ObjectTracker {
    pub config: TrackerConfig,
    /// Ordered by id (ids are assigned increasing and appended)
    tracks: Vec<Track>,
    grid: SpatialGrid,
    next_id: u32,
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            grid: SpatialGrid::new(config.cell_size),
            config,
            tracks: Vec::with_capacity(64),
            next_id: 1,
        }
    }

    /// Advance one frame. `detections` is `None` on coasted frames.
    pub fn step(&mut self, detections: Option<&[Detection]>) -> TrackerStep {
        let mut step = TrackerStep::default();

        // ── Predict ──
        for track in &mut self.tracks {
            let predicted = track.filter.predict();
            track.bbox = bbox_recenter(&track.bbox, predicted);
            track.age += 1;
            self.grid.upsert(track.id, predicted);
        }

        if let Some(detections) = detections {
            let valid: Vec<Detection> = detections
                .iter()
                .filter(|d| d.confidence >= self.config.min_confidence)
                .cloned()
                .collect();

            // ── Associate ──
            let predictions: Vec<Prediction> = self
                .tracks
                .iter()
                .map(|t| Prediction {
                    track_id: t.id,
                    class: t.class,
                    position: t.position(),
                })
                .collect();
            let assignments =
                associate(&predictions, &valid, self.config.gating_distance, &self.grid);

            // ── Update ──
            let mut matched_tracks = vec![false; self.tracks.len()];
            let mut matched_dets = vec![false; valid.len()];
            for a in &assignments {
                if let Ok(ti) = self.tracks.binary_search_by_key(&a.track_id, |t| t.id) {
                    self.tracks[ti].update_with_detection(
                        &valid[a.detection_index],
                        self.config.min_hits_to_confirm,
                    );
                    matched_tracks[ti] = true;
                    matched_dets[a.detection_index] = true;
                }
            }
            step.matched = assignments.len();

            for (ti, matched) in matched_tracks.iter().enumerate() {
                if !matched {
                    self.tracks[ti].mark_missed(self.config.lost_after_misses);
                }
            }

            for track in &mut self.tracks {
                track.push_history();
            }

            for (di, matched) in matched_dets.iter().enumerate() {
                if *matched {
                    continue;
                }
                let det = &valid[di];
                let track = Track::new(self.next_id, det, &self.config);
                debug!(
                    "🆕 Track T{} created: {} at ({:.0},{:.0}) conf={:.2}",
                    track.id,
                    det.class.as_str(),
                    track.position().x,
                    track.position().y,
                    det.confidence
                );
                step.created.push(track.id);
                self.next_id += 1;
                self.tracks.push(track);
            }
        } else {
            for track in &mut self.tracks {
                track.push_history();
            }
        }

        // ── Prune ──
        let max_missed = self.config.max_missed_frames;
        let max_tentative = self.config.max_tentative_misses;
        let removed = &mut step.removed;
        self.tracks.retain(|t| {
            let dead = match t.state {
                TrackState::Tentative => t.consecutive_misses > max_tentative,
                TrackState::Confirmed | TrackState::Lost => t.consecutive_misses > max_missed,
            };
            if dead {
                info!(
                    "🗑️  Track {} pruned ({:?}, {} misses, age {})",
                    t.id, t.state, t.consecutive_misses, t.age
                );
                removed.push(t.id);
            }
            !dead
        });
        for id in &step.removed {
            self.grid.remove(*id);
        }

        // Grid holds this frame's smoothed positions
        for track in &self.tracks {
            self.grid.upsert(track.id, track.position());
        }

        step
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, id: u32) -> Option<&Track> {
        self.tracks
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|i| &self.tracks[i])
    }

    pub fn confirmed_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.is_confirmed())
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn active_count(&self) -> usize {
        self.tracks.len()
    }
}
