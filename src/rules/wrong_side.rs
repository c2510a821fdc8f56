// src/rules/wrong_side.rs
//
// Wrong-side driving: a vehicle inside a lane keeps moving against the
// lane's legal direction.
//
// Per track we keep the lane it is in and two streak counters. Travel with
// cosine similarity below the threshold for M consecutive frames raises one
// event for the lane-entry episode. The episode ends when the track leaves
// the lane (or enters another) or drives compliant for M consecutive frames.
// Stationary frames hold both streaks.

use super::{RuleContext, ViolationDetails, ViolationEvent};
use crate::geometry::{cosine_similarity, point_in_polygon};
use crate::types::{LaneConfig, Point, WrongSideConfig};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
struct LaneEpisode {
    lane: usize,
    wrong_streak: u32,
    compliant_streak: u32,
    flagged: bool,
}

/// Outcome of feeding one frame of motion into a track's episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// Nothing to report
    Hold,
    /// Sustained wrong-way travel reached M frames; `similarity` is this frame's
    Violation { similarity: f32 },
}

pub struct WrongSideRule {
    config: WrongSideConfig,
    lanes: Vec<LaneConfig>,
    episodes: HashMap<u32, LaneEpisode>,
}

impl WrongSideRule {
    pub fn new(config: WrongSideConfig, lanes: Vec<LaneConfig>) -> Self {
        Self {
            config,
            lanes,
            episodes: HashMap::new(),
        }
    }

    /// First lane (configuration order) containing `point`.
    pub fn lane_at(&self, point: Point) -> Option<usize> {
        self.lanes
            .iter()
            .position(|lane| point_in_polygon(point, &lane.polygon))
    }

    /// Advance a track's episode by one frame. `motion` is the track's unit
    /// direction, or `None` when it is effectively stationary.
    pub fn observe(&mut self, track_id: u32, lane: Option<usize>, motion: Option<Point>) -> Observation {
        let Some(lane) = lane else {
            if self.episodes.remove(&track_id).is_some_and(|e| e.flagged) {
                debug!("↩️  Track {} left lane, wrong-side flag cleared", track_id);
            }
            return Observation::Hold;
        };

        let episode = self.episodes.entry(track_id).or_default();
        if episode.lane != lane {
            *episode = LaneEpisode {
                lane,
                ..LaneEpisode::default()
            };
        }

        let Some(direction) = motion else {
            return Observation::Hold;
        };
        let Some(expected) = self.lanes.get(lane).map(|l| l.expected_direction) else {
            return Observation::Hold;
        };
        let similarity = cosine_similarity(direction, expected);
        let sustain = self.config.sustain_frames;

        if similarity < self.config.similarity_threshold {
            episode.wrong_streak += 1;
            episode.compliant_streak = 0;
            if !episode.flagged && episode.wrong_streak >= sustain {
                episode.flagged = true;
                return Observation::Violation { similarity };
            }
        } else {
            episode.compliant_streak += 1;
            episode.wrong_streak = 0;
            if episode.flagged && episode.compliant_streak >= sustain {
                episode.flagged = false;
                debug!("↩️  Track {} compliant again, wrong-side flag cleared", track_id);
            }
        }
        Observation::Hold
    }

    pub fn evaluate(&mut self, ctx: &RuleContext<'_>) -> Vec<ViolationEvent> {
        if !self.config.enabled || self.lanes.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::new();
        for track in ctx.tracker.tracks() {
            if !track.class.is_vehicle() || !track.is_rule_ready(ctx.min_history) {
                continue;
            }
            let position = track.position();
            let lane = self.lane_at(position);
            let motion = if track.mean_displacement() < self.config.min_displacement {
                None
            } else {
                track.direction()
            };

            let Observation::Violation { similarity } = self.observe(track.id, lane, motion) else {
                continue;
            };
            let (Some(lane), Some(actual)) = (lane.and_then(|i| self.lanes.get(i)), motion) else {
                continue;
            };
            info!(
                "🚨 WRONG SIDE: track {} in lane '{}' at frame {} (cos={:.2})",
                track.id, lane.name, ctx.frame_number, similarity
            );
            let severity = ((1.0 - similarity) * 0.5).clamp(0.0, 1.0);
            events.push(ViolationEvent::new(
                track.id,
                ctx,
                severity * track.confidence,
                position,
                ViolationDetails::WrongSide {
                    lane: lane.name.clone(),
                    expected_direction: lane.expected_direction,
                    actual_direction: actual,
                    dot_product: similarity,
                    trajectory_length: track.history().len(),
                },
            ));
        }
        events
    }

    pub fn is_flagged(&self, track_id: u32) -> bool {
        self.episodes.get(&track_id).is_some_and(|e| e.flagged)
    }

    pub fn purge(&mut self, track_id: u32) {
        self.episodes.remove(&track_id);
    }
}
