// src/rules/mod.rs
//
// Violation rules. Each rule is a small state machine over tracker output
// that emits at most one event per debounce window:
//
//   red_light   — stop-line crossing while the signal is red
//   wrong_side  — sustained travel against a lane's legal direction
//   helmet      — motorcycle rider with a bare head
//
// Rules never mutate tracks. Their debounce state lives in maps keyed by
// track id and is purged by the engine when the tracker evicts a track.

pub mod head_classifier;
pub mod helmet;
pub mod red_light;
pub mod wrong_side;

pub use head_classifier::{HelmetClassifier, HsvHeadClassifier};
pub use helmet::HelmetRule;
pub use red_light::RedLightRule;
pub use wrong_side::WrongSideRule;

use crate::analysis::{ObjectTracker, TrafficLightState};
use crate::types::{BBox, Config, Point};
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    RedLight,
    WrongSide,
    NoHelmet,
}

impl ViolationType {
    pub const ALL: [ViolationType; 3] = [Self::RedLight, Self::WrongSide, Self::NoHelmet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RedLight => "red_light",
            Self::WrongSide => "wrong_side",
            Self::NoHelmet => "no_helmet",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule-specific evidence, serialized flat next to the common fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ViolationDetails {
    RedLight {
        stop_line: [Point; 2],
        /// Smoothed velocity at the crossing, px/frame
        vehicle_velocity: Point,
        red_occurrence: u64,
    },
    WrongSide {
        lane: String,
        expected_direction: Point,
        actual_direction: Point,
        /// Cosine between actual and expected direction
        dot_product: f32,
        trajectory_length: usize,
    },
    NoHelmet {
        rider_id: u32,
        person_bbox: BBox,
        no_helmet_frames: u32,
    },
}

impl ViolationDetails {
    pub fn violation_type(&self) -> ViolationType {
        match self {
            Self::RedLight { .. } => ViolationType::RedLight,
            Self::WrongSide { .. } => ViolationType::WrongSide,
            Self::NoHelmet { .. } => ViolationType::NoHelmet,
        }
    }
}

/// One emitted violation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub vehicle_id: u32,
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
    pub video_timestamp_ms: f64,
    pub confidence: f32,
    pub location: Point,
    pub details: ViolationDetails,
}

impl ViolationEvent {
    pub fn new(
        vehicle_id: u32,
        ctx: &RuleContext<'_>,
        confidence: f32,
        location: Point,
        details: ViolationDetails,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            violation_type: details.violation_type(),
            vehicle_id,
            frame_number: ctx.frame_number,
            timestamp: Utc::now(),
            video_timestamp_ms: ctx.timestamp_ms,
            confidence: confidence.clamp(0.0, 1.0),
            location,
            details,
        }
    }
}

/// Everything a rule may look at for one frame.
pub struct RuleContext<'a> {
    pub frame_number: u64,
    pub timestamp_ms: f64,
    pub tracker: &'a ObjectTracker,
    pub light: &'a TrafficLightState,
    pub image: Option<&'a RgbImage>,
    pub min_history: usize,
}

/// The three rules evaluated together, in a fixed order.
pub struct RuleSet {
    pub red_light: RedLightRule,
    pub wrong_side: WrongSideRule,
    pub helmet: HelmetRule,
}

impl RuleSet {
    pub fn from_config(config: &Config) -> Self {
        Self::with_classifier(config, Box::new(HsvHeadClassifier::from_config(&config.rules.helmet)))
    }

    pub fn with_classifier(config: &Config, classifier: Box<dyn HelmetClassifier>) -> Self {
        Self {
            red_light: RedLightRule::new(config.rules.red_light.clone(), config.scene.stop_line),
            wrong_side: WrongSideRule::new(config.rules.wrong_side.clone(), config.scene.lanes.clone()),
            helmet: HelmetRule::new(config.rules.helmet.clone(), classifier),
        }
    }

    pub fn evaluate(&mut self, ctx: &RuleContext<'_>) -> Vec<ViolationEvent> {
        let mut events = self.red_light.evaluate(ctx);
        events.extend(self.wrong_side.evaluate(ctx));
        events.extend(self.helmet.evaluate(ctx));
        events
    }

    /// Drop all per-track state for evicted tracks.
    pub fn purge(&mut self, track_ids: &[u32]) {
        for id in track_ids {
            self.red_light.purge(*id);
            self.wrong_side.purge(*id);
            self.helmet.purge(*id);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ViolationType::NoHelmet).unwrap(),
            "\"no_helmet\""
        );
        assert_eq!(ViolationType::RedLight.to_string(), "red_light");
    }

    #[test]
    fn test_details_serialize_flat_and_read_back() {
        let details = test_support::details(ViolationType::WrongSide);
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["lane"], "inbound");
        assert_eq!(json["dot_product"], -1.0);
        assert!(json.get("WrongSide").is_none());

        for kind in ViolationType::ALL {
            let json = serde_json::to_string(&test_support::details(kind)).unwrap();
            let back: ViolationDetails = serde_json::from_str(&json).unwrap();
            assert_eq!(back.violation_type(), kind);
        }
    }
}
