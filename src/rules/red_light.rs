// src/rules/red_light.rs
//
// Red-light running: a vehicle's frame-to-frame motion segment crosses the
// stop line while the signal is red.
//
// Debounce is keyed on the light's red occurrence counter, so a track can be
// flagged at most once per red phase no matter how often it crosses. All
// flags are dropped as soon as the signal leaves red.

use super::{RuleContext, ViolationDetails, ViolationEvent};
use crate::geometry::crosses_line;
use crate::types::{Point, RedLightConfig};
use std::collections::HashMap;
use tracing::info;

pub struct RedLightRule {
    config: RedLightConfig,
    stop_line: [Point; 2],
    /// track id → red occurrence it was flagged in
    flagged: HashMap<u32, u64>,
}

impl RedLightRule {
    pub fn new(config: RedLightConfig, stop_line: [Point; 2]) -> Self {
        Self {
            config,
            stop_line,
            flagged: HashMap::new(),
        }
    }

    pub fn evaluate(&mut self, ctx: &RuleContext<'_>) -> Vec<ViolationEvent> {
        if !self.config.enabled {
            return Vec::new();
        }
        if !ctx.light.is_red() {
            self.flagged.clear();
            return Vec::new();
        }

        let occurrence = ctx.light.red_occurrence();
        let mut events = Vec::new();
        for track in ctx.tracker.tracks() {
            if !track.class.is_vehicle() || !track.is_rule_ready(ctx.min_history) {
                continue;
            }
            if self.flagged.get(&track.id) == Some(&occurrence) {
                continue;
            }
            let Some(prev) = track.previous_position() else {
                continue;
            };
            let current = track.position();
            if !crosses_line(prev, current, self.stop_line[0], self.stop_line[1]) {
                continue;
            }

            self.flagged.insert(track.id, occurrence);
            info!(
                "🚨 RED LIGHT: track {} crossed stop line at frame {} (red #{})",
                track.id, ctx.frame_number, occurrence
            );
            events.push(ViolationEvent::new(
                track.id,
                ctx,
                self.config.base_confidence * track.confidence,
                current,
                ViolationDetails::RedLight {
                    stop_line: self.stop_line,
                    vehicle_velocity: track.velocity(),
                    red_occurrence: occurrence,
                },
            ));
        }
        events
    }

    pub fn is_flagged(&self, track_id: u32) -> bool {
        self.flagged.contains_key(&track_id)
    }

    pub fn purge(&mut self, track_id: u32) {
        self.flagged.remove(&track_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{LightPhase, ObjectTracker, TrafficLightState};
    use crate::rules::ViolationType;
    use crate::rules::test_support::det;
    use crate::types::{LightMode, ObjectClass, TrackerConfig, TrafficLightConfig};

    const STOP_Y: f32 = 650.0;

    fn light_config() -> TrafficLightConfig {
        // 10 fps: red over frames 100..=200
        TrafficLightConfig {
            mode: LightMode::Cycle,
            green_ms: 8_000,
            yellow_ms: 2_000,
            red_ms: 10_100,
            initial_phase: LightPhase::Green,
            offset_ms: 0,
        }
    }

    /// Drive one vehicle along `y(frame)` and collect red-light events.
    fn run(frames: u64, frame_skip: u64, y_at: impl Fn(u64) -> f32) -> Vec<ViolationEvent> {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        let mut light = TrafficLightState::new(&light_config());
        let mut rule = RedLightRule::new(
            RedLightConfig::default(),
            [Point::new(500.0, STOP_Y), Point::new(1300.0, STOP_Y)],
        );
        let mut events = Vec::new();
        for n in 0..frames {
            let ts = n as f64 * 100.0;
            light.advance(ts);
            if n % frame_skip == 0 {
                tracker.step(Some(&[det(ObjectClass::Vehicle, 1200.0, y_at(n))]));
            } else {
                tracker.step(None);
            }
            let ctx = RuleContext {
                frame_number: n,
                timestamp_ms: ts,
                tracker: &tracker,
                light: &light,
                image: None,
                min_history: 3,
            };
            events.extend(rule.evaluate(&ctx));
        }
        events
    }

    #[test]
    fn test_single_crossing_during_red() {
        // Crosses y=650 between frames 119 and 120
        let events = run(300, 1, |n| STOP_Y + 4.0 - 8.0 * (120.0 - n as f32));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].frame_number, 120);
        assert_eq!(events[0].violation_type, ViolationType::RedLight);
        assert_eq!(events[0].vehicle_id, 1);
        match &events[0].details {
            ViolationDetails::RedLight {
                stop_line,
                vehicle_velocity,
                red_occurrence,
            } => {
                assert_eq!(stop_line[0].y, STOP_Y);
                assert!(vehicle_velocity.y > 6.0);
                assert_eq!(*red_occurrence, 1);
            }
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn test_one_event_regardless_of_sampling_rate() {
        for skip in [1, 2, 5] {
            let events = run(300, skip, |n| STOP_Y + 4.0 - 6.0 * (130.0 - n as f32));
            assert_eq!(events.len(), 1, "frame_skip={}", skip);
            let f = events[0].frame_number;
            assert!((125..=135).contains(&f), "frame_skip={} crossed at {}", skip, f);
        }
    }

    #[test]
    fn test_crossing_on_green_is_legal() {
        let events = run(300, 1, |n| STOP_Y + 4.0 - 8.0 * (50.0 - n as f32));
        assert!(events.is_empty());
    }

    #[test]
    fn test_repeated_crossings_in_same_red_flag_once() {
        // Oscillate across the line through the whole red phase
        let events = run(220, 1, |n| {
            let phase = (n as f32 * 0.08).sin();
            STOP_Y + 40.0 * phase
        });
        assert_eq!(events.len(), 1);
        assert!((100..=200).contains(&events[0].frame_number));
    }

    #[test]
    fn test_vehicle_parked_on_stop_line_is_not_flagged() {
        let mut config = light_config();
        config.mode = LightMode::External;
        let mut light = TrafficLightState::new(&config);
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        let mut rule = RedLightRule::new(
            RedLightConfig::default(),
            [Point::new(500.0, STOP_Y), Point::new(1300.0, STOP_Y)],
        );

        let mut count = 0;
        for n in 0..60u64 {
            if n == 20 {
                light.set_phase(LightPhase::Red, n as f64 * 100.0);
            }
            tracker.step(Some(&[det(ObjectClass::Vehicle, 900.0, STOP_Y)]));
            let ctx = RuleContext {
                frame_number: n,
                timestamp_ms: n as f64 * 100.0,
                tracker: &tracker,
                light: &light,
                image: None,
                min_history: 3,
            };
            count += rule.evaluate(&ctx).len();
        }
        assert!(light.is_red());
        assert_eq!(count, 0);
        assert!(!rule.is_flagged(1));
    }

    #[test]
    fn test_flags_reset_for_next_red_phase() {
        let mut config = light_config();
        config.mode = LightMode::External;
        let mut light = TrafficLightState::new(&config);
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        let mut rule = RedLightRule::new(
            RedLightConfig::default(),
            [Point::new(500.0, STOP_Y), Point::new(1300.0, STOP_Y)],
        );

        let mut count = 0;
        for n in 0..200u64 {
            match n {
                10 => light.set_phase(LightPhase::Red, n as f64),
                100 => light.set_phase(LightPhase::Green, n as f64),
                110 => light.set_phase(LightPhase::Red, n as f64),
                _ => {}
            }
            let y = STOP_Y + 40.0 * (n as f32 * 0.08).sin();
            tracker.step(Some(&[det(ObjectClass::Vehicle, 900.0, y)]));
            let ctx = RuleContext {
                frame_number: n,
                timestamp_ms: n as f64 * 100.0,
                tracker: &tracker,
                light: &light,
                image: None,
                min_history: 3,
            };
            count += rule.evaluate(&ctx).len();
            if n == 105 {
                assert!(!rule.is_flagged(1));
            }
        }
        assert_eq!(count, 2);
    }
}
