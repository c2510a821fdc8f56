// src/analysis/traffic_light.rs
//
// Traffic signal state on the video clock.
//
// In `cycle` mode the phase is a pure function of video time:
//   t = timestamp_ms + offset_ms, walked through Green → Yellow → Red
//   starting from the configured initial phase.
// In `external` mode the phase only changes through `set_phase`.
//
// `red_occurrence` counts entries into red and never decreases. The red-light
// rule keys its debounce on it, so each red phase gets a fresh window.

use crate::types::{LightMode, TrafficLightConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightPhase {
    Green,
    Yellow,
    Red,
}

impl LightPhase {
    fn next(self) -> Self {
        match self {
            Self::Green => Self::Yellow,
            Self::Yellow => Self::Red,
            Self::Red => Self::Green,
        }
    }
}

impl fmt::Display for LightPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Green => write!(f, "green"),
            Self::Yellow => write!(f, "yellow"),
            Self::Red => write!(f, "red"),
        }
    }
}

/// Result of evaluating the cycle at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CyclePosition {
    pub phase: LightPhase,
    /// Video time (ms, before offset) at which the current phase began
    pub phase_started_ms: f64,
    pub red_occurrence: u64,
}

#[derive(Debug, Clone)]
pub struct LightCycle {
    pub green_ms: u64,
    pub yellow_ms: u64,
    pub red_ms: u64,
    pub initial_phase: LightPhase,
    pub offset_ms: u64,
}

impl LightCycle {
    pub fn from_config(config: &TrafficLightConfig) -> Self {
        Self {
            green_ms: config.green_ms,
            yellow_ms: config.yellow_ms,
            red_ms: config.red_ms,
            initial_phase: config.initial_phase,
            offset_ms: config.offset_ms,
        }
    }

    fn duration(&self, phase: LightPhase) -> f64 {
        match phase {
            LightPhase::Green => self.green_ms as f64,
            LightPhase::Yellow => self.yellow_ms as f64,
            LightPhase::Red => self.red_ms as f64,
        }
    }

    fn period(&self) -> f64 {
        (self.green_ms + self.yellow_ms + self.red_ms) as f64
    }

    /// Pure transition function: where the cycle is at `video_ms`.
    pub fn position_at(&self, video_ms: f64) -> CyclePosition {
        let period = self.period();
        let reds_per_cycle = u64::from(self.red_ms > 0);
        let t = video_ms.max(0.0) + self.offset_ms as f64;
        if period <= 0.0 {
            return CyclePosition {
                phase: self.initial_phase,
                phase_started_ms: 0.0,
                red_occurrence: u64::from(self.initial_phase == LightPhase::Red),
            };
        }

        let cycles = (t / period).floor();
        let mut remaining = t - cycles * period;
        let mut red_occurrence = cycles as u64 * reds_per_cycle;
        let mut phase = self.initial_phase;
        let mut start = cycles * period;
        // At most one full walk plus float slack
        for _ in 0..4 {
            let d = self.duration(phase);
            if d > 0.0 && phase == LightPhase::Red {
                red_occurrence += 1;
            }
            if remaining < d {
                break;
            }
            remaining -= d;
            start += d;
            phase = phase.next();
        }

        CyclePosition {
            phase,
            phase_started_ms: start - self.offset_ms as f64,
            red_occurrence,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrafficLightState {
    mode: LightMode,
    cycle: LightCycle,
    phase: LightPhase,
    phase_started_ms: f64,
    red_occurrence: u64,
    last_update_ms: f64,
}

impl TrafficLightState {
    pub fn new(config: &TrafficLightConfig) -> Self {
        let cycle = LightCycle::from_config(config);
        let initial = match config.mode {
            LightMode::Cycle => cycle.position_at(0.0),
            LightMode::External => CyclePosition {
                phase: config.initial_phase,
                phase_started_ms: 0.0,
                red_occurrence: u64::from(config.initial_phase == LightPhase::Red),
            },
        };
        Self {
            mode: config.mode,
            cycle,
            phase: initial.phase,
            phase_started_ms: initial.phase_started_ms,
            red_occurrence: initial.red_occurrence,
            last_update_ms: 0.0,
        }
    }

    /// Move the clock to `video_ms`. Time never runs backwards; earlier
    /// timestamps are ignored. Returns the new phase on a transition.
    pub fn advance(&mut self, video_ms: f64) -> Option<LightPhase> {
        if video_ms < self.last_update_ms {
            return None;
        }
        self.last_update_ms = video_ms;
        if self.mode != LightMode::Cycle {
            return None;
        }

        let pos = self.cycle.position_at(video_ms);
        let changed = pos.phase != self.phase || pos.red_occurrence != self.red_occurrence;
        self.phase_started_ms = pos.phase_started_ms;
        self.red_occurrence = self.red_occurrence.max(pos.red_occurrence);
        if pos.phase != self.phase {
            debug!(
                "🚦 Light {} → {} at {:.0}ms (red #{})",
                self.phase, pos.phase, video_ms, self.red_occurrence
            );
            self.phase = pos.phase;
        }
        changed.then_some(self.phase)
    }

    /// Externally driven transition (sensor feed, controller). Ignored in
    /// cycle mode.
    pub fn set_phase(&mut self, phase: LightPhase, video_ms: f64) {
        if self.mode != LightMode::External || phase == self.phase {
            return;
        }
        if phase == LightPhase::Red {
            self.red_occurrence += 1;
        }
        debug!("🚦 Light set {} → {} at {:.0}ms", self.phase, phase, video_ms);
        self.phase = phase;
        self.phase_started_ms = video_ms;
        self.last_update_ms = self.last_update_ms.max(video_ms);
    }

    pub fn phase(&self) -> LightPhase {
        self.phase
    }

    pub fn is_red(&self) -> bool {
        self.phase == LightPhase::Red
    }

    pub fn red_occurrence(&self) -> u64 {
        self.red_occurrence
    }

    pub fn phase_started_ms(&self) -> f64 {
        self.phase_started_ms
    }

    pub fn mode(&self) -> LightMode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle_config() -> TrafficLightConfig {
        TrafficLightConfig {
            mode: LightMode::Cycle,
            green_ms: 8_000,
            yellow_ms: 2_000,
            red_ms: 10_100,
            initial_phase: LightPhase::Green,
            offset_ms: 0,
        }
    }

    #[test]
    fn test_cycle_phases() {
        let cycle = LightCycle::from_config(&cycle_config());
        assert_eq!(cycle.position_at(0.0).phase, LightPhase::Green);
        assert_eq!(cycle.position_at(8_500.0).phase, LightPhase::Yellow);
        let red = cycle.position_at(10_000.0);
        assert_eq!(red.phase, LightPhase::Red);
        assert_eq!(red.phase_started_ms, 10_000.0);
        assert_eq!(red.red_occurrence, 1);
        assert_eq!(cycle.position_at(20_000.0).phase, LightPhase::Red);
        assert_eq!(cycle.position_at(20_100.0).phase, LightPhase::Green);
        // Second lap
        let second = cycle.position_at(20_100.0 + 10_000.0);
        assert_eq!(second.phase, LightPhase::Red);
        assert_eq!(second.red_occurrence, 2);
    }

    #[test]
    fn test_offset_and_initial_red() {
        let mut config = cycle_config();
        config.initial_phase = LightPhase::Red;
        config.offset_ms = 10_000;
        let cycle = LightCycle::from_config(&config);
        let pos = cycle.position_at(0.0);
        assert_eq!(pos.phase, LightPhase::Red);
        assert_eq!(pos.red_occurrence, 1);
        assert_eq!(pos.phase_started_ms, -10_000.0);
        assert_eq!(cycle.position_at(100.0).phase, LightPhase::Green);
    }

    #[test]
    fn test_state_counts_red_entries() {
        let mut light = TrafficLightState::new(&cycle_config());
        assert_eq!(light.red_occurrence(), 0);
        let mut transitions = Vec::new();
        for frame in 0..600u64 {
            if let Some(p) = light.advance(frame as f64 * 100.0) {
                transitions.push((frame, p));
            }
        }
        assert_eq!(transitions[0], (80, LightPhase::Yellow));
        assert_eq!(transitions[1], (100, LightPhase::Red));
        assert_eq!(transitions[2], (201, LightPhase::Green));
        assert_eq!(light.red_occurrence(), 3);
    }

    #[test]
    fn test_time_does_not_run_backwards() {
        let mut light = TrafficLightState::new(&cycle_config());
        light.advance(15_000.0);
        assert!(light.is_red());
        assert_eq!(light.advance(1_000.0), None);
        assert!(light.is_red());
    }

    #[test]
    fn test_external_mode() {
        let mut config = cycle_config();
        config.mode = LightMode::External;
        let mut light = TrafficLightState::new(&config);
        assert_eq!(light.advance(50_000.0), None);
        assert_eq!(light.phase(), LightPhase::Green);

        light.set_phase(LightPhase::Red, 51_000.0);
        assert!(light.is_red());
        assert_eq!(light.red_occurrence(), 1);
        light.set_phase(LightPhase::Red, 52_000.0);
        assert_eq!(light.red_occurrence(), 1);
        light.set_phase(LightPhase::Green, 53_000.0);
        light.set_phase(LightPhase::Red, 54_000.0);
        assert_eq!(light.red_occurrence(), 2);
    }
}
