// src/pipeline/engine.rs
//
// Synchronous per-frame core: light clock → tracker (+ spatial grid) →
// rules → store. One engine per video; it is moved into the tracking task
// and never shared. Only the store is shared, behind a lock that is taken
// once per frame so readers always see whole frames.

use super::frame_context::FrameContext;
use super::metrics::PipelineMetrics;
use super::violation_store::ViolationStore;
use crate::analysis::{ObjectTracker, TrafficLightState};
use crate::rules::{HelmetClassifier, RuleContext, RuleSet};
use crate::types::{Config, Detection, Frame};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

pub type SharedStore = Arc<RwLock<ViolationStore>>;

pub fn new_shared_store(capacity: usize) -> SharedStore {
    Arc::new(RwLock::new(ViolationStore::new(capacity)))
}

/// Read access that survives a panicked writer.
pub fn read_store(store: &SharedStore) -> RwLockReadGuard<'_, ViolationStore> {
    store.read().unwrap_or_else(|e| e.into_inner())
}

pub fn write_store(store: &SharedStore) -> RwLockWriteGuard<'_, ViolationStore> {
    store.write().unwrap_or_else(|e| e.into_inner())
}

pub struct ViolationEngine {
    tracker: ObjectTracker,
    light: TrafficLightState,
    rules: RuleSet,
    store: SharedStore,
    metrics: PipelineMetrics,
    min_history: usize,
}

impl ViolationEngine {
    pub fn new(config: &Config) -> Self {
        Self::with_rules(
            config,
            RuleSet::from_config(config),
            new_shared_store(config.store.capacity),
            PipelineMetrics::new(),
        )
    }

    pub fn with_classifier(config: &Config, classifier: Box<dyn HelmetClassifier>) -> Self {
        Self::with_rules(
            config,
            RuleSet::with_classifier(config, classifier),
            new_shared_store(config.store.capacity),
            PipelineMetrics::new(),
        )
    }

    pub fn with_rules(
        config: &Config,
        rules: RuleSet,
        store: SharedStore,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            tracker: ObjectTracker::new(config.tracker.clone()),
            light: TrafficLightState::new(&config.traffic_light),
            rules,
            store,
            metrics,
            min_history: config.tracker.min_history,
        }
    }

    /// Run one frame through the engine. `detections` is `None` for frames
    /// the detector skipped.
    pub fn process_frame(&mut self, frame: &Frame, detections: Option<&[Detection]>) -> FrameContext {
        if let Some(phase) = frame.signal {
            self.light.set_phase(phase, frame.timestamp_ms);
        }
        self.light.advance(frame.timestamp_ms);

        let step = self.tracker.step(detections);
        if !step.removed.is_empty() {
            self.rules.purge(&step.removed);
        }

        let ctx = RuleContext {
            frame_number: frame.number,
            timestamp_ms: frame.timestamp_ms,
            tracker: &self.tracker,
            light: &self.light,
            image: frame.image.as_deref(),
            min_history: self.min_history,
        };
        let violations = self.rules.evaluate(&ctx);

        let total_violations = {
            let mut store = write_store(&self.store);
            for event in &violations {
                store.insert(event.clone());
            }
            store.lifetime_total()
        };

        for event in &violations {
            self.metrics.record_violation(event.violation_type);
        }
        self.metrics.inc(&self.metrics.frames_processed);
        if detections.is_some() {
            self.metrics.inc(&self.metrics.frames_detected);
        } else {
            self.metrics.inc(&self.metrics.frames_coasted);
        }
        let active = self.tracker.active_count();
        self.metrics.set(&self.metrics.active_tracks, active as u64);

        if !step.created.is_empty() || !step.removed.is_empty() {
            debug!(
                "Frame {}: +{} -{} tracks ({} active, light {})",
                frame.number,
                step.created.len(),
                step.removed.len(),
                active,
                self.light.phase()
            );
        }

        FrameContext {
            frame: frame.clone(),
            detected: detections.is_some(),
            light_phase: self.light.phase(),
            active_tracks: active,
            confirmed_tracks: self.tracker.confirmed_tracks().count(),
            violations,
            total_violations,
        }
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    pub fn light(&self) -> &TrafficLightState {
        &self.light
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::LightPhase;
    use crate::rules::test_support::det;
    use crate::rules::ViolationType;
    use crate::types::{LightMode, ObjectClass, TrafficLightConfig};
    use image::{Rgb, RgbImage};

    /// 10 fps scene, red over frames 100..=200.
    fn config() -> Config {
        let mut config = Config::default();
        config.scene.fps = 10.0;
        config.traffic_light = TrafficLightConfig {
            mode: LightMode::Cycle,
            green_ms: 8_000,
            yellow_ms: 2_000,
            red_ms: 10_100,
            initial_phase: LightPhase::Green,
            offset_ms: 0,
        };
        config.validate().unwrap();
        config
    }

    fn vehicle(cx: f32, cy: f32) -> Detection {
        Detection {
            frame_number: 0,
            class: ObjectClass::Vehicle,
            bbox: [cx - 40.0, cy - 30.0, cx + 40.0, cy + 30.0],
            confidence: 0.9,
        }
    }

    fn frame(n: u64) -> Frame {
        Frame::new(n, n as f64 * 100.0)
    }

    #[test]
    fn test_clip_with_single_red_light_crossing() {
        let config = config();
        let mut engine = ViolationEngine::new(&config);
        let stop_y = config.scene.stop_line[0].y;

        let mut emitted = Vec::new();
        for n in 0..300u64 {
            // Inbound lane, driving down (legal), crosses the line at frame 120
            let y = stop_y + 4.0 - 8.0 * (120.0 - n as f32);
            let dets = [vehicle(1200.0, y)];
            let ctx = engine.process_frame(&frame(n), Some(&dets));
            emitted.extend(ctx.violations);
        }

        assert_eq!(emitted.len(), 1, "{:?}", emitted);
        assert_eq!(emitted[0].violation_type, ViolationType::RedLight);
        assert_eq!(emitted[0].frame_number, 120);

        let shared = engine.store();
        let store = read_store(&shared);
        assert_eq!(store.len(), 1);
        assert_eq!(store.count(ViolationType::RedLight), 1);
        assert_eq!(engine.metrics().summary().frames_processed, 300);
    }

    #[test]
    fn test_repeated_crossings_same_red_phase_no_duplicates() {
        let config = config();
        let mut engine = ViolationEngine::new(&config);
        let stop_y = config.scene.stop_line[0].y;
        let mut count = 0;
        for n in 0..300u64 {
            // Creeps back and forth over the line for the whole clip
            let y = stop_y + 30.0 * (n as f32 * 0.1).sin();
            let ctx = engine.process_frame(&frame(n), Some(&[vehicle(1200.0, y)]));
            for v in &ctx.violations {
                if v.violation_type == ViolationType::RedLight {
                    assert!((100..=200).contains(&v.frame_number));
                    count += 1;
                }
            }
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn test_motorcycle_rider_without_helmet() {
        let mut config = config();
        config.rules.red_light.enabled = false;
        let mut engine = ViolationEngine::new(&config);

        let person_box = [930.0, 420.0, 990.0, 580.0];
        let mut img = RgbImage::from_pixel(1280, 720, Rgb([90, 90, 90]));
        for y in 420..=460 {
            for x in 930..=990 {
                img.put_pixel(x, y, Rgb([200, 150, 120]));
            }
        }

        let dets = [
            Detection {
                frame_number: 0,
                class: ObjectClass::Motorcycle,
                bbox: [910.0, 500.0, 1010.0, 640.0],
                confidence: 0.9,
            },
            Detection {
                frame_number: 0,
                class: ObjectClass::Person,
                bbox: person_box,
                confidence: 0.85,
            },
        ];

        let mut events = Vec::new();
        for n in 0..80u64 {
            let f = Frame::with_image(n, n as f64 * 100.0, img.clone());
            events.extend(engine.process_frame(&f, Some(&dets)).violations);
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].violation_type, ViolationType::NoHelmet);
        assert_eq!(events[0].vehicle_id, 1);
    }

    fn track_of(engine: &ViolationEngine, class: ObjectClass) -> u32 {
        engine
            .tracker()
            .tracks()
            .iter()
            .find(|t| t.class == class)
            .map(|t| t.id)
            .unwrap()
    }

    #[test]
    fn test_evicted_tracks_release_rule_state() {
        let config = config();
        let mut engine = ViolationEngine::new(&config);
        let stop_y = config.scene.stop_line[0].y;

        // Wrong-way vehicle in the inbound lane plus a parked motorcycle with
        // its rider, outside both lanes
        for n in 0..20u64 {
            let dets = [
                vehicle(1400.0, 950.0 - 6.0 * n as f32),
                det(ObjectClass::Motorcycle, 300.0, 250.0),
                det(ObjectClass::Person, 300.0, 190.0),
            ];
            engine.process_frame(&frame(n), Some(&dets));
        }
        let car = track_of(&engine, ObjectClass::Vehicle);
        let moto = track_of(&engine, ObjectClass::Motorcycle);
        let person = track_of(&engine, ObjectClass::Person);
        assert!(engine.rules.wrong_side.is_flagged(car));
        assert_eq!(engine.rules.helmet.rider_of(moto), Some(person));

        for n in 20..100u64 {
            engine.process_frame(&frame(n), Some(&[]));
        }
        assert_eq!(engine.tracker().active_count(), 0);
        assert!(engine.tracker().grid().is_empty());
        assert!(!engine.rules.wrong_side.is_flagged(car));
        assert_eq!(engine.rules.helmet.rider_of(moto), None);

        // Red from frame 100: cross at 120, then vanish while still red
        for n in 100..=121u64 {
            let y = stop_y + 4.0 - 8.0 * (120.0 - n as f32);
            engine.process_frame(&frame(n), Some(&[vehicle(1200.0, y)]));
        }
        let runner = track_of(&engine, ObjectClass::Vehicle);
        assert!(engine.light().is_red());
        assert!(engine.rules.red_light.is_flagged(runner));

        for n in 122..160u64 {
            engine.process_frame(&frame(n), Some(&[]));
        }
        assert!(engine.light().is_red());
        assert_eq!(engine.tracker().active_count(), 0);
        assert!(!engine.rules.red_light.is_flagged(runner));
    }
}
