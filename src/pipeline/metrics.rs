// src/pipeline/metrics.rs
//
// Per-pipeline counters. Cheap to clone (shared atomics), so the intake
// thread, detector workers and the tracking task all write to the same set.

use crate::rules::ViolationType;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames_read: Arc<AtomicU64>,
    pub frames_processed: Arc<AtomicU64>,
    pub frames_detected: Arc<AtomicU64>,
    pub frames_coasted: Arc<AtomicU64>,
    pub corrupt_frames: Arc<AtomicU64>,
    pub detector_failures: Arc<AtomicU64>,
    pub red_light_violations: Arc<AtomicU64>,
    pub wrong_side_violations: Arc<AtomicU64>,
    pub no_helmet_violations: Arc<AtomicU64>,
    pub active_tracks: Arc<AtomicU64>,
    pub detector_latency_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_read: Arc::new(AtomicU64::new(0)),
            frames_processed: Arc::new(AtomicU64::new(0)),
            frames_detected: Arc::new(AtomicU64::new(0)),
            frames_coasted: Arc::new(AtomicU64::new(0)),
            corrupt_frames: Arc::new(AtomicU64::new(0)),
            detector_failures: Arc::new(AtomicU64::new(0)),
            red_light_violations: Arc::new(AtomicU64::new(0)),
            wrong_side_violations: Arc::new(AtomicU64::new(0)),
            no_helmet_violations: Arc::new(AtomicU64::new(0)),
            active_tracks: Arc::new(AtomicU64::new(0)),
            detector_latency_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(&self, counter: &AtomicU64, value: u64) {
        counter.store(value, Ordering::Relaxed);
    }

    pub fn record_violation(&self, kind: ViolationType) {
        let counter = match kind {
            ViolationType::RedLight => &self.red_light_violations,
            ViolationType::WrongSide => &self.wrong_side_violations,
            ViolationType::NoHelmet => &self.no_helmet_violations,
        };
        self.inc(counter);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_detected: self.frames_detected.load(Ordering::Relaxed),
            frames_coasted: self.frames_coasted.load(Ordering::Relaxed),
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            red_light_violations: self.red_light_violations.load(Ordering::Relaxed),
            wrong_side_violations: self.wrong_side_violations.load(Ordering::Relaxed),
            no_helmet_violations: self.no_helmet_violations.load(Ordering::Relaxed),
            active_tracks: self.active_tracks.load(Ordering::Relaxed),
            last_detector_latency_us: self.detector_latency_us.load(Ordering::Relaxed),
            fps: self.fps(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub frames_detected: u64,
    pub frames_coasted: u64,
    pub corrupt_frames: u64,
    pub detector_failures: u64,
    pub red_light_violations: u64,
    pub wrong_side_violations: u64,
    pub no_helmet_violations: u64,
    pub active_tracks: u64,
    pub last_detector_latency_us: u64,
    pub fps: f64,
    pub elapsed_secs: f64,
}
