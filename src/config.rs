use crate::types::{Config, LightMode};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with, and normalize lane
    /// directions to unit vectors.
    pub fn validate(&mut self) -> Result<()> {
        let t = &self.tracker;
        positive_finite("tracker.cell_size", t.cell_size)?;
        positive_finite("tracker.gating_distance", t.gating_distance)?;
        for (name, value) in [
            ("tracker.process_noise_pos", t.process_noise_pos),
            ("tracker.process_noise_vel", t.process_noise_vel),
            ("tracker.measurement_noise", t.measurement_noise),
            ("tracker.initial_velocity_variance", t.initial_velocity_variance),
        ] {
            positive_finite(name, value)?;
        }
        if t.history_len < 2 {
            bail!("tracker.history_len must be at least 2");
        }
        if t.min_history < 2 || t.min_history > t.history_len {
            bail!(
                "tracker.min_history must be in 2..={} (got {})",
                t.history_len,
                t.min_history
            );
        }
        if t.min_hits_to_confirm == 0 {
            bail!("tracker.min_hits_to_confirm must be at least 1");
        }

        if !(self.scene.fps.is_finite() && self.scene.fps > 0.0) {
            bail!("scene.fps must be positive (got {})", self.scene.fps);
        }
        if self.scene.stop_line[0] == self.scene.stop_line[1] {
            bail!("scene.stop_line endpoints must differ");
        }
        for lane in &mut self.scene.lanes {
            if lane.polygon.len() < 3 {
                bail!(
                    "lane '{}' polygon needs at least 3 points (got {})",
                    lane.name,
                    lane.polygon.len()
                );
            }
            match lane.expected_direction.normalized() {
                Some(dir) => lane.expected_direction = dir,
                None => bail!("lane '{}' expected_direction must be non-zero", lane.name),
            }
        }

        let light = &self.traffic_light;
        if light.mode == LightMode::Cycle && light.green_ms + light.yellow_ms + light.red_ms == 0 {
            bail!("traffic_light cycle durations must not all be zero");
        }

        let s = &self.scheduler;
        if s.frame_skip == 0 {
            bail!("scheduler.frame_skip must be at least 1");
        }
        if s.batch_size == 0 || s.max_pending_batches == 0 || s.detector_workers == 0 {
            bail!("scheduler.batch_size, max_pending_batches and detector_workers must be at least 1");
        }
        if s.frame_queue_capacity == 0 || s.outbound_capacity == 0 {
            bail!("scheduler queue capacities must be at least 1");
        }
        if s.jpeg_quality == 0 || s.jpeg_quality > 100 {
            bail!("scheduler.jpeg_quality must be in 1..=100");
        }

        let h = &self.rules.helmet;
        positive_finite("rules.helmet.association_radius", h.association_radius)?;
        if !(h.head_fraction > 0.0 && h.head_fraction <= 1.0) {
            bail!("rules.helmet.head_fraction must be in (0, 1]");
        }
        if h.sustain_frames == 0 || self.rules.wrong_side.sustain_frames == 0 {
            bail!("rule sustain_frames must be at least 1");
        }

        if self.store.capacity == 0 {
            bail!("store.capacity must be at least 1");
        }
        if self.runtime.max_concurrent_pipelines == 0 {
            bail!("runtime.max_concurrent_pipelines must be at least 1");
        }
        Ok(())
    }
}

/// Grid lookups derive cell ranges from these, so infinity or NaN would
/// make them unbounded.
fn positive_finite(name: &str, value: f32) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        bail!("{} must be a positive finite number (got {})", name, value);
    }
    Ok(())
}
