// src/types.rs
//
// Shared data model: geometry primitives, detector input, frames, and the
// configuration tree loaded from config.yaml (see config.rs for loading).

use crate::analysis::traffic_light::LightPhase;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// GEOMETRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f32 {
        self.distance_sq(other).sqrt()
    }

    pub fn distance_sq(&self, other: &Point) -> f32 {
        (self.x - other.x).powi(2) + (self.y - other.y).powi(2)
    }

    pub fn sub(&self, other: &Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn normalized(&self) -> Option<Point> {
        let n = self.norm();
        if n > 1e-6 {
            Some(Point::new(self.x / n, self.y / n))
        } else {
            None
        }
    }

    pub fn dot(&self, other: &Point) -> f32 {
        self.x * other.x + self.y * other.y
    }
}

/// Axis-aligned box as `[x1, y1, x2, y2]` in pixels.
pub type BBox = [f32; 4];

pub fn bbox_center(bbox: &BBox) -> Point {
    Point::new((bbox[0] + bbox[2]) * 0.5, (bbox[1] + bbox[3]) * 0.5)
}

pub fn bbox_area(bbox: &BBox) -> f32 {
    (bbox[2] - bbox[0]).max(0.0) * (bbox[3] - bbox[1]).max(0.0)
}

/// Re-center a box on `center`, keeping its size.
pub fn bbox_recenter(bbox: &BBox, center: Point) -> BBox {
    let hw = (bbox[2] - bbox[0]) * 0.5;
    let hh = (bbox[3] - bbox[1]) * 0.5;
    [center.x - hw, center.y - hh, center.x + hw, center.y + hh]
}

// ============================================================================
// DETECTIONS & FRAMES
// ============================================================================

/// Object kinds the engine tracks. Everything else the detector reports is
/// dropped before it reaches the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Vehicle,
    Motorcycle,
    Person,
}

impl ObjectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vehicle => "vehicle",
            Self::Motorcycle => "motorcycle",
            Self::Person => "person",
        }
    }

    /// Kinds that are subject to traffic-signal rules.
    pub fn is_vehicle(&self) -> bool {
        matches!(self, Self::Vehicle | Self::Motorcycle)
    }
}

/// One detector output box for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub frame_number: u64,
    pub class: ObjectClass,
    pub bbox: BBox,
    pub confidence: f32,
}

impl Detection {
    pub fn center(&self) -> Point {
        bbox_center(&self.bbox)
    }

    pub fn area(&self) -> f32 {
        bbox_area(&self.bbox)
    }
}

/// A decoded video frame. Pixels are optional: replayed detections carry no
/// image, and the helmet rule simply holds its state on such frames.
///
/// `signal` carries a signal-controller reading taken with this frame; it is
/// only honoured when the traffic light runs in `external` mode.
#[derive(Debug, Clone)]
pub struct Frame {
    pub number: u64,
    pub timestamp_ms: f64,
    pub image: Option<Arc<RgbImage>>,
    pub signal: Option<LightPhase>,
}

impl Frame {
    pub fn new(number: u64, timestamp_ms: f64) -> Self {
        Self {
            number,
            timestamp_ms,
            image: None,
            signal: None,
        }
    }

    pub fn with_image(number: u64, timestamp_ms: f64, image: RgbImage) -> Self {
        Self {
            image: Some(Arc::new(image)),
            ..Self::new(number, timestamp_ms)
        }
    }

    pub fn with_signal(mut self, phase: LightPhase) -> Self {
        self.signal = Some(phase);
        self
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scene: SceneConfig,
    pub traffic_light: TrafficLightConfig,
    pub tracker: TrackerConfig,
    pub rules: RulesConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Video frame rate, used to derive frame timestamps for replayed input.
    pub fps: f64,
    pub stop_line: [Point; 2],
    pub lanes: Vec<LaneConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    pub name: String,
    pub polygon: Vec<Point>,
    /// Direction of legal travel; normalized by `Config::validate`.
    pub expected_direction: Point,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            stop_line: [Point::new(500.0, 650.0), Point::new(1300.0, 650.0)],
            lanes: vec![
                LaneConfig {
                    name: "inbound".to_string(),
                    polygon: vec![
                        Point::new(1000.0, 350.0),
                        Point::new(1800.0, 350.0),
                        Point::new(1800.0, 1000.0),
                        Point::new(1000.0, 1000.0),
                    ],
                    expected_direction: Point::new(-0.196, 0.981),
                },
                LaneConfig {
                    name: "outbound".to_string(),
                    polygon: vec![
                        Point::new(200.0, 350.0),
                        Point::new(1000.0, 350.0),
                        Point::new(1000.0, 1000.0),
                        Point::new(200.0, 1000.0),
                    ],
                    expected_direction: Point::new(0.196, -0.981),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightMode {
    /// Phases follow the configured cycle on the video clock.
    Cycle,
    /// Phases are pushed by an external controller via `set_phase`.
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficLightConfig {
    pub mode: LightMode,
    pub green_ms: u64,
    pub yellow_ms: u64,
    pub red_ms: u64,
    pub initial_phase: LightPhase,
    /// Time already spent in `initial_phase` when the video starts.
    pub offset_ms: u64,
}

impl Default for TrafficLightConfig {
    fn default() -> Self {
        Self {
            mode: LightMode::Cycle,
            green_ms: 5_000,
            yellow_ms: 2_000,
            red_ms: 5_000,
            initial_phase: LightPhase::Green,
            offset_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Spatial grid cell edge in pixels
    pub cell_size: f32,
    /// Max distance (pixels) between a predicted track position and a detection
    pub gating_distance: f32,
    /// Minimum detection confidence to accept
    pub min_confidence: f32,
    /// Successful updates required to promote Tentative → Confirmed
    pub min_hits_to_confirm: u32,
    /// Consecutive misses after which a confirmed track is Lost
    pub lost_after_misses: u32,
    /// Consecutive misses after which any track is destroyed
    pub max_missed_frames: u32,
    /// Consecutive misses after which a tentative track is destroyed
    pub max_tentative_misses: u32,
    /// Smoothed positions kept per track (K)
    pub history_len: usize,
    /// Positions required before rules consider a track (K_min)
    pub min_history: usize,
    pub process_noise_pos: f32,
    pub process_noise_vel: f32,
    pub measurement_noise: f32,
    pub initial_velocity_variance: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            cell_size: 80.0,
            gating_distance: 75.0,
            min_confidence: 0.25,
            min_hits_to_confirm: 3,
            lost_after_misses: 3,
            max_missed_frames: 15,
            max_tentative_misses: 2,
            history_len: 10,
            min_history: 3,
            process_noise_pos: 1.0,
            process_noise_vel: 0.5,
            measurement_noise: 4.0,
            initial_velocity_variance: 100.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub red_light: RedLightConfig,
    pub wrong_side: WrongSideConfig,
    pub helmet: HelmetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedLightConfig {
    pub enabled: bool,
    pub base_confidence: f32,
}

impl Default for RedLightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_confidence: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WrongSideConfig {
    pub enabled: bool,
    /// Cosine similarity below which travel counts as against the lane
    pub similarity_threshold: f32,
    /// Consecutive frames (M) to raise, and to clear, a wrong-side episode
    pub sustain_frames: u32,
    /// Mean per-frame displacement (pixels) below which a track is stationary
    pub min_displacement: f32,
}

impl Default for WrongSideConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: -0.3,
            sustain_frames: 8,
            min_displacement: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmetConfig {
    pub enabled: bool,
    /// Max distance (pixels) between motorcycle and rider centers
    pub association_radius: f32,
    /// Consecutive frames a pairing must persist to count as a rider
    pub rider_stable_frames: u32,
    /// Consecutive no-helmet classifications (N) before emitting
    pub sustain_frames: u32,
    /// Top fraction of the rider box treated as the head region
    pub head_fraction: f32,
    /// Fraction of skin/hair pixels that classifies a head as bare
    pub bare_head_ratio: f32,
    /// Minimum sampled pixels for the classifier to commit
    pub min_samples: u32,
    pub base_confidence: f32,
}

impl Default for HelmetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            association_radius: 150.0,
            rider_stable_frames: 3,
            sustain_frames: 10,
            head_fraction: 0.25,
            bare_head_ratio: 0.55,
            min_samples: 12,
            base_confidence: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Submit every S-th frame to the detector (S)
    pub frame_skip: u32,
    pub batch_size: usize,
    /// Batches queued for the detector before submission blocks
    pub max_pending_batches: usize,
    pub detector_workers: usize,
    pub frame_queue_capacity: usize,
    pub outbound_capacity: usize,
    pub max_consecutive_detector_failures: u32,
    pub publish_frames: bool,
    /// Burn lanes, stop line and violation markers into published frames
    pub annotate_frames: bool,
    pub jpeg_quality: u8,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_skip: 3,
            batch_size: 4,
            max_pending_batches: 2,
            detector_workers: 1,
            frame_queue_capacity: 64,
            outbound_capacity: 256,
            max_consecutive_detector_failures: 30,
            publish_frames: true,
            annotate_frames: true,
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_concurrent_pipelines: usize,
    pub input_dir: String,
    pub output_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pipelines: 2,
            input_dir: "replays".to_string(),
            output_dir: "output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_rules_cover_motorcycles() {
        assert!(ObjectClass::Vehicle.is_vehicle());
        assert!(ObjectClass::Motorcycle.is_vehicle());
        assert!(!ObjectClass::Person.is_vehicle());
    }

    #[test]
    fn test_bbox_recenter_keeps_size() {
        let b = [10.0, 20.0, 30.0, 60.0];
        let moved = bbox_recenter(&b, Point::new(100.0, 100.0));
        assert_eq!(moved, [90.0, 80.0, 110.0, 120.0]);
        assert_eq!(bbox_area(&moved), bbox_area(&b));
    }

    #[test]
    fn test_detection_deserializes_lowercase_class() {
        let d: Detection =
            serde_json::from_str(r#"{"class":"motorcycle","bbox":[0,0,10,10],"confidence":0.7}"#)
                .unwrap();
        assert_eq!(d.class, ObjectClass::Motorcycle);
        assert_eq!(d.frame_number, 0);
        assert_eq!(d.center(), Point::new(5.0, 5.0));
    }
}
