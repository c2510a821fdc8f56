// src/lib.rs
//
// Streaming traffic violation detection: tracked detections in, red light,
// wrong side and no helmet events out.

pub mod analysis;
pub mod config;
pub mod detection;
pub mod geometry;
pub mod pipeline;
pub mod rules;
pub mod types;

pub use pipeline::{FrameScheduler, PipelinePool, ViolationEngine, ViolationService};
pub use rules::{ViolationEvent, ViolationType};
pub use types::Config;
