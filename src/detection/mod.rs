// src/detection/mod.rs

mod detector;
mod replay;

// Re-export public APIs
pub use detector::{Detector, DetectorFactory};
pub use replay::{find_replay_files, ReplayDetector, ReplayFrameSource, ReplayRecord};
