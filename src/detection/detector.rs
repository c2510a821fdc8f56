// src/detection/detector.rs
//
// Seam to the object detector. The engine only ever sees `Detection`s; any
// model (YOLO over ONNX, a remote service, a replay file) plugs in here.

use crate::types::{Detection, Frame};
use anyhow::Result;
use std::sync::Arc;

pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Batched form. Models that batch natively override this; the result
    /// must line up with `frames` one-to-one.
    fn detect_batch(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Detection>>> {
        frames.iter().map(|f| self.detect(f)).collect()
    }

    fn name(&self) -> &str {
        "detector"
    }
}

/// Builds one detector per worker thread.
pub type DetectorFactory = Arc<dyn Fn() -> Result<Box<dyn Detector>> + Send + Sync>;
