// src/pipeline/frame_context.rs
//
// Everything the engine produced for one frame. Built once per frame and
// handed to the publisher, so consumers never see a half-processed frame.

use crate::analysis::LightPhase;
use crate::rules::ViolationEvent;
use crate::types::Frame;

#[derive(Debug, Clone)]
pub struct FrameContext {
    pub frame: Frame,
    /// Whether the detector ran on this frame (false = coasted)
    pub detected: bool,
    pub light_phase: LightPhase,
    pub active_tracks: usize,
    pub confirmed_tracks: usize,
    pub violations: Vec<ViolationEvent>,
    /// Lifetime violation count after this frame
    pub total_violations: u64,
}

impl FrameContext {
    pub fn frame_number(&self) -> u64 {
        self.frame.number
    }

    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}
