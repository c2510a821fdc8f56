// src/pipeline/error.rs

use thiserror::Error;

/// Fatal pipeline outcomes surfaced to callers.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Detector unavailable: {consecutive} consecutive failures")]
    DetectorUnavailable { consecutive: u32 },
    #[error("Detector worker exited unexpectedly")]
    DetectorWorkerLost,
    #[error("Invalid pipeline configuration: {0}")]
    Config(String),
    #[error("Pipeline pool closed before the pipeline could start")]
    PoolClosed,
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
