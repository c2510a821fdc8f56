// src/pipeline/mod.rs

pub mod engine;
pub mod error;
pub mod event_bus;
pub mod frame_context;
pub mod metrics;
pub mod overlay;
pub mod query;
pub mod scheduler;
pub mod violation_store;
pub mod worker_pool;

pub use engine::{new_shared_store, read_store, SharedStore, ViolationEngine};
pub use error::{PipelineError, PipelineResult};
pub use event_bus::{EventBus, OutboundMessage, PipelineStatus, StatusMessage};
pub use frame_context::FrameContext;
pub use metrics::{MetricsSummary, PipelineMetrics};
pub use overlay::SceneOverlay;
pub use query::{HealthStatus, ViolationService, ViolationsResponse};
pub use scheduler::{FrameScheduler, PipelineReport};
pub use violation_store::{ViolationStats, ViolationStore, RECENT_WINDOW_FRAMES};
pub use worker_pool::{PipelineOutcome, PipelinePool};
