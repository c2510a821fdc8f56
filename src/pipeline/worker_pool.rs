// src/pipeline/worker_pool.rs
//
// Runs many pipelines at once, at most `max_concurrent_pipelines` of them
// doing work at any moment. Each pipeline is an independent async task that
// waits for a semaphore permit before starting.

use super::error::{PipelineError, PipelineResult};
use super::scheduler::PipelineReport;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error};

/// Result of one pipeline, labelled with whatever the caller spawned it as.
pub struct PipelineOutcome {
    pub label: String,
    pub result: PipelineResult<PipelineReport>,
}

pub struct PipelinePool {
    permits: Arc<Semaphore>,
    tasks: JoinSet<PipelineOutcome>,
    labels: HashMap<Id, String>,
}

impl PipelinePool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tasks: JoinSet::new(),
            labels: HashMap::new(),
        }
    }

    pub fn spawn<F>(&mut self, label: impl Into<String>, pipeline: F)
    where
        F: Future<Output = PipelineResult<PipelineReport>> + Send + 'static,
    {
        let label = label.into();
        let permits = Arc::clone(&self.permits);
        let task_label = label.clone();
        let handle = self.tasks.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => {
                    debug!("Pipeline {} started", task_label);
                    pipeline.await
                }
                Err(_) => Err(PipelineError::PoolClosed),
            };
            PipelineOutcome {
                label: task_label,
                result,
            }
        });
        self.labels.insert(handle.id(), label);
    }

    /// Stop admitting pipelines. Running ones finish normally; ones still
    /// waiting for a permit resolve to `PipelineError::PoolClosed`.
    pub fn close(&self) {
        if !self.permits.is_closed() {
            debug!("Pipeline pool closed");
        }
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Pipelines spawned and not yet joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Next pipeline to finish, in completion order. A pipeline that panicked
    /// is logged and skipped.
    pub async fn join_next(&mut self) -> Option<PipelineOutcome> {
        loop {
            match self.tasks.join_next_with_id().await? {
                Ok((id, outcome)) => {
                    self.labels.remove(&id);
                    return Some(outcome);
                }
                Err(e) => {
                    let label = self.labels.remove(&e.id()).unwrap_or_default();
                    error!("❌ Pipeline {} aborted: {}", label, e);
                }
            }
        }
    }

    pub async fn join_all(mut self) -> Vec<PipelineOutcome> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        while let Some(outcome) = self.join_next().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}
