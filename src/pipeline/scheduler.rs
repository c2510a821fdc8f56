// src/pipeline/scheduler.rs
//
// Drives one video through the engine.
//
//   intake thread ──frames (bounded)──▶ tracking task ──batches (bounded)──▶ detector workers
//                                          ▲                                      │
//                                          └──────────── results (seq-tagged) ────┘
//
// Every S-th frame goes to the detector in batches of `batch_size`; the
// rest coast. Frames wait in a pending queue in arrival order and are applied
// strictly in that order: a detected frame is released only once its batch
// result is in, while early results from other batches wait in a reorder
// buffer keyed by batch sequence number.
//
// Backpressure: the batch queue holds `max_pending_batches`; submission
// awaits room, so frames are never dropped. Results are unbounded so workers
// never block on the tracking task. Every await on a bounded channel also
// watches the cancel signal, so a stalled consumer cannot pin the pipeline.

use super::engine::ViolationEngine;
use super::error::{PipelineError, PipelineResult};
use super::event_bus::{EventBus, OutboundMessage, PipelineStatus, StatusMessage};
use super::metrics::{MetricsSummary, PipelineMetrics};
use crate::detection::DetectorFactory;
use crate::types::{Detection, Frame, SchedulerConfig};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// How long the terminal status may wait for room on the outbound channel.
const STATUS_GRACE: Duration = Duration::from_secs(1);

struct Batch {
    seq: u64,
    frames: Vec<Frame>,
}

struct BatchResult {
    seq: u64,
    frames: usize,
    outcome: Result<Vec<Vec<Detection>>, String>,
    latency_us: u64,
}

/// A returned batch waiting to be consumed frame by frame.
struct BatchSlot {
    /// `None` when the detector call failed
    detections: Option<Vec<Vec<Detection>>>,
    remaining: usize,
}

impl BatchSlot {
    /// Detections for the `idx`-th frame of the batch; `None` on failure.
    fn take(&mut self, idx: usize) -> Option<Vec<Detection>> {
        self.remaining = self.remaining.saturating_sub(1);
        self.detections
            .as_mut()
            .map(|d| d.get_mut(idx).map(std::mem::take).unwrap_or_default())
    }
}

struct PendingFrame {
    frame: Frame,
    /// (batch seq, index in batch) for detected frames
    slot: Option<(u64, usize)>,
}

#[derive(Default)]
struct TrackingState {
    pending: VecDeque<PendingFrame>,
    results: BTreeMap<u64, BatchSlot>,
    building: Vec<Frame>,
    next_seq: u64,
    outstanding: usize,
    consecutive_failures: u32,
}

enum LoopExit {
    Completed,
    Cancelled(String),
    Failed(PipelineError),
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub status: PipelineStatus,
    pub reason: Option<String>,
    pub frames_processed: u64,
    pub total_violations: u64,
    pub metrics: MetricsSummary,
}

/// Resolves once cancellation is requested. Never resolves if the sender
/// is gone without having requested it.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn check_sizes(cfg: &SchedulerConfig) -> PipelineResult<()> {
    let sizes = [
        ("frame_skip", cfg.frame_skip as usize),
        ("batch_size", cfg.batch_size),
        ("max_pending_batches", cfg.max_pending_batches),
        ("detector_workers", cfg.detector_workers),
        ("frame_queue_capacity", cfg.frame_queue_capacity),
    ];
    match sizes.iter().find(|(_, v)| *v == 0) {
        Some((name, _)) => Err(PipelineError::Config(format!("scheduler.{} must be at least 1", name))),
        None => Ok(()),
    }
}

fn intake_loop<S>(source: S, frames: mpsc::Sender<Frame>, stop: Arc<AtomicBool>, metrics: PipelineMetrics)
where
    S: Iterator<Item = anyhow::Result<Frame>>,
{
    for item in source {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match item {
            Ok(frame) => {
                metrics.inc(&metrics.frames_read);
                if frames.blocking_send(frame).is_err() {
                    break;
                }
            }
            Err(e) => {
                metrics.inc(&metrics.corrupt_frames);
                warn!("⚠️  Skipping unreadable frame: {:#}", e);
            }
        }
    }
    debug!("Frame intake finished");
}

fn detector_worker(
    id: usize,
    factory: DetectorFactory,
    batches: Arc<Mutex<mpsc::Receiver<Batch>>>,
    results: mpsc::UnboundedSender<BatchResult>,
    stop: Arc<AtomicBool>,
) {
    let mut detector = match factory() {
        Ok(d) => Some(d),
        Err(e) => {
            error!("❌ Detector worker {} failed to start: {:#}", id, e);
            None
        }
    };

    loop {
        let next = {
            let mut rx = batches.lock().unwrap_or_else(|e| e.into_inner());
            rx.blocking_recv()
        };
        let Some(batch) = next else {
            break;
        };
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let started = Instant::now();
        let outcome = match detector.as_mut() {
            Some(d) => match panic::catch_unwind(AssertUnwindSafe(|| d.detect_batch(&batch.frames))) {
                Ok(Ok(dets)) if dets.len() == batch.frames.len() => Ok(dets),
                Ok(Ok(dets)) => Err(format!(
                    "{} returned {} results for {} frames",
                    d.name(),
                    dets.len(),
                    batch.frames.len()
                )),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(_) => Err("detector panicked".to_string()),
            },
            None => Err("detector not initialised".to_string()),
        };
        if let Err(reason) = &outcome {
            warn!("⚠️  Detector worker {} batch {} failed: {}", id, batch.seq, reason);
        }

        let result = BatchResult {
            seq: batch.seq,
            frames: batch.frames.len(),
            outcome,
            latency_us: started.elapsed().as_micros() as u64,
        };
        if results.send(result).is_err() {
            break;
        }
    }
    debug!("Detector worker {} exiting", id);
}

#[derive(Clone)]
pub struct FrameScheduler {
    config: SchedulerConfig,
    factory: DetectorFactory,
}

impl FrameScheduler {
    pub fn new(config: SchedulerConfig, factory: DetectorFactory) -> Self {
        Self { config, factory }
    }

    /// Run `source` to completion (or cancellation) through `engine`,
    /// publishing on `bus`. A terminal status message is always attempted;
    /// it is dropped if the consumer does not make room within a second.
    pub async fn run<S>(
        &self,
        mut engine: ViolationEngine,
        source: S,
        bus: EventBus,
        mut cancel: watch::Receiver<bool>,
    ) -> PipelineResult<PipelineReport>
    where
        S: Iterator<Item = anyhow::Result<Frame>> + Send + 'static,
    {
        let cfg = &self.config;
        if let Err(e) = check_sizes(cfg) {
            error!("❌ {}", e);
            bus.publish_within(
                OutboundMessage::Status(StatusMessage {
                    status: PipelineStatus::Failed,
                    reason: Some(e.to_string()),
                    frames_processed: 0,
                    total_violations: 0,
                }),
                STATUS_GRACE,
            )
            .await;
            return Err(e);
        }
        let metrics = engine.metrics().clone();
        let stop = Arc::new(AtomicBool::new(false));

        let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(cfg.frame_queue_capacity);
        let intake: JoinHandle<()> = {
            let stop = Arc::clone(&stop);
            let metrics = metrics.clone();
            tokio::task::spawn_blocking(move || intake_loop(source, frame_tx, stop, metrics))
        };

        let (batch_tx, batch_rx) = mpsc::channel::<Batch>(cfg.max_pending_batches);
        let batch_rx = Arc::new(Mutex::new(batch_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<BatchResult>();
        let workers: Vec<JoinHandle<()>> = (0..cfg.detector_workers)
            .map(|id| {
                let factory = Arc::clone(&self.factory);
                let batches = Arc::clone(&batch_rx);
                let results = result_tx.clone();
                let stop = Arc::clone(&stop);
                tokio::task::spawn_blocking(move || detector_worker(id, factory, batches, results, stop))
            })
            .collect();
        drop(result_tx);
        drop(batch_rx);

        let exit = self
            .tracking_loop(
                &mut engine,
                &mut frame_rx,
                &batch_tx,
                &mut result_rx,
                &bus,
                &mut cancel,
                &metrics,
            )
            .await;

        // Teardown: stop intake, close the batch queue, abandon in-flight work
        stop.store(true, Ordering::Relaxed);
        drop(batch_tx);
        drop(frame_rx);
        drop(result_rx);
        if let Err(e) = intake.await {
            warn!("Frame intake task ended abnormally: {}", e);
        }
        for w in workers {
            if let Err(e) = w.await {
                warn!("Detector worker ended abnormally: {}", e);
            }
        }

        let summary = metrics.summary();
        let total_violations = {
            let store = engine.store();
            let guard = super::engine::read_store(&store);
            guard.lifetime_total()
        };
        let (status, reason, failure) = match exit {
            LoopExit::Completed => (PipelineStatus::Completed, None, None),
            LoopExit::Cancelled(reason) => (PipelineStatus::Cancelled, Some(reason), None),
            LoopExit::Failed(e) => (PipelineStatus::Failed, Some(e.to_string()), Some(e)),
        };

        bus.publish_within(
            OutboundMessage::Status(StatusMessage {
                status,
                reason: reason.clone(),
                frames_processed: summary.frames_processed,
                total_violations,
            }),
            STATUS_GRACE,
        )
        .await;

        info!(
            "🏁 Pipeline {:?}: {} frames ({} detected, {} coasted, {} corrupt), {} violations, {:.1} fps",
            status,
            summary.frames_processed,
            summary.frames_detected,
            summary.frames_coasted,
            summary.corrupt_frames,
            total_violations,
            summary.fps
        );

        if let Some(e) = failure {
            return Err(e);
        }
        Ok(PipelineReport {
            status,
            reason,
            frames_processed: summary.frames_processed,
            total_violations,
            metrics: summary,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn tracking_loop(
        &self,
        engine: &mut ViolationEngine,
        frame_rx: &mut mpsc::Receiver<Frame>,
        batch_tx: &mpsc::Sender<Batch>,
        result_rx: &mut mpsc::UnboundedReceiver<BatchResult>,
        bus: &EventBus,
        cancel: &mut watch::Receiver<bool>,
        metrics: &PipelineMetrics,
    ) -> LoopExit {
        let skip = u64::from(self.config.frame_skip);
        let batch_size = self.config.batch_size;
        let mut state = TrackingState::default();
        let mut input_done = false;
        let mut results_open = true;

        loop {
            if let Err(exit) = self.drain(&mut state, engine, bus, cancel, metrics).await {
                return exit;
            }
            if input_done && state.pending.is_empty() {
                return LoopExit::Completed;
            }
            if !results_open && state.outstanding > 0 {
                return LoopExit::Failed(PipelineError::DetectorWorkerLost);
            }

            tokio::select! {
                biased;
                _ = cancelled(cancel) => {
                    return LoopExit::Cancelled("cancel requested".to_string());
                }
                result = result_rx.recv(), if results_open => match result {
                    Some(r) => {
                        state.outstanding = state.outstanding.saturating_sub(1);
                        metrics.set(&metrics.detector_latency_us, r.latency_us);
                        state.results.insert(
                            r.seq,
                            BatchSlot {
                                detections: r.outcome.ok(),
                                remaining: r.frames,
                            },
                        );
                    }
                    None => results_open = false,
                },
                frame = frame_rx.recv(), if !input_done => match frame {
                    Some(frame) if frame.number % skip == 0 => {
                        state.pending.push_back(PendingFrame {
                            frame: frame.clone(),
                            slot: Some((state.next_seq, state.building.len())),
                        });
                        state.building.push(frame);
                        if state.building.len() >= batch_size {
                            if let Err(exit) = Self::submit(&mut state, batch_tx, cancel).await {
                                return exit;
                            }
                        }
                    }
                    Some(frame) => state.pending.push_back(PendingFrame { frame, slot: None }),
                    None => {
                        input_done = true;
                        if !state.building.is_empty() {
                            debug!("Flushing partial batch of {} frames", state.building.len());
                            if let Err(exit) = Self::submit(&mut state, batch_tx, cancel).await {
                                return exit;
                            }
                        }
                    }
                },
                else => return LoopExit::Failed(PipelineError::DetectorWorkerLost),
            }
        }
    }

    async fn submit(
        state: &mut TrackingState,
        batch_tx: &mpsc::Sender<Batch>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), LoopExit> {
        let batch = Batch {
            seq: state.next_seq,
            frames: std::mem::take(&mut state.building),
        };
        state.next_seq += 1;
        tokio::select! {
            biased;
            _ = cancelled(cancel) => Err(LoopExit::Cancelled("cancel requested".to_string())),
            sent = batch_tx.send(batch) => match sent {
                Ok(()) => {
                    state.outstanding += 1;
                    Ok(())
                }
                Err(_) => Err(LoopExit::Failed(PipelineError::DetectorWorkerLost)),
            },
        }
    }

    /// Apply every frame at the head of the pending queue that is ready.
    async fn drain(
        &self,
        state: &mut TrackingState,
        engine: &mut ViolationEngine,
        bus: &EventBus,
        cancel: &mut watch::Receiver<bool>,
        metrics: &PipelineMetrics,
    ) -> Result<(), LoopExit> {
        while let Some(front) = state.pending.front() {
            let detections = match front.slot {
                None => None,
                Some((seq, idx)) => {
                    let Some(slot) = state.results.get_mut(&seq) else {
                        break;
                    };
                    let dets = slot.take(idx);
                    if slot.remaining == 0 {
                        state.results.remove(&seq);
                    }
                    Some(dets)
                }
            };
            let Some(pending) = state.pending.pop_front() else {
                break;
            };

            let detections = match detections {
                None => None,
                Some(Some(dets)) => {
                    state.consecutive_failures = 0;
                    Some(dets)
                }
                Some(None) => {
                    state.consecutive_failures += 1;
                    metrics.inc(&metrics.detector_failures);
                    if state.consecutive_failures > self.config.max_consecutive_detector_failures {
                        error!(
                            "❌ Detector failed on {} consecutive frames, giving up",
                            state.consecutive_failures
                        );
                        return Err(LoopExit::Failed(PipelineError::DetectorUnavailable {
                            consecutive: state.consecutive_failures,
                        }));
                    }
                    Some(Vec::new())
                }
            };

            let ctx = engine.process_frame(&pending.frame, detections.as_deref());
            if ctx.has_violations() {
                trace!(
                    "Frame {} ({}, light {}): {} violations, {} confirmed tracks",
                    ctx.frame_number(),
                    if ctx.detected { "detected" } else { "coasted" },
                    ctx.light_phase,
                    ctx.violations.len(),
                    ctx.confirmed_tracks
                );
            }
            for event in &ctx.violations {
                Self::deliver(bus.publish_violation(event), cancel).await?;
            }
            Self::deliver(bus.publish_frame(&ctx), cancel).await?;
        }
        Ok(())
    }

    /// Await one outbound publish unless cancellation comes first.
    async fn deliver(
        publish: impl std::future::Future<Output = bool>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), LoopExit> {
        tokio::select! {
            biased;
            _ = cancelled(cancel) => Err(LoopExit::Cancelled("cancel requested".to_string())),
            delivered = publish => if delivered {
                Ok(())
            } else {
                Err(LoopExit::Cancelled("consumer disconnected".to_string()))
            },
        }
    }
}
