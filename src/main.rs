// src/main.rs

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::future::Future;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use traffic_violation_detection::detection::{
    find_replay_files, Detector, DetectorFactory, ReplayDetector, ReplayFrameSource,
};
use traffic_violation_detection::pipeline::{
    EventBus, FrameScheduler, OutboundMessage, PipelinePool, PipelineReport, PipelineResult,
    ViolationEngine, ViolationService,
};
use traffic_violation_detection::{Config, ViolationType};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "traffic_violation_detection={0},traffic_violations={0}",
            config.logging.level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚦 Traffic Violation Detection Starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Scheduler: frame_skip={}, batch_size={}, detector_workers={}, max_concurrent_pipelines={}",
        config.scheduler.frame_skip,
        config.scheduler.batch_size,
        config.scheduler.detector_workers,
        config.runtime.max_concurrent_pipelines
    );

    let replay_files = find_replay_files(&config.runtime.input_dir)?;
    if replay_files.is_empty() {
        error!("No replay files found in {}", config.runtime.input_dir);
        return Ok(());
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling pipelines");
            let _ = cancel_tx.send(true);
        }
    });

    let mut pool = PipelinePool::new(config.runtime.max_concurrent_pipelines);
    for path in &replay_files {
        let label = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("replay")
            .to_string();
        match prepare_pipeline(path, &label, &config, cancel_rx.clone()) {
            Ok(pipeline) => pool.spawn(label, pipeline),
            Err(e) => error!("❌ Skipping {}: {:#}", path.display(), e),
        }
    }

    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut cancel_watch = cancel_rx;
    let mut watching = true;
    loop {
        tokio::select! {
            changed = cancel_watch.changed(), if watching && !pool.is_closed() => match changed {
                Ok(()) if *cancel_watch.borrow() => {
                    info!("Not starting queued replays");
                    pool.close();
                }
                Ok(()) => {}
                Err(_) => watching = false,
            },
            outcome = pool.join_next() => {
                let Some(outcome) = outcome else {
                    break;
                };
                match outcome.result {
                    Ok(report) => {
                        completed += 1;
                        log_report(&outcome.label, &report);
                    }
                    Err(e) => {
                        failed += 1;
                        error!("❌ {} failed: {}", outcome.label, e);
                    }
                }
            }
        }
    }

    info!("🏁 Done: {} replay(s) processed, {} failed", completed, failed);
    Ok(())
}

/// Build the future that runs one replay file end to end and writes its
/// violation report.
fn prepare_pipeline(
    path: &Path,
    label: &str,
    config: &Config,
    cancel: watch::Receiver<bool>,
) -> Result<impl Future<Output = PipelineResult<PipelineReport>>> {
    let detector = ReplayDetector::load(path)?;
    let source = ReplayFrameSource::open(path, config.scene.fps)?;
    let factory: DetectorFactory =
        Arc::new(move || Ok(Box::new(detector.clone()) as Box<dyn Detector>));

    let output_path =
        PathBuf::from(&config.runtime.output_dir).join(format!("{}_violations.jsonl", label));
    let config = config.clone();
    let label = label.to_string();

    Ok(async move {
        let engine = ViolationEngine::new(&config);
        let service = ViolationService::new(engine.store(), engine.metrics().clone());
        let scheduler = FrameScheduler::new(config.scheduler.clone(), factory);
        let (bus, rx) = EventBus::from_config(&config);
        let consumer = tokio::spawn(log_events(label.clone(), rx));

        let result = scheduler.run(engine, source, bus, cancel).await;
        if let Err(e) = consumer.await {
            warn!("Event consumer for {} ended abnormally: {}", label, e);
        }

        match write_report(&output_path, &service) {
            Ok(n) => info!("💾 {}: wrote {} violations to {}", label, n, output_path.display()),
            Err(e) => error!("❌ {}: could not write report: {:#}", label, e),
        }
        let stats = service.statistics();
        for kind in ViolationType::ALL {
            info!(
                "  {:<10} {}",
                kind.as_str(),
                stats.by_type.get(&kind).copied().unwrap_or(0)
            );
        }
        result
    })
}

async fn log_events(label: String, mut rx: mpsc::Receiver<OutboundMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            OutboundMessage::Violation(v) => info!(
                "🚨 [{}] {} by vehicle {} at frame {} (conf {:.2})",
                label, v.violation_type, v.vehicle_id, v.frame_number, v.confidence
            ),
            OutboundMessage::Status(s) => debug!("[{}] terminal status {:?}", label, s.status),
            OutboundMessage::Frame(_) => {}
        }
    }
}

/// Every stored event as one JSON object per line. Returns the count written.
fn write_report(path: &Path, service: &ViolationService) -> Result<usize> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let all = service.all_violations();
    for event in &all.violations {
        serde_json::to_writer(&mut out, event)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(all.violations.len())
}

fn log_report(label: &str, report: &PipelineReport) {
    let m = &report.metrics;
    info!("\n✓ {} {:?}", label, report.status);
    if let Some(reason) = &report.reason {
        info!("  Reason: {}", reason);
    }
    info!(
        "  Frames: {} ({} detected, {} coasted, {} corrupt)",
        m.frames_processed, m.frames_detected, m.frames_coasted, m.corrupt_frames
    );
    info!(
        "  Violations: {} (red light {}, wrong side {}, no helmet {})",
        report.total_violations, m.red_light_violations, m.wrong_side_violations, m.no_helmet_violations
    );
    info!("  Throughput: {:.1} fps over {:.1}s", m.fps, m.elapsed_secs);
}
