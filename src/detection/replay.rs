// src/detection/replay.rs
//
// Precomputed detections on disk, one JSON object per frame:
//
//   {"frame_number":12,"detections":[{"class":"vehicle","bbox":[x1,y1,x2,y2],"confidence":0.91}]}
//
// A record may also carry `"light":"red"` (a signal-controller reading taken
// at that frame), which drives the light in `external` mode.
//
// The same file drives the frame source (frames 0..=last, timestamps from
// fps, no pixels) and the detector. Frames missing from the file are empty.

use super::detector::Detector;
use crate::analysis::LightPhase;
use crate::types::{Detection, Frame};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRecord {
    pub frame_number: u64,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub light: Option<LightPhase>,
}

fn parse_line(line: &str) -> Result<ReplayRecord> {
    let mut record: ReplayRecord = serde_json::from_str(line)?;
    for d in &mut record.detections {
        d.frame_number = record.frame_number;
    }
    Ok(record)
}

// ============================================================================
// DETECTOR
// ============================================================================

#[derive(Clone)]
pub struct ReplayDetector {
    frames: Arc<HashMap<u64, Vec<Detection>>>,
}

impl ReplayDetector {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open replay file {}", path.display()))?;
        let mut frames: HashMap<u64, Vec<Detection>> = HashMap::new();
        let mut skipped = 0usize;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Ok(record) => frames
                    .entry(record.frame_number)
                    .or_default()
                    .extend(record.detections),
                Err(e) => {
                    skipped += 1;
                    warn!("⚠️  {}:{} unreadable replay line: {}", path.display(), line_no + 1, e);
                }
            }
        }
        info!(
            "📼 Replay {}: {} frames with detections ({} lines skipped)",
            path.display(),
            frames.len(),
            skipped
        );
        Ok(Self::from_map(frames))
    }

    pub fn from_map(frames: HashMap<u64, Vec<Detection>>) -> Self {
        Self {
            frames: Arc::new(frames),
        }
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.frames.get(&frame.number).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "replay"
    }
}

// ============================================================================
// FRAME SOURCE
// ============================================================================

/// Streams frames 0..=last from a replay file. A line that fails to parse is
/// yielded as an `Err` in its place, the way a decoder reports a corrupt frame.
pub struct ReplayFrameSource {
    lines: Lines<BufReader<File>>,
    frame_interval_ms: f64,
    next_number: u64,
    /// Parsed line (frame number, signal reading) still ahead of `next_number`
    pending: Option<(u64, Option<LightPhase>)>,
    line_no: usize,
    path: PathBuf,
}

impl ReplayFrameSource {
    pub fn open<P: AsRef<Path>>(path: P, fps: f64) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open replay file {}", path.display()))?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            frame_interval_ms: 1000.0 / fps,
            next_number: 0,
            pending: None,
            line_no: 0,
            path: path.to_path_buf(),
        })
    }

    fn emit(&mut self) -> Frame {
        let n = self.next_number;
        self.next_number += 1;
        Frame::new(n, n as f64 * self.frame_interval_ms)
    }
}

impl Iterator for ReplayFrameSource {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((target, signal)) = self.pending {
                if self.next_number < target {
                    return Some(Ok(self.emit()));
                }
                self.pending = None;
                if self.next_number == target {
                    let frame = self.emit();
                    return Some(Ok(match signal {
                        Some(phase) => frame.with_signal(phase),
                        None => frame,
                    }));
                }
            }

            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(anyhow::Error::new(e)
                        .context(format!("Failed to read {}", self.path.display()))))
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                // Lines at or behind the cursor add no new frames
                Ok(record) if record.frame_number < self.next_number => continue,
                Ok(record) => self.pending = Some((record.frame_number, record.light)),
                Err(e) => {
                    return Some(Err(e.context(format!(
                        "corrupt frame record at {}:{}",
                        self.path.display(),
                        self.line_no
                    ))))
                }
            }
        }
    }
}

/// All `*.jsonl` replay files under `dir`, sorted by path.
pub fn find_replay_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        anyhow::bail!("Input directory {} does not exist", dir.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"))
        })
        .filter(|p| {
            !p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with("_violations.jsonl"))
        })
        .collect();
    files.sort();
    info!("Found {} replay files in {}", files.len(), dir.display());
    Ok(files)
}
