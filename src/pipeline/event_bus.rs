// src/pipeline/event_bus.rs
//
// Outbound messages for live consumers (dashboard, websocket relay). Each
// pipeline publishes, in frame order, one `frame` message per processed
// frame, one `violation` message per emitted event, and a single terminal
// `status` message.

use super::frame_context::FrameContext;
use super::overlay::SceneOverlay;
use crate::rules::{ViolationEvent, ViolationType};
use crate::types::{Config, Point};
use anyhow::Result;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    Frame(FrameMessage),
    Violation(ViolationMessage),
    Status(StatusMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    pub frame_number: u64,
    pub total_violations: u64,
    /// Base64 JPEG; empty when the frame carries no pixels
    pub frame_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub timestamp: DateTime<Utc>,
    pub confidence: f32,
    pub location: Point,
    pub vehicle_id: String,
    pub frame_number: u64,
}

impl From<&ViolationEvent> for ViolationMessage {
    fn from(e: &ViolationEvent) -> Self {
        Self {
            id: e.id.clone(),
            violation_type: e.violation_type,
            timestamp: e.timestamp,
            confidence: e.confidence,
            location: e.location,
            vehicle_id: e.vehicle_id.to_string(),
            frame_number: e.frame_number,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: PipelineStatus,
    pub reason: Option<String>,
    pub frames_processed: u64,
    pub total_violations: u64,
}

/// Encode an RGB frame as base64 JPEG for the `frame_data` field.
pub fn encode_frame_jpeg(image: &RgbImage, quality: u8) -> Result<String> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    image.write_with_encoder(encoder)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buf.into_inner()))
}

/// Sending half of a pipeline's outbound channel.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<OutboundMessage>,
    publish_frames: bool,
    jpeg_quality: u8,
    overlay: Option<Arc<SceneOverlay>>,
}

impl EventBus {
    pub fn new(tx: mpsc::Sender<OutboundMessage>, publish_frames: bool, jpeg_quality: u8) -> Self {
        Self {
            tx,
            publish_frames,
            jpeg_quality,
            overlay: None,
        }
    }

    /// Channel sized and configured from the `scheduler` section, with the
    /// scene overlay when `annotate_frames` is set.
    pub fn from_config(config: &Config) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let s = &config.scheduler;
        let (bus, rx) = Self::channel(s.outbound_capacity, s.publish_frames, s.jpeg_quality);
        let bus = if s.annotate_frames {
            bus.with_overlay(SceneOverlay::from_scene(&config.scene))
        } else {
            bus
        };
        (bus, rx)
    }

    /// Draw the scene onto every published frame.
    pub fn with_overlay(mut self, overlay: SceneOverlay) -> Self {
        self.overlay = Some(Arc::new(overlay));
        self
    }

    /// Channel of `capacity` plus the bus that feeds it.
    pub fn channel(
        capacity: usize,
        publish_frames: bool,
        jpeg_quality: u8,
    ) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx, publish_frames, jpeg_quality), rx)
    }

    /// Waits for room. Returns `false` once the consumer has gone away.
    pub async fn publish(&self, message: OutboundMessage) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// Bounded publish for the terminal status: gives a consumer that has
    /// stopped reading `grace` to make room, then gives up.
    pub async fn publish_within(&self, message: OutboundMessage, grace: std::time::Duration) -> bool {
        match tokio::time::timeout(grace, self.tx.send(message)).await {
            Ok(sent) => sent.is_ok(),
            Err(_) => {
                warn!("Outbound consumer not reading, message dropped after {:?}", grace);
                false
            }
        }
    }

    pub async fn publish_frame(&self, ctx: &FrameContext) -> bool {
        if !self.publish_frames {
            return !self.is_closed();
        }
        let frame_data = match ctx.frame.image.as_deref() {
            Some(img) => {
                let encoded = match &self.overlay {
                    Some(overlay) => encode_frame_jpeg(&overlay.annotate(img, ctx), self.jpeg_quality),
                    None => encode_frame_jpeg(img, self.jpeg_quality),
                };
                encoded.unwrap_or_else(|e| {
                    warn!("JPEG encode failed for frame {}: {}", ctx.frame_number(), e);
                    String::new()
                })
            }
            None => String::new(),
        };
        self.publish(OutboundMessage::Frame(FrameMessage {
            frame_number: ctx.frame_number(),
            total_violations: ctx.total_violations,
            frame_data,
        }))
        .await
    }

    pub async fn publish_violation(&self, event: &ViolationEvent) -> bool {
        self.publish(OutboundMessage::Violation(event.into())).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
