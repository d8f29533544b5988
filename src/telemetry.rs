//! Telemetry Module
//!
//! Structured audit events for scrubbing decisions. Each event is
//! serialized to one JSON log line so a collector can pick it out of the
//! host application's log stream.

use log::{info, warn};
use serde::Serialize;

use crate::formats::ImageFormat;

/// Audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrubEventType {
    /// Container format identified
    FormatDetected,
    /// Metadata segment removed from the stream
    SegmentStripped,
    /// Segment examined and forwarded unchanged
    SegmentKept,
    /// Marker search gave up
    SeekLimitReached,
    /// Segment length field is impossible
    MalformedSegment,
    /// Leading bytes match no known format
    UnsupportedFormat,
}

/// Audit event for logging
#[derive(Debug, Clone, Serialize)]
pub struct ScrubEvent {
    pub event_type: ScrubEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ImageFormat>,
    /// Pipeline step that produced the event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Byte count the event refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ScrubEvent {
    pub fn new(event_type: ScrubEventType) -> Self {
        Self {
            event_type,
            format: None,
            step: None,
            bytes: None,
            reason: None,
        }
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_step(mut self, step: &str) -> Self {
        self.step = Some(step.to_string());
        self
    }

    pub fn with_bytes(mut self, bytes: usize) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Log the event
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => match self.event_type {
                ScrubEventType::SeekLimitReached
                | ScrubEventType::MalformedSegment
                | ScrubEventType::UnsupportedFormat => {
                    warn!("[EXIF-SCRUB-AUDIT] {}", json);
                }
                _ => {
                    info!("[EXIF-SCRUB-AUDIT] {}", json);
                }
            },
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
            }
        }
    }
}

pub fn audit_format(format: ImageFormat) -> ScrubEvent {
    ScrubEvent::new(ScrubEventType::FormatDetected).with_format(format)
}

/// A segment of `bytes` bytes (marker and length included) was removed
pub fn audit_stripped(step: &str, bytes: usize) -> ScrubEvent {
    ScrubEvent::new(ScrubEventType::SegmentStripped)
        .with_format(ImageFormat::JpegOrTiff)
        .with_step(step)
        .with_bytes(bytes)
        .with_reason("EXIF signature at start of APP1 body")
}

pub fn audit_kept(step: &str, bytes: usize) -> ScrubEvent {
    ScrubEvent::new(ScrubEventType::SegmentKept)
        .with_format(ImageFormat::JpegOrTiff)
        .with_step(step)
        .with_bytes(bytes)
}

pub fn audit_seek_limit(step: &str, limit: usize) -> ScrubEvent {
    ScrubEvent::new(ScrubEventType::SeekLimitReached)
        .with_step(step)
        .with_bytes(limit)
        .with_reason(&format!("No marker within {} bytes", limit))
}

pub fn audit_malformed(step: &str, length: u16) -> ScrubEvent {
    ScrubEvent::new(ScrubEventType::MalformedSegment)
        .with_step(step)
        .with_reason(&format!("Segment length {} is shorter than its own field", length))
}

pub fn audit_unsupported(leading: &[u8]) -> ScrubEvent {
    ScrubEvent::new(ScrubEventType::UnsupportedFormat)
        .with_bytes(leading.len())
        .with_reason(&format!("Leading bytes {:02x?}", leading))
}
