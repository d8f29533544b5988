//! Configuration for the scrubbing pipeline
//!
//! Loaded from JSON bytes handed over by the embedding application, not
//! read from files by this crate.

use serde::Deserialize;
use thiserror::Error;

/// What the APP1 stripper does when its search limit runs out
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekLimitPolicy {
    /// Forward everything unchanged from that point on
    #[default]
    FailOpen,
    /// Abort the stream with an error
    FailClosed,
}

/// Scrubber configuration
#[derive(Clone, Debug, Deserialize)]
pub struct ScrubConfig {
    /// Bytes to scan for the APP1 marker before giving up (0 = whole stream)
    #[serde(default = "default_app1_search_limit")]
    pub app1_search_limit: usize,

    /// Behaviour when the search limit is exceeded
    #[serde(default)]
    pub seek_limit_policy: SeekLimitPolicy,

    /// Examine every APP1 segment instead of only the first one
    #[serde(default = "default_strip_every_segment")]
    pub strip_every_segment: bool,

    /// Fail on formats that are recognised but have no metadata handler
    #[serde(default = "default_reject_unhandled_formats")]
    pub reject_unhandled_formats: bool,

    /// Whether to emit audit events
    #[serde(default = "default_log_events")]
    pub log_events: bool,
}

fn default_app1_search_limit() -> usize {
    0
}

fn default_strip_every_segment() -> bool {
    false
}

fn default_reject_unhandled_formats() -> bool {
    false
}

fn default_log_events() -> bool {
    true
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self {
            app1_search_limit: default_app1_search_limit(),
            seek_limit_policy: SeekLimitPolicy::default(),
            strip_every_segment: default_strip_every_segment(),
            reject_unhandled_formats: default_reject_unhandled_formats(),
            log_events: default_log_events(),
        }
    }
}

impl ScrubConfig {
    /// Parse configuration from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config_str =
            std::str::from_utf8(bytes).map_err(|e| ConfigError::InvalidUtf8(e.to_string()))?;

        serde_json::from_str(config_str).map_err(|e| ConfigError::InvalidJson(e.to_string()))
    }
}

/// Configuration parsing errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(String),
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}
