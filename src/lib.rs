//! Streaming EXIF Scrubber
//!
//! Removes EXIF metadata (and with it GPS tags) from image bytes while they
//! are in flight. Input may arrive in chunks of any size, down to single
//! bytes; output is identical however it is split, and every byte outside
//! a removed segment is forwarded unchanged and in order.
//!
//! - [`streaming`]: marker matching and the step-driven scanner
//! - [`formats`]: signature detection and the JPEG/TIFF APP1 stripper
//! - [`scrubber`]: the per-stream controller, a `Write` adapter and a
//!   one-shot helper
//!
//! Logging goes through the `log` facade; the host installs the logger.

pub mod config;
pub mod error;
pub mod formats;
pub mod scrubber;
pub mod streaming;
pub mod telemetry;

pub use config::{ConfigError, ScrubConfig, SeekLimitPolicy};
pub use error::ScrubError;
pub use formats::ImageFormat;
pub use scrubber::{scrub, ExifScrubber, FormatHandler, ScrubStats, ScrubWriter};
pub use streaming::ChunkSink;
