//! Error types for the scrubbing pipeline
//!
//! | Error | Fatal | Raised by |
//! |-------|-------|-----------|
//! | [`ScrubError::UnsupportedFormat`] | yes | format detector |
//! | [`ScrubError::SeekerEnded`] | by policy | a step's ended callback |
//! | [`ScrubError::InvalidSpec`] | yes | scanner construction |
//! | [`ScrubError::UnhandledFormat`] | yes | dispatcher, when configured |
//! | [`ScrubError::Io`] | yes | the output sink |

use std::io;
use thiserror::Error;

use crate::formats::ImageFormat;

/// Errors that abort (or, by policy, end) a scrubbing stream
#[derive(Error, Debug)]
pub enum ScrubError {
    /// The leading bytes match none of the known image signatures
    #[error("Unsupported image format (leading bytes: {signature:02x?})")]
    UnsupportedFormat { signature: Vec<u8> },

    /// A bounded seek step scanned past its limit without finding its marker
    #[error("Step '{step}' found no marker within {limit} bytes")]
    SeekerEnded { step: &'static str, limit: usize },

    /// The pipeline was built from an inconsistent step list
    #[error("Invalid scanner pipeline: {0}")]
    InvalidSpec(String),

    /// The format was recognised but has no metadata handler
    #[error("No metadata handler for {0} images")]
    UnhandledFormat(ImageFormat),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<ScrubError> for io::Error {
    fn from(e: ScrubError) -> Self {
        match e {
            ScrubError::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
