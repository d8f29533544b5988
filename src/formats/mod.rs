//! Image container formats
//!
//! Detection of the container from its leading bytes, and the metadata
//! handlers for the containers that have one:
//! - JPEG and TIFF: EXIF-bearing APP1 segments are removed
//! - PNG and WebP: detected only

pub mod detector;
pub mod jpeg;
pub mod signature;

pub use detector::FormatDetector;
pub use jpeg::App1Stripper;
pub use signature::{
    detect, ImageFormat, APP1_MARKER, EXIF_SIGNATURE, JPEG_SOI, PNG_SIGNATURE, SIGNATURE_WINDOW,
    TIFF_BIG_ENDIAN, TIFF_LITTLE_ENDIAN, WEBP_RIFF, WEBP_TAG,
};
