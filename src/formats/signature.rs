//! Container signatures and format identification

use serde::Serialize;
use std::fmt;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
pub const WEBP_RIFF: [u8; 4] = *b"RIFF";
pub const WEBP_TAG: [u8; 4] = *b"WEBP";
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
pub const TIFF_LITTLE_ENDIAN: [u8; 2] = *b"II";
pub const TIFF_BIG_ENDIAN: [u8; 2] = *b"MM";

pub const APP1_MARKER: [u8; 2] = [0xFF, 0xE1];
pub const EXIF_SIGNATURE: [u8; 6] = *b"Exif\0\0";

/// Leading bytes needed to tell every known format apart
pub const SIGNATURE_WINDOW: usize = PNG_SIGNATURE.len();

/// Image container formats recognised from their leading bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Png,
    /// WebP starting with its RIFF header
    WebpRiff,
    /// WebP starting with its payload tag
    WebpTag,
    JpegOrTiff,
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Png => write!(f, "PNG"),
            ImageFormat::WebpRiff | ImageFormat::WebpTag => write!(f, "WebP"),
            ImageFormat::JpegOrTiff => write!(f, "JPEG/TIFF"),
        }
    }
}

const SIGNATURES: [(ImageFormat, &[u8]); 6] = [
    (ImageFormat::Png, &PNG_SIGNATURE),
    (ImageFormat::WebpRiff, &WEBP_RIFF),
    (ImageFormat::WebpTag, &WEBP_TAG),
    (ImageFormat::JpegOrTiff, &JPEG_SOI),
    (ImageFormat::JpegOrTiff, &TIFF_LITTLE_ENDIAN),
    (ImageFormat::JpegOrTiff, &TIFF_BIG_ENDIAN),
];

/// Identify the format from the leading bytes of a stream.
///
/// Returns the format and the length of the signature that matched.
/// A signature longer than `leading` cannot match.
pub fn detect(leading: &[u8]) -> Option<(ImageFormat, usize)> {
    SIGNATURES
        .iter()
        .find(|(_, signature)| leading.starts_with(signature))
        .map(|(format, signature)| (*format, signature.len()))
}
