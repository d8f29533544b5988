//! Stream Scrubber
//!
//! Owning controller for one image stream. Chunks go to the format
//! detector until the container is known, then to that format's handler.
//! Bytes the detector collected past the signature are handed to the
//! handler first, so nothing is lost or reordered at the switch.

use log::debug;
use serde::Serialize;
use std::io::{self, Write};

use crate::config::ScrubConfig;
use crate::error::ScrubError;
use crate::formats::{App1Stripper, FormatDetector, ImageFormat};
use crate::streaming::{ChunkSink, CountingSink};

/// Metadata handler chosen for a detected format
pub enum FormatHandler {
    JpegOrTiff(App1Stripper),
    /// Recognised format without a metadata handler; bytes are forwarded
    PassThrough(ImageFormat),
}

impl FormatHandler {
    pub fn for_format(format: ImageFormat, config: &ScrubConfig) -> Result<Self, ScrubError> {
        match format {
            ImageFormat::JpegOrTiff => Ok(Self::JpegOrTiff(App1Stripper::new(config)?)),
            other if config.reject_unhandled_formats => Err(ScrubError::UnhandledFormat(other)),
            other => {
                debug!("No metadata handler for {}, passing through", other);
                Ok(Self::PassThrough(other))
            }
        }
    }

    pub fn advance(&mut self, chunk: &[u8], sink: &mut dyn ChunkSink) -> Result<(), ScrubError> {
        match self {
            Self::JpegOrTiff(stripper) => stripper.advance(chunk, sink),
            Self::PassThrough(_) => Ok(sink.enqueue(chunk)?),
        }
    }

    pub fn finish(&mut self, sink: &mut dyn ChunkSink) -> Result<(), ScrubError> {
        match self {
            Self::JpegOrTiff(stripper) => stripper.finish(sink),
            Self::PassThrough(_) => Ok(()),
        }
    }

    fn segments_stripped(&self) -> usize {
        match self {
            Self::JpegOrTiff(stripper) => stripper.segments_stripped(),
            Self::PassThrough(_) => 0,
        }
    }

    fn bytes_dropped(&self) -> u64 {
        match self {
            Self::JpegOrTiff(stripper) => stripper.bytes_dropped(),
            Self::PassThrough(_) => 0,
        }
    }
}

/// Per-stream counters. `bytes_in == bytes_out + bytes_dropped` after a
/// successful [`ExifScrubber::finish`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScrubStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub bytes_dropped: u64,
    pub segments_stripped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ImageFormat>,
}

/// Removes EXIF metadata from one image stream, chunk by chunk
pub struct ExifScrubber {
    config: ScrubConfig,
    detector: FormatDetector,
    handler: Option<FormatHandler>,
    stats: ScrubStats,
}

impl ExifScrubber {
    pub fn new() -> Result<Self, ScrubError> {
        Self::with_config(ScrubConfig::default())
    }

    pub fn with_config(config: ScrubConfig) -> Result<Self, ScrubError> {
        Ok(Self {
            detector: FormatDetector::new(config.log_events)?,
            config,
            handler: None,
            stats: ScrubStats::default(),
        })
    }

    /// Detected format, once known
    pub fn format(&self) -> Option<ImageFormat> {
        self.detector.format()
    }

    pub fn stats(&self) -> &ScrubStats {
        &self.stats
    }

    /// Process one inbound chunk, pushing whatever can be decided to `sink`
    pub fn transform(&mut self, chunk: &[u8], sink: &mut dyn ChunkSink) -> Result<(), ScrubError> {
        self.stats.bytes_in += chunk.len() as u64;

        let mut counting = CountingSink::new(sink);
        let result = self.route(chunk, &mut counting);
        self.stats.bytes_out += counting.count();
        self.refresh_stats();

        result
    }

    /// End of stream: flush everything still withheld and return the
    /// final counters
    pub fn finish(&mut self, sink: &mut dyn ChunkSink) -> Result<ScrubStats, ScrubError> {
        let mut counting = CountingSink::new(sink);
        let result = self.finish_handlers(&mut counting);
        self.stats.bytes_out += counting.count();
        self.refresh_stats();

        result?;
        debug!(
            "Stream finished: {} in, {} out, {} dropped",
            self.stats.bytes_in, self.stats.bytes_out, self.stats.bytes_dropped
        );
        Ok(self.stats.clone())
    }

    /// Prepare for a new stream
    pub fn reset(&mut self) {
        self.detector.reset();
        self.handler = None;
        self.stats = ScrubStats::default();
    }

    fn route(&mut self, chunk: &[u8], sink: &mut dyn ChunkSink) -> Result<(), ScrubError> {
        if let Some(handler) = self.handler.as_mut() {
            return handler.advance(chunk, sink);
        }

        let tail = self.detector.advance(chunk, sink)?;
        self.dispatch(tail, sink)
    }

    /// Install the handler once the format is known and feed it the bytes
    /// the detector collected past the signature, then `tail`
    fn dispatch(&mut self, tail: &[u8], sink: &mut dyn ChunkSink) -> Result<(), ScrubError> {
        let Some(format) = self.detector.format() else {
            return Ok(());
        };

        let spill = self.detector.take_spill();
        let handler = self
            .handler
            .insert(FormatHandler::for_format(format, &self.config)?);

        handler.advance(&spill, sink)?;
        handler.advance(tail, sink)
    }

    fn finish_handlers(&mut self, sink: &mut dyn ChunkSink) -> Result<(), ScrubError> {
        if self.handler.is_none() {
            self.detector.finish(sink)?;
            self.dispatch(&[], sink)?;
        }

        match self.handler.as_mut() {
            Some(handler) => handler.finish(sink),
            // empty stream
            None => Ok(()),
        }
    }

    fn refresh_stats(&mut self) {
        self.stats.format = self.detector.format();
        if let Some(handler) = &self.handler {
            self.stats.segments_stripped = handler.segments_stripped();
            self.stats.bytes_dropped = handler.bytes_dropped();
        }
    }
}

/// [`Write`] adapter that scrubs everything written through it
pub struct ScrubWriter<W: Write> {
    inner: W,
    scrubber: ExifScrubber,
}

impl<W: Write> ScrubWriter<W> {
    pub fn new(inner: W) -> Result<Self, ScrubError> {
        Self::with_config(inner, ScrubConfig::default())
    }

    pub fn with_config(inner: W, config: ScrubConfig) -> Result<Self, ScrubError> {
        Ok(Self {
            inner,
            scrubber: ExifScrubber::with_config(config)?,
        })
    }

    pub fn stats(&self) -> &ScrubStats {
        self.scrubber.stats()
    }

    /// Flush withheld bytes and hand back the inner writer
    pub fn finish(mut self) -> Result<(W, ScrubStats), ScrubError> {
        let stats = self.scrubber.finish(&mut self.inner)?;
        self.inner.flush()?;
        Ok((self.inner, stats))
    }
}

impl<W: Write> Write for ScrubWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scrubber.transform(buf, &mut self.inner)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Scrub a complete image held in memory
pub fn scrub(input: &[u8]) -> Result<Vec<u8>, ScrubError> {
    let mut scrubber = ExifScrubber::new()?;
    let mut out: Vec<u8> = Vec::with_capacity(input.len());
    scrubber.transform(input, &mut out)?;
    scrubber.finish(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeekLimitPolicy;
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn quiet() -> ScrubConfig {
        ScrubConfig {
            log_events: false,
            ..Default::default()
        }
    }

    /// `FF D8`, an APP1 segment of length 12 carrying `Exif\0\0` and 4
    /// filler bytes
    fn minimal_jpeg() -> Vec<u8> {
        vec![
            0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x0C, b'E', b'x', b'i', b'f', 0x00, 0x00, 0x11, 0x22,
            0x33, 0x44,
        ]
    }

    fn app1(body: &[u8]) -> Vec<u8> {
        let mut seg = vec![0xFF, 0xE1];
        seg.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
        seg.extend_from_slice(body);
        seg
    }

    fn run(config: ScrubConfig, chunks: &[&[u8]]) -> Result<(Vec<u8>, ScrubStats), ScrubError> {
        let mut scrubber = ExifScrubber::with_config(config)?;
        let mut out: Vec<u8> = Vec::new();
        for chunk in chunks {
            scrubber.transform(chunk, &mut out)?;
        }
        let stats = scrubber.finish(&mut out)?;
        Ok((out, stats))
    }

    #[test]
    fn test_scenario_a_single_chunk() {
        let input = minimal_jpeg();
        let (out, stats) = run(quiet(), &[&input]).unwrap();

        assert_eq!(out, vec![0xFF, 0xD8]);
        assert_eq!(out.len(), input.len() - 14);
        assert_eq!(stats.bytes_dropped, 14);
        assert_eq!(stats.segments_stripped, 1);
        assert_eq!(stats.format, Some(ImageFormat::JpegOrTiff));
    }

    #[test]
    fn test_scenario_b_byte_at_a_time() {
        let input = minimal_jpeg();
        let singles: Vec<&[u8]> = input.chunks(1).collect();

        let (whole, _) = run(quiet(), &[&input]).unwrap();
        let (split, stats) = run(quiet(), &singles).unwrap();
        assert_eq!(split, whole);
        assert_eq!(stats.bytes_in, input.len() as u64);
    }

    #[test]
    fn test_scenario_c_non_exif_body_unchanged() {
        let mut input = vec![0xFF, 0xD8];
        input.extend(app1(b"http://ns.adobe.com/"));
        input.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0xFF, 0xD9]);

        let (out, stats) = run(quiet(), &[&input]).unwrap();
        assert_eq!(out, input);
        assert_eq!(stats.bytes_dropped, 0);
    }

    #[test]
    fn test_scenario_d_unsupported_format() {
        let mut scrubber = ExifScrubber::with_config(quiet()).unwrap();
        let mut out: Vec<u8> = Vec::new();

        let err = scrubber.transform(b"GIF89a\x10\x00\x10\x00", &mut out).unwrap_err();
        assert!(matches!(err, ScrubError::UnsupportedFormat { .. }));
        assert!(out.is_empty());
    }

    #[test]
    fn test_scenario_e_split_marker() {
        // a quantisation table pushes the APP1 marker past the signature window
        let mut input = vec![0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x06, 0x01, 0x02, 0x03, 0x04];
        input.extend(app1(b"Exif\0\0GPS"));
        let head = input[..10].to_vec();

        let mut scrubber = ExifScrubber::with_config(quiet()).unwrap();
        let mut out: Vec<u8> = Vec::new();
        // chunk N ends with FF
        scrubber.transform(&input[..11], &mut out).unwrap();
        // the lone FF is withheld, not leaked
        assert_eq!(out, head);

        // chunk N+1 opens with E1, then the length and body
        scrubber.transform(&input[11..], &mut out).unwrap();
        let stats = scrubber.finish(&mut out).unwrap();
        assert_eq!(out, head);
        assert_eq!(stats.segments_stripped, 1);
    }

    #[test]
    fn test_image_data_after_segment_kept() {
        let mut input = vec![0xFF, 0xD8];
        input.extend(app1(b"Exif\0\0MM\0*"));
        let scan = [0xFF, 0xDB, 0x00, 0x03, 0x01, 0xFF, 0xD9];
        input.extend_from_slice(&scan);

        let (out, _) = run(quiet(), &[&input]).unwrap();
        let mut expected = vec![0xFF, 0xD8];
        expected.extend_from_slice(&scan);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_tiff_signature() {
        let mut input = b"II".to_vec();
        input.extend(app1(b"Exif\0\0"));
        let (out, _) = run(quiet(), &[&input]).unwrap();
        assert_eq!(out, b"II".to_vec());
    }

    #[test]
    fn test_png_passes_through() {
        let mut input = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        input.extend_from_slice(&[0xFF, 0xE1, 0x00, 0x08]);
        input.extend_from_slice(b"Exif\0\0");

        let (out, stats) = run(quiet(), &[&input[..5], &input[5..]]).unwrap();
        assert_eq!(out, input);
        assert_eq!(stats.format, Some(ImageFormat::Png));
        assert_eq!(stats.bytes_out, input.len() as u64);
    }

    #[test]
    fn test_reject_unhandled_formats() {
        let config = ScrubConfig {
            reject_unhandled_formats: true,
            ..quiet()
        };
        let err = run(config, &[b"RIFF\x20\0\0\0WEBPVP8 "]).unwrap_err();
        assert!(matches!(err, ScrubError::UnhandledFormat(ImageFormat::WebpRiff)));
    }

    #[test]
    fn test_search_limit_policies() {
        let mut input = vec![0xFF, 0xD8];
        input.extend(vec![0u8; 32]);
        input.extend(app1(b"Exif\0\0"));

        let open = ScrubConfig {
            app1_search_limit: 16,
            ..quiet()
        };
        let (out, stats) = run(open, &[&input[..20], &input[20..]]).unwrap();
        assert_eq!(out, input);
        assert_eq!(stats.segments_stripped, 0);

        let closed = ScrubConfig {
            app1_search_limit: 16,
            seek_limit_policy: SeekLimitPolicy::FailClosed,
            ..quiet()
        };
        let err = run(closed, &[&input[..20], &input[20..]]).unwrap_err();
        assert!(matches!(err, ScrubError::SeekerEnded { limit: 16, .. }));
    }

    #[test]
    fn test_search_limit_same_for_single_bytes() {
        let mut input = vec![0xFF, 0xD8];
        input.extend(1..=10u8);
        input.extend(app1(b"Exif\0\0"));
        let singles: Vec<&[u8]> = input.chunks(1).collect();

        // ten filler bytes exhaust a limit of 8 before the marker
        let short = ScrubConfig {
            app1_search_limit: 8,
            ..quiet()
        };
        let (whole, stats) = run(short.clone(), &[&input]).unwrap();
        assert_eq!(whole, input);
        assert_eq!(stats.segments_stripped, 0);
        let (split, stats) = run(short, &singles).unwrap();
        assert_eq!(split, whole);
        assert_eq!(stats.segments_stripped, 0);

        // the marker ends on the twelfth byte scanned
        let enough = ScrubConfig {
            app1_search_limit: 12,
            ..quiet()
        };
        let (whole, _) = run(enough.clone(), &[&input]).unwrap();
        assert_eq!(whole, input[..12].to_vec());
        let (split, stats) = run(enough, &singles).unwrap();
        assert_eq!(split, whole);
        assert_eq!(stats.segments_stripped, 1);
    }

    #[test]
    fn test_strip_every_segment() {
        let mut input = vec![0xFF, 0xD8];
        input.extend(app1(b"Exif\0\0first"));
        input.extend(app1(b"Exif\0\0second"));

        let (out, stats) = run(quiet(), &[&input]).unwrap();
        let mut expected = vec![0xFF, 0xD8];
        expected.extend(app1(b"Exif\0\0second"));
        assert_eq!(out, expected);
        assert_eq!(stats.segments_stripped, 1);

        let every = ScrubConfig {
            strip_every_segment: true,
            ..quiet()
        };
        let (out, stats) = run(every, &[&input]).unwrap();
        assert_eq!(out, vec![0xFF, 0xD8]);
        assert_eq!(stats.segments_stripped, 2);
    }

    #[test]
    fn test_empty_and_short_streams() {
        let (out, stats) = run(quiet(), &[]).unwrap();
        assert!(out.is_empty());
        assert_eq!(stats, ScrubStats::default());

        let (out, stats) = run(quiet(), &[&[0xFF, 0xD8, 0xFF]]).unwrap();
        assert_eq!(out, vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(stats.format, Some(ImageFormat::JpegOrTiff));

        assert!(matches!(
            run(quiet(), &[&[0x00]]),
            Err(ScrubError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_reset_between_streams() {
        let mut scrubber = ExifScrubber::with_config(quiet()).unwrap();
        let mut out: Vec<u8> = Vec::new();
        scrubber.transform(&minimal_jpeg(), &mut out).unwrap();
        scrubber.finish(&mut out).unwrap();

        scrubber.reset();
        assert_eq!(scrubber.format(), None);
        assert_eq!(scrubber.stats(), &ScrubStats::default());

        let mut out: Vec<u8> = Vec::new();
        scrubber.transform(&minimal_jpeg(), &mut out).unwrap();
        let stats = scrubber.finish(&mut out).unwrap();
        assert_eq!(out, vec![0xFF, 0xD8]);
        assert_eq!(stats.segments_stripped, 1);
    }

    #[test]
    fn test_writer() {
        let input = minimal_jpeg();
        let mut writer = ScrubWriter::with_config(Vec::<u8>::new(), quiet()).unwrap();
        for chunk in input.chunks(3) {
            writer.write_all(chunk).unwrap();
        }
        let (out, stats) = writer.finish().unwrap();
        assert_eq!(out, vec![0xFF, 0xD8]);
        assert_eq!(stats.bytes_dropped, 14);
    }

    #[test]
    fn test_writer_surfaces_errors() {
        let mut writer = ScrubWriter::with_config(Vec::<u8>::new(), quiet()).unwrap();
        let err = writer.write_all(b"not an image").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_scrub_helper() {
        assert_eq!(scrub(&minimal_jpeg()).unwrap(), vec![0xFF, 0xD8]);
    }

    #[test]
    fn test_stats_serialization() {
        let (_, stats) = run(quiet(), &[&minimal_jpeg()]).unwrap();
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"bytes_dropped\":14"));
        assert!(json.contains("\"format\":\"jpeg_or_tiff\""));
    }

    /// JPEG header followed by arbitrary bytes with an EXIF segment
    /// spliced in somewhere
    fn jpeg_stream() -> impl Strategy<Value = Vec<u8>> {
        (vec(any::<u8>(), 0..96), vec(any::<u8>(), 0..48), any::<prop::sample::Index>()).prop_map(
            |(data, exif, at)| {
                let mut body = b"Exif\0\0".to_vec();
                body.extend(exif);

                let split = at.index(data.len() + 1);
                let mut input = vec![0xFF, 0xD8];
                input.extend_from_slice(&data[..split]);
                input.extend(app1(&body));
                input.extend_from_slice(&data[split..]);
                input
            },
        )
    }

    /// JPEG header followed by APP1 segments whose bodies are not EXIF,
    /// separated by filler that never contains `FF`
    fn clean_jpeg_stream() -> impl Strategy<Value = Vec<u8>> {
        vec((vec(0u8..0xFF, 0..32), vec(any::<u8>(), 0..32)), 0..4).prop_map(|parts| {
            let mut input = vec![0xFF, 0xD8];
            for (filler, data) in parts {
                input.extend(filler);
                let mut body = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
                body.extend(data);
                input.extend(app1(&body));
            }
            input
        })
    }

    fn split_at_cuts(input: &[u8], mut cuts: Vec<usize>) -> Vec<&[u8]> {
        cuts.iter_mut().for_each(|cut| *cut %= input.len() + 1);
        cuts.sort_unstable();

        let mut chunks = Vec::new();
        let mut start = 0;
        for cut in cuts {
            chunks.push(&input[start..cut]);
            start = cut;
        }
        chunks.push(&input[start..]);
        chunks
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_output(
            input in jpeg_stream(),
            cuts in vec(any::<usize>(), 0..12),
            every in any::<bool>(),
        ) {
            let config = ScrubConfig { strip_every_segment: every, ..quiet() };
            let (whole, _) = run(config.clone(), &[&input]).unwrap();
            let (split, _) = run(config, &split_at_cuts(&input, cuts)).unwrap();
            prop_assert_eq!(split, whole);
        }

        #[test]
        fn prop_bytes_are_conserved(
            input in jpeg_stream(),
            cuts in vec(any::<usize>(), 0..12),
        ) {
            let (out, stats) = run(quiet(), &split_at_cuts(&input, cuts)).unwrap();
            prop_assert_eq!(stats.bytes_in, input.len() as u64);
            prop_assert_eq!(stats.bytes_out, out.len() as u64);
            prop_assert_eq!(stats.bytes_in, stats.bytes_out + stats.bytes_dropped);
        }

        #[test]
        fn prop_clean_input_is_unchanged(
            input in clean_jpeg_stream(),
            cuts in vec(any::<usize>(), 0..12),
            every in any::<bool>(),
        ) {
            let config = ScrubConfig { strip_every_segment: every, ..quiet() };
            let (out, stats) = run(config, &split_at_cuts(&input, cuts)).unwrap();
            prop_assert_eq!(stats.segments_stripped, 0);
            prop_assert_eq!(out, input);
        }

        #[test]
        fn prop_search_limit_does_not_depend_on_chunking(
            input in jpeg_stream(),
            cuts in vec(any::<usize>(), 0..12),
            limit in 1usize..160,
            closed in any::<bool>(),
        ) {
            let policy = if closed {
                SeekLimitPolicy::FailClosed
            } else {
                SeekLimitPolicy::FailOpen
            };
            let config = ScrubConfig {
                app1_search_limit: limit,
                seek_limit_policy: policy,
                ..quiet()
            };

            let outcome = |chunks: &[&[u8]]| {
                run(config.clone(), chunks)
                    .map(|(out, stats)| (out, stats.segments_stripped))
                    .map_err(|e| e.to_string())
            };
            let whole = outcome(&[input.as_slice()]);
            let split = outcome(split_at_cuts(&input, cuts).as_slice());
            prop_assert_eq!(split, whole);
        }
    }
}
