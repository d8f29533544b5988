//! Format Detector
//!
//! A one-step pipeline that collects the leading signature window, picks
//! the container format, emits the signature bytes and hands everything
//! after the signature back to the caller for the format handler.

use super::signature::{detect, ImageFormat, SIGNATURE_WINDOW};
use crate::error::ScrubError;
use crate::streaming::{ChunkSink, Directive, Exhausted, Scanner, Step, StepContext};
use crate::telemetry::{audit_format, audit_unsupported};

#[derive(Debug, Default)]
struct Detection {
    format: Option<ImageFormat>,
    /// Collected bytes past the signature, owed to the format handler
    spill: Vec<u8>,
    log_events: bool,
}

fn on_signature_window(
    state: &mut Detection,
    leading: Vec<u8>,
    ctx: &mut StepContext<'_>,
) -> Result<Directive, ScrubError> {
    resolve(state, leading, ctx)?;
    Ok(Directive::default())
}

/// Streams shorter than the window can still carry a short signature
fn on_short_stream(
    state: &mut Detection,
    leading: Vec<u8>,
    ctx: &mut StepContext<'_>,
) -> Result<(), ScrubError> {
    resolve(state, leading, ctx)
}

fn resolve(
    state: &mut Detection,
    mut leading: Vec<u8>,
    ctx: &mut StepContext<'_>,
) -> Result<(), ScrubError> {
    let Some((format, signature_len)) = detect(&leading) else {
        if state.log_events {
            audit_unsupported(&leading).emit();
        }
        return Err(ScrubError::UnsupportedFormat { signature: leading });
    };

    ctx.emit(&leading[..signature_len])?;
    state.spill = leading.split_off(signature_len);
    state.format = Some(format);

    if state.log_events {
        audit_format(format).emit();
    }
    Ok(())
}

/// Identifies the container format from the first bytes of a stream
pub struct FormatDetector {
    scanner: Scanner<Detection>,
}

impl FormatDetector {
    pub fn new(log_events: bool) -> Result<Self, ScrubError> {
        let steps = vec![Step::collect("signature", SIGNATURE_WINDOW)
            .on_complete(on_signature_window)
            .on_truncated(on_short_stream)];

        let state = Detection {
            log_events,
            ..Default::default()
        };

        Ok(Self {
            scanner: Scanner::new(steps, state)?.when_exhausted(Exhausted::Yield),
        })
    }

    /// Detected format, once the signature window is complete
    pub fn format(&self) -> Option<ImageFormat> {
        self.scanner.state().format
    }

    /// Feed bytes. Once the format is known, returns the part of `chunk`
    /// past the signature window; collected bytes past the signature are
    /// available from [`FormatDetector::take_spill`] and come first.
    pub fn advance<'a>(
        &mut self,
        chunk: &'a [u8],
        sink: &mut dyn ChunkSink,
    ) -> Result<&'a [u8], ScrubError> {
        self.scanner.advance(chunk, sink)
    }

    /// End of stream before the window filled: detect from what arrived
    pub fn finish(&mut self, sink: &mut dyn ChunkSink) -> Result<(), ScrubError> {
        self.scanner.finish(sink)
    }

    pub fn take_spill(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.scanner.state_mut().spill)
    }

    pub fn reset(&mut self) {
        self.scanner.reset();
        let state = self.scanner.state_mut();
        state.format = None;
        state.spill.clear();
    }
}
