//! JPEG/TIFF APP1 Stripper
//!
//! Three-step pipeline that finds the APP1 segment, reads its length and
//! drops the segment when its body opens with the EXIF signature:
//!
//! | Step | Kind | On completion |
//! |------|------|---------------|
//! | `app1_marker` | seek `FF E1` | hold the marker |
//! | `app1_length` | collect 2 | hold the length, ceiling = length - 2 |
//! | `app1_body` | collect ceiling | drop or forward marker, length and body |
//!
//! Bytes before the marker are ordinary image data and pass straight
//! through. Marker and length are held until the body decides their fate,
//! so a stripped segment leaves no trace in the output.

use log::debug;

use super::signature::{APP1_MARKER, EXIF_SIGNATURE};
use crate::config::{ScrubConfig, SeekLimitPolicy};
use crate::error::ScrubError;
use crate::streaming::{
    ChunkSink, Directive, Marker, MarkerMatcher, MatchResult, Scanner, Step, StepContext,
};
use crate::telemetry::{audit_kept, audit_malformed, audit_seek_limit, audit_stripped};

struct App1State {
    policy: SeekLimitPolicy,
    /// Rewind after each segment
    every: bool,
    log_events: bool,
    search_limit: usize,
    /// Declared length of the segment being examined, unset for malformed ones
    segment_length: Option<u16>,
    segments_stripped: usize,
    bytes_dropped: u64,
}

fn on_app1_marker(
    _: &mut App1State,
    marker: Vec<u8>,
    ctx: &mut StepContext<'_>,
) -> Result<Directive, ScrubError> {
    ctx.hold(&marker);
    Ok(Directive::default())
}

fn on_app1_length(
    state: &mut App1State,
    field: Vec<u8>,
    ctx: &mut StepContext<'_>,
) -> Result<Directive, ScrubError> {
    let Ok(raw) = <[u8; 2]>::try_from(field.as_slice()) else {
        return Err(ScrubError::InvalidSpec(format!(
            "step '{}' produced {} length bytes",
            ctx.step(),
            field.len()
        )));
    };
    let length = u16::from_be_bytes(raw);

    if length < 2 {
        // cannot cover its own length field; forward and move on
        if state.log_events {
            audit_malformed(ctx.step(), length).emit();
        }
        state.segment_length = None;
        ctx.emit(&field)?;
        return Ok(Directive::default());
    }

    state.segment_length = Some(length);
    ctx.hold(&field);
    Ok(Directive::default().with_ceiling(usize::from(length) - 2))
}

fn on_app1_body(
    state: &mut App1State,
    body: Vec<u8>,
    ctx: &mut StepContext<'_>,
) -> Result<Directive, ScrubError> {
    let next = Directive::default().rewind(state.every);

    let Some(length) = state.segment_length.take() else {
        return Ok(next);
    };

    if is_exif_body(&body) {
        let dropped = ctx.discard() + body.len();
        state.segments_stripped += 1;
        state.bytes_dropped += dropped as u64;

        debug!("Dropped APP1 segment of declared length {}", length);
        if state.log_events {
            audit_stripped(ctx.step(), dropped).emit();
        }
    } else {
        ctx.emit(&body)?;
        if state.log_events {
            audit_kept(ctx.step(), usize::from(length) + 2).emit();
        }
    }

    Ok(next)
}

fn on_search_limit(state: &mut App1State, ctx: &mut StepContext<'_>) -> Result<(), ScrubError> {
    if state.log_events {
        audit_seek_limit(ctx.step(), state.search_limit).emit();
    }

    match state.policy {
        SeekLimitPolicy::FailOpen => {
            ctx.release()?;
            Ok(())
        }
        SeekLimitPolicy::FailClosed => {
            ctx.discard();
            Err(ScrubError::SeekerEnded {
                step: ctx.step(),
                limit: state.search_limit,
            })
        }
    }
}

/// Whether an APP1 body opens with `Exif\0\0`
fn is_exif_body(body: &[u8]) -> bool {
    let mut matcher = MarkerMatcher::new(Marker::new("exif", &EXIF_SIGNATURE));
    match matcher.feed(body) {
        MatchResult::Matched { remaining } => body.len() - remaining.len() == EXIF_SIGNATURE.len(),
        MatchResult::Matching | MatchResult::Unmatched => false,
    }
}

/// Removes EXIF-bearing APP1 segments from a JPEG/TIFF stream
pub struct App1Stripper {
    scanner: Scanner<App1State>,
}

impl App1Stripper {
    pub fn new(config: &ScrubConfig) -> Result<Self, ScrubError> {
        let mut seek = Step::seek("app1_marker", Marker::new("app1", &APP1_MARKER))
            .on_complete(on_app1_marker)
            .on_ended(on_search_limit);
        if config.app1_search_limit > 0 {
            seek = seek.with_max_bytes(config.app1_search_limit);
        }

        let steps = vec![
            seek,
            Step::collect("app1_length", 2).on_complete(on_app1_length),
            Step::collect_ceiling("app1_body").on_complete(on_app1_body),
        ];

        let state = App1State {
            policy: config.seek_limit_policy,
            every: config.strip_every_segment,
            log_events: config.log_events,
            search_limit: config.app1_search_limit,
            segment_length: None,
            segments_stripped: 0,
            bytes_dropped: 0,
        };

        Ok(Self {
            scanner: Scanner::new(steps, state)?,
        })
    }

    pub fn advance(&mut self, chunk: &[u8], sink: &mut dyn ChunkSink) -> Result<(), ScrubError> {
        self.scanner.advance(chunk, sink)?;
        Ok(())
    }

    /// End of stream: a segment cut short is forwarded as it arrived
    pub fn finish(&mut self, sink: &mut dyn ChunkSink) -> Result<(), ScrubError> {
        self.scanner.finish(sink)
    }

    pub fn reset(&mut self) {
        self.scanner.reset();
        let state = self.scanner.state_mut();
        state.segment_length = None;
        state.segments_stripped = 0;
        state.bytes_dropped = 0;
    }

    pub fn segments_stripped(&self) -> usize {
        self.scanner.state().segments_stripped
    }

    /// Bytes removed so far, markers and length fields included
    pub fn bytes_dropped(&self) -> u64 {
        self.scanner.state().bytes_dropped
    }
}
