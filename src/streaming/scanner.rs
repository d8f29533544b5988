//! Segmented Scanner
//!
//! A resumable pipeline of named steps driven one chunk at a time. Each
//! step either seeks a marker or collects a fixed number of bytes. When a
//! step completes, its callback decides what happens to the bytes and
//! returns a [`Directive`] that configures the next step:
//! - whether bytes before the next marker are forwarded or withheld
//! - the byte ceiling the next step inherits (a decoded length field)
//! - whether to rewind to the first step
//!
//! Output is identical however the input is split: partial markers,
//! partially filled buffers and withheld bytes all survive chunk
//! boundaries, and leftover bytes after a completed step are handed to the
//! next step within the same call.
//!
//! Every byte fed in ends up in exactly one place: emitted to the sink,
//! withheld in the carry buffer, or dropped by a callback through
//! [`StepContext::discard`].

use log::{debug, warn};
use std::io;

use super::marker::Marker;
use super::seeker::{BoundedSeeker, SeekResult, Span};
use super::sink::ChunkSink;
use crate::error::ScrubError;

/// What happens to bytes that precede a seek step's marker
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrecedingBytes {
    /// Forward downstream immediately
    #[default]
    Enqueue,
    /// Withhold in the carry buffer for the completion callback
    Skip,
}

/// Size of a collect step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteCount {
    Exactly(usize),
    /// Whatever ceiling the previous step's directive set
    Ceiling,
}

#[derive(Clone, Debug)]
pub enum StepKind {
    /// Scan for a marker, giving up after `max_bytes` (inherited ceiling if unset)
    Seek {
        marker: Marker,
        max_bytes: Option<usize>,
    },
    /// Accumulate exactly this many bytes
    Collect(ByteCount),
}

/// Configuration a completed step hands to the next one
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Directive {
    pub preceding: PrecedingBytes,
    /// Byte ceiling for the next step (0 = unbounded for seeks, empty for collects)
    pub ceiling: usize,
    /// Go back to the first step instead of the next one
    pub rewind: bool,
}

impl Directive {
    pub fn skip_preceding(mut self) -> Self {
        self.preceding = PrecedingBytes::Skip;
        self
    }

    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn rewind(mut self, rewind: bool) -> Self {
        self.rewind = rewind;
        self
    }
}

/// Called with the matched marker (seek) or the filled buffer (collect)
pub type OnComplete<S> =
    fn(&mut S, Vec<u8>, &mut StepContext<'_>) -> Result<Directive, ScrubError>;

/// Called when a seek step passes its scan limit
pub type OnEnded<S> = fn(&mut S, &mut StepContext<'_>) -> Result<(), ScrubError>;

/// Called at end of stream with the step's partial match or partial buffer
pub type OnTruncated<S> = fn(&mut S, Vec<u8>, &mut StepContext<'_>) -> Result<(), ScrubError>;

/// One named step of a pipeline, with its callbacks
pub struct Step<S> {
    pub name: &'static str,
    pub kind: StepKind,
    pub on_complete: Option<OnComplete<S>>,
    pub on_ended: Option<OnEnded<S>>,
    pub on_truncated: Option<OnTruncated<S>>,
}

impl<S> Step<S> {
    fn new(name: &'static str, kind: StepKind) -> Self {
        Self {
            name,
            kind,
            on_complete: None,
            on_ended: None,
            on_truncated: None,
        }
    }

    pub fn seek(name: &'static str, marker: Marker) -> Self {
        Self::new(
            name,
            StepKind::Seek {
                marker,
                max_bytes: None,
            },
        )
    }

    pub fn collect(name: &'static str, count: usize) -> Self {
        Self::new(name, StepKind::Collect(ByteCount::Exactly(count)))
    }

    pub fn collect_ceiling(name: &'static str) -> Self {
        Self::new(name, StepKind::Collect(ByteCount::Ceiling))
    }

    /// Fix the scan limit of a seek step. No effect on collect steps.
    pub fn with_max_bytes(mut self, limit: usize) -> Self {
        if let StepKind::Seek { max_bytes, .. } = &mut self.kind {
            *max_bytes = Some(limit);
        }
        self
    }

    pub fn on_complete(mut self, callback: OnComplete<S>) -> Self {
        self.on_complete = Some(callback);
        self
    }

    pub fn on_ended(mut self, callback: OnEnded<S>) -> Self {
        self.on_ended = Some(callback);
        self
    }

    pub fn on_truncated(mut self, callback: OnTruncated<S>) -> Self {
        self.on_truncated = Some(callback);
        self
    }
}

/// Handle given to callbacks for routing bytes
pub struct StepContext<'a> {
    step: &'static str,
    carry: &'a mut Vec<u8>,
    sink: &'a mut dyn ChunkSink,
}

impl<'a> StepContext<'a> {
    /// Name of the step being resolved
    pub fn step(&self) -> &'static str {
        self.step
    }

    /// Bytes currently withheld
    pub fn carried(&self) -> &[u8] {
        self.carry.as_slice()
    }

    /// Withhold bytes behind anything already carried
    pub fn hold(&mut self, bytes: &[u8]) {
        self.carry.extend_from_slice(bytes);
    }

    /// Forward bytes downstream. Carried bytes go first.
    pub fn emit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.release()?;
        self.sink.enqueue(bytes)
    }

    /// Forward the carry buffer downstream, returning its length
    pub fn release(&mut self) -> io::Result<usize> {
        let len = self.carry.len();
        if len > 0 {
            self.sink.enqueue(self.carry.as_slice())?;
            self.carry.clear();
        }
        Ok(len)
    }

    /// Drop the carry buffer, returning its length
    pub fn discard(&mut self) -> usize {
        let len = self.carry.len();
        self.carry.clear();
        len
    }
}

/// What an exhausted pipeline does with further input
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Exhausted {
    /// Forward unchanged
    #[default]
    PassThrough,
    /// Return it to the caller of [`Scanner::advance`]
    Yield,
}

struct Collector {
    buf: Vec<u8>,
    target: usize,
}

/// Resolved shape of the current step
enum Current {
    Seek,
    Collect(usize),
}

/// Step-driven scanner over a chunked byte stream.
///
/// `S` is the pipeline's own state, handed to every callback.
pub struct Scanner<S> {
    steps: Vec<Step<S>>,
    state: S,
    exhausted: Exhausted,
    /// Index of the current step; only moves backwards on rewind or reset
    index: usize,
    seeker: Option<BoundedSeeker>,
    collector: Option<Collector>,
    /// Withheld bytes awaiting a callback's decision
    carry: Vec<u8>,
    preceding: PrecedingBytes,
    ceiling: usize,
}

impl<S> Scanner<S> {
    /// Build a pipeline, rejecting step lists that can never run
    pub fn new(steps: Vec<Step<S>>, state: S) -> Result<Self, ScrubError> {
        let Some(first) = steps.first() else {
            return Err(ScrubError::InvalidSpec("pipeline has no steps".to_string()));
        };

        match first.kind {
            StepKind::Collect(ByteCount::Ceiling) => {
                return Err(ScrubError::InvalidSpec(format!(
                    "first step '{}' inherits a ceiling no step can set",
                    first.name
                )));
            }
            StepKind::Collect(ByteCount::Exactly(0)) => {
                return Err(ScrubError::InvalidSpec(format!(
                    "first step '{}' collects no bytes",
                    first.name
                )));
            }
            _ => {}
        }

        for step in &steps {
            if let StepKind::Seek { marker, .. } = &step.kind {
                if marker.is_empty() {
                    return Err(ScrubError::InvalidSpec(format!(
                        "step '{}' seeks an empty marker",
                        step.name
                    )));
                }
            }
        }

        Ok(Self {
            steps,
            state,
            exhausted: Exhausted::default(),
            index: 0,
            seeker: None,
            collector: None,
            carry: Vec::new(),
            preceding: PrecedingBytes::default(),
            ceiling: 0,
        })
    }

    /// Set what happens to input once every step has completed
    pub fn when_exhausted(mut self, exhausted: Exhausted) -> Self {
        self.exhausted = exhausted;
        self
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn step_index(&self) -> usize {
        self.index
    }

    /// Name of the current step, `None` once exhausted
    pub fn current_step(&self) -> Option<&'static str> {
        self.steps.get(self.index).map(|step| step.name)
    }

    pub fn is_exhausted(&self) -> bool {
        self.index >= self.steps.len()
    }

    /// Bytes currently withheld
    pub fn carried(&self) -> &[u8] {
        &self.carry
    }

    /// Process one chunk.
    ///
    /// Returns the unconsumed tail, which is only non-empty for a
    /// [`Exhausted::Yield`] pipeline that ran out of steps mid-chunk.
    pub fn advance<'a>(
        &mut self,
        chunk: &'a [u8],
        sink: &mut dyn ChunkSink,
    ) -> Result<&'a [u8], ScrubError> {
        let mut chunk = chunk;

        loop {
            if self.is_exhausted() {
                return self.exhaust(chunk, sink);
            }

            match self.advance_step(chunk, sink)? {
                Some(rest) if !rest.is_empty() || self.ready_without_input() => chunk = rest,
                _ => return Ok(&[]),
            }
        }
    }

    /// End of stream: resolve whatever the current step still holds and
    /// flush the carry buffer
    pub fn finish(&mut self, sink: &mut dyn ChunkSink) -> Result<(), ScrubError> {
        let partial = match (self.seeker.take(), self.collector.take()) {
            (Some(mut seeker), _) => seeker.take_pending(),
            (None, Some(collector)) => collector.buf,
            (None, None) => Vec::new(),
        };

        if !partial.is_empty() {
            let (name, on_truncated) = match self.steps.get(self.index) {
                Some(step) => (step.name, step.on_truncated),
                None => ("", None),
            };

            debug!(
                "Stream ended in step '{}' with {} partial bytes",
                name,
                partial.len()
            );

            match on_truncated {
                Some(callback) => {
                    let mut ctx = StepContext {
                        step: name,
                        carry: &mut self.carry,
                        sink: &mut *sink,
                    };
                    callback(&mut self.state, partial, &mut ctx)?;
                }
                None => self.carry.extend_from_slice(&partial),
            }
        }

        self.index = self.steps.len();
        self.flush_carry(sink)?;
        Ok(())
    }

    /// Rewind to the first step for a new stream, dropping all step state
    pub fn reset(&mut self) {
        self.index = 0;
        self.seeker = None;
        self.collector = None;
        self.carry.clear();
        self.preceding = PrecedingBytes::default();
        self.ceiling = 0;
    }

    /// Run the current step on `chunk`. `Some(rest)` means the step
    /// resolved and `rest` belongs to whatever comes next.
    fn advance_step<'a>(
        &mut self,
        chunk: &'a [u8],
        sink: &mut dyn ChunkSink,
    ) -> Result<Option<&'a [u8]>, ScrubError> {
        let current = match &self.steps[self.index].kind {
            StepKind::Seek { marker, max_bytes } => {
                if self.seeker.is_none() {
                    let limit = max_bytes.unwrap_or(self.ceiling);
                    self.seeker = Some(BoundedSeeker::new(marker.clone(), limit));
                }
                Current::Seek
            }
            StepKind::Collect(ByteCount::Exactly(count)) => Current::Collect(*count),
            StepKind::Collect(ByteCount::Ceiling) => Current::Collect(self.ceiling),
        };

        match current {
            Current::Seek => self.seek_step(chunk, sink),
            Current::Collect(target) => self.collect_step(chunk, target, sink),
        }
    }

    fn seek_step<'a>(
        &mut self,
        chunk: &'a [u8],
        sink: &mut dyn ChunkSink,
    ) -> Result<Option<&'a [u8]>, ScrubError> {
        let Some(mut seeker) = self.seeker.take() else {
            return Err(ScrubError::InvalidSpec(format!(
                "step '{}' has no seeker",
                self.steps[self.index].name
            )));
        };

        match seeker.feed(chunk) {
            SeekResult::Matching { preceding } | SeekResult::Unmatched { preceding } => {
                self.seeker = Some(seeker);
                self.route_preceding(preceding, sink)?;
                Ok(None)
            }
            SeekResult::Matched {
                preceding,
                matched,
                remaining,
            } => {
                self.route_preceding(preceding, sink)?;
                self.complete(matched, sink)?;
                Ok(Some(remaining))
            }
            SeekResult::Ended {
                preceding,
                remaining,
            } => {
                self.route_preceding(preceding, sink)?;
                self.carry.extend(seeker.take_pending());
                self.end(seeker.max_bytes(), sink)?;
                Ok(Some(remaining))
            }
        }
    }

    fn collect_step<'a>(
        &mut self,
        chunk: &'a [u8],
        target: usize,
        sink: &mut dyn ChunkSink,
    ) -> Result<Option<&'a [u8]>, ScrubError> {
        let collector = self.collector.get_or_insert_with(|| Collector {
            buf: Vec::with_capacity(target),
            target,
        });

        let take = (collector.target - collector.buf.len()).min(chunk.len());
        collector.buf.extend_from_slice(&chunk[..take]);

        if collector.buf.len() < collector.target {
            return Ok(None);
        }

        let buf = match self.collector.take() {
            Some(collector) => collector.buf,
            None => Vec::new(),
        };
        self.complete(buf, sink)?;
        Ok(Some(&chunk[take..]))
    }

    /// Apply the preceding-bytes policy
    fn route_preceding(&mut self, preceding: Span<'_>, sink: &mut dyn ChunkSink) -> io::Result<()> {
        if preceding.is_empty() {
            return Ok(());
        }

        match self.preceding {
            PrecedingBytes::Enqueue => {
                self.flush_carry(sink)?;
                sink.enqueue(&preceding.carried)?;
                sink.enqueue(preceding.fresh)
            }
            PrecedingBytes::Skip => {
                self.carry.extend_from_slice(&preceding.carried);
                self.carry.extend_from_slice(preceding.fresh);
                Ok(())
            }
        }
    }

    /// Resolve the current step and move on as its directive says
    fn complete(&mut self, segment: Vec<u8>, sink: &mut dyn ChunkSink) -> Result<(), ScrubError> {
        let (name, on_complete) = {
            let step = &self.steps[self.index];
            (step.name, step.on_complete)
        };

        let mut ctx = StepContext {
            step: name,
            carry: &mut self.carry,
            sink,
        };

        let directive = match on_complete {
            Some(callback) => callback(&mut self.state, segment, &mut ctx)?,
            None => {
                ctx.emit(&segment)?;
                Directive::default()
            }
        };

        self.seeker = None;
        self.collector = None;
        self.index = if directive.rewind { 0 } else { self.index + 1 };
        self.preceding = directive.preceding;
        self.ceiling = directive.ceiling;

        debug!(
            "Step '{}' complete, next: {} (ceiling {}, preceding {:?})",
            name,
            self.current_step().unwrap_or("<pass-through>"),
            self.ceiling,
            self.preceding
        );

        Ok(())
    }

    /// The current seek step passed its limit; the pipeline goes terminal
    fn end(&mut self, limit: usize, sink: &mut dyn ChunkSink) -> Result<(), ScrubError> {
        let (name, on_ended) = {
            let step = &self.steps[self.index];
            (step.name, step.on_ended)
        };

        warn!(
            "Step '{}' found no marker within {} bytes, {} bytes carried",
            name,
            limit,
            self.carry.len()
        );

        match on_ended {
            Some(callback) => {
                let mut ctx = StepContext {
                    step: name,
                    carry: &mut self.carry,
                    sink: &mut *sink,
                };
                callback(&mut self.state, &mut ctx)?;
            }
            None => self.flush_carry(sink)?,
        }

        self.index = self.steps.len();
        Ok(())
    }

    fn exhaust<'a>(
        &mut self,
        chunk: &'a [u8],
        sink: &mut dyn ChunkSink,
    ) -> Result<&'a [u8], ScrubError> {
        self.flush_carry(sink)?;
        match self.exhausted {
            Exhausted::PassThrough => {
                sink.enqueue(chunk)?;
                Ok(&[])
            }
            Exhausted::Yield => Ok(chunk),
        }
    }

    /// Whether the pipeline has work to do even with no more input: a
    /// zero-length collect step, or carried bytes after the last step
    fn ready_without_input(&self) -> bool {
        match self.steps.get(self.index) {
            None => !self.carry.is_empty(),
            Some(step) => match step.kind {
                StepKind::Collect(ByteCount::Exactly(count)) => count == 0,
                StepKind::Collect(ByteCount::Ceiling) => self.ceiling == 0,
                StepKind::Seek { .. } => false,
            },
        }
    }

    fn flush_carry(&mut self, sink: &mut dyn ChunkSink) -> io::Result<()> {
        if !self.carry.is_empty() {
            sink.enqueue(&self.carry)?;
            self.carry.clear();
        }
        Ok(())
    }
}
