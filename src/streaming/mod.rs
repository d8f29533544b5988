//! Streaming module for chunk-boundary-safe byte scanning
//!
//! This module provides streaming primitives that:
//! - Match fixed markers incrementally, one byte at a time
//! - Bound how far a marker is searched for
//! - Sequence seeks and fixed-size reads into resumable pipelines
//! - Push output into any sink, never buffering a whole stream

pub mod marker;
pub mod scanner;
pub mod seeker;
pub mod sink;

pub use marker::{Marker, MarkerMatcher, MatchResult};
pub use scanner::{
    ByteCount, Directive, Exhausted, OnComplete, OnEnded, OnTruncated, PrecedingBytes, Scanner,
    Step, StepContext, StepKind,
};
pub use seeker::{BoundedSeeker, SeekResult, Span};
pub use sink::{ChunkSink, CountingSink};
