//! Bounded Seeker
//!
//! A [`MarkerMatcher`] that also counts the bytes it has scanned and gives
//! up once an optional limit is used up. The limit is enforced per byte, so
//! the search ends at the same stream offset however the input is split.
//! Unlike the bare matcher it reports where the bytes of each chunk belong:
//! - `preceding`: definitely not part of the marker, safe to release
//! - `matched`: the marker itself
//! - `remaining`: after the marker, untouched
//!
//! Bytes of a partial match at the end of a chunk are withheld by the
//! seeker and reported later as either `preceding` (the match broke) or
//! `matched` (it completed). For every feed,
//! `held_before ++ chunk == preceding ++ matched ++ remaining ++ held_after`.

use super::marker::{Marker, MarkerMatcher};

/// Bytes released by a feed, in stream order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Span<'a> {
    /// Bytes withheld by an earlier feed whose partial match broke
    pub carried: Vec<u8>,
    /// Prefix of the chunk just fed
    pub fresh: &'a [u8],
}

impl<'a> Span<'a> {
    pub fn len(&self) -> usize {
        self.carried.len() + self.fresh.len()
    }

    pub fn is_empty(&self) -> bool {
        self.carried.is_empty() && self.fresh.is_empty()
    }

    /// Copy out as one contiguous buffer
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.carried);
        out.extend_from_slice(self.fresh);
        out
    }
}

/// Result of feeding a chunk to a [`BoundedSeeker`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeekResult<'a> {
    /// A partial match is held back at the end of the chunk
    Matching { preceding: Span<'a> },
    /// Marker found
    Matched {
        preceding: Span<'a>,
        matched: Vec<u8>,
        remaining: &'a [u8],
    },
    /// Nothing held back
    Unmatched { preceding: Span<'a> },
    /// The scan limit was used up without a match. `remaining` was not
    /// scanned; a partial match at the limit stays held back.
    Ended {
        preceding: Span<'a>,
        remaining: &'a [u8],
    },
}

/// Marker seeker with an optional scan limit
#[derive(Clone, Debug)]
pub struct BoundedSeeker {
    matcher: MarkerMatcher,
    /// Total bytes scanned since construction
    seeked_bytes: usize,
    /// Scan limit (0 = unbounded)
    max_bytes: usize,
}

impl BoundedSeeker {
    pub fn new(marker: Marker, max_bytes: usize) -> Self {
        Self {
            matcher: MarkerMatcher::new(marker),
            seeked_bytes: 0,
            max_bytes,
        }
    }

    pub fn marker(&self) -> &Marker {
        self.matcher.marker()
    }

    pub fn seeked_bytes(&self) -> usize {
        self.seeked_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Bytes of the open partial match, held back from the caller
    pub fn pending(&self) -> &[u8] {
        self.matcher.pending()
    }

    /// Give up the held partial match (end of stream, or the step is torn down)
    pub fn take_pending(&mut self) -> Vec<u8> {
        let pending = self.matcher.pending().to_vec();
        self.matcher.reset();
        pending
    }

    /// Feed a chunk.
    ///
    /// Scanning stops after the `max_bytes`-th byte. Once `Ended` has been
    /// returned the seeker must not be fed again.
    pub fn feed<'a>(&mut self, chunk: &'a [u8]) -> SeekResult<'a> {
        if self.matcher.marker().is_empty() {
            return SeekResult::Matched {
                preceding: Span::default(),
                matched: Vec::new(),
                remaining: chunk,
            };
        }

        if self.limit_reached() {
            return SeekResult::Ended {
                preceding: Span::default(),
                remaining: chunk,
            };
        }

        // Positions below are in the virtual stream `held ++ chunk`
        let held = self.matcher.cursor();
        let marker_len = self.matcher.marker().len();

        for (i, &byte) in chunk.iter().enumerate() {
            self.seeked_bytes += 1;

            if self.matcher.step(byte) {
                let end = held + i + 1;
                let start = end - marker_len;
                let matched = self.matcher.marker().as_bytes().to_vec();
                return SeekResult::Matched {
                    preceding: self.span(held, chunk, start),
                    matched,
                    remaining: &chunk[i + 1..],
                };
            }

            if self.limit_reached() {
                let cursor = self.matcher.cursor();
                return SeekResult::Ended {
                    preceding: self.span(held, chunk, held + i + 1 - cursor),
                    remaining: &chunk[i + 1..],
                };
            }
        }

        let cursor = self.matcher.cursor();
        let preceding = self.span(held, chunk, held + chunk.len() - cursor);

        if cursor > 0 {
            SeekResult::Matching { preceding }
        } else {
            SeekResult::Unmatched { preceding }
        }
    }

    fn limit_reached(&self) -> bool {
        self.max_bytes > 0 && self.seeked_bytes >= self.max_bytes
    }

    /// The first `upto` bytes of `held ++ chunk`, where the held bytes were
    /// the marker prefix of length `held` when the feed began
    fn span<'a>(&self, held: usize, chunk: &'a [u8], upto: usize) -> Span<'a> {
        let carried_len = upto.min(held);
        Span {
            carried: self.matcher.marker().as_bytes()[..carried_len].to_vec(),
            fresh: &chunk[..upto - carried_len],
        }
    }
}
