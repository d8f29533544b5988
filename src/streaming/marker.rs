//! Incremental Marker Matching
//!
//! Exact byte-pattern detection over a fragmented stream:
//! - O(1) amortised per byte
//! - State is a single cursor, so a marker split across any number of
//!   chunks is still found
//! - Mismatches fall back through a failure table, so markers with a
//!   prefix that is also a suffix (`FF FF E1` inside `FF FF FF E1`) are
//!   never missed

/// A fixed byte pattern to match against
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Marker {
    /// Marker name (for logging)
    name: &'static str,
    /// Marker bytes, compared exactly
    bytes: Vec<u8>,
    /// `failure[i]` is the length of the longest proper prefix of
    /// `bytes[..=i]` that is also a suffix of it
    failure: Vec<usize>,
}

impl Marker {
    /// Create a marker from its bytes
    pub fn new(name: &'static str, bytes: &[u8]) -> Self {
        let mut failure = vec![0usize; bytes.len()];
        let mut k = 0;

        for i in 1..bytes.len() {
            while k > 0 && bytes[i] != bytes[k] {
                k = failure[k - 1];
            }
            if bytes[i] == bytes[k] {
                k += 1;
            }
            failure[i] = k;
        }

        Self {
            name,
            bytes: bytes.to_vec(),
            failure,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Cursor after consuming `byte` with `cursor` bytes already matched.
    /// `cursor` must be below the marker length.
    #[inline]
    fn next(&self, mut cursor: usize, byte: u8) -> usize {
        loop {
            if self.bytes[cursor] == byte {
                return cursor + 1;
            }
            if cursor == 0 {
                return 0;
            }
            cursor = self.failure[cursor - 1];
        }
    }
}

/// Result of feeding a chunk to a [`MarkerMatcher`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchResult<'a> {
    /// A partial match is open at the end of the chunk
    Matching,
    /// The marker completed; `remaining` is everything after it
    Matched { remaining: &'a [u8] },
    /// No partial match is open
    Unmatched,
}

/// Streaming matcher for a single marker
#[derive(Clone, Debug)]
pub struct MarkerMatcher {
    marker: Marker,
    /// Number of marker bytes matched so far (0 = not matching)
    cursor: usize,
}

impl MarkerMatcher {
    pub fn new(marker: Marker) -> Self {
        Self { marker, cursor: 0 }
    }

    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    /// Length of the open partial match
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Bytes of the open partial match.
    ///
    /// The last `cursor` bytes seen always equal the marker prefix, so the
    /// pending bytes are read back from the marker itself.
    pub fn pending(&self) -> &[u8] {
        &self.marker.bytes[..self.cursor]
    }

    /// Advance by one byte; returns true when the marker completes.
    /// State resets after a full match.
    #[inline]
    pub fn step(&mut self, byte: u8) -> bool {
        if self.marker.is_empty() {
            return true;
        }

        self.cursor = self.marker.next(self.cursor, byte);
        if self.cursor == self.marker.len() {
            self.cursor = 0;
            return true;
        }
        false
    }

    /// Feed a chunk, stopping at the first full match
    pub fn feed<'a>(&mut self, chunk: &'a [u8]) -> MatchResult<'a> {
        if self.marker.is_empty() {
            return MatchResult::Matched { remaining: chunk };
        }

        for (i, &byte) in chunk.iter().enumerate() {
            if self.step(byte) {
                return MatchResult::Matched {
                    remaining: &chunk[i + 1..],
                };
            }
        }

        if self.cursor > 0 {
            MatchResult::Matching
        } else {
            MatchResult::Unmatched
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
