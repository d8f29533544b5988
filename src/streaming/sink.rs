//! Output side of a scrubbing pipeline
//!
//! Pipelines never return bytes; they push them into a [`ChunkSink`] in
//! the order their policies decide. Any [`std::io::Write`] is a sink, which
//! covers `Vec<u8>` for in-memory use.

use std::io;

/// Destination for emitted bytes
pub trait ChunkSink {
    /// Append bytes to the output stream
    fn enqueue(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<W: io::Write + ?Sized> ChunkSink for W {
    fn enqueue(&mut self, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.write_all(bytes)
    }
}

/// Sink wrapper that counts bytes passed through
pub struct CountingSink<'a> {
    inner: &'a mut dyn ChunkSink,
    count: u64,
}

impl<'a> CountingSink<'a> {
    pub fn new(inner: &'a mut dyn ChunkSink) -> Self {
        Self { inner, count: 0 }
    }

    /// Bytes emitted so far
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl ChunkSink for CountingSink<'_> {
    fn enqueue(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.enqueue(bytes)?;
        self.count += bytes.len() as u64;
        Ok(())
    }
}
