//! The `FlushSink` capability interface and its test doubles.

use crate::error::Result;

/// The other capability interface a caller plugs into an
/// [`Output`](crate::output::Output): drain bytes somewhere.
pub trait FlushSink {
    /// Consumes `data`. The chunk it was read from is recycled by the core
    /// immediately after this call returns.
    fn flush(&mut self, data: &[u8]) -> Result<()>;

    /// Releases the underlying resource. Called exactly once, from
    /// `Output::close`.
    fn close_destination(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A sink that discards everything, for builders that only ever `build()`
/// a packet and never `flush()`.
#[derive(Default)]
pub struct NullFlushSink;

impl FlushSink for NullFlushSink {
    fn flush(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// A sink that appends every flushed slice to an in-memory `Vec`, for
/// asserting exact byte sequences in tests.
#[derive(Default)]
pub struct RecordingFlushSink {
    pub recorded: Vec<u8>,
}

impl RecordingFlushSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlushSink for RecordingFlushSink {
    fn flush(&mut self, data: &[u8]) -> Result<()> {
        self.recorded.extend_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_accumulates_in_order() {
        let mut sink = RecordingFlushSink::new();
        sink.flush(b"ab").unwrap();
        sink.flush(b"cd").unwrap();
        assert_eq!(sink.recorded, b"abcd");
    }
}
