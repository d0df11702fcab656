//! Error taxonomy for `chunkio`.
//!
//! Three kinds per the core's error-handling design, plus a fourth that
//! carries whatever a caller's `FillSource`/`FlushSink` implementation
//! raised. The core never swallows an error: it unwinds (recycling any
//! chunk it has borrowed but not yet published) and rethrows.

/// Boxed cause from a subclass hook (`fill`, `fill_multi`, `flush`, ...).
pub type SourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum ChunkIoError {
    /// The source reached end of stream before satisfying the request.
    #[error("unexpected end of stream")]
    Eof,

    /// A negative size, negative index, or out-of-range slice was supplied.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not valid in the instance's current state (closed,
    /// frozen, or a chunk whose reference count forbids the requested
    /// mutation).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A caller-supplied `FillSource`/`FlushSink` hook returned an error.
    #[error("fill/flush source failed: {0}")]
    Source(#[source] SourceError),
}

impl ChunkIoError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ChunkIoError::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        ChunkIoError::InvalidState(msg.into())
    }

    pub fn source(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        ChunkIoError::Source(Box::new(err))
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, ChunkIoError::Eof)
    }
}

pub type Result<T> = core::result::Result<T, ChunkIoError>;
