//! Pooled, chunk-oriented buffered binary I/O.
//!
//! `chunkio` is the substrate a file-, socket-, or memory-backed reader and
//! writer can be built on: a bounded [`Pool`] of fixed-capacity [`Chunk`]s,
//! a pull-style [`Input`] with nested non-destructive `preview` lookahead,
//! a push-style [`Output`] builder with zero-copy packet merging, and the
//! immutable [`Packet`] the builder freezes into — itself consumable as an
//! `Input`, closing the loop.
//!
//! Concrete file/socket sources and sinks, a JSON codec, and an async
//! channel layer are deliberately out of scope here; they are thin adapters
//! over [`FillSource`] and [`FlushSink`] that belong in downstream crates.
//!
//! Dependency order, leaves first: [`memory`] → [`chunk`] → [`pool`] →
//! [`recorded_chain`] → [`input`] / [`output`] → [`packet`].

mod chunk;
mod memory;
mod recorded_chain;

pub mod error;
pub mod input;
pub mod output;
pub mod packet;
pub mod pool;
pub mod sink;
pub mod source;

pub use chunk::Chunk;
pub use error::{ChunkIoError, Result};
pub use input::Input;
pub use output::Output;
pub use packet::Packet;
pub use pool::{Pool, PoolConfig, PoolStats};
pub use sink::{FlushSink, NullFlushSink, RecordingFlushSink};
pub use source::{FillSource, SliceFillSource};
