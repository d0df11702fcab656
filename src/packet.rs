//! Immutable, chain-backed byte sequence produced by [`Output::build`](crate::output::Output::build).
//!
//! A `Packet` owns a `Chunk` chain exactly like an `Output` mid-accumulation,
//! except every chunk in it is meant to be read-only from here on — `copy()`
//! shares the underlying memory (bumping each chunk's `Arc` refcount)
//! instead of duplicating bytes: a chunk may be shared immutably only after
//! conversion to this read-only state.

use std::sync::Arc;

use crate::chunk::Chunk;
use crate::error::Result;
use crate::input::Input;
use crate::pool::Pool;
use crate::source::FillSource;

/// A `FillSource` that always reports end-of-stream, used to back an
/// `Input` whose bytes are already fully materialized in a packet's chain —
/// there is no further upstream to pull from.
pub(crate) struct EofSource;

impl FillSource for EofSource {
    fn fill(&mut self, _region: &mut [u8]) -> Result<usize> {
        Ok(0)
    }
}

pub struct Packet {
    pool: Arc<Pool>,
    head: Option<Box<Chunk>>,
    len: usize,
}

impl Packet {
    pub(crate) fn new(pool: Arc<Pool>, head: Option<Box<Chunk>>, len: usize) -> Self {
        Packet { pool, head, len }
    }

    pub(crate) fn empty(pool: Arc<Pool>) -> Self {
        Packet { pool, head: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Clones the chain by sharing each chunk's memory (an `Arc` clone per
    /// chunk, not a byte copy).
    pub fn copy(&self) -> Packet {
        let head = clone_chain(&self.head);
        Packet {
            pool: Arc::clone(&self.pool),
            head,
            len: self.len,
        }
    }

    pub fn release(mut self) {
        self.recycle_chain();
    }

    /// Consumes the packet into an `Input` that reads exactly its bytes,
    /// closing the loop back to the pull-style reader.
    pub fn into_input(mut self) -> Input<EofSource> {
        let head = self.head.take();
        let mut chain = crate::recorded_chain::RecordedChain::new();
        let mut cur = head;
        while let Some(mut boxed) = cur {
            cur = boxed.next.take();
            let limit = boxed.write_pos();
            chain.append(*boxed, limit);
        }
        Input::seeded(Arc::clone(&self.pool), EofSource, chain)
    }

    pub(crate) fn into_parts(mut self) -> (Option<Box<Chunk>>, usize, Arc<Pool>) {
        let head = self.head.take();
        (head, self.len, Arc::clone(&self.pool))
    }

    pub(crate) fn head_chunk_remaining(&self) -> usize {
        self.head.as_ref().map_or(0, |h| h.read_remaining())
    }

    pub(crate) fn advance_to_next_chunk(&mut self) {
        if let Some(mut old) = self.head.take() {
            self.head = old.next.take();
            self.pool.recycle(*old);
        }
    }

    pub(crate) fn copy_from_head(&mut self, n: usize) -> Vec<u8> {
        let head = self.head.as_mut().expect("caller checked remaining > 0");
        let mut buf = vec![0u8; n];
        head.copy_read_into(&mut buf);
        self.len -= n;
        buf
    }

    fn recycle_chain(&mut self) {
        let mut cur = self.head.take();
        while let Some(mut boxed) = cur {
            cur = boxed.next.take();
            self.pool.recycle(*boxed);
        }
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        if self.head.is_some() {
            self.recycle_chain();
        }
    }
}

fn clone_chain(head: &Option<Box<Chunk>>) -> Option<Box<Chunk>> {
    let mut shares = Vec::new();
    let mut cur = head.as_deref();
    while let Some(chunk) = cur {
        shares.push(chunk.share());
        cur = chunk.next.as_deref();
    }
    let mut next: Option<Box<Chunk>> = None;
    while let Some(mut chunk) = shares.pop() {
        chunk.next = next;
        next = Some(Box::new(chunk));
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Output;
    use crate::pool::PoolConfig;

    fn small_pool(capacity: usize) -> Arc<Pool> {
        Pool::new(PoolConfig {
            chunk_capacity: capacity,
            max_free_chunks: 16,
        })
    }

    #[test]
    fn copy_shares_memory_and_reads_independently() {
        let pool = small_pool(16);
        let mut out = Output::new(Arc::clone(&pool));
        out.write_fully(b"abcdefgh").unwrap();
        let packet = out.build();
        let copy = packet.copy();

        let mut r1 = packet.into_input();
        let mut r2 = copy.into_input();
        let mut b1 = [0u8; 8];
        let mut b2 = [0u8; 8];
        r1.read_fully(&mut b1).unwrap();
        r2.read_fully(&mut b2).unwrap();
        assert_eq!(&b1, b"abcdefgh");
        assert_eq!(&b2, b"abcdefgh");
    }

    #[test]
    fn release_recycles_without_reading() {
        let pool = small_pool(16);
        let mut out = Output::new(Arc::clone(&pool));
        out.write_fully(b"abcdefgh").unwrap();
        let packet = out.build();
        packet.release();
        let stats = pool.stats();
        assert_eq!(stats.borrowed, stats.recycled);
    }

    #[test]
    fn empty_packet_is_immediately_eof() {
        let pool = small_pool(16);
        let mut out = Output::new(Arc::clone(&pool));
        let packet = out.build();
        assert!(packet.is_empty());
        let mut input = packet.into_input();
        assert!(input.eof().unwrap());
    }
}
