//! Pull-style buffered reader over an abstract [`FillSource`].
//!
//! # Why / How
//! `Input<F>` keeps exactly one of two shapes for "where am I reading from":
//! a single owned [`Chunk`] (`active`) on the hot, non-preview path, or a
//! [`RecordedChain`] plus a `preview_index` once a preview session is open.
//! Unifying both behind [`Input::with_active`]/[`Input::active_read_remaining`]
//! means every primitive read, `discard`, and `readAvailable`-style call is
//! written once and works in both modes — the dispatch in
//! [`Input::fetch_cached_or_fill`] is the only place that needs to know which
//! shape is live. This collapses the separate
//! `preview_index`/`position`/"is the active chunk also chain[0]?" bookkeeping
//! a naive port would need into ownership the borrow checker already
//! enforces: a chunk is either the lone `active` value or it lives in the
//! chain, never both.

use std::sync::Arc;

use tracing::trace;

use crate::chunk::Chunk;
use crate::error::{ChunkIoError, Result};
use crate::memory;
use crate::output::Output;
use crate::pool::Pool;
use crate::recorded_chain::RecordedChain;
use crate::sink::FlushSink;
use crate::source::FillSource;

pub struct Input<F: FillSource> {
    pool: Arc<Pool>,
    source: F,
    active: Option<Chunk>,
    chain: Option<RecordedChain>,
    preview_index: usize,
    /// `true` ⇔ no preview session is open; fills discard rather than record.
    preview_discard: bool,
    closed: bool,
}

impl<F: FillSource> Input<F> {
    pub fn new(pool: Arc<Pool>, source: F) -> Self {
        Input {
            pool,
            source,
            active: None,
            chain: None,
            preview_index: 0,
            preview_discard: true,
            closed: false,
        }
    }

    /// Builds an `Input` already holding a chain of chunks — used by
    /// [`crate::packet::Packet::into_input`] to read pre-materialized bytes
    /// without a real upstream to pull from. Reads drain the chain exactly
    /// like the post-preview `Draining` state, falling through to `source`
    /// (typically one that reports immediate EOF) once it empties.
    pub(crate) fn seeded(pool: Arc<Pool>, source: F, chain: RecordedChain) -> Self {
        Input {
            pool,
            source,
            active: None,
            chain: Some(chain),
            preview_index: 0,
            preview_discard: true,
            closed: false,
        }
    }

    fn active_read_remaining(&self) -> usize {
        if let Some(chain) = &self.chain {
            chain
                .pointed(self.preview_index, |c, _limit| c.read_remaining())
                .unwrap_or(0)
        } else {
            self.active.as_ref().map_or(0, |c| c.read_remaining())
        }
    }

    fn with_active<R>(&mut self, f: impl FnOnce(&mut Chunk) -> R) -> Option<R> {
        if let Some(chain) = &mut self.chain {
            chain.pointed_mut(self.preview_index, |c, _limit| f(c))
        } else {
            self.active.as_mut().map(f)
        }
    }

    fn total_cached_remaining(&self) -> usize {
        if let Some(chain) = &self.chain {
            (self.preview_index..chain.len())
                .map(|i| chain.pointed(i, |c, _| c.read_remaining()).unwrap_or(0))
                .sum()
        } else {
            self.active.as_ref().map_or(0, |c| c.read_remaining())
        }
    }

    /// Dispatch table: four cases over
    /// `(preview_discard, chain.is_some())`. Returns bytes now available, 0
    /// meaning source EOF with nothing cached.
    fn fetch_cached_or_fill(&mut self) -> Result<usize> {
        match (self.preview_discard, self.chain.is_some()) {
            (true, false) => self.fill_from_source(),
            (true, true) => self.advance_draining_chain(),
            (false, false) => self.start_chain_and_fill(),
            (false, true) => self.fill_and_store_in_preview(),
        }
    }

    fn fill_from_source(&mut self) -> Result<usize> {
        if self.active.is_none() {
            self.active = Some(self.pool.borrow());
        }
        let chunk = self.active.as_mut().expect("just populated");
        chunk.reset_for_refill();
        let n = {
            let region = chunk.writable_region();
            self.source.fill(region)?
        };
        chunk.advance_write(n);
        trace!(bytes = n, "input fill_from_source");
        Ok(chunk.read_remaining())
    }

    fn advance_draining_chain(&mut self) -> Result<usize> {
        let chain = self.chain.as_mut().expect("case requires a chain");
        if let Some((old_head, _limit)) = chain.discard_first() {
            self.pool.recycle(old_head);
        }
        if chain.is_empty() {
            self.chain = None;
            self.preview_index = 0;
            return self.fill_from_source();
        }
        let remaining = chain.pointed(0, |c, _| c.read_remaining()).unwrap_or(0);
        if remaining == 0 {
            return self.advance_draining_chain();
        }
        Ok(remaining)
    }

    fn start_chain_and_fill(&mut self) -> Result<usize> {
        let mut chain = RecordedChain::new();
        if let Some(active) = self.active.take() {
            let limit = active.write_pos();
            chain.append(active, limit);
        }
        self.chain = Some(chain);
        self.preview_index = self.chain.as_ref().unwrap().len().saturating_sub(1);
        self.fill_and_store_in_preview()
    }

    fn fill_and_store_in_preview(&mut self) -> Result<usize> {
        let next_index = self.preview_index + 1;
        let already_recorded = {
            let chain = self.chain.as_ref().expect("case requires a chain");
            !chain.is_after_last(next_index)
        };
        if already_recorded {
            self.preview_index = next_index;
            let chain = self.chain.as_ref().unwrap();
            return Ok(chain
                .pointed(next_index, |c, _| c.read_remaining())
                .unwrap_or(0));
        }
        let mut fresh = self.pool.borrow();
        let n = {
            let region = fresh.writable_region();
            self.source.fill(region)?
        };
        fresh.advance_write(n);
        let limit = fresh.write_pos();
        let avail = fresh.read_remaining();
        let chain = self.chain.as_mut().unwrap();
        chain.append(fresh, limit);
        self.preview_index = chain.len() - 1;
        Ok(avail)
    }

    fn require_available(&mut self) -> Result<()> {
        if self.active_read_remaining() == 0 {
            let avail = self.fetch_cached_or_fill()?;
            if avail == 0 {
                return Err(ChunkIoError::Eof);
            }
        }
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<i8> {
        self.require_available()?;
        Ok(self.with_active(|c| c.get_u8()).unwrap() as i8)
    }

    fn read_raw_u16(&mut self) -> Result<u16> {
        if self.active_read_remaining() >= 2 {
            return Ok(self.with_active(|c| c.get_u16()).unwrap());
        }
        let mut acc = 0u64;
        for _ in 0..2 {
            acc = memory::accumulate_be(acc, self.read_byte()? as u8);
        }
        Ok(acc as u16)
    }

    fn read_raw_u32(&mut self) -> Result<u32> {
        if self.active_read_remaining() >= 4 {
            return Ok(self.with_active(|c| c.get_u32()).unwrap());
        }
        let mut acc = 0u64;
        for _ in 0..4 {
            acc = memory::accumulate_be(acc, self.read_byte()? as u8);
        }
        Ok(acc as u32)
    }

    fn read_raw_u64(&mut self) -> Result<u64> {
        if self.active_read_remaining() >= 8 {
            return Ok(self.with_active(|c| c.get_u64()).unwrap());
        }
        let mut acc = 0u64;
        for _ in 0..8 {
            acc = memory::accumulate_be(acc, self.read_byte()? as u8);
        }
        Ok(acc)
    }

    pub fn read_short(&mut self) -> Result<i16> {
        Ok(self.read_raw_u16()? as i16)
    }

    pub fn read_int(&mut self) -> Result<i32> {
        Ok(self.read_raw_u32()? as i32)
    }

    pub fn read_long(&mut self) -> Result<i64> {
        Ok(self.read_raw_u64()? as i64)
    }

    pub fn read_float(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_raw_u32()?))
    }

    pub fn read_double(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_raw_u64()?))
    }

    pub fn read_short_le(&mut self) -> Result<i16> {
        Ok(self.read_short()?.swap_bytes())
    }

    pub fn read_int_le(&mut self) -> Result<i32> {
        Ok(self.read_int()?.swap_bytes())
    }

    pub fn read_long_le(&mut self) -> Result<i64> {
        Ok(self.read_long()?.swap_bytes())
    }

    pub fn read_float_le(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_raw_u32()?.swap_bytes()))
    }

    pub fn read_double_le(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_raw_u64()?.swap_bytes()))
    }

    pub fn read_fully(&mut self, dst: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < dst.len() {
            self.require_available()?;
            let take = self.active_read_remaining().min(dst.len() - filled);
            self.with_active(|c| c.copy_read_into(&mut dst[filled..filled + take]));
            filled += take;
        }
        Ok(())
    }

    /// Reads up to `dst.len()` bytes, stopping at EOF without error. Never
    /// triggers a fresh source fill beyond what is already cached once a
    /// prior [`Input::prefetch`] guaranteed enough bytes are visible.
    pub fn read_available(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < dst.len() {
            if self.active_read_remaining() == 0 {
                let avail = self.fetch_cached_or_fill()?;
                if avail == 0 {
                    break;
                }
            }
            let take = self.active_read_remaining().min(dst.len() - filled);
            self.with_active(|c| c.copy_read_into(&mut dst[filled..filled + take]));
            filled += take;
        }
        Ok(filled)
    }

    pub fn discard(&mut self, mut n: usize) -> Result<()> {
        while n > 0 {
            self.require_available()?;
            let take = self.active_read_remaining().min(n);
            self.with_active(|c| c.advance_read(take));
            n -= take;
        }
        Ok(())
    }

    pub fn eof(&mut self) -> Result<bool> {
        if self.active_read_remaining() > 0 {
            return Ok(false);
        }
        Ok(self.fetch_cached_or_fill()? == 0)
    }

    /// Forces at least `n` bytes to be visible across the active chunk and
    /// any chunks the reader retains, without consuming them. Returns
    /// `false` on EOF before reaching `n`.
    pub fn prefetch(&mut self, n: usize) -> Result<bool> {
        if self.total_cached_remaining() >= n {
            return Ok(true);
        }
        if self.chain.is_none() {
            let mut chain = RecordedChain::new();
            if let Some(active) = self.active.take() {
                let limit = active.write_pos();
                chain.append(active, limit);
            }
            self.chain = Some(chain);
            self.preview_index = 0;
        }
        loop {
            if self.total_cached_remaining() >= n {
                return Ok(true);
            }
            let mut fresh = self.pool.borrow();
            let filled = {
                let region = fresh.writable_region();
                match self.source.fill(region) {
                    Ok(k) => k,
                    Err(e) => {
                        // The just-borrowed local chunk is recycled here,
                        // never the active chunk.
                        self.pool.recycle(fresh);
                        return Err(e);
                    }
                }
            };
            if filled == 0 {
                self.pool.recycle(fresh);
                return Ok(false);
            }
            fresh.advance_write(filled);
            let limit = fresh.write_pos();
            self.chain.as_mut().unwrap().append(fresh, limit);
        }
    }

    /// Scoped, possibly nested, non-destructive lookahead: `f` observes
    /// whatever reads it performs, then cursors are rewound so a caller
    /// outside `f` sees the same bytes again.
    pub fn preview<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.require_available()?;

        let saved_index = self.preview_index;
        let saved_position = self.with_active(|c| c.read_pos()).unwrap_or(0);
        let is_outermost = self.preview_discard;

        if is_outermost {
            self.preview_discard = false;
            if self.chain.is_none() {
                let mut chain = RecordedChain::new();
                if let Some(active) = self.active.take() {
                    let limit = active.write_pos();
                    chain.append(active, limit);
                }
                self.chain = Some(chain);
                self.preview_index = self.chain.as_ref().unwrap().len().saturating_sub(1);
            }
        }

        let result = f(self);

        // Every chain entry past the checkpoint was either freshly filled
        // during `f` or, if already buffered ahead, had never been visited
        // before `f` ran — either way it started unread. Rewind all of them
        // before restoring the checkpoint itself, or bytes `f` consumed past
        // the first chunk would stay consumed once we resume outside it.
        if let Some(chain) = &mut self.chain {
            for i in (saved_index + 1)..chain.len() {
                chain.pointed_mut(i, |c, _limit| c.set_read_pos(0));
            }
        }
        self.preview_index = saved_index;
        self.with_active(|c| c.set_read_pos(saved_position));

        if is_outermost {
            self.preview_discard = true;
            self.finish_outermost_preview(saved_index);
        }

        result
    }

    /// Collapses the chain once the outermost preview exits: entries before
    /// `keep_from` are no longer reachable (we resume reading at
    /// `keep_from`) and are recycled now; a single surviving entry collapses
    /// back into a plain `active` chunk (`Recording → Idle`); more than one
    /// stays a chain, consumed one chunk at a time as `Draining`.
    fn finish_outermost_preview(&mut self, keep_from: usize) {
        let Some(mut chain) = self.chain.take() else {
            return;
        };
        for _ in 0..keep_from {
            if let Some((chunk, _)) = chain.discard_first() {
                self.pool.recycle(chunk);
            }
        }
        match chain.len() {
            0 => self.chain = None,
            1 => {
                let (chunk, _) = chain.discard_first().unwrap();
                self.active = Some(chunk);
                self.chain = None;
            }
            _ => self.chain = Some(chain),
        }
        self.preview_index = 0;
    }

    /// Zero-copy hand-off to a compatible writer: if no bytes are currently
    /// cached and `output` draws chunks from the same pool, fills directly
    /// into the destination's tail region instead of copying through an
    /// intermediate buffer.
    pub fn read_available_to<S: FlushSink>(&mut self, output: &mut Output<S>) -> Result<usize> {
        if self.active_read_remaining() == 0 && Arc::ptr_eq(&self.pool, output.pool()) {
            let region = output.reserve_fill_region()?;
            let n = self.source.fill(region)?;
            output.commit_filled(n);
            trace!(bytes = n, "input zero-copy read_available_to");
            return Ok(n);
        }
        if self.active_read_remaining() == 0 {
            let avail = self.fetch_cached_or_fill()?;
            if avail == 0 {
                return Ok(0);
            }
        }
        let n = self.active_read_remaining();
        let mut buf = vec![0u8; n];
        self.with_active(|c| c.copy_read_into(&mut buf));
        output.write_fully(&buf)?;
        Ok(n)
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(ChunkIoError::invalid_state("Input already closed"));
        }
        self.closed = true;
        self.recycle_owned_chunks();
        self.source.close_source()
    }

    fn recycle_owned_chunks(&mut self) {
        if let Some(active) = self.active.take() {
            self.pool.recycle(active);
        }
        if let Some(mut chain) = self.chain.take() {
            while let Some((chunk, _)) = chain.discard_first() {
                self.pool.recycle(chunk);
            }
        }
    }
}

impl<F: FillSource> Drop for Input<F> {
    fn drop(&mut self) {
        if !self.closed {
            self.recycle_owned_chunks();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::source::SliceFillSource;

    fn small_pool() -> Arc<Pool> {
        Pool::new(PoolConfig {
            chunk_capacity: 4,
            max_free_chunks: 8,
        })
    }

    #[test]
    fn empty_input_is_eof() {
        let pool = small_pool();
        let mut input = Input::new(pool, SliceFillSource::new(b""));
        assert!(input.eof().unwrap());
        assert!(input.read_byte().is_err());
    }

    #[test]
    fn cross_chunk_primitive_read() {
        let pool = small_pool();
        // 1-byte-then-3-byte source split across 4-byte chunks: the reader
        // must assemble 0xAABBCCDD across the boundary.
        let mut input = Input::new(pool, SliceFillSource::new(&[0xAA, 0xBB, 0xCC, 0xDD]));
        assert_eq!(input.read_int().unwrap() as u32, 0xAABBCCDD);
    }

    #[test]
    fn preview_replays_identical_bytes() {
        let pool = small_pool();
        let mut input = Input::new(pool, SliceFillSource::new(b"ABCDEF"));
        let mut seen = [0u8; 4];
        input
            .preview(|inner| {
                inner.read_fully(&mut seen)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(&seen, b"ABCD");
        let mut replay = [0u8; 6];
        input.read_fully(&mut replay).unwrap();
        assert_eq!(&replay, b"ABCDEF");
    }

    #[test]
    fn nested_preview_replays_twice() {
        let pool = small_pool();
        let mut input = Input::new(pool, SliceFillSource::new(b"ABCDEF"));
        input
            .preview(|outer| {
                let mut inner_seen = [0u8; 3];
                outer.preview(|inner| inner.read_fully(&mut inner_seen))?;
                assert_eq!(&inner_seen, b"ABC");
                let mut outer_seen = [0u8; 3];
                outer.read_fully(&mut outer_seen)?;
                assert_eq!(&outer_seen, b"ABC");
                Ok(())
            })
            .unwrap();
        let mut after = [0u8; 3];
        input.read_fully(&mut after).unwrap();
        assert_eq!(&after, b"ABC");
    }

    #[test]
    fn prefetch_then_read_available_needs_no_further_fill() {
        let pool = small_pool();
        let mut input = Input::new(pool, SliceFillSource::new(b"hello world"));
        assert!(input.prefetch(11).unwrap());
        assert!(!input.prefetch(12).unwrap());
        let mut dst = [0u8; 11];
        assert_eq!(input.read_available(&mut dst).unwrap(), 11);
        assert_eq!(&dst, b"hello world");
    }

    #[test]
    fn discard_skips_across_chunks() {
        let pool = small_pool();
        let mut input = Input::new(pool, SliceFillSource::new(b"ABCDEFGH"));
        input.discard(5).unwrap();
        let mut rest = [0u8; 3];
        input.read_fully(&mut rest).unwrap();
        assert_eq!(&rest, b"FGH");
    }

    #[test]
    fn little_endian_is_byte_reversed_big_endian() {
        let pool = small_pool();
        let mut input = Input::new(pool, SliceFillSource::new(&0x01020304u32.to_be_bytes()));
        assert_eq!(input.read_int_le().unwrap(), 0x04030201u32 as i32);
    }

    #[test]
    fn close_recycles_every_owned_chunk_once() {
        let pool = small_pool();
        let mut input = Input::new(Arc::clone(&pool), SliceFillSource::new(b"ABCDEFGHIJKL"));
        input.prefetch(12).unwrap();
        input.close().unwrap();
        let stats = pool.stats();
        assert_eq!(stats.borrowed, stats.recycled);
    }
}
