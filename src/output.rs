//! Push-style buffered writer / packet builder.
//!
//! # Why / How
//! `Output` caches a tail pointer plus a `chained_size` running total so
//! appends stay O(1) without walking the whole chain. The natural Rust
//! rendering of "chain with a cheaply-reachable tail" is a `Vec<Chunk>`
//! during accumulation — `Vec::last_mut` is the cached tail access. The
//! chain only gets its `Chunk::next`-linked shape (the one a `Packet` and
//! `Input` understand) at `build()`/`steal_all()`, via [`link_into_chain`].
//! There is no byte-spanning fallback path here at all: a primitive write
//! that would not fit rotates to a fresh tail first (see `ensure_room`)
//! rather than ever splitting a write across a chunk boundary, so the
//! freshly appended chunk's own cursor stays the single source of truth for
//! its position.

use std::sync::Arc;

use tracing::trace;

use crate::chunk::Chunk;
use crate::error::{ChunkIoError, Result};
use crate::packet::Packet;
use crate::pool::Pool;
use crate::sink::{FlushSink, NullFlushSink};

/// Merge threshold: a foreign packet below this size may be copy-merged
/// into (or absorb) the builder's tail instead of being
/// spliced in as its own chunk.
const MERGE_THRESHOLD: usize = 200;

/// Bytes reserved at the start and end of every freshly appended chunk, so a
/// later `writePacket` either finds spare room past `write_remaining()` to
/// append-merge into (the end gap), or can itself be prepend-merged into —
/// as the *foreign* head of someone else's `writePacket` call — without
/// moving its own bytes (the start gap). Only installed when the chunk is
/// comfortably larger than both gaps combined; tiny chunks (as in tests)
/// skip reservation entirely rather than being left with no writable room.
const DEFAULT_START_GAP: usize = 8;
const DEFAULT_END_GAP: usize = 8;

pub struct Output<S: FlushSink = NullFlushSink> {
    pool: Arc<Pool>,
    sink: S,
    chunks: Vec<Chunk>,
    chained_size: usize,
    closed: bool,
}

impl Output<NullFlushSink> {
    pub fn new(pool: Arc<Pool>) -> Self {
        Output::with_sink(pool, NullFlushSink)
    }
}

impl<S: FlushSink> Output<S> {
    pub fn with_sink(pool: Arc<Pool>, sink: S) -> Self {
        Output {
            pool,
            sink,
            chunks: Vec::new(),
            chained_size: 0,
            closed: false,
        }
    }

    pub(crate) fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn size(&self) -> usize {
        self.chained_size + self.chunks.last().map_or(0, |c| c.written_len())
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn append_new_buffer(&mut self) {
        if let Some(old_tail) = self.chunks.last() {
            self.chained_size += old_tail.written_len();
        }
        let mut fresh = self.pool.borrow();
        let capacity = fresh.capacity();
        // Reserve both gaps only when the chunk can spare them several times
        // over; a pool configured with a tiny capacity (as tests do) would
        // otherwise be left with zero writable bytes forever.
        let reserve_gaps = capacity >= 4 * (DEFAULT_START_GAP + DEFAULT_END_GAP);
        if reserve_gaps {
            fresh.reserve_start_gap(DEFAULT_START_GAP);
            fresh.reserve_end_gap(DEFAULT_END_GAP);
        }
        trace!(capacity, reserve_gaps, "output append_new_buffer");
        self.chunks.push(fresh);
    }

    fn tail_mut(&mut self) -> &mut Chunk {
        if self.chunks.is_empty() {
            self.append_new_buffer();
        }
        self.chunks.last_mut().expect("just ensured non-empty")
    }

    fn ensure_room(&mut self, k: usize) {
        if self.tail_mut().write_remaining() < k {
            self.append_new_buffer();
        }
    }

    pub(crate) fn reserve_fill_region(&mut self) -> Result<&mut [u8]> {
        if self.tail_mut().write_remaining() == 0 {
            self.append_new_buffer();
        }
        Ok(self.tail_mut().writable_region())
    }

    pub(crate) fn commit_filled(&mut self, n: usize) {
        self.tail_mut().advance_write(n);
    }

    pub fn write_byte(&mut self, v: i8) -> Result<()> {
        self.ensure_room(1);
        self.tail_mut().put_u8(v as u8);
        Ok(())
    }

    pub fn write_short(&mut self, v: i16) -> Result<()> {
        self.ensure_room(2);
        self.tail_mut().put_u16(v as u16);
        Ok(())
    }

    pub fn write_int(&mut self, v: i32) -> Result<()> {
        self.ensure_room(4);
        self.tail_mut().put_u32(v as u32);
        Ok(())
    }

    pub fn write_long(&mut self, v: i64) -> Result<()> {
        self.ensure_room(8);
        self.tail_mut().put_u64(v as u64);
        Ok(())
    }

    pub fn write_float(&mut self, v: f32) -> Result<()> {
        self.ensure_room(4);
        self.tail_mut().put_u32(v.to_bits());
        Ok(())
    }

    pub fn write_double(&mut self, v: f64) -> Result<()> {
        self.ensure_room(8);
        self.tail_mut().put_u64(v.to_bits());
        Ok(())
    }

    pub fn write_short_le(&mut self, v: i16) -> Result<()> {
        self.write_short(v.swap_bytes())
    }

    pub fn write_int_le(&mut self, v: i32) -> Result<()> {
        self.write_int(v.swap_bytes())
    }

    pub fn write_long_le(&mut self, v: i64) -> Result<()> {
        self.write_long(v.swap_bytes())
    }

    pub fn write_float_le(&mut self, v: f32) -> Result<()> {
        self.ensure_room(4);
        self.tail_mut().put_u32(v.to_bits().swap_bytes());
        Ok(())
    }

    pub fn write_double_le(&mut self, v: f64) -> Result<()> {
        self.ensure_room(8);
        self.tail_mut().put_u64(v.to_bits().swap_bytes());
        Ok(())
    }

    pub fn write_fully(&mut self, src: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < src.len() {
            if self.tail_mut().write_remaining() == 0 {
                self.append_new_buffer();
            }
            let tail = self.tail_mut();
            let take = tail.write_remaining().min(src.len() - offset);
            tail.write_slice(&src[offset..offset + take]);
            offset += take;
        }
        Ok(())
    }

    pub fn write_fully_shorts(&mut self, src: &[i16]) -> Result<()> {
        src.iter().try_for_each(|&v| self.write_short(v))
    }

    pub fn write_fully_ints(&mut self, src: &[i32]) -> Result<()> {
        src.iter().try_for_each(|&v| self.write_int(v))
    }

    pub fn write_fully_longs(&mut self, src: &[i64]) -> Result<()> {
        src.iter().try_for_each(|&v| self.write_long(v))
    }

    pub fn write_fully_floats(&mut self, src: &[f32]) -> Result<()> {
        src.iter().try_for_each(|&v| self.write_float(v))
    }

    pub fn write_fully_doubles(&mut self, src: &[f64]) -> Result<()> {
        src.iter().try_for_each(|&v| self.write_double(v))
    }

    /// Fills `count` bytes with `byte`.
    pub fn fill(&mut self, mut count: usize, byte: u8) -> Result<()> {
        while count > 0 {
            if self.tail_mut().write_remaining() == 0 {
                self.append_new_buffer();
            }
            let tail = self.tail_mut();
            let take = tail.write_remaining().min(count);
            for _ in 0..take {
                tail.put_u8(byte);
            }
            count -= take;
        }
        Ok(())
    }

    /// Encodes one Unicode scalar value as UTF-8 (1–4 bytes). Rust's `char`
    /// has no lone-surrogate representation, so unlike the BMP-only
    /// original this handles the full range directly; see `DESIGN.md`.
    pub fn append_char(&mut self, c: char) -> Result<()> {
        let mut buf = [0u8; 4];
        let bytes = c.encode_utf8(&mut buf).as_bytes();
        self.write_fully(bytes)
    }

    /// Renders `None` as the literal four-byte string `"null"`, matching the
    /// source's handling of a null char-sequence.
    pub fn append_str(&mut self, s: Option<&str>) -> Result<()> {
        match s {
            None => self.write_fully(b"null"),
            Some(s) => self.write_string_utf8(s),
        }
    }

    pub fn append_chars(&mut self, chars: &[char]) -> Result<()> {
        chars.iter().try_for_each(|&c| self.append_char(c))
    }

    /// Writes a `&str`'s bytes directly — `str` is already valid UTF-8, so
    /// unlike `append_char` this never needs the per-codepoint encoder.
    pub fn write_string_utf8(&mut self, s: &str) -> Result<()> {
        self.write_fully(s.as_bytes())
    }

    /// Takes ownership of `packet`'s entire chain and appends it to this
    /// builder's tail, merging small compatible chains instead of always
    /// splicing.
    pub fn write_packet(&mut self, packet: Packet) -> Result<()> {
        let (head, len, src_pool) = packet.into_parts();
        if len == 0 {
            debug_assert!(head.is_none());
            return Ok(());
        }
        let mut foreign = flatten_chain(head);

        if foreign.len() == 1 && foreign[0].read_remaining() <= MERGE_THRESHOLD {
            if let Some(tail) = self.chunks.last() {
                let foreign_len = foreign[0].read_remaining();
                let tail_len = tail.written_len();
                let append_feasible = tail.write_remaining() + tail.end_gap() >= foreign_len;
                let prepend_feasible = foreign[0].is_exclusive() && foreign[0].start_gap() >= tail_len;

                // If both merges are feasible, choose the smaller movement:
                // append-merge moves the foreign bytes, prepend-merge moves
                // the tail's bytes.
                let use_prepend = match (append_feasible, prepend_feasible) {
                    (true, true) => tail_len < foreign_len,
                    (false, true) => true,
                    _ => false,
                };

                if use_prepend {
                    let tail_bytes = tail.readable().to_vec();
                    let mut new_tail = foreign.pop().unwrap();
                    let gap = new_tail.start_gap();
                    new_tail.set_read_pos(gap - tail_bytes.len());
                    new_tail.prepend_into_gap(&tail_bytes);
                    let old_tail = self.chunks.pop().unwrap();
                    self.pool.recycle(old_tail);
                    self.chunks.push(new_tail);
                    trace!(bytes = tail_bytes.len(), "writePacket prepend-merge");
                    return Ok(());
                }
                if append_feasible {
                    let extra = foreign_len.saturating_sub(tail.write_remaining());
                    let tail = self.chunks.last_mut().unwrap();
                    if extra > 0 {
                        tail.consume_end_gap(extra);
                    }
                    let bytes = foreign[0].readable().to_vec();
                    tail.write_slice(&bytes);
                    src_pool.recycle(foreign.pop().unwrap());
                    trace!(bytes = foreign_len, "writePacket append-merge");
                    return Ok(());
                }
            }
        }

        if let Some(tail) = self.chunks.last() {
            self.chained_size += tail.written_len();
        }
        let spliced = foreign.len();
        // Every spliced chunk except the new tail becomes an interior link,
        // so its written length must join `chained_size` just like the old
        // tail's did above; only the last chunk keeps its length live in the
        // cached-tail half of `size()`.
        if let Some(new_tail) = foreign.pop() {
            for chunk in &foreign {
                self.chained_size += chunk.written_len();
            }
            self.chunks.append(&mut foreign);
            self.chunks.push(new_tail);
        }
        trace!(chunks = spliced, "writePacket splice");
        Ok(())
    }

    /// Writes exactly `n` bytes from `packet`, leaving the remainder (and
    /// ownership) with the caller. Fails with EOF if `packet` holds fewer
    /// than `n` bytes.
    pub fn write_packet_n(&mut self, packet: &mut Packet, n: usize) -> Result<()> {
        if n > packet.len() {
            return Err(ChunkIoError::Eof);
        }
        if n == packet.len() {
            let whole = std::mem::replace(packet, Packet::empty(Arc::clone(packet.pool())));
            return self.write_packet(whole);
        }
        let mut remaining = n;
        while remaining > 0 {
            if packet.head_chunk_remaining() == 0 {
                packet.advance_to_next_chunk();
                continue;
            }
            let take = packet.head_chunk_remaining().min(remaining);
            let bytes = packet.copy_from_head(take);
            self.write_fully(&bytes)?;
            remaining -= take;
        }
        Ok(())
    }

    /// Detaches the entire chain, committing the tail's length and resetting
    /// this builder to empty. Returns `None` if nothing was ever written.
    pub fn steal_all(&mut self) -> Option<Box<Chunk>> {
        if self.chunks.is_empty() {
            return None;
        }
        let chunks = std::mem::take(&mut self.chunks);
        self.chained_size = 0;
        link_into_chain(chunks)
    }

    /// Freezes everything written so far into an immutable [`Packet`]. The
    /// builder is empty and reusable afterward.
    pub fn build(&mut self) -> Packet {
        let total = self.size();
        let head = self.steal_all();
        Packet::new(Arc::clone(&self.pool), head, total)
    }

    /// Recycles every owned chunk without producing a packet.
    pub fn reset(&mut self) {
        for chunk in self.chunks.drain(..) {
            self.pool.recycle(chunk);
        }
        self.chained_size = 0;
    }

    pub fn release(&mut self) {
        self.reset();
    }

    /// Hands every owned chunk's readable bytes to the sink, head to tail,
    /// recycling each as it is drained.
    pub fn flush(&mut self) -> Result<()> {
        let chunks = std::mem::take(&mut self.chunks);
        self.chained_size = 0;
        for chunk in chunks {
            self.sink.flush(chunk.readable())?;
            self.pool.recycle(chunk);
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(ChunkIoError::invalid_state("Output already closed"));
        }
        self.closed = true;
        self.flush()?;
        self.sink.close_destination()
    }
}

impl<S: FlushSink> Drop for Output<S> {
    fn drop(&mut self) {
        if !self.closed {
            for chunk in self.chunks.drain(..) {
                self.pool.recycle(chunk);
            }
        }
    }
}

fn flatten_chain(head: Option<Box<Chunk>>) -> Vec<Chunk> {
    let mut out = Vec::new();
    let mut cur = head;
    while let Some(mut boxed) = cur {
        cur = boxed.next.take();
        out.push(*boxed);
    }
    out
}

fn link_into_chain(mut chunks: Vec<Chunk>) -> Option<Box<Chunk>> {
    let mut next: Option<Box<Chunk>> = None;
    while let Some(mut chunk) = chunks.pop() {
        chunk.next = next;
        next = Some(Box::new(chunk));
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::sink::RecordingFlushSink;

    fn small_pool(capacity: usize) -> Arc<Pool> {
        Pool::new(PoolConfig {
            chunk_capacity: capacity,
            max_free_chunks: 16,
        })
    }

    #[test]
    fn write_then_build_then_read_round_trips() {
        let pool = small_pool(64);
        let mut out = Output::new(Arc::clone(&pool));
        out.write_byte(1).unwrap();
        out.write_byte(2).unwrap();
        out.write_byte(3).unwrap();
        out.write_byte(4).unwrap();
        let packet = out.build();
        let mut input = packet.into_input();
        assert_eq!(input.read_int().unwrap(), 0x01020304);
    }

    #[test]
    fn rotates_across_chunk_boundary() {
        let pool = small_pool(4);
        let mut out = Output::new(Arc::clone(&pool));
        out.write_fully(b"ABCDEFGH").unwrap();
        assert_eq!(out.size(), 8);
        let packet = out.build();
        let mut input = packet.into_input();
        let mut buf = [0u8; 8];
        input.read_fully(&mut buf).unwrap();
        assert_eq!(&buf, b"ABCDEFGH");
    }

    #[test]
    fn utf8_round_trip() {
        let pool = small_pool(16);
        let mut out = Output::new(Arc::clone(&pool));
        let text = "héllo wörld";
        out.write_string_utf8(text).unwrap();
        let packet = out.build();
        let mut input = packet.into_input();
        let mut buf = vec![0u8; text.len()];
        input.read_fully(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), text);
    }

    #[test]
    fn little_endian_write_matches_reversed_bytes() {
        let pool = small_pool(16);
        let mut out = Output::new(Arc::clone(&pool));
        out.write_int_le(0x01020304).unwrap();
        let packet = out.build();
        let mut input = packet.into_input();
        let mut raw = [0u8; 4];
        input.read_fully(&mut raw).unwrap();
        assert_eq!(raw, [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn small_packet_append_merges_into_tail() {
        let pool = small_pool(256);
        let mut foreign = Output::new(Arc::clone(&pool));
        foreign.write_fully(&[1u8; 50]).unwrap();
        let foreign_packet = foreign.build();

        let mut out = Output::new(Arc::clone(&pool));
        out.write_fully(&[0u8; 10]).unwrap();
        out.write_packet(foreign_packet).unwrap();
        assert_eq!(out.size(), 60);

        let packet = out.build();
        let mut input = packet.into_input();
        let mut buf = [0u8; 60];
        input.read_fully(&mut buf).unwrap();
        assert_eq!(&buf[..10], &[0u8; 10]);
        assert_eq!(&buf[10..], &[1u8; 50]);
    }

    #[test]
    fn tiny_tail_prepend_merges_into_foreign_head() {
        let pool = small_pool(4096);
        let mut foreign = Output::new(Arc::clone(&pool));
        foreign.write_fully(&[2u8; 5]).unwrap();
        let foreign_packet = foreign.build();

        let mut out = Output::new(Arc::clone(&pool));
        out.write_fully(&[9u8; 3]).unwrap();
        let chunks_before = out.chunks.len();
        out.write_packet(foreign_packet).unwrap();
        // Prepend-merge replaces the existing tail in place rather than
        // splicing a new chunk onto the chain.
        assert_eq!(out.chunks.len(), chunks_before);
        assert_eq!(out.size(), 8);

        let packet = out.build();
        let mut input = packet.into_input();
        let mut buf = [0u8; 8];
        input.read_fully(&mut buf).unwrap();
        assert_eq!(&buf[..3], &[9u8; 3]);
        assert_eq!(&buf[3..], &[2u8; 5]);
    }

    #[test]
    fn flush_drains_to_sink_in_order() {
        let pool = small_pool(4);
        let mut out = Output::with_sink(Arc::clone(&pool), RecordingFlushSink::new());
        out.write_fully(b"ABCDEFGH").unwrap();
        out.flush().unwrap();
        assert_eq!(out.sink.recorded, b"ABCDEFGH");
    }

    #[test]
    fn reset_recycles_without_building() {
        let pool = small_pool(4);
        let mut out = Output::new(Arc::clone(&pool));
        out.write_fully(b"ABCDEFGH").unwrap();
        out.reset();
        assert_eq!(out.size(), 0);
        let stats = pool.stats();
        assert_eq!(stats.borrowed, stats.recycled);
    }
}
