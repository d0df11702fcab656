//! Fixed-capacity memory region with read/write cursors and head/tail
//! reservation gaps, linked into singly-linked chains.
//!
//! # Why this shape
//! A chunk's backing array is never resized; only `start_gap`, `read_pos`,
//! `write_pos`, and `limit` move. A chunk is mutable only while it is
//! exclusively owned ([`Arc::strong_count`] of its memory is 1); once it is
//! [`Chunk::share`]d — for a preview replay or a packet copy — mutation is no
//! longer possible, so shared chunks are read-only. The pool-return hook on
//! last release is a single `Arc`'s `Drop` calling back into
//! [`ChunkRecycler::reclaim`], because `chunkio` owns its memory outright and
//! has no second refcounted type (like `bytes::Bytes`) to reconcile against.

use std::sync::Arc;

use crate::memory;

/// Notified exactly once, when the last reference to a chunk's memory is
/// dropped, with the raw storage so it can be reused.
pub(crate) trait ChunkRecycler: Send + Sync {
    fn reclaim(&self, data: Box<[u8]>);
}

struct ChunkMemoryInner {
    data: Box<[u8]>,
    recycler: Arc<dyn ChunkRecycler>,
}

impl Drop for ChunkMemoryInner {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.recycler.reclaim(data);
    }
}

/// A borrowed memory region plus cursors, optionally linked to further
/// chunks. See module docs for the ownership/sharing model.
pub struct Chunk {
    memory: Arc<ChunkMemoryInner>,
    start_gap: usize,
    read_pos: usize,
    write_pos: usize,
    limit: usize,
    pub(crate) next: Option<Box<Chunk>>,
}

impl Chunk {
    pub(crate) fn new(data: Box<[u8]>, recycler: Arc<dyn ChunkRecycler>) -> Self {
        let capacity = data.len();
        Chunk {
            memory: Arc::new(ChunkMemoryInner { data, recycler }),
            start_gap: 0,
            read_pos: 0,
            write_pos: 0,
            limit: capacity,
            next: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.memory.data.len()
    }

    pub fn start_gap(&self) -> usize {
        self.start_gap
    }

    pub fn end_gap(&self) -> usize {
        self.capacity() - self.limit
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn read_remaining(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn write_remaining(&self) -> usize {
        self.limit - self.write_pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.read_remaining() == 0
    }

    pub fn is_full(&self) -> bool {
        self.write_remaining() == 0
    }

    /// True iff no other `Chunk` shares this memory — the only state in
    /// which mutation is permitted.
    pub fn is_exclusive(&self) -> bool {
        Arc::strong_count(&self.memory) == 1
    }

    /// Clones the shared memory (bumping its refcount) and this chunk's
    /// cursors into a fresh, independent `Chunk` with no `next` link. Used
    /// by preview replay and packet `copy()`.
    pub(crate) fn share(&self) -> Chunk {
        Chunk {
            memory: Arc::clone(&self.memory),
            start_gap: self.start_gap,
            read_pos: self.read_pos,
            write_pos: self.write_pos,
            limit: self.limit,
            next: None,
        }
    }

    pub(crate) fn readable(&self) -> &[u8] {
        &self.memory.data[self.read_pos..self.write_pos]
    }

    fn exclusive_mut(&mut self, op: &'static str) -> &mut [u8] {
        let inner = Arc::get_mut(&mut self.memory)
            .unwrap_or_else(|| panic!("chunk must be exclusively owned to {op}"));
        &mut inner.data[..]
    }

    pub(crate) fn advance_read(&mut self, n: usize) {
        debug_assert!(n <= self.read_remaining());
        self.read_pos += n;
    }

    pub(crate) fn set_read_pos(&mut self, pos: usize) {
        debug_assert!(pos <= self.write_pos);
        self.read_pos = pos;
    }

    /// Rewinds both cursors to the start of the writable region, discarding
    /// whatever was previously buffered, so the region can be handed to a
    /// `FillSource` again.
    pub(crate) fn reset_for_refill(&mut self) {
        self.read_pos = self.start_gap;
        self.write_pos = self.start_gap;
    }

    pub(crate) fn advance_write(&mut self, n: usize) {
        debug_assert!(n <= self.write_remaining());
        self.write_pos += n;
    }

    pub(crate) fn copy_read_into(&mut self, dst: &mut [u8]) {
        let n = dst.len();
        dst.copy_from_slice(&self.readable()[..n]);
        self.advance_read(n);
    }

    pub(crate) fn write_slice(&mut self, src: &[u8]) {
        let at = self.write_pos;
        let n = src.len();
        self.exclusive_mut("write_slice")[at..at + n].copy_from_slice(src);
        self.write_pos += n;
    }

    /// Bytes committed past the start gap — the span a flush or packet
    /// build needs to carry forward, independent of how far `read_pos` has
    /// advanced.
    pub(crate) fn written_len(&self) -> usize {
        self.write_pos - self.start_gap
    }

    /// Writes `bytes` into the region just before `read_pos`, without
    /// moving any cursor. Used by `writePacket`'s prepend-merge, after the
    /// caller has already rewound `read_pos` into the start gap.
    pub(crate) fn prepend_into_gap(&mut self, bytes: &[u8]) {
        let at = self.read_pos;
        let n = bytes.len();
        self.exclusive_mut("prepend_into_gap")[at..at + n].copy_from_slice(bytes);
        // The prepended bytes are now real content, not reserved space —
        // shrink the gap so `written_len` (and anyone else consulting
        // `start_gap`) sees them.
        self.start_gap = at;
    }

    /// The writable region beyond `write_pos`, up to `limit`, for a caller
    /// (e.g. a `FillSource`) that wants to write in place.
    pub(crate) fn writable_region(&mut self) -> &mut [u8] {
        let (start, end) = (self.write_pos, self.limit);
        &mut self.exclusive_mut("writable_region")[start..end]
    }

    pub(crate) fn get_u8(&mut self) -> u8 {
        let b = self.memory.data[self.read_pos];
        self.read_pos += 1;
        b
    }

    pub(crate) fn get_u16(&mut self) -> u16 {
        let v = memory::get_u16(&self.memory.data, self.read_pos);
        self.read_pos += 2;
        v
    }

    pub(crate) fn get_u32(&mut self) -> u32 {
        let v = memory::get_u32(&self.memory.data, self.read_pos);
        self.read_pos += 4;
        v
    }

    pub(crate) fn get_u64(&mut self) -> u64 {
        let v = memory::get_u64(&self.memory.data, self.read_pos);
        self.read_pos += 8;
        v
    }

    pub(crate) fn put_u8(&mut self, v: u8) {
        let at = self.write_pos;
        self.exclusive_mut("put_u8")[at] = v;
        self.write_pos += 1;
    }

    pub(crate) fn put_u16(&mut self, v: u16) {
        let at = self.write_pos;
        memory::put_u16(self.exclusive_mut("put_u16"), at, v);
        self.write_pos += 2;
    }

    pub(crate) fn put_u32(&mut self, v: u32) {
        let at = self.write_pos;
        memory::put_u32(self.exclusive_mut("put_u32"), at, v);
        self.write_pos += 4;
    }

    pub(crate) fn put_u64(&mut self, v: u64) {
        let at = self.write_pos;
        memory::put_u64(self.exclusive_mut("put_u64"), at, v);
        self.write_pos += 8;
    }

    /// Reserves `n` bytes at the front, before any byte has been written.
    /// Used to leave room for a header another component may prepend later.
    pub(crate) fn reserve_start_gap(&mut self, n: usize) {
        debug_assert_eq!(self.write_pos, 0, "start gap must be installed before writing");
        debug_assert!(n <= self.capacity());
        self.start_gap = n;
        self.read_pos = n;
        self.write_pos = n;
    }

    /// Reserves `n` bytes at the back, shrinking the writable limit. Used to
    /// leave room for a trailer another component may append later.
    pub(crate) fn reserve_end_gap(&mut self, n: usize) {
        debug_assert!(self.write_pos <= self.capacity() - n);
        self.limit = self.capacity() - n;
    }

    /// Gives back `n` bytes of a previously reserved end gap to the writable
    /// region, for a `write_packet` append-merge that needs more room than
    /// `write_remaining()` alone offers.
    pub(crate) fn consume_end_gap(&mut self, n: usize) {
        debug_assert!(n <= self.end_gap());
        self.limit += n;
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // Iterative to avoid blowing the stack on a long chain.
        let mut next = self.next.take();
        while let Some(mut chunk) = next {
            next = chunk.next.take();
        }
    }
}
