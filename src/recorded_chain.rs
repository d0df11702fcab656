//! The append-only-at-tail, drop-only-at-head FIFO an [`Input`](crate::input::Input)
//! uses to remember chunks visited during an open preview session.
//!
//! Deliberately a plain `VecDeque`, not an index or random-access structure:
//! resuming outside a preview only ever walks forward, so there is nothing
//! to gain from retaining cursors into the middle of the sequence.

use std::collections::VecDeque;

use crate::chunk::Chunk;

/// One retained chunk plus the write-limit it had when recorded — later
/// writes to that chunk (if it is still the active tail elsewhere) must not
/// be visible to a previewer replaying past it.
pub(crate) struct RecordedChain {
    entries: VecDeque<(Chunk, usize)>,
}

impl RecordedChain {
    pub(crate) fn new() -> Self {
        RecordedChain {
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn append(&mut self, chunk: Chunk, limit: usize) {
        self.entries.push_back((chunk, limit));
    }

    /// Releases ownership of the first entry to the caller, who is
    /// responsible for recycling it.
    pub(crate) fn discard_first(&mut self) -> Option<(Chunk, usize)> {
        self.entries.pop_front()
    }

    pub(crate) fn pointed<R>(&self, i: usize, f: impl FnOnce(&Chunk, usize) -> R) -> Option<R> {
        self.entries.get(i).map(|(chunk, limit)| f(chunk, *limit))
    }

    pub(crate) fn pointed_mut<R>(
        &mut self,
        i: usize,
        f: impl FnOnce(&mut Chunk, usize) -> R,
    ) -> Option<R> {
        self.entries.get_mut(i).map(|(chunk, limit)| f(chunk, *limit))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn is_after_last(&self, i: usize) -> bool {
        i >= self.entries.len()
    }

    pub(crate) fn size(&self, from_index: usize) -> usize {
        self.entries.len().saturating_sub(from_index)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkRecycler;
    use std::sync::Arc;

    struct NoopRecycler;
    impl ChunkRecycler for NoopRecycler {
        fn reclaim(&self, _data: Box<[u8]>) {}
    }

    fn chunk() -> Chunk {
        let recycler: Arc<dyn ChunkRecycler> = Arc::new(NoopRecycler);
        Chunk::new(vec![0u8; 8].into_boxed_slice(), recycler)
    }

    #[test]
    fn append_then_discard_is_fifo() {
        let mut chain = RecordedChain::new();
        assert!(chain.is_empty());
        chain.append(chunk(), 8);
        chain.append(chunk(), 4);
        assert_eq!(chain.len(), 2);
        let (_, limit) = chain.discard_first().unwrap();
        assert_eq!(limit, 8);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn pointed_inspects_without_removing() {
        let mut chain = RecordedChain::new();
        chain.append(chunk(), 3);
        let seen = chain.pointed(0, |_chunk, limit| limit).unwrap();
        assert_eq!(seen, 3);
        assert_eq!(chain.len(), 1);
        assert!(chain.pointed(1, |_, limit| limit).is_none());
    }

    #[test]
    fn is_after_last_tracks_bounds() {
        let mut chain = RecordedChain::new();
        assert!(chain.is_after_last(0));
        chain.append(chunk(), 8);
        assert!(!chain.is_after_last(0));
        assert!(chain.is_after_last(1));
        assert_eq!(chain.size(0), 1);
        assert_eq!(chain.size(1), 0);
    }
}
