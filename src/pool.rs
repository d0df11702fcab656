//! Bounded free-list of chunks sharing one fixed capacity.
//!
//! The free-list is a [`crossbeam_queue::ArrayQueue`] — a true lock-free
//! bounded MPMC queue, rather than a mutex-guarded `Vec` — because a pool
//! instance is meant to be shared across threads and `borrow`/`recycle` must
//! be atomic and lock-free, not merely short-held-lock.
//!
//! There is no sentinel "empty chunk" type here; an `Input`/`Output` with no
//! active chunk simply holds `None`, the idiomatic Rust rendering of a
//! null-object.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use crossbeam_utils::CachePadded;
use tracing::{debug, trace};

use crate::chunk::{Chunk, ChunkRecycler};

/// Tunables for a [`Pool`]. `Default` gives the reference values used
/// throughout this crate's scenarios and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// Size, in bytes, of every chunk this pool hands out.
    pub chunk_capacity: usize,
    /// Soft cap on chunks retained in the free-list; chunks recycled beyond
    /// this cap are dropped instead of stored.
    pub max_free_chunks: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            chunk_capacity: 4096,
            max_free_chunks: 64,
        }
    }
}

/// Point-in-time counters for a [`Pool`], useful for the "borrow count
/// equals recycle count at teardown" accounting invariant and for
/// diagnosing pool pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub borrowed: u64,
    pub recycled: u64,
    pub resident: usize,
    pub misses: u64,
}

/// A bounded free-list of chunks of one fixed capacity, safe to share across
/// threads behind an `Arc`.
pub struct Pool {
    config: PoolConfig,
    free: ArrayQueue<Box<[u8]>>,
    // Each counter lives on its own cache line: `borrow()` touches `borrowed`
    // (and sometimes `misses`) while `recycle()` touches `recycled`, and
    // those calls race across threads on a shared pool.
    borrowed: CachePadded<AtomicU64>,
    recycled: CachePadded<AtomicU64>,
    misses: CachePadded<AtomicU64>,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Arc<Pool> {
        Arc::new(Pool {
            free: ArrayQueue::new(config.max_free_chunks.max(1)),
            config,
            borrowed: CachePadded::new(AtomicU64::new(0)),
            recycled: CachePadded::new(AtomicU64::new(0)),
            misses: CachePadded::new(AtomicU64::new(0)),
        })
    }

    pub fn chunk_capacity(&self) -> usize {
        self.config.chunk_capacity
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Returns a chunk with cursors reset to the empty state and no
    /// reservation installed — the caller installs head/tail gaps itself.
    pub fn borrow(self: &Arc<Self>) -> Chunk {
        self.borrowed.fetch_add(1, Ordering::Relaxed);
        let data = match self.free.pop() {
            Some(data) => data,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                vec![0u8; self.config.chunk_capacity].into_boxed_slice()
            }
        };
        trace!(capacity = data.len(), "pool borrow");
        Chunk::new(data, Arc::clone(self) as Arc<dyn ChunkRecycler>)
    }

    /// Explicitly returns a chunk to this pool's bookkeeping. The chunk's
    /// memory is actually returned to the free-list by `Drop` (via
    /// `ChunkRecycler::reclaim`) once this is its last reference; this
    /// method records the accounting event and asserts the precondition
    /// that makes that release meaningful.
    pub fn recycle(&self, chunk: Chunk) {
        debug_assert!(
            chunk.is_exclusive(),
            "recycling a chunk with outstanding shared references"
        );
        self.recycled.fetch_add(1, Ordering::Relaxed);
        drop(chunk);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            borrowed: self.borrowed.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            resident: self.free.len(),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl ChunkRecycler for Pool {
    fn reclaim(&self, data: Box<[u8]>) {
        if data.len() != self.config.chunk_capacity {
            // Foreign-sized buffer (e.g. pool reconfigured mid-flight); not
            // our shape to store.
            return;
        }
        let dropped = self.free.push(data).is_err();
        debug!(resident = self.free.len(), dropped, "pool reclaim");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrow_then_recycle_balances() {
        let pool = Pool::new(PoolConfig {
            chunk_capacity: 64,
            max_free_chunks: 4,
        });
        let a = pool.borrow();
        let b = pool.borrow();
        pool.recycle(a);
        pool.recycle(b);
        let stats = pool.stats();
        assert_eq!(stats.borrowed, 2);
        assert_eq!(stats.recycled, 2);
        assert_eq!(stats.resident, 2);
    }

    #[test]
    fn recycled_chunk_is_reused_without_a_miss() {
        let pool = Pool::new(PoolConfig {
            chunk_capacity: 32,
            max_free_chunks: 4,
        });
        let a = pool.borrow();
        pool.recycle(a);
        let _b = pool.borrow();
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn over_capacity_chunks_are_dropped_not_stored() {
        let pool = Pool::new(PoolConfig {
            chunk_capacity: 16,
            max_free_chunks: 1,
        });
        let chunks: Vec<_> = (0..3).map(|_| pool.borrow()).collect();
        for chunk in chunks {
            pool.recycle(chunk);
        }
        assert_eq!(pool.stats().resident, 1);
        assert_eq!(pool.stats().recycled, 3);
    }

    #[test]
    fn shared_pool_balances_across_threads() {
        let pool = Pool::new(PoolConfig {
            chunk_capacity: 32,
            max_free_chunks: 64,
        });
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let pool = Arc::clone(&pool);
                scope.spawn(move || {
                    for _ in 0..200 {
                        let chunk = pool.borrow();
                        pool.recycle(chunk);
                    }
                });
            }
        });
        let stats = pool.stats();
        assert_eq!(stats.borrowed, 1600);
        assert_eq!(stats.recycled, 1600);
    }
}
