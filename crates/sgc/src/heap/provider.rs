//! Chunk Provider - Source and sink of chunk memory
//!
//! The collector never maps memory itself. It asks a `ChunkProvider` for
//! aligned chunks (fixed size) and unaligned chunks (one large object) and
//! gives them back through the chunk releaser after a collection.
//!
//! ```text
//! reserve ──► allocate ──► in use ──► consume ──► pool ──► free_excess ──► uncommit
//!                ▲                                  │
//!                └──────────────────────────────────┘
//! ```
//!
//! `PooledChunkProvider` hands out addresses from a reserved virtual range,
//! keeps released aligned chunks in a pool for reuse and trims the pool to a
//! retention limit once the whole cycle is over.

use super::chunk::{ChunkKind, ChunkMemory};
use crate::util::constants::{CHUNK_HEADER_SIZE, UNALIGNED_CHUNK_GRANULE};
use crate::util::Alignment;
use serde::Serialize;

/// Memory source consulted by the heap and the collector
pub trait ChunkProvider: Send {
    /// Allocate an aligned chunk, `None` when the reservation is exhausted
    fn allocate_aligned(&mut self) -> Option<ChunkMemory>;

    /// Allocate an unaligned chunk able to hold an object of `object_size`
    fn allocate_unaligned(&mut self, object_size: usize) -> Option<ChunkMemory>;

    /// Take back aligned chunks
    ///
    /// With `keep_all` every chunk stays in the pool, otherwise only up to the
    /// retention limit.
    fn consume_aligned_chunks(&mut self, chunks: Vec<ChunkMemory>, keep_all: bool);

    /// Take back unaligned chunks
    fn consume_unaligned_chunks(&mut self, chunks: Vec<ChunkMemory>);

    /// Trim pooled aligned chunks to the retention limit
    fn free_excess_aligned_chunks(&mut self);

    /// Return memory of released chunks to the operating system
    fn uncommit_unused_memory(&mut self);

    fn before_garbage_collection(&mut self) {}

    fn after_garbage_collection(&mut self) {}

    /// Bytes held in pooled, unused chunks
    fn bytes_in_unused_chunks(&self) -> usize;

    /// Bytes of chunk memory currently committed (in use or pooled)
    fn committed_bytes(&self) -> usize;
}

/// Counters kept by `PooledChunkProvider`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProviderStats {
    pub aligned_allocated: u64,
    pub unaligned_allocated: u64,
    pub pool_hits: u64,
    pub committed_bytes: usize,
    pub released_bytes: usize,
    pub uncommitted_bytes: usize,
}

/// Default chunk provider over a reserved virtual address range
#[derive(Debug)]
pub struct PooledChunkProvider {
    aligned_chunk_size: usize,
    reserved_end: usize,
    next_address: usize,
    /// Committed, unused aligned chunks
    pool: Vec<ChunkMemory>,
    /// Released chunks awaiting uncommit
    uncommit_pending: Vec<ChunkMemory>,
    /// Uncommitted aligned address ranges available for reuse
    recycled: Vec<usize>,
    /// Uncommitted unaligned ranges `(base, size)`, sorted and coalesced
    free_ranges: Vec<(usize, usize)>,
    retention: usize,
    in_collection: bool,
    stats: ProviderStats,
}

impl PooledChunkProvider {
    /// Create a provider reserving `reserved_size` bytes at `base`
    ///
    /// # Arguments
    /// * `base` - First address, aligned to `aligned_chunk_size`
    /// * `reserved_size` - Bytes of virtual address space to hand out
    /// * `aligned_chunk_size` - Size of aligned chunks
    /// * `retention` - Pooled aligned chunks kept by `free_excess_aligned_chunks`
    pub fn new(base: usize, reserved_size: usize, aligned_chunk_size: usize, retention: usize) -> Self {
        debug_assert!(Alignment::is_aligned(base, aligned_chunk_size));
        Self {
            aligned_chunk_size,
            reserved_end: base + reserved_size,
            next_address: base,
            pool: Vec::new(),
            uncommit_pending: Vec::new(),
            recycled: Vec::new(),
            free_ranges: Vec::new(),
            retention,
            in_collection: false,
            stats: ProviderStats::default(),
        }
    }

    pub fn stats(&self) -> ProviderStats {
        self.stats
    }

    pub fn pooled_chunks(&self) -> usize {
        self.pool.len()
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn is_in_collection(&self) -> bool {
        self.in_collection
    }

    fn reserve(&mut self, size: usize, align: usize) -> Option<usize> {
        let base = Alignment::align_up(self.next_address, align);
        let end = base.checked_add(size)?;
        if end > self.reserved_end {
            log::warn!(
                "[GC] chunk reservation exhausted: {} bytes requested, {} bytes left",
                size,
                self.reserved_end.saturating_sub(base)
            );
            return None;
        }
        self.next_address = end;
        Some(base)
    }

    /// First fit over released unaligned ranges
    fn reuse_range(&mut self, size: usize) -> Option<usize> {
        let index = self.free_ranges.iter().position(|&(_, len)| len >= size)?;
        let (base, len) = self.free_ranges[index];
        if len == size {
            self.free_ranges.remove(index);
        } else {
            self.free_ranges[index] = (base + size, len - size);
        }
        Some(base)
    }

    /// Return an unaligned range, merging it with its neighbours
    fn free_range(&mut self, base: usize, size: usize) {
        let index = self.free_ranges.partition_point(|&(b, _)| b < base);
        self.free_ranges.insert(index, (base, size));
        if index + 1 < self.free_ranges.len() {
            let (next_base, next_len) = self.free_ranges[index + 1];
            if base + size == next_base {
                self.free_ranges[index].1 += next_len;
                self.free_ranges.remove(index + 1);
            }
        }
        if index > 0 {
            let (prev_base, prev_len) = self.free_ranges[index - 1];
            if prev_base + prev_len == base {
                self.free_ranges[index - 1].1 += self.free_ranges[index].1;
                self.free_ranges.remove(index);
            }
        }
        // a range touching the bump pointer goes back to it
        if let Some(&(last_base, last_len)) = self.free_ranges.last() {
            if last_base + last_len == self.next_address {
                self.next_address = last_base;
                self.free_ranges.pop();
            }
        }
    }

    /// Unaligned address ranges waiting for reuse
    pub fn free_range_count(&self) -> usize {
        self.free_ranges.len()
    }

    fn release(&mut self, chunk: ChunkMemory) {
        self.stats.committed_bytes -= chunk.size;
        self.stats.released_bytes += chunk.size;
        self.uncommit_pending.push(chunk);
    }
}

impl ChunkProvider for PooledChunkProvider {
    fn allocate_aligned(&mut self) -> Option<ChunkMemory> {
        if let Some(chunk) = self.pool.pop() {
            self.stats.pool_hits += 1;
            self.stats.aligned_allocated += 1;
            return Some(chunk);
        }

        let size = self.aligned_chunk_size;
        let base = match self.recycled.pop() {
            Some(base) => base,
            None => self.reserve(size, size)?,
        };
        self.stats.aligned_allocated += 1;
        self.stats.committed_bytes += size;
        Some(ChunkMemory {
            base,
            size,
            kind: ChunkKind::Aligned,
        })
    }

    fn allocate_unaligned(&mut self, object_size: usize) -> Option<ChunkMemory> {
        let size = CHUNK_HEADER_SIZE
            .checked_add(object_size)
            .and_then(|size| Alignment::checked_align_up(size, UNALIGNED_CHUNK_GRANULE))?;
        let base = match self.reuse_range(size) {
            Some(base) => base,
            None => self.reserve(size, UNALIGNED_CHUNK_GRANULE)?,
        };
        self.stats.unaligned_allocated += 1;
        self.stats.committed_bytes += size;
        Some(ChunkMemory {
            base,
            size,
            kind: ChunkKind::Unaligned,
        })
    }

    fn consume_aligned_chunks(&mut self, chunks: Vec<ChunkMemory>, keep_all: bool) {
        for chunk in chunks {
            debug_assert_eq!(chunk.kind, ChunkKind::Aligned);
            if keep_all || self.pool.len() < self.retention {
                self.pool.push(chunk);
            } else {
                self.release(chunk);
            }
        }
    }

    fn consume_unaligned_chunks(&mut self, chunks: Vec<ChunkMemory>) {
        for chunk in chunks {
            debug_assert_eq!(chunk.kind, ChunkKind::Unaligned);
            self.release(chunk);
        }
    }

    fn free_excess_aligned_chunks(&mut self) {
        while self.pool.len() > self.retention {
            if let Some(chunk) = self.pool.pop() {
                self.release(chunk);
            }
        }
    }

    fn uncommit_unused_memory(&mut self) {
        for chunk in std::mem::take(&mut self.uncommit_pending) {
            self.stats.uncommitted_bytes += chunk.size;
            match chunk.kind {
                ChunkKind::Aligned => self.recycled.push(chunk.base),
                ChunkKind::Unaligned => self.free_range(chunk.base, chunk.size),
            }
        }
    }

    fn before_garbage_collection(&mut self) {
        self.in_collection = true;
    }

    fn after_garbage_collection(&mut self) {
        self.in_collection = false;
    }

    fn bytes_in_unused_chunks(&self) -> usize {
        self.pool.len() * self.aligned_chunk_size
    }

    fn committed_bytes(&self) -> usize {
        self.stats.committed_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::{HEAP_BASE, KB};

    fn provider(retention: usize) -> PooledChunkProvider {
        PooledChunkProvider::new(HEAP_BASE, 64 * KB, 4 * KB, retention)
    }

    #[test]
    fn test_aligned_chunks_are_aligned() {
        let mut p = provider(2);
        let a = p.allocate_aligned().expect("chunk");
        let b = p.allocate_aligned().expect("chunk");
        assert!(Alignment::is_aligned(a.base, 4 * KB));
        assert_eq!(b.base, a.base + 4 * KB);
        assert_eq!(p.committed_bytes(), 8 * KB);
    }

    #[test]
    fn test_unaligned_size_rounds_to_granule() {
        let mut p = provider(2);
        let chunk = p.allocate_unaligned(5000).expect("chunk");
        assert_eq!(chunk.size, 8 * KB);
        assert_eq!(chunk.kind, ChunkKind::Unaligned);
    }

    #[test]
    fn test_keep_all_retains_every_chunk() {
        let mut p = provider(1);
        let chunks: Vec<_> = (0..3).filter_map(|_| p.allocate_aligned()).collect();
        p.consume_aligned_chunks(chunks, true);
        assert_eq!(p.pooled_chunks(), 3);
        assert_eq!(p.bytes_in_unused_chunks(), 12 * KB);

        p.free_excess_aligned_chunks();
        assert_eq!(p.pooled_chunks(), 1);
        assert_eq!(p.stats().released_bytes, 8 * KB);
    }

    #[test]
    fn test_consume_respects_retention() {
        let mut p = provider(1);
        let chunks: Vec<_> = (0..3).filter_map(|_| p.allocate_aligned()).collect();
        p.consume_aligned_chunks(chunks, false);
        assert_eq!(p.pooled_chunks(), 1);
        assert_eq!(p.committed_bytes(), 4 * KB);
    }

    #[test]
    fn test_pool_and_recycled_reuse() {
        let mut p = provider(0);
        let a = p.allocate_aligned().expect("chunk");
        p.consume_aligned_chunks(vec![a], false);
        p.uncommit_unused_memory();
        assert_eq!(p.stats().uncommitted_bytes, 4 * KB);
        let again = p.allocate_aligned().expect("chunk");
        assert_eq!(again.base, a.base);
    }

    #[test]
    fn test_released_unaligned_ranges_are_reused() {
        let mut p = provider(0);
        for _ in 0..100 {
            let chunk = p.allocate_unaligned(20 * KB).expect("range reused");
            assert_eq!(chunk.base, HEAP_BASE);
            p.consume_unaligned_chunks(vec![chunk]);
            p.uncommit_unused_memory();
        }
        assert_eq!(p.stats().unaligned_allocated, 100);
        assert_eq!(p.committed_bytes(), 0);
    }

    #[test]
    fn test_adjacent_free_ranges_merge() {
        let mut p = provider(0);
        let a = p.allocate_unaligned(5 * KB).expect("chunk");
        let b = p.allocate_unaligned(5 * KB).expect("chunk");
        let _tail = p.allocate_aligned().expect("chunk");
        p.consume_unaligned_chunks(vec![b, a]);
        p.uncommit_unused_memory();
        assert_eq!(p.free_range_count(), 1);

        let merged = p.allocate_unaligned(12 * KB).expect("merged range");
        assert_eq!(merged.base, a.base);
        assert_eq!(merged.size, 16 * KB);
        assert_eq!(p.free_range_count(), 0);
    }

    #[test]
    fn test_free_range_at_the_top_returns_to_reservation() {
        let mut p = provider(0);
        let a = p.allocate_unaligned(5 * KB).expect("chunk");
        p.consume_unaligned_chunks(vec![a]);
        p.uncommit_unused_memory();
        assert_eq!(p.free_range_count(), 0);
        let whole = p.allocate_unaligned(60 * KB - CHUNK_HEADER_SIZE).expect("whole reservation");
        assert_eq!(whole.base, HEAP_BASE);
    }

    #[test]
    fn test_unaligned_size_overflow_is_refused() {
        let mut p = provider(0);
        assert!(p.allocate_unaligned(usize::MAX - 8).is_none());
        assert_eq!(p.stats().unaligned_allocated, 0);
    }

    #[test]
    fn test_reservation_exhaustion() {
        let mut p = provider(0);
        let count = std::iter::from_fn(|| p.allocate_aligned()).count();
        assert_eq!(count, 16);
        assert!(p.allocate_unaligned(KB).is_none());
    }
}
