//! Heap Accounting - Byte counts per generation
//!
//! A `HeapAccounting` is a snapshot computed from the chunk table; policies
//! and telemetry only ever see snapshots, never the live heap.

use serde::Serialize;

/// Snapshot of heap usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapAccounting {
    /// Bytes of chunks in Eden
    pub eden_chunk_bytes: usize,
    /// Bytes occupied by objects in Eden
    pub eden_used_bytes: usize,
    /// Bytes of chunks in survivor spaces
    pub survivor_chunk_bytes: usize,
    pub survivor_used_bytes: usize,
    /// Bytes of chunks in the old generation
    pub old_chunk_bytes: usize,
    pub old_used_bytes: usize,
    /// Bytes of pooled chunks owned by the chunk provider
    pub unused_chunk_bytes: usize,
    /// Number of chunks in use
    pub chunk_count: usize,
}

impl HeapAccounting {
    #[inline]
    pub fn young_chunk_bytes(&self) -> usize {
        self.eden_chunk_bytes + self.survivor_chunk_bytes
    }

    #[inline]
    pub fn young_used_bytes(&self) -> usize {
        self.eden_used_bytes + self.survivor_used_bytes
    }

    /// Bytes of all chunks in use, the quantity compared against the
    /// maximum heap size
    #[inline]
    pub fn used_chunk_bytes(&self) -> usize {
        self.young_chunk_bytes() + self.old_chunk_bytes
    }

    /// Bytes occupied by objects
    #[inline]
    pub fn object_bytes(&self) -> usize {
        self.young_used_bytes() + self.old_used_bytes
    }

    /// Committed bytes: chunks in use plus pooled chunks
    #[inline]
    pub fn committed_bytes(&self) -> usize {
        self.used_chunk_bytes() + self.unused_chunk_bytes
    }
}

/// Heap usage recorded when a collection starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapSizes {
    pub young_before: usize,
    pub old_before: usize,
    pub used_before: usize,
    pub young_after: usize,
    pub old_after: usize,
    pub used_after: usize,
}

impl HeapSizes {
    pub fn before(heap: &HeapAccounting) -> Self {
        Self {
            young_before: heap.young_chunk_bytes(),
            old_before: heap.old_chunk_bytes,
            used_before: heap.used_chunk_bytes(),
            ..Default::default()
        }
    }

    pub fn record_after(&mut self, heap: &HeapAccounting) {
        self.young_after = heap.young_chunk_bytes();
        self.old_after = heap.old_chunk_bytes;
        self.used_after = heap.used_chunk_bytes();
    }

    /// Bytes reclaimed, zero if the heap grew
    pub fn reclaimed(&self) -> usize {
        self.used_before.saturating_sub(self.used_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals() {
        let heap = HeapAccounting {
            eden_chunk_bytes: 4096,
            eden_used_bytes: 100,
            survivor_chunk_bytes: 4096,
            survivor_used_bytes: 50,
            old_chunk_bytes: 8192,
            old_used_bytes: 1000,
            unused_chunk_bytes: 4096,
            chunk_count: 4,
        };
        assert_eq!(heap.young_chunk_bytes(), 8192);
        assert_eq!(heap.used_chunk_bytes(), 16384);
        assert_eq!(heap.object_bytes(), 1150);
        assert_eq!(heap.committed_bytes(), 20480);
    }

    #[test]
    fn test_reclaimed_saturates() {
        let mut sizes = HeapSizes::before(&HeapAccounting {
            old_chunk_bytes: 4096,
            ..Default::default()
        });
        sizes.record_after(&HeapAccounting {
            old_chunk_bytes: 8192,
            ..Default::default()
        });
        assert_eq!(sizes.reclaimed(), 0);
    }
}
