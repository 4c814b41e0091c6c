//! Chunk Releaser - Batched give-back of freed chunks
//!
//! Chunks freed by a collection are detached from their space and parked
//! here, then handed to the chunk provider in one batch at the end of the
//! cycle. An incremental collection may keep every aligned chunk pooled so
//! that a following complete collection can copy into it without asking the
//! provider for new memory.

use super::chunk::{ChunkKind, ChunkMemory};
use super::provider::ChunkProvider;

/// Pending chunk releases for the current cycle
#[derive(Debug, Default)]
pub struct ChunkReleaser {
    aligned: Vec<ChunkMemory>,
    unaligned: Vec<ChunkMemory>,
    last_batch: Vec<usize>,
}

impl ChunkReleaser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a detached chunk
    pub fn add(&mut self, chunk: ChunkMemory) {
        match chunk.kind {
            ChunkKind::Aligned => self.aligned.push(chunk),
            ChunkKind::Unaligned => self.unaligned.push(chunk),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.aligned.is_empty() && self.unaligned.is_empty()
    }

    /// Number of queued chunks
    pub fn len(&self) -> usize {
        self.aligned.len() + self.unaligned.len()
    }

    pub fn contains(&self, base: usize) -> bool {
        self.aligned
            .iter()
            .chain(self.unaligned.iter())
            .any(|c| c.base == base)
    }

    /// Hand every queued chunk to the provider
    ///
    /// Returns the number of bytes released. The chunk bases of this batch
    /// are remembered until the next release.
    pub fn release(&mut self, provider: &mut dyn ChunkProvider, keep_all_aligned: bool) -> usize {
        self.last_batch.clear();
        self.last_batch
            .extend(self.aligned.iter().chain(self.unaligned.iter()).map(|c| c.base));

        let bytes = self
            .aligned
            .iter()
            .chain(self.unaligned.iter())
            .map(|c| c.size)
            .sum();

        if !self.aligned.is_empty() {
            provider.consume_aligned_chunks(std::mem::take(&mut self.aligned), keep_all_aligned);
        }
        if !self.unaligned.is_empty() {
            provider.consume_unaligned_chunks(std::mem::take(&mut self.unaligned));
        }
        bytes
    }

    /// Chunk bases released by the most recent `release`
    pub fn last_batch(&self) -> &[usize] {
        &self.last_batch
    }
}
