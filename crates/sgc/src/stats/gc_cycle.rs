//! Collection Records - Per-cycle statistics
//!
//! Every executed cycle leaves a `CycleRecord` behind: epoch, cause, the
//! passes it ran, heap sizes around it and the work counters. The most
//! recent records are kept in a bounded `CycleHistory`.

use super::accounting::PassCounters;
use crate::heap::HeapSizes;
use serde::Serialize;
use std::collections::VecDeque;

/// Statistics of one executed cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleRecord {
    /// Epoch completed by this cycle
    pub epoch: u64,
    pub cause: &'static str,
    pub incremental_passes: u32,
    pub complete_passes: u32,
    pub pause_ns: u64,
    pub sizes: HeapSizes,
    pub counters: PassCounters,
    /// Reference objects cleared and linked into the pending list
    pub references_cleared: u64,
    pub released_bytes: usize,
    pub out_of_memory: bool,
}

impl CycleRecord {
    pub fn pause_ms(&self) -> f64 {
        self.pause_ns as f64 / 1_000_000.0
    }

    /// Whether the cycle ran a complete pass
    pub fn was_complete(&self) -> bool {
        self.complete_passes > 0
    }
}

/// Bounded history of cycle records, oldest first
#[derive(Debug, Clone)]
pub struct CycleHistory {
    records: VecDeque<CycleRecord>,
    capacity: usize,
}

impl CycleHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, record: CycleRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn last(&self) -> Option<&CycleRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CycleRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for CycleHistory {
    fn default() -> Self {
        Self::new(256)
    }
}
