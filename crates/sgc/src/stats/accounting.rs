//! GC Accounting - Collection counters
//!
//! `GcAccounting` lives for the whole process and is only written inside the
//! safepoint operation. `PassCounters` collects the work done by a single
//! incremental or complete pass and is folded into the accounting when the
//! pass ends.

use serde::Serialize;

/// Work done by one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassCounters {
    /// Objects copied into survivor to-spaces
    pub copied_objects: u64,
    pub copied_bytes: u64,
    /// Objects copied into the old generation
    pub promoted_objects: u64,
    pub promoted_bytes: u64,
    /// Chunks moved into another space as a unit
    pub adopted_chunks: u64,
    /// Objects marked in place by a compacting pass
    pub marked_objects: u64,
    /// Grey objects whose slots were visited
    pub scanned_objects: u64,
    /// Survivor copies that fell back to old promotion
    pub survivor_overflows: u64,
    /// Reference objects found during the scan
    pub discovered_references: u64,
}

impl PassCounters {
    pub fn add(&mut self, other: &PassCounters) {
        self.copied_objects += other.copied_objects;
        self.copied_bytes += other.copied_bytes;
        self.promoted_objects += other.promoted_objects;
        self.promoted_bytes += other.promoted_bytes;
        self.adopted_chunks += other.adopted_chunks;
        self.marked_objects += other.marked_objects;
        self.scanned_objects += other.scanned_objects;
        self.survivor_overflows += other.survivor_overflows;
        self.discovered_references += other.discovered_references;
    }
}

/// Process-wide collection accounting
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcAccounting {
    /// Completed incremental passes
    pub incremental_count: u64,
    /// Completed complete passes
    pub complete_count: u64,
    pub incremental_nanos: u64,
    pub complete_nanos: u64,
    /// Totals over every pass
    pub totals: PassCounters,
    /// Kind of the most recent pass
    pub last_collection_complete: bool,
    /// Used chunk bytes before and after the most recent pass
    pub last_used_before: usize,
    pub last_used_after: usize,
    #[serde(skip)]
    pass_start: Option<std::time::Instant>,
}

impl GcAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a pass
    pub fn before_collect_once(&mut self, complete: bool, used_bytes: usize) {
        self.last_collection_complete = complete;
        self.last_used_before = used_bytes;
        self.pass_start = Some(std::time::Instant::now());
    }

    /// Close a pass and fold its counters into the totals
    pub fn after_collect_once(&mut self, complete: bool, used_bytes: usize, counters: &PassCounters) {
        let nanos = self
            .pass_start
            .take()
            .map_or(0, |start| start.elapsed().as_nanos() as u64);
        if complete {
            self.complete_count += 1;
            self.complete_nanos += nanos;
        } else {
            self.incremental_count += 1;
            self.incremental_nanos += nanos;
        }
        self.last_used_after = used_bytes;
        self.totals.add(counters);
    }

    pub fn collection_count(&self) -> u64 {
        self.incremental_count + self.complete_count
    }

    pub fn collection_nanos(&self) -> u64 {
        self.incremental_nanos + self.complete_nanos
    }

    pub fn survivor_overflows(&self) -> u64 {
        self.totals.survivor_overflows
    }

    pub fn promoted_bytes(&self) -> u64 {
        self.totals.promoted_bytes
    }

    pub fn copied_objects(&self) -> u64 {
        self.totals.copied_objects + self.totals.promoted_objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passes_are_counted_by_kind() {
        let mut acc = GcAccounting::new();
        let counters = PassCounters {
            promoted_objects: 2,
            promoted_bytes: 64,
            survivor_overflows: 1,
            ..Default::default()
        };

        acc.before_collect_once(false, 4096);
        acc.after_collect_once(false, 1024, &counters);
        acc.before_collect_once(true, 1024);
        acc.after_collect_once(true, 512, &PassCounters::default());

        assert_eq!(acc.incremental_count, 1);
        assert_eq!(acc.complete_count, 1);
        assert_eq!(acc.collection_count(), 2);
        assert_eq!(acc.promoted_bytes(), 64);
        assert_eq!(acc.survivor_overflows(), 1);
        assert!(acc.last_collection_complete);
        assert_eq!(acc.last_used_after, 512);
    }
}
