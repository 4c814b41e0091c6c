//! Stats Module - Collector statistics
//!
//! - `GcAccounting`: process-wide pass counts, times and work counters
//! - `Timers`: phase timers of the current collection
//! - `Histogram`: distribution of pause times
//! - `CycleHistory`: records of the most recent cycles
//!
//! Everything here is written by the thread executing the safepoint
//! operation only.

pub mod accounting;
pub mod gc_cycle;
pub mod histogram;
pub mod timer;

pub use accounting::{GcAccounting, PassCounters};
pub use gc_cycle::{CycleHistory, CycleRecord};
pub use histogram::Histogram;
pub use timer::{GcTimer, Timer, Timers};

use serde::Serialize;
use std::fmt;

/// Summary statistics printed at shutdown
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcSummary {
    pub policy: &'static str,
    /// Executed cycles (epochs)
    pub collections: u64,
    pub incremental_collections: u64,
    pub complete_collections: u64,
    pub incremental_time_ms: f64,
    pub complete_time_ms: f64,
    pub avg_pause_ms: f64,
    pub p50_pause_ms: f64,
    pub p95_pause_ms: f64,
    pub p99_pause_ms: f64,
    pub max_pause_ms: f64,
    pub promoted_bytes: u64,
    pub copied_objects: u64,
    pub survivor_overflows: u64,
    pub used_bytes: usize,
    pub committed_bytes: usize,
    pub mutator_time_ms: f64,
    pub uptime_secs: u64,
}

impl GcSummary {
    /// Fraction of uptime spent in collections
    pub fn collection_share(&self) -> f64 {
        let gc = self.incremental_time_ms + self.complete_time_ms;
        let total = gc + self.mutator_time_ms;
        if total == 0.0 {
            0.0
        } else {
            gc / total
        }
    }
}

fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}

impl GcSummary {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        policy: &'static str,
        epoch: u64,
        accounting: &GcAccounting,
        pauses: &Histogram,
        timers: &Timers,
        used_bytes: usize,
        committed_bytes: usize,
        uptime_secs: u64,
    ) -> Self {
        Self {
            policy,
            collections: epoch,
            incremental_collections: accounting.incremental_count,
            complete_collections: accounting.complete_count,
            incremental_time_ms: ns_to_ms(accounting.incremental_nanos),
            complete_time_ms: ns_to_ms(accounting.complete_nanos),
            avg_pause_ms: ns_to_ms(pauses.mean()),
            p50_pause_ms: ns_to_ms(pauses.p50()),
            p95_pause_ms: ns_to_ms(pauses.p95()),
            p99_pause_ms: ns_to_ms(pauses.p99()),
            max_pause_ms: ns_to_ms(pauses.max()),
            promoted_bytes: accounting.promoted_bytes(),
            copied_objects: accounting.copied_objects(),
            survivor_overflows: accounting.survivor_overflows(),
            used_bytes,
            committed_bytes,
            mutator_time_ms: timers.mutator.total_ms(),
            uptime_secs,
        }
    }
}

impl fmt::Display for GcSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GC summary ({} policy)", self.policy)?;
        writeln!(
            f,
            "  collections: {} ({} incremental, {} complete)",
            self.collections, self.incremental_collections, self.complete_collections
        )?;
        writeln!(
            f,
            "  collection time: {:.3}ms incremental, {:.3}ms complete",
            self.incremental_time_ms, self.complete_time_ms
        )?;
        writeln!(
            f,
            "  pauses: avg {:.3}ms, p50 {:.3}ms, p95 {:.3}ms, p99 {:.3}ms, max {:.3}ms",
            self.avg_pause_ms, self.p50_pause_ms, self.p95_pause_ms, self.p99_pause_ms, self.max_pause_ms
        )?;
        writeln!(
            f,
            "  promoted: {} bytes, copied objects: {}, survivor overflows: {}",
            self.promoted_bytes, self.copied_objects, self.survivor_overflows
        )?;
        write!(
            f,
            "  heap: {} bytes used, {} bytes committed, uptime {}s",
            self.used_bytes, self.committed_bytes, self.uptime_secs
        )
    }
}
