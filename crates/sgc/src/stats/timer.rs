//! GC Timers - Phase timing for collections
//!
//! Every phase of a collection has a named timer. Timers are opened and
//! closed around the phase and accumulate across the passes of one
//! collection; `Timers::reset` runs at the start of each collection. The
//! mutator timer runs between collections.

use serde::Serialize;
use std::time::{Duration, Instant};

/// GcTimer - stopwatch for a single measurement
#[derive(Debug, Clone, Copy)]
pub struct GcTimer {
    start: Instant,
}

impl GcTimer {
    /// Create new timer
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get elapsed nanoseconds
    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed().as_nanos() as u64
    }

    /// Get elapsed milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for GcTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulating named timer
#[derive(Debug, Clone, Serialize)]
pub struct Timer {
    name: &'static str,
    #[serde(skip)]
    opened: Option<Instant>,
    total_ns: u64,
    count: u32,
}

impl Timer {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            opened: None,
            total_ns: 0,
            count: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn open(&mut self) {
        debug_assert!(self.opened.is_none(), "timer {} opened twice", self.name);
        self.opened = Some(Instant::now());
    }

    pub fn close(&mut self) {
        if let Some(start) = self.opened.take() {
            self.total_ns += start.elapsed().as_nanos() as u64;
            self.count += 1;
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened.is_some()
    }

    pub fn total_ns(&self) -> u64 {
        self.total_ns
    }

    pub fn total_ms(&self) -> f64 {
        self.total_ns as f64 / 1_000_000.0
    }

    /// Number of open/close intervals since the last reset
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn reset(&mut self) {
        self.opened = None;
        self.total_ns = 0;
        self.count = 0;
    }
}

/// Phase timers of the collector
#[derive(Debug, Clone, Serialize)]
pub struct Timers {
    pub collection: Timer,
    pub root_scan: Timer,
    pub promote_pinned_objects: Timer,
    pub blacken_dirty_cards: Timer,
    pub blacken_stack_roots: Timer,
    pub walk_thread_locals: Timer,
    pub blacken_image_heap_roots: Timer,
    pub scan_grey_objects: Timer,
    pub walk_code_cache: Timer,
    pub old_planning: Timer,
    pub old_fixup: Timer,
    pub old_compaction: Timer,
    pub old_sweep: Timer,
    pub reference_objects: Timer,
    pub clean_code_cache: Timer,
    pub release_spaces: Timer,
    pub verify: Timer,
    pub mutator: Timer,
}

impl Default for Timers {
    fn default() -> Self {
        Self {
            collection: Timer::new("collection"),
            root_scan: Timer::new("rootScan"),
            promote_pinned_objects: Timer::new("promotePinnedObjects"),
            blacken_dirty_cards: Timer::new("blackenDirtyCardRoots"),
            blacken_stack_roots: Timer::new("blackenStackRoots"),
            walk_thread_locals: Timer::new("walkThreadLocals"),
            blacken_image_heap_roots: Timer::new("blackenImageHeapRoots"),
            scan_grey_objects: Timer::new("scanGreyObjects"),
            walk_code_cache: Timer::new("walkRuntimeCodeCache"),
            old_planning: Timer::new("oldPlanning"),
            old_fixup: Timer::new("oldFixup"),
            old_compaction: Timer::new("oldCompaction"),
            old_sweep: Timer::new("oldSweep"),
            reference_objects: Timer::new("referenceObjects"),
            clean_code_cache: Timer::new("cleanRuntimeCodeCache"),
            release_spaces: Timer::new("releaseSpaces"),
            verify: Timer::new("verify"),
            mutator: Timer::new("mutator"),
        }
    }
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    fn phases(&self) -> [&Timer; 16] {
        [
            &self.root_scan,
            &self.promote_pinned_objects,
            &self.blacken_dirty_cards,
            &self.blacken_stack_roots,
            &self.walk_thread_locals,
            &self.blacken_image_heap_roots,
            &self.scan_grey_objects,
            &self.walk_code_cache,
            &self.old_planning,
            &self.old_fixup,
            &self.old_compaction,
            &self.old_sweep,
            &self.reference_objects,
            &self.clean_code_cache,
            &self.release_spaces,
            &self.verify,
        ]
    }

    /// Reset every collection timer; the mutator timer keeps running
    pub fn reset_all_except_mutator(&mut self) {
        self.collection.reset();
        self.root_scan.reset();
        self.promote_pinned_objects.reset();
        self.blacken_dirty_cards.reset();
        self.blacken_stack_roots.reset();
        self.walk_thread_locals.reset();
        self.blacken_image_heap_roots.reset();
        self.scan_grey_objects.reset();
        self.walk_code_cache.reset();
        self.old_planning.reset();
        self.old_fixup.reset();
        self.old_compaction.reset();
        self.old_sweep.reset();
        self.reference_objects.reset();
        self.clean_code_cache.reset();
        self.release_spaces.reset();
        self.verify.reset();
    }

    /// Phase name and milliseconds for every phase that ran
    pub fn phase_times(&self) -> Vec<(&'static str, f64)> {
        self.phases()
            .iter()
            .filter(|t| t.count() > 0)
            .map(|t| (t.name(), t.total_ms()))
            .collect()
    }

    /// One-line phase breakdown
    pub fn format_phases(&self) -> String {
        self.phase_times()
            .iter()
            .map(|(name, ms)| format!("{}: {:.3}ms", name, ms))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
