//! Collection Policy - When to collect and how much
//!
//! The collector consults a `CollectionPolicy` but never owns its
//! heuristics. Policies only ever see `HeapAccounting` snapshots.
//!
//! | Policy | Allocation trigger | Complete collections |
//! |--------|--------------------|----------------------|
//! | `BasicPolicy` | young chunks reach the young budget | old chunks exceed the old budget |
//! | `NeverCollectPolicy` | never, allocation fails at the heap limit | never |

use crate::config::GcConfig;
use crate::heap::HeapAccounting;

/// Sizing and triggering decisions consulted by the collector
pub trait CollectionPolicy: Send {
    fn name(&self) -> &'static str;

    /// Whether allocating a new chunk should collect first
    fn should_collect_on_allocation(&self, heap: &HeapAccounting) -> bool;

    /// Whether an advisory request should be honoured
    fn should_collect_on_hint(&self, full: bool, heap: &HeapAccounting) -> bool;

    /// Whether to run a complete pass
    ///
    /// Asked with `follows_incremental == false` before a cycle starts and
    /// with `true` after its incremental pass.
    fn should_collect_completely(&self, follows_incremental: bool, heap: &HeapAccounting) -> bool;

    fn on_collection_begin(&mut self, _complete: bool, _heap: &HeapAccounting) {}

    fn on_collection_end(&mut self, _complete: bool, _heap: &HeapAccounting) {}

    /// Adjust sizes after a cycle that ended near the heap limit
    fn update_size_parameters(&mut self, _heap: &HeapAccounting) {}

    fn maximum_heap_size(&self) -> usize;

    fn current_heap_capacity(&self) -> usize;

    fn minimum_heap_size(&self) -> usize;

    fn maximum_young_size(&self) -> usize;

    /// Byte budget of all survivor to-spaces
    fn maximum_survivor_size(&self) -> usize;

    fn is_out_of_memory(&self, used_bytes: usize) -> bool {
        used_bytes > self.maximum_heap_size()
    }

    /// Number of incremental collections an object survives in the young
    /// generation
    fn tenuring_age(&self) -> usize;

    fn is_never_collect(&self) -> bool {
        false
    }
}

/// Default generational policy
#[derive(Debug, Clone)]
pub struct BasicPolicy {
    min_heap_size: usize,
    max_heap_size: usize,
    max_young_size: usize,
    max_survivor_size: usize,
    tenuring_age: usize,
    capacity: usize,
    aligned_chunk_size: usize,
}

impl BasicPolicy {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            min_heap_size: config.min_heap_size,
            max_heap_size: config.max_heap_size,
            max_young_size: config.max_young_size(),
            max_survivor_size: config.max_survivor_size(),
            tenuring_age: config.tenuring_age,
            capacity: config.min_heap_size.max(config.max_young_size()),
            aligned_chunk_size: config.aligned_chunk_size,
        }
    }

    /// Old bytes above which only a complete collection helps
    fn old_budget(&self) -> usize {
        self.max_heap_size.saturating_sub(self.max_young_size)
    }
}

impl CollectionPolicy for BasicPolicy {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn should_collect_on_allocation(&self, heap: &HeapAccounting) -> bool {
        heap.young_chunk_bytes() + self.aligned_chunk_size > self.max_young_size
            || heap.used_chunk_bytes() + self.aligned_chunk_size > self.capacity
    }

    fn should_collect_on_hint(&self, full: bool, heap: &HeapAccounting) -> bool {
        full || heap.young_chunk_bytes() >= self.max_young_size / 2
    }

    fn should_collect_completely(&self, follows_incremental: bool, heap: &HeapAccounting) -> bool {
        if follows_incremental {
            heap.old_chunk_bytes > self.old_budget()
        } else {
            heap.old_chunk_bytes + heap.young_chunk_bytes() > self.old_budget()
                && heap.old_chunk_bytes > self.old_budget() / 2
        }
    }

    fn on_collection_end(&mut self, complete: bool, heap: &HeapAccounting) {
        if complete {
            self.update_size_parameters(heap);
        }
    }

    fn update_size_parameters(&mut self, heap: &HeapAccounting) {
        let wanted = (heap.used_chunk_bytes() * 2).max(self.max_young_size);
        let capacity = wanted.clamp(self.min_heap_size, self.max_heap_size);
        if capacity != self.capacity {
            log::debug!("[GC] heap capacity {} -> {} bytes", self.capacity, capacity);
            self.capacity = capacity;
        }
    }

    fn maximum_heap_size(&self) -> usize {
        self.max_heap_size
    }

    fn current_heap_capacity(&self) -> usize {
        self.capacity
    }

    fn minimum_heap_size(&self) -> usize {
        self.min_heap_size
    }

    fn maximum_young_size(&self) -> usize {
        self.max_young_size
    }

    fn maximum_survivor_size(&self) -> usize {
        self.max_survivor_size
    }

    fn tenuring_age(&self) -> usize {
        self.tenuring_age
    }
}

/// Policy that never collects; allocation fails at the heap limit
#[derive(Debug, Clone)]
pub struct NeverCollectPolicy {
    max_heap_size: usize,
}

impl NeverCollectPolicy {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            max_heap_size: config.max_heap_size,
        }
    }
}

impl CollectionPolicy for NeverCollectPolicy {
    fn name(&self) -> &'static str {
        "never-collect"
    }

    fn should_collect_on_allocation(&self, heap: &HeapAccounting) -> bool {
        heap.used_chunk_bytes() >= self.max_heap_size
    }

    fn should_collect_on_hint(&self, _full: bool, _heap: &HeapAccounting) -> bool {
        false
    }

    fn should_collect_completely(&self, _follows_incremental: bool, _heap: &HeapAccounting) -> bool {
        false
    }

    fn maximum_heap_size(&self) -> usize {
        self.max_heap_size
    }

    fn current_heap_capacity(&self) -> usize {
        self.max_heap_size
    }

    fn minimum_heap_size(&self) -> usize {
        self.max_heap_size
    }

    fn maximum_young_size(&self) -> usize {
        self.max_heap_size
    }

    fn maximum_survivor_size(&self) -> usize {
        0
    }

    fn tenuring_age(&self) -> usize {
        0
    }

    fn is_never_collect(&self) -> bool {
        true
    }
}
