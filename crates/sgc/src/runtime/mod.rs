//! Runtime Module - Mutator-side state the collector works with
//!
//! Manages:
//! - safepoint coordination
//! - attached mutator threads (stacks, thread locals, TLABs)
//! - the code cache
//! - pinned objects
//! - delivery of cleared references

pub mod code_cache;
pub mod pinning;
pub mod reference_handler;
pub mod safepoint;

pub use code_cache::{CodeCache, CodeCacheStats, CodeId, CodeInfo, CodeState, RuntimeCodeCache};
pub use pinning::{PinId, PinnedObjects};
pub use reference_handler::{ReferenceCallback, ReferenceHandler};
pub use safepoint::{Safepoint, VmOperation};

use crate::object::ObjRef;
use crate::scan::Stack;
use indexmap::IndexMap;

/// Collector view of one attached mutator
#[derive(Debug, Default)]
pub struct ThreadRecord {
    pub id: u64,
    pub stack: Stack,
    pub thread_locals: Vec<Option<ObjRef>>,
    /// Base of the Eden chunk the thread bump-allocates into
    pub tlab: Option<usize>,
}

impl ThreadRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// Attached threads by id, in attach order
#[derive(Debug, Default)]
pub struct ThreadTable {
    threads: IndexMap<u64, ThreadRecord>,
    next_id: u64,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new thread and return its id
    pub fn register(&mut self) -> u64 {
        self.next_id += 1;
        self.threads.insert(self.next_id, ThreadRecord::new(self.next_id));
        self.next_id
    }

    pub fn remove(&mut self, id: u64) -> Option<ThreadRecord> {
        self.threads.shift_remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<&ThreadRecord> {
        self.threads.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut ThreadRecord> {
        self.threads.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadRecord> {
        self.threads.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ThreadRecord> {
        self.threads.values_mut()
    }

    /// Retire every TLAB so mutators start on fresh chunks
    pub fn reset_tlabs(&mut self) {
        self.threads.values_mut().for_each(|t| t.tlab = None);
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}
