//! Pinned Objects - Registry of address-stable objects
//!
//! Pinning an object increments the pin count of its chunk. A pinned chunk
//! is adopted by a to-space as a whole, or excluded from sliding, so its
//! objects keep their addresses. Releasing a pin decrements the count
//! immediately; the closed record itself is dropped at the start of the
//! next collection.

use crate::heap::Heap;
use crate::object::ObjRef;
use crate::error::Result;

/// Identifier of one pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PinId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PinRecord {
    id: PinId,
    object: ObjRef,
    chunk: usize,
    open: bool,
}

#[derive(Debug, Default)]
pub struct PinnedObjects {
    records: Vec<PinRecord>,
    next_id: u64,
}

impl PinnedObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `object` and record the pin
    pub fn pin(&mut self, heap: &mut Heap, object: ObjRef) -> Result<PinId> {
        let chunk = heap.pin(object)?;
        self.next_id += 1;
        let id = PinId(self.next_id);
        self.records.push(PinRecord {
            id,
            object,
            chunk,
            open: true,
        });
        Ok(id)
    }

    /// Release a pin; returns `false` for unknown or already closed pins
    pub fn unpin(&mut self, heap: &mut Heap, id: PinId) -> bool {
        match self.records.iter_mut().find(|r| r.id == id && r.open) {
            Some(record) => {
                record.open = false;
                heap.unpin(record.chunk);
                true
            }
            None => false,
        }
    }

    /// Drop closed records
    pub fn prune(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.open);
        before - self.records.len()
    }

    /// Objects with an open pin
    pub fn open_objects(&self) -> Vec<ObjRef> {
        self.records.iter().filter(|r| r.open).map(|r| r.object).collect()
    }

    pub fn object(&self, id: PinId) -> Option<ObjRef> {
        self.records.iter().find(|r| r.id == id && r.open).map(|r| r.object)
    }

    pub fn open_count(&self) -> usize {
        self.records.iter().filter(|r| r.open).count()
    }

    /// Records including closed ones not yet pruned
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
