//! Compaction - Sliding compaction of the old generation
//!
//! Runs during a complete collection in compacting mode, after marking:
//!
//! 1. **Plan**: walk the old space in chunk order and assign every marked
//!    object its new address, packing objects towards the first chunk.
//!    Objects in chunks with pinned objects and in unaligned chunks keep
//!    their address.
//! 2. **Fix up**: rewrite every strong reference through the forwarding
//!    tables. Referents of reference objects and code cache constants are
//!    weak and are resolved later through the same plan.
//! 3. **Compact**: slide objects to their new addresses, sweep the chunks
//!    that do not slide, and hand chunks left empty to the releaser.
//!
//! Objects only ever move to lower addresses, so the destination of an
//! object never lies behind its own chunk.

use super::forwarding::ForwardingTable;
use crate::error::{fatal_error, FatalError};
use crate::heap::{ChunkReleaser, Heap, SpaceRole};
use crate::object::{HeapObject, ObjRef};
use serde::Serialize;
use std::collections::BTreeMap;

/// Forwarding tables of one compaction, keyed by chunk base
#[derive(Debug, Default)]
pub struct CompactionPlan {
    tables: BTreeMap<usize, ForwardingTable>,
    live_objects: usize,
    live_bytes: usize,
}

impl CompactionPlan {
    fn table_for(&self, address: usize) -> Option<&ForwardingTable> {
        self.tables
            .range(..=address)
            .next_back()
            .map(|(_, t)| t)
            .filter(|t| t.covers(address))
    }

    /// Whether `address` lies in a chunk that was planned
    pub fn covers(&self, address: ObjRef) -> bool {
        self.table_for(address.address()).is_some()
    }

    /// New address of a planned object, `None` if it was not marked
    pub fn lookup(&self, address: ObjRef) -> Option<ObjRef> {
        self.table_for(address.address())?
            .lookup(address.address())
            .and_then(ObjRef::from_address)
    }

    /// Forward a strong reference
    ///
    /// A strong reference to an unmarked object in a planned chunk means
    /// marking missed a live object.
    pub fn forward(&self, target: ObjRef) -> ObjRef {
        if !self.covers(target) {
            return target;
        }
        match self.lookup(target) {
            Some(new) => new,
            None => fatal_error(FatalError::DanglingReference {
                address: target.address(),
            }),
        }
    }

    pub fn forward_slot(&self, slot: &mut Option<ObjRef>) {
        if let Some(target) = *slot {
            *slot = Some(self.forward(target));
        }
    }

    pub fn live_objects(&self) -> usize {
        self.live_objects
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Number of objects that change address
    pub fn moved_objects(&self) -> usize {
        self.tables.values().map(|t| t.moved_entries().count()).sum()
    }
}

/// Outcome of the compact step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    pub moved_objects: usize,
    pub moved_bytes: usize,
    pub swept_bytes: usize,
    pub released_chunks: usize,
}

impl Heap {
    fn is_slidable(&self, base: usize) -> bool {
        self.chunk(base)
            .is_some_and(|c| c.is_aligned() && !c.is_no_slide() && !c.is_pinned())
    }

    /// Assign new addresses to every marked object of the old space
    pub(crate) fn plan_compaction(&self) -> CompactionPlan {
        let bases: Vec<usize> = self.space(SpaceRole::OldCompacting).chunks().collect();
        let destinations: Vec<usize> = bases.iter().copied().filter(|&b| self.is_slidable(b)).collect();

        let mut plan = CompactionPlan::default();
        let mut cursor = 0;
        let mut top = destinations
            .first()
            .and_then(|&b| self.chunk(b))
            .map_or(0, |c| c.start());

        for base in bases {
            let Some(chunk) = self.chunk(base) else {
                continue;
            };
            let slidable = self.is_slidable(base);
            let mut table = ForwardingTable::new(base, chunk.size());

            for object in chunk.objects().iter().filter(|o| o.header.is_marked()) {
                plan.live_objects += 1;
                plan.live_bytes += object.size();
                let old = object.address().address();
                if !slidable {
                    table.add_entry(old, old);
                    continue;
                }
                loop {
                    let Some(dest) = destinations.get(cursor).and_then(|&b| self.chunk(b)) else {
                        fatal_error(FatalError::SanityCheck(
                            "compaction ran out of destination chunks".into(),
                        ));
                    };
                    if top + object.size() <= dest.end() {
                        break;
                    }
                    cursor += 1;
                    top = destinations
                        .get(cursor)
                        .and_then(|&b| self.chunk(b))
                        .map_or(top, |c| c.start());
                }
                table.add_entry(old, top);
                top += object.size();
            }
            plan.tables.insert(base, table);
        }
        plan
    }

    /// Rewrite strong references held by heap objects, image objects and
    /// the pending list
    pub(crate) fn fixup_references(&mut self, plan: &CompactionPlan) {
        for chunk in self.chunks.values_mut() {
            for object in chunk.objects_mut().iter_mut().filter(|o| o.header.is_marked()) {
                object.slots.iter_mut().for_each(|slot| plan.forward_slot(slot));
            }
        }
        for index in 0..self.image.len() {
            let object = self.image.object_at_mut(index);
            object.slots.iter_mut().for_each(|slot| plan.forward_slot(slot));
        }
        for reference in self.pending.iter_mut() {
            *reference = plan.forward(*reference);
        }
    }

    /// Slide marked objects to their planned addresses and sweep the rest
    pub(crate) fn compact(&mut self, plan: &CompactionPlan, releaser: &mut ChunkReleaser) -> CompactionStats {
        let mut stats = CompactionStats::default();
        let bases: Vec<usize> = self.space(SpaceRole::OldCompacting).chunks().collect();
        let mut moving: Vec<HeapObject> = Vec::new();

        for &base in &bases {
            let slidable = self.is_slidable(base);
            let Some(chunk) = self.chunk_mut(base) else {
                continue;
            };
            if slidable {
                for object in chunk.take_objects() {
                    if object.header.is_marked() {
                        moving.push(object);
                    } else {
                        stats.swept_bytes += object.size();
                    }
                }
            } else {
                stats.swept_bytes += chunk.retain_objects(|o| o.header.is_marked());
                chunk.objects_mut().iter_mut().for_each(|o| o.header.unmark());
                chunk.set_no_slide(false);
            }
        }

        for mut object in moving {
            let old = object.address();
            let Some(new) = plan.lookup(old) else {
                fatal_error(FatalError::SanityCheck(format!("marked object {} was not planned", old)));
            };
            if new != old {
                stats.moved_objects += 1;
                stats.moved_bytes += object.size();
            }
            object.slide_to(new);
            let end = object.end();
            match self.chunk_containing_mut(new.address()) {
                Some(chunk) => {
                    chunk.set_top(end);
                    chunk.insert(object);
                }
                None => fatal_error(FatalError::DanglingReference {
                    address: new.address(),
                }),
            }
        }

        for base in bases {
            let empty = self.chunk(base).is_some_and(|c| c.is_empty() && !c.is_pinned());
            if empty {
                if let Some(memory) = self.detach_chunk(base) {
                    releaser.add(memory);
                    stats.released_chunks += 1;
                }
            }
        }

        log::debug!(
            "[GC] compaction: {} objects moved ({} bytes), {} bytes swept, {} chunks released",
            stats.moved_objects,
            stats.moved_bytes,
            stats.swept_bytes,
            stats.released_chunks
        );
        stats
    }
}
