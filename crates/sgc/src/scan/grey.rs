//! Grey-to-Black Closure - Promotion and marking of reachable objects
//!
//! Every reference found in a root or a grey object is handed to
//! `GreyToBlack::visit`, which returns the address the reference must hold
//! afterwards:
//!
//! | Target | Result |
//! |--------|--------|
//! | image object | unchanged |
//! | old object, incremental pass | unchanged |
//! | forwarded object | forwardee |
//! | object in a to-space chunk | unchanged |
//! | compacting old space, complete pass | marked in place, greyed once |
//! | other from-space object | promoted, result greyed |
//!
//! Promotion copies aligned objects and moves unaligned chunks as a unit.
//! An incremental pass keeps objects young while their next age is below the
//! tenuring age and the survivor budget allows it; a budget overflow is
//! counted and the object goes to the old generation instead.
//!
//! Grey objects are kept in an explicit work queue and scanned until the
//! queue is empty. Scanning an old or image holder that still references
//! young objects afterwards dirties its card again.

use crate::error::{fatal_error, FatalError};
use crate::heap::{Heap, Location, SpaceRole};
use crate::object::{ObjRef, ObjectKind, RefKind};
use crate::reference::ReferenceProcessor;
use crate::relocate::CompactionPlan;
use crate::stats::PassCounters;
use std::collections::VecDeque;

/// Objects discovered but not yet scanned
#[derive(Debug, Default)]
pub struct GreyQueue {
    objects: VecDeque<ObjRef>,
    pushed: usize,
}

impl GreyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, object: ObjRef) {
        self.pushed += 1;
        self.objects.push_back(object);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<ObjRef> {
        self.objects.pop_front()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects pushed since creation
    pub fn pushed(&self) -> usize {
        self.pushed
    }
}

/// Address a weakly held reference resolves to after the scan, `None` when
/// its target was not reached
pub(crate) fn resolve_reached(heap: &Heap, target: ObjRef, complete: bool) -> Option<ObjRef> {
    match heap.locate(target.address()) {
        Location::Image(_) => Some(target),
        Location::Unmapped => None,
        Location::Chunk { role, .. } => {
            if !complete && role.is_old() {
                return Some(target);
            }
            let object = heap.object(target)?;
            if let Some(forwardee) = object.header.forwardee() {
                return Some(forwardee);
            }
            if role.is_to_space() || (role.is_compacting() && object.header.is_marked()) {
                return Some(target);
            }
            None
        }
    }
}

/// Like `resolve_reached`, consulting the compaction plan first
pub(crate) fn resolve_weak(
    heap: &Heap,
    plan: Option<&CompactionPlan>,
    target: ObjRef,
    complete: bool,
) -> Option<ObjRef> {
    match plan {
        Some(plan) if plan.covers(target) => plan.lookup(target),
        _ => resolve_reached(heap, target, complete),
    }
}

/// The reference visitor of one pass
pub struct GreyToBlack<'a> {
    pub(crate) heap: &'a mut Heap,
    pub(crate) references: &'a mut ReferenceProcessor,
    grey: GreyQueue,
    pub(crate) counters: PassCounters,
    complete: bool,
    tenuring_age: usize,
    max_survivor_size: usize,
}

impl<'a> GreyToBlack<'a> {
    /// # Arguments
    /// * `complete` - complete pass (promote everything to old)
    /// * `tenuring_age` - age at which objects leave the survivor spaces
    /// * `max_survivor_size` - byte budget of all survivor to-spaces
    pub fn new(
        heap: &'a mut Heap,
        references: &'a mut ReferenceProcessor,
        complete: bool,
        tenuring_age: usize,
        max_survivor_size: usize,
    ) -> Self {
        let tenuring_age = tenuring_age.min(heap.max_survivor_spaces() + 1);
        Self {
            heap,
            references,
            grey: GreyQueue::new(),
            counters: PassCounters::default(),
            complete,
            tenuring_age,
            max_survivor_size,
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn heap(&self) -> &Heap {
        self.heap
    }

    pub fn counters(&self) -> &PassCounters {
        &self.counters
    }

    pub fn grey_len(&self) -> usize {
        self.grey.len()
    }

    /// Where a weakly held reference currently resolves to
    pub fn reached(&self, target: ObjRef) -> Option<ObjRef> {
        resolve_reached(self.heap, target, self.complete)
    }

    /// Visit a strong reference and return its new value
    pub fn visit(&mut self, target: ObjRef) -> ObjRef {
        let (base, role) = match self.heap.locate(target.address()) {
            Location::Image(_) => return target,
            Location::Unmapped => fatal_error(FatalError::DanglingReference {
                address: target.address(),
            }),
            Location::Chunk { base, role } => (base, role),
        };
        if !self.complete && role.is_old() {
            return target;
        }
        if let Some(forwardee) = self.heap.object_or_fatal(target).header.forwardee() {
            return forwardee;
        }
        if role.is_to_space() {
            return target;
        }
        if role.is_compacting() {
            self.mark(target);
            return target;
        }
        self.promote(target, base, role)
    }

    /// Visit an optional reference slot in place
    #[inline]
    pub fn visit_slot(&mut self, slot: &mut Option<ObjRef>) {
        if let Some(target) = *slot {
            *slot = Some(self.visit(target));
        }
    }

    /// Visit a raw word holding a reference or zero
    #[inline]
    pub fn visit_word(&mut self, word: &mut usize) {
        if let Some(target) = ObjRef::decode(*word) {
            *word = self.visit(target).address();
        }
    }

    pub(crate) fn mark(&mut self, target: ObjRef) {
        let newly_marked = match self.heap.object_mut(target) {
            Some(object) => object.header.mark(),
            None => fatal_error(FatalError::DanglingReference {
                address: target.address(),
            }),
        };
        if newly_marked {
            self.counters.marked_objects += 1;
            self.grey.push(target);
        }
    }

    pub(crate) fn grey(&mut self, object: ObjRef) {
        self.grey.push(object);
    }

    fn promote(&mut self, target: ObjRef, base: usize, role: SpaceRole) -> ObjRef {
        let next_age = role.next_age_for_promotion(self.heap.max_survivor_spaces());
        let aligned = self.heap.chunk(base).is_some_and(|c| c.is_aligned());
        let size = self.heap.object_or_fatal(target).size() as u64;

        if !self.complete && next_age < self.tenuring_age {
            if aligned {
                if let Some(copy) = self
                    .heap
                    .promote_young_object(target, next_age, self.max_survivor_size)
                {
                    self.counters.copied_objects += 1;
                    self.counters.copied_bytes += size;
                    self.grey.push(copy);
                    return copy;
                }
            } else if self
                .heap
                .promote_young_chunk(base, next_age, self.max_survivor_size)
            {
                self.counters.adopted_chunks += 1;
                self.counters.copied_bytes += size;
                self.grey.push(target);
                return target;
            }
            self.counters.survivor_overflows += 1;
            log::trace!("[GC] survivor overflow promoting {} from {}", target, role);
        }

        self.counters.promoted_objects += 1;
        self.counters.promoted_bytes += size;
        let promoted = if aligned {
            self.heap.promote_old_object(target)
        } else {
            self.heap.promote_old_chunk(base);
            self.counters.adopted_chunks += 1;
            target
        };
        self.grey.push(promoted);
        promoted
    }

    /// Move the chunk at `base` into a to-space as a unit
    pub(crate) fn adopt_chunk(&mut self, base: usize, role: SpaceRole) {
        let next_age = role.next_age_for_promotion(self.heap.max_survivor_spaces());
        self.counters.adopted_chunks += 1;
        if !self.complete && next_age < self.tenuring_age {
            if self
                .heap
                .promote_young_chunk(base, next_age, self.max_survivor_size)
            {
                return;
            }
            self.counters.survivor_overflows += 1;
        }
        self.heap.promote_old_chunk(base);
    }

    fn remember(&mut self, holder: ObjRef) {
        if let Some(chunk) = self.heap.chunk_containing_mut(holder.address()) {
            if chunk.space().is_old() {
                chunk.dirty_card(holder.address());
            }
        }
    }

    /// Visit the slots of a grey heap object
    pub fn scan_object(&mut self, holder: ObjRef) {
        let (mut slots, kind) = match self.heap.object_mut(holder) {
            Some(object) => (std::mem::take(&mut object.slots), object.kind),
            None => fatal_error(FatalError::DanglingReference {
                address: holder.address(),
            }),
        };
        slots.iter_mut().for_each(|slot| self.visit_slot(slot));

        let mut strong_referent = None;
        if let ObjectKind::Reference {
            kind: strength,
            referent: Some(referent),
        } = kind
        {
            if strength == RefKind::Soft && !self.references.soft_references_are_weak() {
                strong_referent = Some(self.visit(referent));
            } else if self.references.discover(holder) {
                self.counters.discovered_references += 1;
            }
        }

        let young = slots
            .iter()
            .flatten()
            .chain(strong_referent.iter())
            .any(|t| self.heap.is_young(*t));
        if let Some(object) = self.heap.object_mut(holder) {
            object.slots = slots;
            if strong_referent.is_some() {
                object.set_referent(strong_referent);
            }
        }
        self.counters.scanned_objects += 1;
        if young {
            self.remember(holder);
        }
    }

    /// Visit the slots of an image heap object
    pub fn scan_image_object(&mut self, index: usize) {
        let mut slots = std::mem::take(&mut self.heap.image.object_at_mut(index).slots);
        slots.iter_mut().for_each(|slot| self.visit_slot(slot));
        let young = slots.iter().flatten().any(|t| self.heap.is_young(*t));
        self.heap.image.object_at_mut(index).slots = slots;
        if young {
            self.heap.image.mark_dirty(index);
        }
    }

    /// Scan grey objects until none are left
    pub fn drain(&mut self) {
        while let Some(object) = self.grey.pop() {
            self.scan_object(object);
        }
    }

    /// End the pass, returning its counters
    pub fn finish(self) -> PassCounters {
        crate::guarantee!(
            self.grey.is_empty(),
            FatalError::SanityCheck(format!("{} grey objects left after the scan", self.grey.len()))
        );
        self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::object::ObjectShape;
    use crate::util::constants::MB;

    fn heap() -> Heap {
        let config = GcConfig {
            tenuring_age: 2,
            ..GcConfig::for_testing(MB)
        };
        Heap::with_default_provider(&config)
    }

    fn alloc(heap: &mut Heap, tlab: &mut Option<usize>, shape: ObjectShape) -> ObjRef {
        heap.allocate_in_tlab(tlab, &shape)
            .or_else(|| heap.allocate_in_new_chunk(tlab, &shape))
            .expect("allocation")
    }

    #[test]
    fn test_visit_copies_once() {
        let mut heap = heap();
        let mut refs = ReferenceProcessor::new();
        let mut tlab = None;
        let target = alloc(&mut heap, &mut tlab, ObjectShape::plain(0));

        let mut visitor = GreyToBlack::new(&mut heap, &mut refs, false, 2, MB);
        let first = visitor.visit(target);
        let second = visitor.visit(target);
        assert_eq!(first, second);
        assert_ne!(first, target);
        assert_eq!(visitor.counters().copied_objects, 1);
        assert_eq!(visitor.reached(target), Some(first));
        visitor.drain();
        let counters = visitor.finish();
        assert_eq!(counters.scanned_objects, 1);
        assert!(matches!(
            heap.locate(first.address()),
            Location::Chunk { role: SpaceRole::SurvivorTo(1), .. }
        ));
    }

    #[test]
    fn test_complete_pass_promotes_to_old() {
        let mut heap = heap();
        let mut refs = ReferenceProcessor::new();
        let mut tlab = None;
        let target = alloc(&mut heap, &mut tlab, ObjectShape::plain(0));

        let mut visitor = GreyToBlack::new(&mut heap, &mut refs, true, 2, MB);
        let copy = visitor.visit(target);
        visitor.drain();
        assert_eq!(visitor.finish().promoted_objects, 1);
        assert!(matches!(
            heap.locate(copy.address()),
            Location::Chunk { role: SpaceRole::OldTo, .. }
        ));
    }

    #[test]
    fn test_survivor_overflow_falls_back_to_old() {
        let mut heap = heap();
        let mut refs = ReferenceProcessor::new();
        let mut tlab = None;
        let target = alloc(&mut heap, &mut tlab, ObjectShape::plain(0));

        let mut visitor = GreyToBlack::new(&mut heap, &mut refs, false, 2, 0);
        let copy = visitor.visit(target);
        visitor.drain();
        let counters = visitor.finish();
        assert_eq!(counters.survivor_overflows, 1);
        assert_eq!(counters.promoted_objects, 1);
        assert!(heap.locate(copy.address()) != Location::Unmapped);
        assert!(!heap.is_young(copy));
    }

    #[test]
    fn test_weak_referent_is_discovered_not_visited() {
        let mut heap = heap();
        let mut refs = ReferenceProcessor::new();
        let mut tlab = None;
        let reference = alloc(&mut heap, &mut tlab, ObjectShape::reference(RefKind::Weak));
        let referent = alloc(&mut heap, &mut tlab, ObjectShape::plain(0));
        heap.set_referent(reference, Some(referent)).expect("referent");

        let mut visitor = GreyToBlack::new(&mut heap, &mut refs, false, 2, MB);
        let copy = visitor.visit(reference);
        visitor.drain();
        assert_eq!(visitor.reached(referent), None);
        assert_eq!(visitor.finish().discovered_references, 1);
        assert_eq!(refs.discovered().collect::<Vec<_>>(), vec![copy]);
    }

    #[test]
    fn test_old_holder_card_is_redirtied() {
        let mut heap = heap();
        let mut refs = ReferenceProcessor::new();
        let mut tlab = None;
        let holder = alloc(&mut heap, &mut tlab, ObjectShape::plain(1));
        let young = alloc(&mut heap, &mut tlab, ObjectShape::plain(0));
        heap.write_slot(holder, 0, Some(young)).expect("store");
        let base = heap.chunk_containing(holder.address()).expect("chunk").base();
        heap.promote_old_chunk(base);
        heap.swap_old_spaces();

        // the young target lives in the same chunk, now old; use a fresh one
        let fresh = heap
            .allocate_in_new_chunk(&mut None, &ObjectShape::plain(0))
            .expect("allocation");
        heap.write_slot(holder, 0, Some(fresh)).expect("store");
        assert!(heap.chunk(base).expect("chunk").has_dirty_cards());
        heap.chunk_mut(base).expect("chunk").clean_cards();

        let mut visitor = GreyToBlack::new(&mut heap, &mut refs, false, 2, MB);
        visitor.scan_object(holder);
        visitor.drain();
        visitor.finish();
        assert!(heap.chunk(base).expect("chunk").is_card_dirty(holder.address()));
    }

    #[test]
    #[should_panic(expected = "does not point into the heap")]
    fn test_unmapped_reference_is_fatal() {
        let mut heap = heap();
        let mut refs = ReferenceProcessor::new();
        let mut visitor = GreyToBlack::new(&mut heap, &mut refs, false, 2, MB);
        visitor.visit(ObjRef::from_address(0x8).expect("non-null"));
    }
}
