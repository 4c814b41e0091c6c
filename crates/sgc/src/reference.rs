//! Reference Processing - Soft, weak, phantom and final references
//!
//! The grey scan does not follow the referent of a reference object (soft
//! referents are followed unless the collector treats soft references as
//! weak). Instead the reference object is recorded as discovered. Once the
//! object graph is final, every discovered reference is resolved:
//!
//! - referent reached: the referent slot is updated to its new address
//! - referent not reached: the slot is cleared and the reference is linked
//!   into the heap's pending list, to be handed to the reference handler
//!   after the safepoint
//!
//! Final references are cleared like weak ones; their referent is not kept
//! alive for finalization.

use crate::heap::Heap;
use crate::object::{ObjRef, RefKind};
use crate::relocate::CompactionPlan;
use indexmap::IndexSet;
use serde::Serialize;

/// Outcome of reference processing in one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceStats {
    pub discovered: u64,
    pub kept_alive: u64,
    pub soft_cleared: u64,
    pub weak_cleared: u64,
    pub phantom_cleared: u64,
    pub final_cleared: u64,
}

impl ReferenceStats {
    pub fn cleared(&self) -> u64 {
        self.soft_cleared + self.weak_cleared + self.phantom_cleared + self.final_cleared
    }

    fn count_cleared(&mut self, kind: RefKind) {
        match kind {
            RefKind::Soft => self.soft_cleared += 1,
            RefKind::Weak => self.weak_cleared += 1,
            RefKind::Phantom => self.phantom_cleared += 1,
            RefKind::Final => self.final_cleared += 1,
        }
    }
}

/// Discovered references of the current pass
#[derive(Debug, Default)]
pub struct ReferenceProcessor {
    discovered: IndexSet<ObjRef>,
    soft_references_are_weak: bool,
}

impl ReferenceProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn soft_references_are_weak(&self) -> bool {
        self.soft_references_are_weak
    }

    /// Treat soft references as weak during the emergency retry
    pub fn set_soft_references_are_weak(&mut self, value: bool) {
        self.soft_references_are_weak = value;
    }

    /// Record a reference object, returning false if it was already known
    pub fn discover(&mut self, reference: ObjRef) -> bool {
        self.discovered.insert(reference)
    }

    pub fn discovered(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.discovered.iter().copied()
    }

    pub fn discovered_count(&self) -> usize {
        self.discovered.len()
    }

    /// Rewrite discovered addresses after compaction planning
    pub fn forward_discovered(&mut self, plan: &CompactionPlan) {
        self.discovered = self.discovered.iter().map(|r| plan.forward(*r)).collect();
    }

    /// Resolve every discovered reference and forget it
    ///
    /// `resolve` maps a referent to its post-collection address, or `None`
    /// when it was not reached.
    pub fn process(
        &mut self,
        heap: &mut Heap,
        resolve: impl Fn(&Heap, ObjRef) -> Option<ObjRef>,
    ) -> ReferenceStats {
        let mut stats = ReferenceStats {
            discovered: self.discovered.len() as u64,
            ..Default::default()
        };

        for reference in std::mem::take(&mut self.discovered) {
            let (kind, referent) = match heap.object(reference) {
                Some(object) => match (object.reference_kind(), object.referent()) {
                    (Some(kind), Some(referent)) => (kind, referent),
                    _ => continue,
                },
                None => {
                    log::warn!("[GC] discovered reference {} vanished", reference);
                    continue;
                }
            };

            match resolve(heap, referent) {
                Some(target) => {
                    stats.kept_alive += 1;
                    heap.update_referent(reference, Some(target));
                }
                None => {
                    stats.count_cleared(kind);
                    heap.update_referent(reference, None);
                    heap.pending.push(reference);
                }
            }
        }

        if stats.discovered > 0 {
            log::debug!(
                "[GC] references: {} discovered, {} kept, {} cleared",
                stats.discovered,
                stats.kept_alive,
                stats.cleared()
            );
        }
        stats
    }
}

impl Heap {
    /// Store a referent from inside the collector, maintaining the card of an
    /// old holder
    pub(crate) fn update_referent(&mut self, reference: ObjRef, value: Option<ObjRef>) {
        let young = value.is_some_and(|v| self.is_young(v));
        if let Some(chunk) = self.chunk_containing_mut(reference.address()) {
            let old = chunk.space().is_old();
            if let Some(object) = chunk.object_mut(reference.address()) {
                object.set_referent(value);
            }
            if young && old {
                chunk.dirty_card(reference.address());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::object::ObjectShape;
    use crate::util::constants::MB;

    fn setup(kind: RefKind) -> (Heap, ObjRef, ObjRef) {
        let mut heap = Heap::with_default_provider(&GcConfig::for_testing(MB));
        let mut tlab = None;
        let reference = heap
            .allocate_in_new_chunk(&mut tlab, &ObjectShape::reference(kind))
            .expect("allocation");
        let referent = heap
            .allocate_in_tlab(&mut tlab, &ObjectShape::plain(0))
            .expect("allocation");
        heap.set_referent(reference, Some(referent)).expect("referent");
        (heap, reference, referent)
    }

    #[test]
    fn test_dead_referent_is_cleared_and_enqueued() {
        let (mut heap, reference, _) = setup(RefKind::Phantom);
        let mut processor = ReferenceProcessor::new();
        assert!(processor.discover(reference));
        assert!(!processor.discover(reference));

        let stats = processor.process(&mut heap, |_, _| None);
        assert_eq!(stats.phantom_cleared, 1);
        assert_eq!(heap.referent(reference).expect("reference"), None);
        assert_eq!(heap.pending_references(), &[reference]);
        assert_eq!(processor.discovered_count(), 0);
    }

    #[test]
    fn test_live_referent_is_updated() {
        let (mut heap, reference, referent) = setup(RefKind::Weak);
        let mut processor = ReferenceProcessor::new();
        processor.discover(reference);

        let stats = processor.process(&mut heap, |_, r| Some(r));
        assert_eq!(stats.kept_alive, 1);
        assert_eq!(stats.cleared(), 0);
        assert_eq!(heap.referent(reference).expect("reference"), Some(referent));
        assert!(heap.pending_references().is_empty());
    }

    #[test]
    fn test_soft_as_weak_flag() {
        let mut processor = ReferenceProcessor::new();
        assert!(!processor.soft_references_are_weak());
        processor.set_soft_references_are_weak(true);
        assert!(processor.soft_references_are_weak());
    }
}
