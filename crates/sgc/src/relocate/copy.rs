//! Object Copying - Evacuation into to-space chunks
//!
//! Copy strategy:
//! 1. Bump-allocate in the last chunk of the target space, taking a new
//!    aligned chunk from the provider when it is full
//! 2. Install the forwarding marker in the original header
//! 3. Record the copy, with transient header state cleared, in the target
//!    chunk
//!
//! Survivor copies are bounded by a byte budget across all survivor
//! to-spaces; exceeding it is reported to the caller, which promotes into
//! the old generation instead.

use crate::error::{fatal_error, FatalError};
use crate::heap::{Heap, SpaceRole};
use crate::object::ObjRef;

impl Heap {
    /// Reserve `size` bytes in the target space for a copy
    fn allocate_for_copy(&mut self, target: SpaceRole, size: usize, budget: Option<usize>) -> Option<ObjRef> {
        if let Some(base) = self.space(target).last() {
            if let Some(chunk) = self.chunk_mut(base).filter(|c| c.is_aligned()) {
                if let Some(address) = chunk.allocate(size) {
                    return Some(address);
                }
            }
        }

        if let Some(limit) = budget {
            if self.survivor_to_bytes() + self.aligned_chunk_size() > limit {
                return None;
            }
        }

        let Some(memory) = self.provider.allocate_aligned() else {
            fatal_error(FatalError::PromotionFailure {
                size,
                space: target.to_string(),
            });
        };
        let base = self.add_chunk(memory, target);
        self.chunk_mut(base)?.allocate(size)
    }

    /// Copy an object into `target` and forward the original
    ///
    /// Returns `None` only when `budget` is exceeded.
    pub(crate) fn copy_object(
        &mut self,
        original: ObjRef,
        target: SpaceRole,
        budget: Option<usize>,
    ) -> Option<ObjRef> {
        let size = self.object_or_fatal(original).size();
        let destination = self.allocate_for_copy(target, size, budget)?;

        let copy = {
            let Some(object) = self.object_mut(original) else {
                fatal_error(FatalError::DanglingReference {
                    address: original.address(),
                });
            };
            object.header.forward_to(destination);
            object.relocated(destination, true)
        };

        match self.chunk_containing_mut(destination.address()) {
            Some(chunk) => chunk.insert(copy),
            None => fatal_error(FatalError::DanglingReference {
                address: destination.address(),
            }),
        }
        Some(destination)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::GcConfig;
    use crate::heap::{Heap, SpaceRole};
    use crate::object::ObjectShape;
    use crate::util::constants::{KB, MB};

    fn heap() -> Heap {
        Heap::with_default_provider(&GcConfig::for_testing(MB))
    }

    #[test]
    fn test_copy_forwards_original() {
        let mut heap = heap();
        let mut tlab = None;
        let a = heap
            .allocate_in_new_chunk(&mut tlab, &ObjectShape::plain(2))
            .expect("allocation");
        heap.write_slot(a, 1, Some(a)).expect("store");
        let identity = heap.object(a).map(|o| o.identity());

        let copy = heap.copy_object(a, SpaceRole::SurvivorTo(1), None).expect("copy");
        assert_eq!(heap.object(a).and_then(|o| o.header.forwardee()), Some(copy));
        let copied = heap.object(copy).expect("copy exists");
        assert_eq!(Some(copied.identity()), identity);
        assert_eq!(copied.slots[1], Some(a));
        assert!(!copied.header.is_forwarded());
    }

    #[test]
    fn test_copies_share_target_chunk() {
        let mut heap = heap();
        let mut tlab = None;
        let shape = ObjectShape::plain(0);
        let a = heap.allocate_in_new_chunk(&mut tlab, &shape).expect("allocation");
        let b = heap.allocate_in_tlab(&mut tlab, &shape).expect("allocation");

        let ca = heap.copy_object(a, SpaceRole::OldTo, None).expect("copy");
        let cb = heap.copy_object(b, SpaceRole::OldTo, None).expect("copy");
        assert_eq!(cb.address(), ca.address() + shape.size());
        assert_eq!(heap.space(SpaceRole::OldTo).len(), 1);
    }

    #[test]
    fn test_survivor_budget_overflow() {
        let mut heap = heap();
        let mut tlab = None;
        let a = heap
            .allocate_in_new_chunk(&mut tlab, &ObjectShape::plain(0))
            .expect("allocation");
        assert!(heap.copy_object(a, SpaceRole::SurvivorTo(1), Some(2 * KB)).is_none());
        assert!(heap.object(a).is_some_and(|o| !o.header.is_forwarded()));
    }
}
