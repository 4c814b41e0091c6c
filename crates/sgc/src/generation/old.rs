//! Old Generation - Copying or compacting tenured space

use crate::error::{fatal_error, FatalError};
use crate::heap::{ChunkReleaser, Heap, Space, SpaceRole};
use crate::object::ObjRef;

/// Old generation spaces
///
/// Copying mode uses `OldFrom` and `OldTo`; compacting mode keeps every old
/// chunk in `OldCompacting` and leaves the to-space unused.
#[derive(Debug)]
pub struct OldGeneration {
    compacting: bool,
    primary: Space,
    to: Space,
}

impl OldGeneration {
    pub fn new(compacting: bool) -> Self {
        let primary = if compacting {
            SpaceRole::OldCompacting
        } else {
            SpaceRole::OldFrom
        };
        Self {
            compacting,
            primary: Space::new(primary),
            to: Space::new(SpaceRole::OldTo),
        }
    }

    #[inline]
    pub fn is_compacting(&self) -> bool {
        self.compacting
    }

    /// Space holding tenured objects between collections
    pub fn primary(&self) -> &Space {
        &self.primary
    }

    /// Space receiving promoted objects
    pub fn promotion_target(&self) -> SpaceRole {
        if self.compacting {
            SpaceRole::OldCompacting
        } else {
            SpaceRole::OldTo
        }
    }

    pub(crate) fn space(&self, role: SpaceRole) -> &Space {
        if role == self.primary.role() {
            &self.primary
        } else if role == SpaceRole::OldTo {
            &self.to
        } else {
            fatal_error(FatalError::SanityCheck(format!(
                "{} is not an old space in this mode",
                role
            )))
        }
    }

    pub(crate) fn space_mut(&mut self, role: SpaceRole) -> &mut Space {
        if role == self.primary.role() {
            &mut self.primary
        } else if role == SpaceRole::OldTo {
            &mut self.to
        } else {
            fatal_error(FatalError::SanityCheck(format!(
                "{} is not an old space in this mode",
                role
            )))
        }
    }

    pub fn roles(&self) -> Vec<SpaceRole> {
        if self.compacting {
            vec![SpaceRole::OldCompacting]
        } else {
            vec![SpaceRole::OldFrom, SpaceRole::OldTo]
        }
    }

    pub fn to_space_empty(&self) -> bool {
        self.to.is_empty()
    }
}

impl Heap {
    /// Copy an aligned object into the old generation
    pub(crate) fn promote_old_object(&mut self, original: ObjRef) -> ObjRef {
        let target = self.old.promotion_target();
        match self.copy_object(original, target, None) {
            Some(copy) => copy,
            None => fatal_error(FatalError::PromotionFailure {
                size: self.object(original).map_or(0, |o| o.size()),
                space: target.to_string(),
            }),
        }
    }

    /// Move a whole chunk into the old generation
    pub(crate) fn promote_old_chunk(&mut self, base: usize) {
        let target = self.old.promotion_target();
        self.move_chunk(base, target);
    }

    /// Detach the old from-space after a complete copying collection
    pub(crate) fn release_old_spaces(&mut self, releaser: &mut ChunkReleaser) {
        if self.old.is_compacting() {
            return;
        }
        for base in self.space(SpaceRole::OldFrom).chunks().collect::<Vec<_>>() {
            if let Some(memory) = self.detach_chunk(base) {
                releaser.add(memory);
            }
        }
    }

    /// Objects promoted during this pass join the old from-space
    pub(crate) fn swap_old_spaces(&mut self) {
        if !self.old.is_compacting() {
            self.absorb(SpaceRole::OldFrom, SpaceRole::OldTo);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::object::ObjectShape;
    use crate::util::constants::MB;

    #[test]
    fn test_modes() {
        let copying = OldGeneration::new(false);
        assert_eq!(copying.promotion_target(), SpaceRole::OldTo);
        assert_eq!(copying.roles(), vec![SpaceRole::OldFrom, SpaceRole::OldTo]);

        let compacting = OldGeneration::new(true);
        assert_eq!(compacting.promotion_target(), SpaceRole::OldCompacting);
        assert_eq!(compacting.primary().role(), SpaceRole::OldCompacting);
    }

    #[test]
    #[should_panic(expected = "not an old space")]
    fn test_wrong_mode_space_is_fatal() {
        OldGeneration::new(true).space(SpaceRole::OldFrom);
    }

    #[test]
    fn test_promote_and_swap() {
        let mut heap = Heap::with_default_provider(&GcConfig::for_testing(MB));
        let mut tlab = None;
        let obj = heap
            .allocate_in_new_chunk(&mut tlab, &ObjectShape::plain(1))
            .expect("allocation");

        let copy = heap.promote_old_object(obj);
        assert_ne!(copy, obj);
        assert_eq!(heap.object(obj).and_then(|o| o.header.forwardee()), Some(copy));
        assert_eq!(heap.space(SpaceRole::OldTo).len(), 1);

        heap.swap_old_spaces();
        assert!(heap.old().to_space_empty());
        assert_eq!(heap.space(SpaceRole::OldFrom).len(), 1);

        let mut releaser = ChunkReleaser::new();
        heap.release_old_spaces(&mut releaser);
        assert_eq!(releaser.len(), 1);
    }
}
