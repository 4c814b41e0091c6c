//! Spaces - Ordered chunk lists with a collection role
//!
//! A space never owns chunk memory; it records the bases of the chunks it
//! contains in insertion order. The chunk itself carries its role as well, so
//! both views must be updated together (see `Heap::move_chunk`).

use indexmap::IndexSet;
use serde::Serialize;
use std::fmt;

/// Role of a space in the generational layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SpaceRole {
    /// Allocation space, age 0
    Eden,
    /// Survivors of the previous collections with the given age
    SurvivorFrom(u8),
    /// Survivor copy target for the given age
    SurvivorTo(u8),
    /// Old objects (copying mode)
    OldFrom,
    /// Old copy target (copying mode)
    OldTo,
    /// Single old space, swept and compacted in place
    OldCompacting,
}

impl SpaceRole {
    #[inline]
    pub fn is_young(self) -> bool {
        matches!(
            self,
            SpaceRole::Eden | SpaceRole::SurvivorFrom(_) | SpaceRole::SurvivorTo(_)
        )
    }

    #[inline]
    pub fn is_old(self) -> bool {
        !self.is_young()
    }

    /// Space whose objects are evacuated by a collection
    #[inline]
    pub fn is_from_space(self) -> bool {
        matches!(
            self,
            SpaceRole::Eden | SpaceRole::SurvivorFrom(_) | SpaceRole::OldFrom
        )
    }

    /// Space that receives promoted objects during a collection
    #[inline]
    pub fn is_to_space(self) -> bool {
        matches!(self, SpaceRole::SurvivorTo(_) | SpaceRole::OldTo)
    }

    #[inline]
    pub fn is_compacting(self) -> bool {
        self == SpaceRole::OldCompacting
    }

    /// Number of collections survived by objects in this space
    pub fn age(self, max_survivor_spaces: usize) -> usize {
        match self {
            SpaceRole::Eden => 0,
            SpaceRole::SurvivorFrom(age) | SpaceRole::SurvivorTo(age) => age as usize,
            SpaceRole::OldFrom | SpaceRole::OldTo | SpaceRole::OldCompacting => {
                max_survivor_spaces + 1
            }
        }
    }

    /// Age an object from this space has after its next promotion
    #[inline]
    pub fn next_age_for_promotion(self, max_survivor_spaces: usize) -> usize {
        self.age(max_survivor_spaces) + 1
    }

    /// Short name for logs and diagnostics
    pub fn name(self) -> &'static str {
        match self {
            SpaceRole::Eden => "eden",
            SpaceRole::SurvivorFrom(_) => "survivor-from",
            SpaceRole::SurvivorTo(_) => "survivor-to",
            SpaceRole::OldFrom => "old-from",
            SpaceRole::OldTo => "old-to",
            SpaceRole::OldCompacting => "old",
        }
    }
}

impl fmt::Display for SpaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaceRole::SurvivorFrom(age) | SpaceRole::SurvivorTo(age) => {
                write!(f, "{}-{}", self.name(), age)
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Ordered set of chunk bases
#[derive(Debug, Clone)]
pub struct Space {
    role: SpaceRole,
    chunks: IndexSet<usize>,
}

impl Space {
    pub fn new(role: SpaceRole) -> Self {
        Self {
            role,
            chunks: IndexSet::new(),
        }
    }

    #[inline]
    pub fn role(&self) -> SpaceRole {
        self.role
    }

    /// Chunk bases in insertion order
    pub fn chunks(&self) -> impl Iterator<Item = usize> + '_ {
        self.chunks.iter().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn contains(&self, base: usize) -> bool {
        self.chunks.contains(&base)
    }

    /// Most recently appended chunk, the current bump target
    pub fn last(&self) -> Option<usize> {
        self.chunks.last().copied()
    }

    pub(crate) fn push(&mut self, base: usize) -> bool {
        self.chunks.insert(base)
    }

    pub(crate) fn remove(&mut self, base: usize) -> bool {
        self.chunks.shift_remove(&base)
    }

    /// Detach every chunk, preserving order
    pub(crate) fn take_all(&mut self) -> Vec<usize> {
        self.chunks.drain(..).collect()
    }
}
