//! Young Generation - Eden and aged survivor spaces

use crate::error::{fatal_error, FatalError};
use crate::heap::{ChunkReleaser, Heap, Space, SpaceRole};
use crate::object::ObjRef;

/// Eden plus survivor from/to spaces indexed by age
#[derive(Debug)]
pub struct YoungGeneration {
    eden: Space,
    survivor_from: Vec<Space>,
    survivor_to: Vec<Space>,
}

impl YoungGeneration {
    pub fn new(max_survivor_spaces: usize) -> Self {
        let ages = 1..=max_survivor_spaces as u8;
        Self {
            eden: Space::new(SpaceRole::Eden),
            survivor_from: ages.clone().map(|a| Space::new(SpaceRole::SurvivorFrom(a))).collect(),
            survivor_to: ages.map(|a| Space::new(SpaceRole::SurvivorTo(a))).collect(),
        }
    }

    pub fn eden(&self) -> &Space {
        &self.eden
    }

    pub fn max_survivor_spaces(&self) -> usize {
        self.survivor_from.len()
    }

    pub fn survivor_from(&self, age: usize) -> Option<&Space> {
        age.checked_sub(1).and_then(|i| self.survivor_from.get(i))
    }

    fn survivor_index(&self, age: u8) -> usize {
        let index = (age as usize).wrapping_sub(1);
        if index >= self.survivor_from.len() {
            fatal_error(FatalError::SanityCheck(format!(
                "survivor age {} outside 1..={}",
                age,
                self.survivor_from.len()
            )));
        }
        index
    }

    pub(crate) fn space(&self, role: SpaceRole) -> &Space {
        match role {
            SpaceRole::Eden => &self.eden,
            SpaceRole::SurvivorFrom(age) => &self.survivor_from[self.survivor_index(age)],
            SpaceRole::SurvivorTo(age) => &self.survivor_to[self.survivor_index(age)],
            other => fatal_error(FatalError::SanityCheck(format!("{} is not a young space", other))),
        }
    }

    pub(crate) fn space_mut(&mut self, role: SpaceRole) -> &mut Space {
        match role {
            SpaceRole::Eden => &mut self.eden,
            SpaceRole::SurvivorFrom(age) => {
                let index = self.survivor_index(age);
                &mut self.survivor_from[index]
            }
            SpaceRole::SurvivorTo(age) => {
                let index = self.survivor_index(age);
                &mut self.survivor_to[index]
            }
            other => fatal_error(FatalError::SanityCheck(format!("{} is not a young space", other))),
        }
    }

    /// Every young space role
    pub fn roles(&self) -> Vec<SpaceRole> {
        let mut roles = self.from_roles();
        roles.extend(self.to_roles());
        roles
    }

    /// Eden and the survivor from-spaces
    pub fn from_roles(&self) -> Vec<SpaceRole> {
        std::iter::once(SpaceRole::Eden)
            .chain(self.survivor_from.iter().map(Space::role))
            .collect()
    }

    pub fn to_roles(&self) -> Vec<SpaceRole> {
        self.survivor_to.iter().map(Space::role).collect()
    }

    pub fn to_spaces_empty(&self) -> bool {
        self.survivor_to.iter().all(Space::is_empty)
    }

    pub fn is_empty(&self) -> bool {
        self.eden.is_empty()
            && self.to_spaces_empty()
            && self.survivor_from.iter().all(Space::is_empty)
    }
}

impl Heap {
    /// Bytes of chunks currently in survivor to-spaces
    pub fn survivor_to_bytes(&self) -> usize {
        self.young
            .to_roles()
            .into_iter()
            .map(|role| self.space_chunk_bytes(role))
            .sum()
    }

    /// Copy an aligned object into the survivor to-space of `age`
    ///
    /// Returns `None` if the survivor budget cannot take another chunk.
    pub(crate) fn promote_young_object(
        &mut self,
        original: ObjRef,
        age: usize,
        max_survivor_size: usize,
    ) -> Option<ObjRef> {
        self.copy_object(original, SpaceRole::SurvivorTo(age as u8), Some(max_survivor_size))
    }

    /// Move a whole chunk into the survivor to-space of `age`
    ///
    /// Returns `false` if the chunk does not fit into the survivor budget.
    pub(crate) fn promote_young_chunk(&mut self, base: usize, age: usize, max_survivor_size: usize) -> bool {
        let size = self.chunk(base).map_or(0, |c| c.size());
        if self.survivor_to_bytes() + size > max_survivor_size {
            return false;
        }
        self.move_chunk(base, SpaceRole::SurvivorTo(age as u8));
        true
    }

    /// Detach every chunk of Eden and the survivor from-spaces
    pub(crate) fn release_young_spaces(&mut self, releaser: &mut ChunkReleaser) {
        for role in self.young.from_roles() {
            for base in self.space(role).chunks().collect::<Vec<_>>() {
                if let Some(memory) = self.detach_chunk(base) {
                    releaser.add(memory);
                }
            }
        }
    }

    /// Survivor to-spaces become the from-spaces of the next collection
    pub(crate) fn swap_young_spaces(&mut self) {
        for age in 1..=self.young.max_survivor_spaces() as u8 {
            self.absorb(SpaceRole::SurvivorFrom(age), SpaceRole::SurvivorTo(age));
        }
    }

    /// Move every young chunk into `role`
    pub(crate) fn absorb_young_into(&mut self, role: SpaceRole) {
        for from in self.young.roles() {
            self.absorb(role, from);
        }
    }
}
