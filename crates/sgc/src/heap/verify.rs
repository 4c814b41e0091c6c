//! Heap Verification - Structural checks around collections
//!
//! Runs before a collection, between its passes and after it, when enabled
//! in `GcConfig`. Any failure is fatal: a heap that fails verification cannot
//! be collected safely.

use super::{Heap, Location, SpaceRole};
use crate::error::{fatal_error, FatalError};
use crate::object::{HeapObject, ObjRef};

/// When a verification runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOccasion {
    Before,
    During,
    After,
}

impl VerifyOccasion {
    pub fn name(self) -> &'static str {
        match self {
            VerifyOccasion::Before => "before",
            VerifyOccasion::During => "during",
            VerifyOccasion::After => "after",
        }
    }
}

/// Result of a single check, failure carries the diagnostic
pub type VerifyResult = std::result::Result<(), String>;

/// Heap structure verifier
#[derive(Debug, Clone, Copy)]
pub struct HeapVerifier {
    occasion: VerifyOccasion,
    complete: bool,
}

impl HeapVerifier {
    pub fn new(occasion: VerifyOccasion, complete: bool) -> Self {
        Self { occasion, complete }
    }

    /// Verify and abort on failure
    pub fn verify_or_abort(&self, heap: &Heap) {
        if let Err(details) = self.verify(heap) {
            self.fail(details);
        }
    }

    /// Report a failed check found by another verifier at this occasion
    pub fn fail(&self, details: String) -> ! {
        fatal_error(FatalError::VerificationFailed {
            occasion: self.occasion.name(),
            kind: if self.complete { "complete" } else { "incremental" },
            details,
        })
    }

    /// Run every heap check, returning the first failure
    pub fn verify(&self, heap: &Heap) -> VerifyResult {
        log::trace!("[GC] verifying heap {} collection", self.occasion.name());
        verify_spaces(heap)?;
        verify_chunks(heap)?;
        verify_references(heap)?;
        verify_remembered_set(heap)?;
        Ok(())
    }
}

/// A reference held by a root or object must denote a live, unforwarded
/// object in a chunk or the image heap
pub fn verify_reference(heap: &Heap, target: ObjRef) -> VerifyResult {
    match heap.locate(target.address()) {
        Location::Image(_) => Ok(()),
        Location::Chunk { role, .. } => {
            if role.is_to_space() {
                return Err(format!("{} points into {} outside of a collection", target, role));
            }
            match heap.object(target) {
                Some(object) if object.header.is_forwarded() => {
                    Err(format!("{} points to a forwarded object", target))
                }
                Some(_) => Ok(()),
                None => Err(format!("{} does not start an object", target)),
            }
        }
        Location::Unmapped => Err(format!("{} points outside of the heap", target)),
    }
}

fn all_roles(heap: &Heap) -> Vec<SpaceRole> {
    let mut roles = heap.young.roles();
    roles.extend(heap.old.roles());
    roles
}

fn verify_spaces(heap: &Heap) -> VerifyResult {
    let mut members = 0;
    for role in all_roles(heap) {
        let space = heap.space(role);
        if role.is_to_space() && !space.is_empty() {
            return Err(format!("to-space {} holds {} chunks", role, space.len()));
        }
        for base in space.chunks() {
            members += 1;
            match heap.chunk(base) {
                Some(chunk) if chunk.space() == role => {}
                Some(chunk) => {
                    return Err(format!(
                        "chunk {:#x} listed in {} but tagged {}",
                        base,
                        role,
                        chunk.space()
                    ))
                }
                None => return Err(format!("space {} lists unknown chunk {:#x}", role, base)),
            }
        }
    }
    if members != heap.chunks.len() {
        return Err(format!(
            "{} chunks in the table but {} space memberships",
            heap.chunks.len(),
            members
        ));
    }
    Ok(())
}

fn verify_chunks(heap: &Heap) -> VerifyResult {
    for chunk in heap.chunks() {
        if !chunk.is_aligned() && chunk.objects().len() > 1 {
            return Err(format!(
                "unaligned chunk {:#x} holds {} objects",
                chunk.base(),
                chunk.objects().len()
            ));
        }
        let mut cursor = chunk.start();
        for object in chunk.objects() {
            let address = object.address().address();
            if address < cursor || object.end() > chunk.top() {
                return Err(format!(
                    "object {} overlaps its neighbour or exceeds the top of chunk {:#x}",
                    object.address(),
                    chunk.base()
                ));
            }
            if object.header.is_aligned() != chunk.is_aligned() {
                return Err(format!("object {} has a stale alignment tag", object.address()));
            }
            if object.header.is_forwarded() {
                return Err(format!("object {} is still forwarded", object.address()));
            }
            if object.header.is_marked() {
                return Err(format!("object {} is still marked", object.address()));
            }
            cursor = object.end();
        }
        if chunk.is_no_slide() {
            return Err(format!("chunk {:#x} is still excluded from compaction", chunk.base()));
        }
    }
    Ok(())
}

fn object_targets(object: &HeapObject) -> impl Iterator<Item = ObjRef> + '_ {
    object.slots.iter().flatten().copied().chain(object.referent())
}

fn verify_references(heap: &Heap) -> VerifyResult {
    for chunk in heap.chunks() {
        for object in chunk.objects() {
            for target in object_targets(object) {
                verify_reference(heap, target)
                    .map_err(|e| format!("slot of {}: {}", object.address(), e))?;
            }
        }
    }
    for object in heap.image.iter() {
        for target in object.slots.iter().flatten() {
            verify_reference(heap, *target)
                .map_err(|e| format!("image object {}: {}", object.address(), e))?;
        }
    }
    for reference in heap.pending_references() {
        verify_reference(heap, *reference).map_err(|e| format!("pending list: {}", e))?;
    }
    Ok(())
}

fn verify_remembered_set(heap: &Heap) -> VerifyResult {
    for chunk in heap.chunks().filter(|c| c.space().is_old()) {
        for object in chunk.objects() {
            let young = object_targets(object).any(|t| heap.is_young(t));
            if young && !chunk.is_card_dirty(object.address().address()) {
                return Err(format!(
                    "old object {} references young objects but its card is clean",
                    object.address()
                ));
            }
        }
    }
    for (index, object) in heap.image.iter().enumerate() {
        let young = object.slots.iter().flatten().any(|t| heap.is_young(*t));
        if young && !heap.image.object_at(index).is_dirty() {
            return Err(format!(
                "image object {} references young objects but is clean",
                object.address()
            ));
        }
    }
    Ok(())
}
