//! Object Header - Layout of a managed object
//!
//! Every object starts with a two-word header:
//!
//! ```text
//! ┌──────────────────────┬─────────────────────────────────────┐
//! │ identity hash (u64)  │ status: aligned | marked | forward  │
//! └──────────────────────┴─────────────────────────────────────┘
//! ```
//!
//! The identity hash is assigned at allocation and survives every move, so
//! it identifies "the same object" across collections. The forwarding target
//! is only set while a copying pass runs; released from-space chunks take
//! the stale originals with them. The mark bit is only used by the
//! compacting old generation during a complete collection.

use super::weak::RefKind;
use crate::util::constants::{OBJECT_HEADER_SIZE, WORD_SIZE};
use crate::util::Alignment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;

/// Address of a managed object
///
/// Never zero; a null reference is `Option::<ObjRef>::None`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjRef(NonZeroUsize);

impl ObjRef {
    /// Wrap a raw address, `None` for null
    #[inline]
    pub fn from_address(address: usize) -> Option<Self> {
        NonZeroUsize::new(address).map(ObjRef)
    }

    /// Raw address of the object
    #[inline]
    pub const fn address(self) -> usize {
        self.0.get()
    }

    /// Encode an optional reference as a stack word
    #[inline]
    pub fn encode(slot: Option<ObjRef>) -> usize {
        slot.map_or(0, ObjRef::address)
    }

    /// Decode a stack word holding an optional reference
    #[inline]
    pub fn decode(word: usize) -> Option<ObjRef> {
        ObjRef::from_address(word)
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({:#x})", self.address())
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.address())
    }
}

/// Object header state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    identity: u64,
    aligned: bool,
    marked: bool,
    forwarded: Option<ObjRef>,
}

impl ObjectHeader {
    /// Fresh header for a newly allocated object
    pub fn new(identity: u64, aligned: bool) -> Self {
        Self {
            identity,
            aligned,
            marked: false,
            forwarded: None,
        }
    }

    /// Identity hash, stable across moves
    #[inline]
    pub fn identity(&self) -> u64 {
        self.identity
    }

    /// Object lives in an aligned chunk
    #[inline]
    pub fn is_aligned(&self) -> bool {
        self.aligned
    }

    /// Forwarding target installed by a copying pass
    #[inline]
    pub fn forwardee(&self) -> Option<ObjRef> {
        self.forwarded
    }

    #[inline]
    pub fn is_forwarded(&self) -> bool {
        self.forwarded.is_some()
    }

    /// Install a forwarding marker
    #[inline]
    pub fn forward_to(&mut self, target: ObjRef) {
        debug_assert!(self.forwarded.is_none(), "object forwarded twice");
        self.forwarded = Some(target);
    }

    /// Set the mark bit, returning true if it was clear
    #[inline]
    pub fn mark(&mut self) -> bool {
        !std::mem::replace(&mut self.marked, true)
    }

    #[inline]
    pub fn unmark(&mut self) {
        self.marked = false;
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.marked
    }
}

/// What an object is, as far as the collector cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Ordinary object: all reference slots are strong
    Plain,
    /// Reference object with a separately tracked referent
    Reference {
        kind: RefKind,
        referent: Option<ObjRef>,
    },
}

/// Allocation request: number of reference slots, payload and kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectShape {
    /// Number of reference slots
    pub slots: usize,
    /// Non-reference payload in bytes
    pub payload: usize,
    /// Reference kind, `None` for plain objects
    pub reference: Option<RefKind>,
}

impl ObjectShape {
    /// Plain object with `slots` reference slots
    pub const fn plain(slots: usize) -> Self {
        Self {
            slots,
            payload: 0,
            reference: None,
        }
    }

    /// Plain object with reference slots and a primitive payload
    pub const fn with_payload(slots: usize, payload: usize) -> Self {
        Self {
            slots,
            payload,
            reference: None,
        }
    }

    /// Reference object of the given kind
    pub const fn reference(kind: RefKind) -> Self {
        Self {
            slots: 0,
            payload: 0,
            reference: Some(kind),
        }
    }

    /// Size in bytes, header included, word aligned
    ///
    /// `None` when the size does not fit the address space.
    pub fn checked_size(&self) -> Option<usize> {
        let referent = if self.reference.is_some() { WORD_SIZE } else { 0 };
        let size = self
            .slots
            .checked_mul(WORD_SIZE)?
            .checked_add(OBJECT_HEADER_SIZE + referent)?
            .checked_add(self.payload)?;
        Alignment::checked_align_up(size, Alignment::OBJECT)
    }

    /// Size in bytes, saturating at `usize::MAX` for shapes too large to
    /// allocate
    pub fn size(&self) -> usize {
        self.checked_size().unwrap_or(usize::MAX)
    }
}

/// A managed object stored in a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapObject {
    address: ObjRef,
    size: usize,
    pub header: ObjectHeader,
    pub slots: Vec<Option<ObjRef>>,
    pub kind: ObjectKind,
}

impl HeapObject {
    /// Materialize a new object at `address`
    pub fn new(address: ObjRef, shape: &ObjectShape, identity: u64, aligned: bool) -> Self {
        let kind = match shape.reference {
            Some(kind) => ObjectKind::Reference {
                kind,
                referent: None,
            },
            None => ObjectKind::Plain,
        };
        Self {
            address,
            size: shape.size(),
            header: ObjectHeader::new(identity, aligned),
            slots: vec![None; shape.slots],
            kind,
        }
    }

    #[inline]
    pub fn address(&self) -> ObjRef {
        self.address
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// First address past the object
    #[inline]
    pub fn end(&self) -> usize {
        self.address.address() + self.size
    }

    #[inline]
    pub fn identity(&self) -> u64 {
        self.header.identity()
    }

    /// Copy of this object placed at `target`, with transient header state
    /// cleared
    pub fn relocated(&self, target: ObjRef, aligned: bool) -> Self {
        Self {
            address: target,
            size: self.size,
            header: ObjectHeader::new(self.header.identity(), aligned),
            slots: self.slots.clone(),
            kind: self.kind,
        }
    }

    /// Move this object in place to a new address (compaction)
    pub(crate) fn slide_to(&mut self, target: ObjRef) {
        self.address = target;
        self.header.unmark();
    }

    /// Referent of a reference object
    pub fn referent(&self) -> Option<ObjRef> {
        match self.kind {
            ObjectKind::Reference { referent, .. } => referent,
            ObjectKind::Plain => None,
        }
    }

    /// Reference kind, `None` for plain objects
    pub fn reference_kind(&self) -> Option<RefKind> {
        match self.kind {
            ObjectKind::Reference { kind, .. } => Some(kind),
            ObjectKind::Plain => None,
        }
    }

    /// Replace the referent of a reference object
    pub fn set_referent(&mut self, value: Option<ObjRef>) {
        if let ObjectKind::Reference { referent, .. } = &mut self.kind {
            *referent = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(a: usize) -> ObjRef {
        ObjRef::from_address(a).expect("non-null")
    }

    #[test]
    fn test_null_encoding() {
        assert_eq!(ObjRef::from_address(0), None);
        assert_eq!(ObjRef::encode(None), 0);
        assert_eq!(ObjRef::decode(0x40), Some(addr(0x40)));
    }

    #[test]
    fn test_shape_size_is_word_aligned() {
        assert_eq!(ObjectShape::plain(0).size(), 16);
        assert_eq!(ObjectShape::plain(3).size(), 40);
        assert_eq!(ObjectShape::with_payload(1, 5).size(), 32);
        assert_eq!(ObjectShape::reference(RefKind::Weak).size(), 24);
    }

    #[test]
    fn test_oversized_shapes_have_no_size() {
        assert_eq!(ObjectShape::with_payload(0, usize::MAX - 16).checked_size(), None);
        assert_eq!(ObjectShape::plain(usize::MAX / 4).checked_size(), None);
        assert_eq!(ObjectShape::plain(usize::MAX / 4).size(), usize::MAX);
        assert_eq!(ObjectShape::plain(2).checked_size(), Some(32));
    }

    #[test]
    fn test_mark_reports_first_marking() {
        let mut header = ObjectHeader::new(1, true);
        assert!(header.mark());
        assert!(!header.mark());
        header.unmark();
        assert!(!header.is_marked());
    }

    #[test]
    fn test_relocated_copy_keeps_identity() {
        let mut obj = HeapObject::new(addr(0x1000), &ObjectShape::plain(2), 42, true);
        obj.slots[1] = Some(addr(0x2000));
        obj.header.forward_to(addr(0x3000));

        let copy = obj.relocated(addr(0x3000), true);
        assert_eq!(copy.identity(), 42);
        assert_eq!(copy.slots, obj.slots);
        assert!(!copy.header.is_forwarded());
        assert_eq!(copy.address(), addr(0x3000));
    }

    #[test]
    fn test_referent_access() {
        let mut obj = HeapObject::new(addr(0x1000), &ObjectShape::reference(RefKind::Soft), 1, true);
        assert_eq!(obj.referent(), None);
        obj.set_referent(Some(addr(0x2000)));
        assert_eq!(obj.referent(), Some(addr(0x2000)));
        assert_eq!(obj.reference_kind(), Some(RefKind::Soft));
    }
}
