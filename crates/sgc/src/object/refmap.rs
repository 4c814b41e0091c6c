//! Reference Map - Which frame slots hold object references
//!
//! Compiled code records, for every call site, a bitmap of the stack slots
//! that are live references at that point. The stack walker consults the map
//! to decide which words of a frame to hand to the reference visitor.
//!
//! ```text
//! Frame slots:      0      1      2      3
//!                ┌──────┬──────┬──────┬──────┐
//!                │ ref  │ i64  │ ref  │ f64  │
//!                └──────┴──────┴──────┴──────┘
//! Bitmap:           1      0      1      0     = 0b0101
//! ```
//!
//! # Example
//!
//! ```rust
//! use sgc::object::ReferenceMap;
//!
//! let map = ReferenceMap::from_slots(&[0, 2]);
//! assert!(map.is_reference(0));
//! assert!(!map.is_reference(1));
//! assert_eq!(map.iter().collect::<Vec<_>>(), vec![0, 2]);
//! ```

use serde::{Deserialize, Serialize};

/// Maximum number of slots tracked per frame (bitmap width)
pub const MAX_SLOTS: usize = 64;

/// Reference map for one call site of compiled code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReferenceMap {
    /// Bit `i` set: slot `i` holds a reference
    bitmap: u64,
}

impl ReferenceMap {
    /// Create an empty reference map with no references
    #[inline]
    pub const fn empty() -> Self {
        Self { bitmap: 0 }
    }

    /// Create a reference map with the given slot indices
    ///
    /// # Panics
    ///
    /// Panics if a slot index is `>= MAX_SLOTS`.
    pub fn from_slots(slots: &[usize]) -> Self {
        let mut bitmap = 0u64;
        for &slot in slots {
            assert!(slot < MAX_SLOTS, "slot {} exceeds reference map width", slot);
            bitmap |= 1u64 << slot;
        }
        Self { bitmap }
    }

    /// Create a reference map from a raw bitmap
    #[inline]
    pub const fn from_bitmap(bitmap: u64) -> Self {
        Self { bitmap }
    }

    /// Check if a given slot holds a reference
    #[inline]
    pub const fn is_reference(&self, slot: usize) -> bool {
        slot < MAX_SLOTS && (self.bitmap & (1u64 << slot)) != 0
    }

    /// Number of reference slots
    #[inline]
    pub const fn count(&self) -> u32 {
        self.bitmap.count_ones()
    }

    /// Raw bitmap representation
    #[inline]
    pub const fn bitmap(&self) -> u64 {
        self.bitmap
    }

    /// Check if no slot holds a reference
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.bitmap == 0
    }

    /// Highest referenced slot index plus one
    #[inline]
    pub const fn span(&self) -> usize {
        (u64::BITS - self.bitmap.leading_zeros()) as usize
    }

    /// Iterate over reference slot indices in ascending order
    #[inline]
    pub const fn iter(&self) -> ReferenceMapIter {
        ReferenceMapIter {
            bitmap: self.bitmap,
        }
    }
}

/// Iterator over reference slots of a `ReferenceMap`
#[derive(Debug, Clone, Copy)]
pub struct ReferenceMapIter {
    /// Remaining bits to yield
    bitmap: u64,
}

impl Iterator for ReferenceMapIter {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.bitmap == 0 {
            return None;
        }
        let slot = self.bitmap.trailing_zeros() as usize;
        self.bitmap &= self.bitmap - 1;
        Some(slot)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.bitmap.count_ones() as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ReferenceMapIter {}

impl std::iter::FusedIterator for ReferenceMapIter {}
