//! Alignment Utilities
//!
//! Power-of-two alignment helpers for addresses and sizes.

/// Alignment - utility for alignment operations
pub struct Alignment;

impl Alignment {
    /// Align value up to boundary
    ///
    /// # Examples
    /// ```
    /// use sgc::util::Alignment;
    ///
    /// assert_eq!(Alignment::align_up(100, 8), 104);
    /// assert_eq!(Alignment::align_up(64, 8), 64);
    /// ```
    #[inline]
    pub const fn align_up(value: usize, alignment: usize) -> usize {
        (value + alignment - 1) & !(alignment - 1)
    }

    /// Align value up to boundary, `None` on overflow
    #[inline]
    pub const fn checked_align_up(value: usize, alignment: usize) -> Option<usize> {
        match value.checked_add(alignment - 1) {
            Some(sum) => Some(sum & !(alignment - 1)),
            None => None,
        }
    }

    /// Align value down to boundary
    #[inline]
    pub const fn align_down(value: usize, alignment: usize) -> usize {
        value & !(alignment - 1)
    }

    /// Check if value is aligned
    #[inline]
    pub const fn is_aligned(value: usize, alignment: usize) -> bool {
        value & (alignment - 1) == 0
    }

    /// Object alignment in the managed heap
    pub const OBJECT: usize = super::constants::WORD_SIZE;
}
