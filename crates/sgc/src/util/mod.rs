//! Util Module - Shared Utilities
//!
//! Address arithmetic and sizing constants used throughout the collector.

pub mod alignment;

pub use alignment::Alignment;

/// Sizing constants for the simulated heap
pub mod constants {
    /// 1 Kilobyte
    pub const KB: usize = 1024;
    /// 1 Megabyte
    pub const MB: usize = 1024 * 1024;
    /// 1 Gigabyte
    pub const GB: usize = 1024 * 1024 * 1024;

    /// Word size of the managed heap
    pub const WORD_SIZE: usize = 8;

    /// Object header: identity hash word plus forwarding/status word
    pub const OBJECT_HEADER_SIZE: usize = 2 * WORD_SIZE;

    /// Bytes reserved at the start of every chunk for its header
    pub const CHUNK_HEADER_SIZE: usize = 64;

    /// Bytes covered by a single remembered-set card
    pub const CARD_SIZE: usize = 512;

    /// Granularity of unaligned (large object) chunks
    pub const UNALIGNED_CHUNK_GRANULE: usize = 4 * KB;

    /// First virtual address handed out by the default chunk provider
    pub const HEAP_BASE: usize = 0x10_0000_0000;

    /// First virtual address of the image heap
    pub const IMAGE_HEAP_BASE: usize = 0x1000_0000;
}
