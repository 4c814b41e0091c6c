//! Relocate Module - Object copying and old-space compaction
//!
//! Relocation moves objects for two reasons:
//! - Evacuation: live objects of from-spaces are copied into to-spaces
//!   (survivor or old) and the originals are forwarded
//! - Compaction: live objects of the compacting old space slide towards the
//!   start of the space, driven by per-chunk forwarding tables
//!
//! Both run only inside a collection, with every mutator parked, so no
//! barrier has to observe a half-moved object.

pub mod compaction;
pub mod copy;
pub mod forwarding;

pub use compaction::{CompactionPlan, CompactionStats};
pub use forwarding::ForwardingTable;
