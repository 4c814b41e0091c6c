//! Generations - Young and old spaces with their promotion entry points
//!
//! - Young: Eden plus one survivor from/to pair per age
//!   (`1..=max_survivor_spaces`). Objects are copied into the survivor
//!   to-space of their next age until they reach the tenuring age or the
//!   survivor budget is exhausted.
//! - Old: two copying spaces, or one space swept and compacted in place.
//!
//! Promotion of a single object copies it (aligned chunks) or moves its
//! whole chunk (unaligned chunks and chunks with pinned objects).

pub mod old;
pub mod young;

pub use old::OldGeneration;
pub use young::YoungGeneration;
