//! Object Module - Managed object model
//!
//! Objects are records stored inside chunks at virtual addresses. A
//! reference is an address; copying allocates a new address and leaves a
//! forwarding marker behind in the original header.

pub mod header;
pub mod refmap;
pub mod weak;

pub use header::{HeapObject, ObjRef, ObjectHeader, ObjectKind, ObjectShape};
pub use refmap::ReferenceMap;
pub use weak::{PendingReference, RefKind};
