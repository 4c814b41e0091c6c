//! Reference Objects - Soft, weak, phantom and final references
//!
//! A reference object holds its referent without keeping it alive (soft
//! references keep it alive unless the collector is in an emergency cycle).
//! When a collection finds the referent unreachable, the referent slot is
//! cleared and the reference is linked into the pending list, to be handled
//! outside the safepoint.

use super::header::ObjRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strength of a reference object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefKind {
    /// Cleared only when memory is critically low
    Soft,
    /// Cleared as soon as the referent is unreachable
    Weak,
    /// Cleared and enqueued after the referent is unreachable
    Phantom,
    /// Finalization hook for the referent
    Final,
}

impl RefKind {
    pub fn name(self) -> &'static str {
        match self {
            RefKind::Soft => "soft",
            RefKind::Weak => "weak",
            RefKind::Phantom => "phantom",
            RefKind::Final => "final",
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of a pending reference handed to the reference handler
///
/// `reference` is only valid until the next safepoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingReference {
    pub reference: ObjRef,
    pub kind: RefKind,
    pub identity: u64,
}
