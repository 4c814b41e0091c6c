//! Collector State Machine
//!
//! ```text
//! Idle ──► Requested ──► SafepointReached ──► Scanning ──► Promoting
//!   ▲          │                                 ▲            │
//!   │          └─(coalesced)─► Idle              │      ┌─────┴──────┐
//!   │                                            │      ▼            │
//!   │                                            │  SweepCompact     │
//!   │                                            │      │            │
//!   │                                            │      ▼            ▼
//!   │                                            │  ReferenceProcessing
//!   │                                            │      │
//!   │                                    (next pass)    ▼
//!   │                                            └── Releasing
//!   │                                            │      │
//!   │                                    (retry) │      ▼
//!   └──────────────────────────────────────── Resizing ◄┘
//! ```
//!
//! Any other transition is a collector bug and fatal.

use crate::error::{fatal_error, FatalError};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum CollectorState {
    Idle = 0,
    Requested = 1,
    SafepointReached = 2,
    Scanning = 3,
    Promoting = 4,
    SweepCompact = 5,
    ReferenceProcessing = 6,
    Releasing = 7,
    Resizing = 8,
}

impl CollectorState {
    const ALL: [CollectorState; 9] = [
        CollectorState::Idle,
        CollectorState::Requested,
        CollectorState::SafepointReached,
        CollectorState::Scanning,
        CollectorState::Promoting,
        CollectorState::SweepCompact,
        CollectorState::ReferenceProcessing,
        CollectorState::Releasing,
        CollectorState::Resizing,
    ];

    fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(CollectorState::Idle)
    }

    pub fn name(self) -> &'static str {
        match self {
            CollectorState::Idle => "Idle",
            CollectorState::Requested => "Requested",
            CollectorState::SafepointReached => "SafepointReached",
            CollectorState::Scanning => "Scanning",
            CollectorState::Promoting => "Promoting",
            CollectorState::SweepCompact => "SweepCompact",
            CollectorState::ReferenceProcessing => "ReferenceProcessing",
            CollectorState::Releasing => "Releasing",
            CollectorState::Resizing => "Resizing",
        }
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: CollectorState) -> bool {
        use CollectorState::*;
        matches!(
            (self, next),
            (Idle, Requested)
                | (Requested, SafepointReached)
                | (Requested, Idle)
                | (SafepointReached, Scanning)
                | (Scanning, Promoting)
                | (Promoting, SweepCompact)
                | (Promoting, ReferenceProcessing)
                | (SweepCompact, ReferenceProcessing)
                | (ReferenceProcessing, Releasing)
                | (Releasing, Scanning)
                | (Releasing, Resizing)
                | (Resizing, Scanning)
                | (Resizing, Idle)
        )
    }

    /// A cycle is executing at a safepoint
    pub fn is_collecting(self) -> bool {
        !matches!(self, CollectorState::Idle | CollectorState::Requested)
    }
}

impl fmt::Display for CollectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Atomically published collector state
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(CollectorState::Idle as u8))
    }

    #[inline]
    pub fn get(&self) -> CollectorState {
        CollectorState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next`, fatal if the transition is illegal
    pub fn transition(&self, next: CollectorState) {
        let current = self.get();
        if !current.can_transition_to(next) {
            fatal_error(FatalError::IllegalTransition {
                from: current.name(),
                to: next.name(),
            });
        }
        log::trace!("[GC] state {} -> {}", current, next);
        self.0.store(next as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle_path() {
        let state = StateCell::new();
        for next in [
            CollectorState::Requested,
            CollectorState::SafepointReached,
            CollectorState::Scanning,
            CollectorState::Promoting,
            CollectorState::ReferenceProcessing,
            CollectorState::Releasing,
            CollectorState::Scanning,
            CollectorState::Promoting,
            CollectorState::SweepCompact,
            CollectorState::ReferenceProcessing,
            CollectorState::Releasing,
            CollectorState::Resizing,
            CollectorState::Idle,
        ] {
            state.transition(next);
        }
        assert_eq!(state.get(), CollectorState::Idle);
    }

    #[test]
    fn test_coalesced_request() {
        let state = StateCell::new();
        state.transition(CollectorState::Requested);
        assert!(!state.get().is_collecting());
        state.transition(CollectorState::Idle);
    }

    #[test]
    #[should_panic(expected = "Illegal collector state transition Idle -> Scanning")]
    fn test_illegal_transition_is_fatal() {
        StateCell::new().transition(CollectorState::Scanning);
    }
}
