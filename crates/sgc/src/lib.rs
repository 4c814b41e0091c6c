//! # SGC - Serial Generational Garbage Collector
//!
//! SGC is a generational, safepoint-synchronized garbage collector core for a
//! managed runtime. Collections stop every mutator thread at a safepoint,
//! scan roots, copy live young objects through aged survivor spaces, promote
//! tenured objects into the old generation and release the chunks left
//! behind in one batch.
//!
//! ## Overview
//!
//! - **Chunked heap**: memory comes from a `ChunkProvider` in fixed-size
//!   aligned chunks (and unaligned chunks for large objects), grouped into
//!   spaces
//! - **Two generations**: Eden and survivor spaces per age, plus a copying
//!   or a sweep-and-compact old generation
//! - **Incremental and complete passes**: incremental passes scan only the
//!   remembered set of the old generation, complete passes collect everything
//! - **Safepoints**: collections run as VM operations while every attached
//!   mutator is parked; racing requests are coalesced by epoch
//! - **Pinning**: pinned objects never move, their chunks are adopted whole
//! - **Reference objects**: soft, weak, phantom and final references are
//!   cleared and handed to a reference handler outside the safepoint
//!
//! ## Quick Start
//!
//! ```rust
//! use sgc::{GcCause, GcConfig, GcContext, ObjectShape};
//! use sgc::util::constants::MB;
//!
//! fn main() -> Result<(), sgc::GcError> {
//!     let gc = GcContext::new(GcConfig::for_testing(16 * MB))?;
//!     let thread = gc.attach_thread();
//!
//!     // Allocate a pair and keep it reachable from a thread local
//!     let head = thread.allocate(&ObjectShape::plain(1))?;
//!     let tail = thread.allocate(&ObjectShape::plain(0))?;
//!     thread.write_slot(head, 0, Some(tail))?;
//!     thread.set_thread_local(0, Some(head))?;
//!
//!     gc.collect(GcCause::Explicit)?;
//!
//!     // Objects moved, references were rewritten
//!     let head = thread.thread_local(0).expect("rooted");
//!     assert!(thread.read_slot(head, 0)?.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Mutator Threads                      │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐               │
//! │  │  TLAB    │  │  TLAB    │  │  TLAB    │   stacks,     │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘   locals      │
//! │       └─────────────┴─────────────┘                     │
//! │                     │ write barrier (cards)             │
//! └─────────────────────┼───────────────────────────────────┘
//!                       │ collect(cause) ──► safepoint
//! ┌─────────────────────┼───────────────────────────────────┐
//! │                VM operation                             │
//! │                     ▼                                   │
//! │  roots: pinned, dirty cards, stacks, locals, image      │
//! │                     │                                   │
//! │  grey ──► black: copy / promote / mark                  │
//! │                     │                                   │
//! │  old sweep or compaction (complete passes)              │
//! │                     │                                   │
//! │  references, code cache, chunk release                  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Collection Cycle
//!
//! 1. **Request**: a mutator asks for a collection; the request records the
//!    epoch it observed
//! 2. **Safepoint**: every attached mutator parks; a request made obsolete
//!    meanwhile is coalesced
//! 3. **Incremental pass**: young objects are copied into survivor spaces or
//!    promoted
//! 4. **Complete pass** (when the policy asks for it, or forced): every
//!    reachable object ends up in the old generation
//! 5. **Escalation**: a cycle that leaves the heap over its limit retries
//!    with a complete pass that treats soft references as weak
//! 6. **Release**: freed chunks go back to the provider, the epoch advances
//!
//! ## Modules
//!
//! - [`config`]: collector configuration and validation
//! - [`error`]: recoverable errors and fatal collector failures
//! - [`gc`]: the collector context, requests and the collection cycle
//! - [`generation`]: young and old generation promotion
//! - [`heap`]: chunks, spaces, the image heap and verification
//! - [`logging`]: telemetry events and the GC logger
//! - [`object`]: object model, reference maps and reference objects
//! - [`policy`]: when to collect and how much
//! - [`reference`]: discovery and processing of reference objects
//! - [`relocate`]: object copying and old generation compaction
//! - [`runtime`]: safepoints, code cache, pinning, reference handler
//! - [`scan`]: root scanning, stack walking and the grey-to-black closure
//! - [`stats`]: accounting, timers and pause histograms
//! - [`util`]: alignment helpers and constants

// Core modules
pub mod config;
pub mod error;
pub mod gc;
pub mod policy;

// Heap and object model
pub mod generation;
pub mod heap;
pub mod object;

// Collection algorithm
pub mod reference;
pub mod relocate;
pub mod scan;

// Runtime integration and monitoring
pub mod logging;
pub mod runtime;
pub mod stats;

// Utilities
pub mod util;

pub use config::GcConfig;
pub use error::{FatalError, GcError, Result};
pub use gc::{
    CollectionRequest, CollectorState, GcCause, GcContext, GcContextBuilder, MaxHeapSizeSuspension,
    MutatorThread, PinHandle,
};
pub use heap::{ChunkProvider, Heap, HeapAccounting, PooledChunkProvider, SpaceRole};
pub use logging::{GcEvent, GcEventSink, GcLogger, GcLoggerConfig, LogLevel, NullSink};
pub use object::{ObjRef, ObjectShape, PendingReference, RefKind, ReferenceMap};
pub use policy::{BasicPolicy, CollectionPolicy, NeverCollectPolicy};
pub use runtime::{CodeCache, CodeId, CodeInfo, RuntimeCodeCache};
pub use scan::{Frame, FrameStackWalker, StackWalker};
pub use stats::{CycleRecord, GcSummary};

/// SGC version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create a collector context with the configuration from `SGC_*`
/// environment variables
///
/// # Examples
///
/// ```rust
/// let gc = sgc::init()?;
/// assert_eq!(gc.collection_epoch(), 0);
/// # Ok::<(), sgc::GcError>(())
/// ```
pub fn init() -> Result<GcContext> {
    GcContext::new(GcConfig::from_env())
}

/// Create a collector context with a custom configuration
///
/// # Arguments
///
/// * `config` - collector configuration, validated before use
pub fn init_with_config(config: GcConfig) -> Result<GcContext> {
    GcContext::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_config() {
        let config = GcConfig::for_testing(util::constants::MB);
        let gc = init_with_config(config).expect("context");
        assert_eq!(gc.state(), CollectorState::Idle);
        assert_eq!(gc.policy_name(), "basic");
    }

    #[test]
    fn test_config_validation() {
        let config = GcConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
