//! Error Module - SGC Error Types
//!
//! Two families of failures exist in the collector.
//!
//! ## Recoverable errors (`GcError`)
//! - `OutOfMemory` - the escalation path (incremental, then full with soft
//!   references treated as weak) could not free enough memory
//! - `InvalidArgument` - a mutator passed a stale or foreign reference
//! - `ThreadNotAttached` - heap access from a thread unknown to the collector
//! - `Configuration` - invalid `GcConfig`
//! - `NeverCollect` - explicit collection under the never-collect policy
//!
//! ## Fatal errors (`FatalError`)
//! - heap or stack verification failure
//! - a stack frame without a reference map
//! - collector state machine violations, re-entrant collection requests and
//!   sanity-check failures
//! - managed allocation while a collection is in progress
//!
//! Fatal errors never travel through `Result`: `fatal_error` logs the
//! diagnostic and aborts, because relocation may already be underway and the
//! heap cannot be trusted afterwards.

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all SGC operations
///
/// # Examples
///
/// ```rust
/// use sgc::GcError;
///
/// fn report(err: GcError) {
///     match err {
///         GcError::OutOfMemory { requested, used, max } => {
///             eprintln!("OOM: requested {}, used {} of {}", requested, used, max);
///         }
///         other => eprintln!("GC error: {}", other),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum GcError {
    /// Out of memory after exhausting the escalation path
    ///
    /// **When returned:** `collect_on_allocation` ran an incremental and a
    /// forced full collection and the policy still reports the heap as full.
    ///
    /// **Recovery strategy:** The allocation site turns this into a
    /// user-visible failure.
    #[error("Out of memory: requested {requested} bytes, used {used} bytes of {max} bytes")]
    OutOfMemory {
        requested: usize,
        used: usize,
        max: usize,
    },

    /// Invalid argument
    ///
    /// **When returned:** A reference does not denote a live object, a slot
    /// index is out of range, or a frame index does not exist.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid state
    ///
    /// **When returned:** An operation is not allowed in the current
    /// collector state, e.g. a collection request from inside a collection.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The calling mutator thread is not attached
    #[error("Thread {0} is not attached to the collector")]
    ThreadNotAttached(u64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// An explicit collection was requested under the never-collect policy
    #[error("Collection requested ({cause}) but the policy never collects")]
    NeverCollect { cause: &'static str },
}

impl GcError {
    /// Check if this error is recoverable at the allocation boundary
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GcError::OutOfMemory { .. })
    }

    /// Check if this error indicates a bug in the caller or the collector
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            GcError::InvalidState { .. } | GcError::ThreadNotAttached(_) | GcError::NeverCollect { .. }
        )
    }
}

/// Result type alias for SGC operations
pub type Result<T> = std::result::Result<T, GcError>;

/// Unrecoverable collector failures
#[derive(Debug, Clone, Error)]
pub enum FatalError {
    /// Heap verification failed at the given occasion
    #[error("Heap verification {occasion} GC failed ({kind} garbage collection): {details}")]
    VerificationFailed {
        occasion: &'static str,
        kind: &'static str,
        details: String,
    },

    /// A frame without a derivable reference map
    #[error("No reference map for frame {frame} of thread {thread} (code {code}, index {index:?})")]
    NoReferenceMap {
        thread: u64,
        frame: usize,
        code: u32,
        index: Option<u32>,
    },

    /// A frame whose contents cannot be decoded
    #[error("Corrupt stack frame {frame} of thread {thread}: {reason}")]
    CorruptFrame {
        thread: u64,
        frame: usize,
        reason: String,
    },

    /// A reference points outside of every chunk and the image heap
    #[error("Reference {address:#x} does not point into the heap")]
    DanglingReference { address: usize },

    /// State machine violation
    #[error("Illegal collector state transition {from} -> {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Sanity check before or after a collection failed
    #[error("Sanity check failed: {0}")]
    SanityCheck(String),

    /// Managed allocation while the collector runs
    #[error("Managed allocation of {size} bytes during a collection")]
    AllocationDuringCollection { size: usize },

    /// A collection was requested from inside a running collection
    #[error("Re-entrant collection request (cause {cause}) during epoch {epoch}")]
    ReentrantCollection { cause: &'static str, epoch: u64 },

    /// The chunk provider could not supply a to-space chunk
    #[error("Promotion failure: no chunk available for {size} bytes in {space}")]
    PromotionFailure { size: usize, space: String },
}

/// Report a fatal collector error and terminate
///
/// Logs the diagnostic with `log::error!` and aborts the process. Unit tests
/// of this crate unwind instead so that fatal paths can be asserted with
/// `#[should_panic]`.
#[cold]
pub fn fatal_error(err: FatalError) -> ! {
    log::error!("[GC] fatal error: {}", err);
    if cfg!(test) {
        panic!("fatal error: {}", err);
    }
    std::process::abort()
}

/// Abort with a fatal error unless the condition holds
#[macro_export]
macro_rules! guarantee {
    ($cond:expr, $err:expr) => {
        if !$cond {
            $crate::error::fatal_error($err);
        }
    };
}

/// Return early with an error unless the condition holds
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let oom = GcError::OutOfMemory {
            requested: 64,
            used: 1024,
            max: 512,
        };
        assert!(oom.is_recoverable());
        assert!(!oom.is_bug());

        let state = GcError::InvalidState {
            expected: "Idle".into(),
            actual: "Scanning".into(),
        };
        assert!(state.is_bug());
        assert!(!state.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = FatalError::NoReferenceMap {
            thread: 3,
            frame: 1,
            code: 7,
            index: None,
        };
        let text = err.to_string();
        assert!(text.contains("thread 3"));
        assert!(text.contains("code 7"));
    }

    #[test]
    #[should_panic(expected = "fatal error")]
    fn test_fatal_error_unwinds_in_tests() {
        fatal_error(FatalError::SanityCheck("to-space not empty".into()));
    }
}
