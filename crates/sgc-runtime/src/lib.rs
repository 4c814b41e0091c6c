//! SGC Runtime Library
//!
//! Process-level owner of the collector for a managed runtime:
//! - collector initialization and shutdown
//! - thread attachment and safepoint polling
//! - allocation, roots and barriered stores through a C ABI

mod gc;

pub use gc::*;
