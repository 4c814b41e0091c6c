//! Scan Module - Root enumeration and the transitive closure
//!
//! - `grey`: the reference visitor that promotes or marks what it reaches
//! - `roots`: root sets of a pass and the code cache walk
//! - `stack`: precise stack walking

pub mod grey;
pub mod roots;
pub mod stack;

pub use grey::{GreyQueue, GreyToBlack};
pub use stack::{Frame, FrameKind, FrameStackWalker, Stack, StackFrameVisitor, StackVerifier, StackWalker};
