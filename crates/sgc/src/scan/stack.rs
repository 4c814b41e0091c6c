//! Stack Walking - Precise reference slots of mutator stacks
//!
//! A mutator stack is a list of frames, innermost last. The walker decides
//! for every frame which words are references:
//!
//! | Frame | Reference slots |
//! |-------|-----------------|
//! | Compiled | reference map of the call site, looked up in the code info |
//! | Interpreter leave stub | slot 0 packs the variable frame size, tags select slots `1..=size` |
//! | Deoptimized | materialized values held off-stack, tags select values |
//!
//! A compiled frame without a reference map cannot be scanned precisely.
//! That is a code generation bug and fatal.

use crate::error::{fatal_error, FatalError};
use crate::heap::verify::{verify_reference, VerifyResult};
use crate::heap::Heap;
use crate::object::{ObjRef, ReferenceMap};
use crate::runtime::code_cache::{CodeCache, CodeId};

/// How a frame's slots are described
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Frame of compiled code at a call site with the given map index
    Compiled {
        code: CodeId,
        reference_map_index: Option<u32>,
    },
    /// Transition from compiled code into the interpreter
    InterpreterLeaveStub { tags: ReferenceMap },
    /// Values of a deoptimized frame, visited as a unit
    Deoptimized { tags: ReferenceMap },
}

/// One stack frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub slots: Vec<usize>,
}

impl Frame {
    pub fn compiled(code: CodeId, reference_map_index: Option<u32>, slots: Vec<usize>) -> Self {
        Self {
            kind: FrameKind::Compiled {
                code,
                reference_map_index,
            },
            slots,
        }
    }

    /// Interpreter frame; `tags` index into `values`
    pub fn interpreter(tags: ReferenceMap, values: Vec<usize>) -> Self {
        let mut slots = Vec::with_capacity(values.len() + 1);
        slots.push(values.len());
        slots.extend(values);
        Self {
            kind: FrameKind::InterpreterLeaveStub { tags },
            slots,
        }
    }

    pub fn deoptimized(tags: ReferenceMap, values: Vec<usize>) -> Self {
        Self {
            kind: FrameKind::Deoptimized { tags },
            slots: values,
        }
    }
}

/// A mutator's stack of frames, innermost last
#[derive(Debug, Clone, Default)]
pub struct Stack {
    frames: Vec<Frame>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn frame_mut(&mut self, index: usize) -> Option<&mut Frame> {
        self.frames.get_mut(index)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Receives the reference slots of a stack
pub trait StackFrameVisitor {
    /// A word holding a reference or zero
    fn visit_reference_slot(&mut self, slot: &mut usize);

    /// A frame belongs to runtime-compiled code
    fn visit_runtime_code(&mut self, _code: CodeId) {}
}

/// Enumerates the reference slots of one thread's stack
pub trait StackWalker: Send + Sync {
    fn walk_stack(
        &self,
        thread: u64,
        stack: &mut Stack,
        code_cache: &dyn CodeCache,
        visitor: &mut dyn StackFrameVisitor,
    );
}

/// Default walker over `Frame` descriptions
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameStackWalker;

fn corrupt(thread: u64, frame: usize, reason: String) -> ! {
    fatal_error(FatalError::CorruptFrame {
        thread,
        frame,
        reason,
    })
}

fn visit_tagged(
    thread: u64,
    index: usize,
    slots: &mut [usize],
    tags: ReferenceMap,
    visitor: &mut dyn StackFrameVisitor,
) {
    for slot in tags.iter() {
        match slots.get_mut(slot) {
            Some(word) => visitor.visit_reference_slot(word),
            None => corrupt(
                thread,
                index,
                format!("tagged slot {} beyond {} slots", slot, slots.len()),
            ),
        }
    }
}

impl StackWalker for FrameStackWalker {
    fn walk_stack(
        &self,
        thread: u64,
        stack: &mut Stack,
        code_cache: &dyn CodeCache,
        visitor: &mut dyn StackFrameVisitor,
    ) {
        for (index, frame) in stack.frames.iter_mut().enumerate().rev() {
            match frame.kind {
                FrameKind::Compiled {
                    code,
                    reference_map_index,
                } => {
                    let info = code_cache.code_info(code);
                    let Some(map) = info.and_then(|i| i.reference_map(reference_map_index)) else {
                        fatal_error(FatalError::NoReferenceMap {
                            thread,
                            frame: index,
                            code: code.0,
                            index: reference_map_index,
                        });
                    };
                    visit_tagged(thread, index, &mut frame.slots, map, visitor);
                    if info.is_some_and(|i| !i.is_aot()) {
                        visitor.visit_runtime_code(code);
                    }
                }
                FrameKind::InterpreterLeaveStub { tags } => {
                    let Some((&mut size, values)) = frame.slots.split_first_mut() else {
                        corrupt(thread, index, "interpreter frame without size slot".into());
                    };
                    if size != values.len() {
                        corrupt(
                            thread,
                            index,
                            format!("interpreter frame size {} but {} values", size, values.len()),
                        );
                    }
                    visit_tagged(thread, index, values, tags, visitor);
                }
                FrameKind::Deoptimized { tags } => {
                    visit_tagged(thread, index, &mut frame.slots, tags, visitor);
                }
            }
        }
    }
}

/// Checks that every reference slot of a stack denotes a valid object
pub struct StackVerifier<'a> {
    heap: &'a Heap,
    thread: u64,
    failure: Option<String>,
}

impl<'a> StackVerifier<'a> {
    pub fn new(heap: &'a Heap, thread: u64) -> Self {
        Self {
            heap,
            thread,
            failure: None,
        }
    }

    /// Walk `stack` and report the first invalid slot
    pub fn verify(
        mut self,
        walker: &dyn StackWalker,
        stack: &mut Stack,
        code_cache: &dyn CodeCache,
    ) -> VerifyResult {
        walker.walk_stack(self.thread, stack, code_cache, &mut self);
        match self.failure {
            Some(details) => Err(details),
            None => Ok(()),
        }
    }
}

impl StackFrameVisitor for StackVerifier<'_> {
    fn visit_reference_slot(&mut self, slot: &mut usize) {
        if self.failure.is_some() {
            return;
        }
        if let Some(target) = ObjRef::decode(*slot) {
            if let Err(e) = verify_reference(self.heap, target) {
                self.failure = Some(format!("stack of thread {}: {}", self.thread, e));
            }
        }
    }
}
