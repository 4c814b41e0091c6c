//! Mutator Threads - Attachment, allocation and roots of managed threads
//!
//! A thread must be attached before it allocates or holds references. Every
//! attached thread owns a stack of frames, thread-local reference slots and
//! a TLAB. Attached threads must reach safepoints: allocation polls, and
//! long-running code calls `safepoint_poll` or wraps blocking work in
//! `blocking`.
//!
//! `MutatorThread` is the RAII form of an attachment and cannot leave the OS
//! thread it was attached on. Runtimes that manage attachment themselves use
//! the thread-id based methods of `GcContext` directly.

use super::{GcCause, GcContext};
use crate::error::{GcError, Result};
use crate::object::{ObjRef, ObjectShape};
use crate::runtime::PinId;
use crate::scan::{Frame, Stack};
use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    /// Heap limit suspensions held by the current thread
    static MAX_HEAP_SIZE_SUSPENSIONS: Cell<usize> = const { Cell::new(0) };
}

impl GcContext {
    /// Attach the calling thread and return its collector id
    ///
    /// Waits while a collection is running.
    pub fn attach_current_thread(&self) -> u64 {
        self.safepoint.attach();
        let id = self.vm.lock().threads.register();
        log::trace!("[GC] attached thread {}", id);
        id
    }

    /// Detach a thread attached on the calling OS thread
    pub fn detach_current_thread(&self, thread: u64) {
        if self.vm.lock().threads.remove(thread).is_none() {
            log::warn!("[GC] detaching unknown thread {}", thread);
        }
        self.safepoint.detach();
        log::trace!("[GC] detached thread {}", thread);
    }

    pub fn attach_thread(&self) -> MutatorThread<'_> {
        MutatorThread {
            ctx: self,
            id: self.attach_current_thread(),
            _not_send: PhantomData,
        }
    }

    pub fn attached_threads(&self) -> usize {
        self.vm.lock().threads.len()
    }

    /// Suspend the heap limit for the calling thread until the guard drops
    ///
    /// Only has an effect with `ignore_max_heap_size_while_suspended`.
    /// Suspensions nest.
    pub fn suspend_max_heap_size(&self) -> MaxHeapSizeSuspension {
        MAX_HEAP_SIZE_SUSPENSIONS.with(|n| n.set(n.get() + 1));
        MaxHeapSizeSuspension {
            _not_send: PhantomData,
        }
    }

    /// Whether an out-of-memory outcome is ignored on the calling thread
    pub fn should_ignore_out_of_memory(&self) -> bool {
        self.config.ignore_max_heap_size_while_suspended
            && MAX_HEAP_SIZE_SUSPENSIONS.with(|n| n.get() > 0)
    }

    /// Allocate without collecting
    ///
    /// Returns `None` when the policy wants a collection first (only if
    /// `consult_policy`) or the heap limit would be exceeded.
    fn try_allocate(&self, thread: u64, shape: &ObjectShape, consult_policy: bool) -> Result<Option<ObjRef>> {
        let mut vm = self.vm.lock();
        let vm = &mut *vm;
        let record = vm
            .threads
            .get_mut(thread)
            .ok_or(GcError::ThreadNotAttached(thread))?;
        if let Some(object) = vm.heap.allocate_in_tlab(&mut record.tlab, shape) {
            return Ok(Some(object));
        }

        let heap = vm.heap.accounting();
        if consult_policy && vm.policy.should_collect_on_allocation(&heap) {
            return Ok(None);
        }
        let needed = shape.size().max(vm.heap.aligned_chunk_size());
        if !self.should_ignore_out_of_memory()
            && vm.policy.is_out_of_memory(heap.used_chunk_bytes().saturating_add(needed))
        {
            return Ok(None);
        }
        Ok(vm.heap.allocate_in_new_chunk(&mut record.tlab, shape))
    }

    /// Allocate an object for an attached thread
    ///
    /// Polls the safepoint first. When the TLAB is exhausted and the policy
    /// asks for a collection, collects and retries once. A shape whose size
    /// overflows the address space is out of memory without collecting.
    pub fn allocate(&self, thread: u64, shape: &ObjectShape) -> Result<ObjRef> {
        self.safepoint.poll();
        if shape.checked_size().is_none() {
            let (used, max) = {
                let vm = self.vm.lock();
                (vm.heap.accounting().used_chunk_bytes(), vm.policy.maximum_heap_size())
            };
            return Err(self.out_of_memory(usize::MAX, used, max));
        }
        if let Some(object) = self.try_allocate(thread, shape, true)? {
            return Ok(object);
        }

        self.collect_on_allocation(shape.size())?;
        self.safepoint.poll();
        match self.try_allocate(thread, shape, false)? {
            Some(object) => Ok(object),
            None => {
                let (used, max) = {
                    let vm = self.vm.lock();
                    (vm.heap.accounting().used_chunk_bytes(), vm.policy.maximum_heap_size())
                };
                Err(self.out_of_memory(shape.size(), used, max))
            }
        }
    }

    /// Run `f` on the stack of an attached thread
    pub fn with_stack<R>(&self, thread: u64, f: impl FnOnce(&mut Stack) -> R) -> Result<R> {
        let mut vm = self.vm.lock();
        let record = vm
            .threads
            .get_mut(thread)
            .ok_or(GcError::ThreadNotAttached(thread))?;
        Ok(f(&mut record.stack))
    }

    /// Store a thread-local reference, growing the slot table as needed
    pub fn set_thread_local(&self, thread: u64, index: usize, value: Option<ObjRef>) -> Result<()> {
        let mut vm = self.vm.lock();
        let vm = &mut *vm;
        if let Some(target) = value {
            if !vm.heap.is_valid_reference(target) {
                return Err(GcError::InvalidArgument(format!("{} is not a live object", target)));
            }
        }
        let record = vm
            .threads
            .get_mut(thread)
            .ok_or(GcError::ThreadNotAttached(thread))?;
        if record.thread_locals.len() <= index {
            record.thread_locals.resize(index + 1, None);
        }
        record.thread_locals[index] = value;
        Ok(())
    }

    pub fn thread_local(&self, thread: u64, index: usize) -> Result<Option<ObjRef>> {
        let vm = self.vm.lock();
        let record = vm.threads.get(thread).ok_or(GcError::ThreadNotAttached(thread))?;
        Ok(record.thread_locals.get(index).copied().flatten())
    }

    /// Pin `object` until the returned id is released with `unpin`
    pub fn pin(&self, object: ObjRef) -> Result<PinId> {
        let mut vm = self.vm.lock();
        let vm = &mut *vm;
        vm.pinned.pin(&mut vm.heap, object)
    }

    /// Release a pin; `false` if it was already released
    pub fn unpin(&self, id: PinId) -> bool {
        let mut vm = self.vm.lock();
        let vm = &mut *vm;
        vm.pinned.unpin(&mut vm.heap, id)
    }
}

/// Attachment of the calling thread, detached on drop
pub struct MutatorThread<'c> {
    ctx: &'c GcContext,
    id: u64,
    _not_send: PhantomData<*const ()>,
}

impl<'c> MutatorThread<'c> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn context(&self) -> &'c GcContext {
        self.ctx
    }

    pub fn allocate(&self, shape: &ObjectShape) -> Result<ObjRef> {
        self.ctx.allocate(self.id, shape)
    }

    pub fn push_frame(&self, frame: Frame) -> Result<()> {
        self.ctx.with_stack(self.id, |stack| stack.push(frame))
    }

    pub fn pop_frame(&self) -> Result<Option<Frame>> {
        self.ctx.with_stack(self.id, Stack::pop)
    }

    /// Reference held in a stack slot, as rewritten by the last collection
    pub fn stack_reference(&self, frame: usize, slot: usize) -> Result<Option<ObjRef>> {
        self.ctx.with_stack(self.id, |stack| {
            stack
                .frame(frame)
                .and_then(|f| f.slots.get(slot))
                .and_then(|&word| ObjRef::decode(word))
        })
    }

    pub fn set_thread_local(&self, index: usize, value: Option<ObjRef>) -> Result<()> {
        self.ctx.set_thread_local(self.id, index, value)
    }

    pub fn thread_local(&self, index: usize) -> Option<ObjRef> {
        self.ctx.thread_local(self.id, index).ok().flatten()
    }

    pub fn read_slot(&self, holder: ObjRef, index: usize) -> Result<Option<ObjRef>> {
        self.ctx.with_heap(|heap| heap.read_slot(holder, index))
    }

    /// Store with the write barrier
    pub fn write_slot(&self, holder: ObjRef, index: usize, value: Option<ObjRef>) -> Result<()> {
        self.ctx.with_heap_mut(|heap| heap.write_slot(holder, index, value))
    }

    pub fn referent(&self, reference: ObjRef) -> Result<Option<ObjRef>> {
        self.ctx.with_heap(|heap| heap.referent(reference))
    }

    pub fn set_referent(&self, reference: ObjRef, value: Option<ObjRef>) -> Result<()> {
        self.ctx.with_heap_mut(|heap| heap.set_referent(reference, value))
    }

    /// Identity hash, stable across moves
    pub fn identity(&self, object: ObjRef) -> Option<u64> {
        self.ctx.with_heap(|heap| heap.object(object).map(|o| o.identity()))
    }

    pub fn pin(&self, object: ObjRef) -> Result<PinHandle<'c>> {
        let id = self.ctx.pin(object)?;
        Ok(PinHandle {
            ctx: self.ctx,
            id,
            object,
        })
    }

    pub fn collect(&self, cause: GcCause) -> Result<()> {
        self.ctx.collect(cause)
    }

    pub fn collect_completely(&self, cause: GcCause) -> Result<()> {
        self.ctx.collect_completely(cause)
    }

    pub fn safepoint_poll(&self) {
        self.ctx.safepoint.poll();
    }

    pub fn suspend_max_heap_size(&self) -> MaxHeapSizeSuspension {
        self.ctx.suspend_max_heap_size()
    }

    /// Run `f` without holding up collections; `f` must not touch the heap
    pub fn blocking<R>(&self, f: impl FnOnce() -> R) -> R {
        self.ctx.safepoint.blocking(f)
    }
}

impl Drop for MutatorThread<'_> {
    fn drop(&mut self) {
        self.ctx.detach_current_thread(self.id);
    }
}

/// A pin, released on drop
pub struct PinHandle<'c> {
    ctx: &'c GcContext,
    id: PinId,
    object: ObjRef,
}

impl PinHandle<'_> {
    /// The pinned object; its address does not change while pinned
    pub fn object(&self) -> ObjRef {
        self.object
    }

    pub fn id(&self) -> PinId {
        self.id
    }
}

impl Drop for PinHandle<'_> {
    fn drop(&mut self) {
        self.ctx.unpin(self.id);
    }
}

/// Heap limit suspension of one thread, restored on drop
#[must_use = "the heap limit is restored when the guard is dropped"]
pub struct MaxHeapSizeSuspension {
    _not_send: PhantomData<*const ()>,
}

impl Drop for MaxHeapSizeSuspension {
    fn drop(&mut self) {
        MAX_HEAP_SIZE_SUSPENSIONS.with(|n| n.set(n.get().saturating_sub(1)));
    }
}
