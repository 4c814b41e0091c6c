//! Safepoint Management
//!
//! A safepoint is a state in which every attached mutator thread is either
//! parked in a poll or inside a blocking region, so its stack and thread
//! locals can be inspected and rewritten.
//!
//! Safepoint Strategy:
//! 1. A thread that wants a VM operation takes the operation lock and sets
//!    the state to REQUESTED
//! 2. Mutators park when their next poll sees the request
//! 3. Once every attached thread is parked the state becomes REACHED and the
//!    operation runs on the requesting thread
//! 4. The state returns to NONE and parked threads resume
//!
//! ```text
//! SAFEPOINT_NONE (0) ─────┐
//!     │                   │
//!     ▼                   │
//! SAFEPOINT_REQUESTED (1) │
//!     │                   │
//!     ▼                   │
//! SAFEPOINT_REACHED (2) ──┘ (after the operation)
//! ```
//!
//! A thread waiting for the operation lock counts as parked, so two threads
//! requesting operations at the same time never wait for each other.

use crate::error::{fatal_error, FatalError};
use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Safepoint state constants
pub const SAFEPOINT_NONE: u8 = 0;
pub const SAFEPOINT_REQUESTED: u8 = 1;
pub const SAFEPOINT_REACHED: u8 = 2;

/// Work that must run while every mutator is stopped
pub trait VmOperation {
    type Output;

    /// Name for logs
    fn name(&self) -> &'static str;

    /// Whether the operation still needs to run
    ///
    /// Checked before and after the operation lock is taken, so a request
    /// made obsolete by a concurrent operation is dropped.
    fn has_work(&self) -> bool;

    /// The operation lock was taken, the safepoint is about to be requested
    fn on_requested(&self) {}

    /// The operation lost its work while waiting for the operation lock
    fn on_coalesced(&self) {}

    fn operate(self) -> Self::Output;
}

#[derive(Debug, Default)]
struct SafepointState {
    /// Attachment count per thread
    attached: IndexMap<ThreadId, usize>,
    /// Attachments currently parked or blocked
    parked: usize,
    /// Thread running the current operation
    owner: Option<ThreadId>,
    /// Number of completed operations
    released: u64,
}

impl SafepointState {
    fn total(&self) -> usize {
        self.attached.values().sum()
    }

    fn own(&self, thread: ThreadId) -> usize {
        self.attached.get(&thread).copied().unwrap_or(0)
    }
}

/// Safepoint - coordination point for mutators and VM operations
pub struct Safepoint {
    state: AtomicU8,
    inner: Mutex<SafepointState>,
    changed: Condvar,
    operation_lock: Mutex<()>,
    operations: AtomicU64,
    last_sync_ns: AtomicU64,
}

impl Safepoint {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SAFEPOINT_NONE),
            inner: Mutex::new(SafepointState::default()),
            changed: Condvar::new(),
            operation_lock: Mutex::new(()),
            operations: AtomicU64::new(0),
            last_sync_ns: AtomicU64::new(0),
        }
    }

    /// Current safepoint state
    #[inline]
    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.state() != SAFEPOINT_NONE
    }

    /// Number of attachments, counting nested attachments of a thread
    pub fn attached_threads(&self) -> usize {
        self.inner.lock().total()
    }

    pub fn threads_at_safepoint(&self) -> usize {
        self.inner.lock().parked
    }

    /// Completed VM operations
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Time the last operation waited for mutators to park
    pub fn last_sync_time(&self) -> Duration {
        Duration::from_nanos(self.last_sync_ns.load(Ordering::Relaxed))
    }

    /// Whether the calling thread is attached
    pub fn is_attached(&self) -> bool {
        self.inner.lock().own(thread::current().id()) > 0
    }

    /// Register the calling thread as a mutator
    ///
    /// Waits for a running operation to finish first.
    pub fn attach(&self) {
        let me = thread::current().id();
        let mut inner = self.inner.lock();
        while self.is_requested() && inner.owner != Some(me) {
            self.changed.wait(&mut inner);
        }
        *inner.attached.entry(me).or_insert(0) += 1;
    }

    /// Remove one attachment of the calling thread
    pub fn detach(&self) {
        let me = thread::current().id();
        let mut inner = self.inner.lock();
        match inner.attached.get_mut(&me) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                inner.attached.shift_remove(&me);
            }
            None => log::warn!("[GC] detaching a thread that is not attached"),
        }
        self.changed.notify_all();
    }

    /// Park the calling thread if an operation is pending
    #[inline]
    pub fn poll(&self) {
        if self.is_requested() {
            self.park();
        }
    }

    #[cold]
    fn park(&self) {
        let me = thread::current().id();
        let mut inner = self.inner.lock();
        let own = inner.own(me);
        if own == 0 || inner.owner == Some(me) || !self.is_requested() {
            return;
        }
        let seen = inner.released;
        inner.parked += own;
        self.changed.notify_all();
        while inner.released == seen {
            self.changed.wait(&mut inner);
        }
        inner.parked -= own;
    }

    fn enter_blocked(&self) -> usize {
        let mut inner = self.inner.lock();
        let own = inner.own(thread::current().id());
        inner.parked += own;
        self.changed.notify_all();
        own
    }

    fn leave_blocked(&self, own: usize) {
        let me = thread::current().id();
        let mut inner = self.inner.lock();
        while self.is_requested() && inner.owner != Some(me) {
            self.changed.wait(&mut inner);
        }
        inner.parked -= own;
    }

    /// Run `f` as if parked, allowing operations to proceed meanwhile
    ///
    /// `f` must not touch the heap.
    pub fn blocking<R>(&self, f: impl FnOnce() -> R) -> R {
        let own = self.enter_blocked();
        let result = f();
        self.leave_blocked(own);
        result
    }

    /// Run `op` at a safepoint
    ///
    /// Returns `None` if the operation had no work left once it could run.
    /// Requesting an operation from inside an operation is fatal.
    pub fn execute<O: VmOperation>(&self, op: O) -> Option<O::Output> {
        if !op.has_work() {
            return None;
        }
        let me = thread::current().id();
        if self.inner.lock().owner == Some(me) {
            fatal_error(FatalError::ReentrantCollection {
                cause: op.name(),
                epoch: self.operations(),
            });
        }

        let own = self.enter_blocked();
        let guard = self.operation_lock.lock();
        op.on_requested();
        let result = if op.has_work() {
            let started = Instant::now();
            {
                let mut inner = self.inner.lock();
                inner.owner = Some(me);
                self.state.store(SAFEPOINT_REQUESTED, Ordering::Release);
                while inner.parked < inner.total() {
                    self.changed.wait(&mut inner);
                }
                self.state.store(SAFEPOINT_REACHED, Ordering::Release);
            }
            self.last_sync_ns
                .store(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
            log::trace!("[GC] safepoint reached for {} in {:?}", op.name(), started.elapsed());

            let output = op.operate();

            let mut inner = self.inner.lock();
            inner.owner = None;
            inner.released += 1;
            self.state.store(SAFEPOINT_NONE, Ordering::Release);
            self.operations.fetch_add(1, Ordering::Relaxed);
            self.changed.notify_all();
            Some(output)
        } else {
            op.on_coalesced();
            None
        };
        drop(guard);
        self.leave_blocked(own);
        result
    }
}

impl Default for Safepoint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;

    struct Count<'a> {
        counter: &'a AtomicUsize,
        work: bool,
    }

    impl VmOperation for Count<'_> {
        type Output = usize;

        fn name(&self) -> &'static str {
            "count"
        }

        fn has_work(&self) -> bool {
            self.work
        }

        fn operate(self) -> usize {
            self.counter.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    #[test]
    fn test_attach_detach() {
        let safepoint = Safepoint::new();
        safepoint.attach();
        safepoint.attach();
        assert_eq!(safepoint.attached_threads(), 2);
        assert!(safepoint.is_attached());
        safepoint.detach();
        safepoint.detach();
        assert_eq!(safepoint.attached_threads(), 0);
        assert!(!safepoint.is_attached());
    }

    #[test]
    fn test_execute_without_other_threads() {
        let safepoint = Safepoint::new();
        let counter = AtomicUsize::new(0);
        safepoint.attach();
        assert_eq!(safepoint.execute(Count { counter: &counter, work: true }), Some(1));
        assert_eq!(safepoint.execute(Count { counter: &counter, work: false }), None);
        assert_eq!(safepoint.operations(), 1);
        assert_eq!(safepoint.state(), SAFEPOINT_NONE);
        safepoint.detach();
    }

    #[test]
    fn test_operation_waits_for_polling_mutator() {
        let safepoint = Arc::new(Safepoint::new());
        let stop = Arc::new(AtomicBool::new(false));
        let polls = Arc::new(AtomicUsize::new(0));

        let (ready_tx, ready_rx) = crossbeam::channel::bounded(1);
        let mutator = {
            let safepoint = safepoint.clone();
            let stop = stop.clone();
            let polls = polls.clone();
            thread::spawn(move || {
                safepoint.attach();
                ready_tx.send(()).expect("send");
                while !stop.load(Ordering::SeqCst) {
                    safepoint.poll();
                    polls.fetch_add(1, Ordering::Relaxed);
                }
                safepoint.detach();
            })
        };
        ready_rx.recv().expect("ready");

        let counter = AtomicUsize::new(0);
        for _ in 0..10 {
            safepoint.execute(Count { counter: &counter, work: true });
        }
        stop.store(true, Ordering::SeqCst);
        mutator.join().expect("mutator");
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(safepoint.threads_at_safepoint(), 0);
    }

    #[test]
    fn test_blocking_region_does_not_stall_operations() {
        let safepoint = Arc::new(Safepoint::new());
        let (tx, rx) = crossbeam::channel::bounded::<()>(0);
        let (attached_tx, attached_rx) = crossbeam::channel::bounded(1);
        let blocked = {
            let safepoint = safepoint.clone();
            thread::spawn(move || {
                safepoint.attach();
                attached_tx.send(()).expect("send");
                safepoint.blocking(|| rx.recv().expect("recv"));
                safepoint.detach();
            })
        };
        attached_rx.recv().expect("attached");

        let counter = AtomicUsize::new(0);
        assert_eq!(safepoint.execute(Count { counter: &counter, work: true }), Some(1));
        tx.send(()).expect("send");
        blocked.join().expect("thread");
    }

    struct Nested<'a>(&'a Safepoint);

    impl VmOperation for Nested<'_> {
        type Output = ();

        fn name(&self) -> &'static str {
            "nested"
        }

        fn has_work(&self) -> bool {
            true
        }

        fn operate(self) {
            let counter = AtomicUsize::new(0);
            self.0.execute(Count { counter: &counter, work: true });
        }
    }

    #[test]
    #[should_panic(expected = "Re-entrant collection")]
    fn test_reentrant_operation_is_fatal() {
        let safepoint = Safepoint::new();
        safepoint.execute(Nested(&safepoint));
    }
}
