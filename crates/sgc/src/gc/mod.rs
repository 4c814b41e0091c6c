//! GC Controller - Collection requests and the collector context
//!
//! `GcContext` is the single collector instance of a runtime. It owns the
//! heap and every collaborator behind one VM lock and runs collections as
//! safepoint operations:
//!
//! ```text
//! collect(cause) ──► CollectionRequest ──► Safepoint::execute
//!                                              │ has_work?
//!                        coalesced ◄── no ─────┤
//!                                              ▼ yes
//!                                  all mutators parked
//!                                              │
//!                                  collect_operation (epoch + 1)
//!                                              │
//!                                  reference handling, OOM check
//! ```
//!
//! A request is coalesced when, by the time it could run, a cycle that
//! started after the request already satisfied it: any cycle for a normal
//! request, a complete pass for a forced full request.

pub mod collector;
pub mod mutator;
pub mod state;

pub use collector::VmState;
pub use mutator::{MaxHeapSizeSuspension, MutatorThread, PinHandle};
pub use state::{CollectorState, StateCell};

use crate::config::GcConfig;
use crate::error::{GcError, Result};
use crate::heap::provider::ChunkProvider;
use crate::heap::verify::VerifyOccasion;
use crate::heap::{Heap, HeapAccounting};
use crate::logging::{GcEvent, GcEventSink, GcLogger, GcLoggerConfig};
use crate::object::PendingReference;
use crate::policy::{BasicPolicy, CollectionPolicy};
use crate::runtime::code_cache::{CodeCache, CodeId, CodeInfo, RuntimeCodeCache};
use crate::runtime::{ReferenceHandler, Safepoint, VmOperation};
use crate::scan::{FrameStackWalker, StackWalker};
use crate::stats::{CycleRecord, GcAccounting, GcSummary, Timers};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Why a collection was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GcCause {
    /// An allocation could not be satisfied
    Allocation,
    /// Requested by the runtime or the application
    Explicit,
    /// Advisory request the policy accepted
    Hinted,
    /// Final collection before the runtime exits
    Shutdown,
    /// Cause defined by the embedding runtime
    Other(&'static str),
}

impl GcCause {
    pub fn name(self) -> &'static str {
        match self {
            GcCause::Allocation => "Allocation",
            GcCause::Explicit => "Explicit",
            GcCause::Hinted => "Hinted",
            GcCause::Shutdown => "Shutdown",
            GcCause::Other(name) => name,
        }
    }
}

impl fmt::Display for GcCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value record passed into the safepoint operation and returned from it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionRequest {
    pub cause: GcCause,
    /// Epoch observed by the requester
    pub epoch: u64,
    /// Complete passes observed by the requester
    pub complete_count: u64,
    pub requested_at: Instant,
    pub force_full: bool,
    /// Filled in by the cycle: the heap is still over its limit
    pub out_of_memory: bool,
}

struct CollectOperation<'c> {
    ctx: &'c GcContext,
    request: CollectionRequest,
}

impl VmOperation for CollectOperation<'_> {
    type Output = CollectionRequest;

    fn name(&self) -> &'static str {
        self.request.cause.name()
    }

    fn has_work(&self) -> bool {
        self.ctx.has_work(&self.request)
    }

    fn on_requested(&self) {
        self.ctx.state.transition(CollectorState::Requested);
    }

    fn on_coalesced(&self) {
        self.ctx.state.transition(CollectorState::Idle);
        log::debug!(
            "[GC] {} request of epoch {} coalesced",
            self.request.cause,
            self.request.epoch
        );
    }

    fn operate(self) -> CollectionRequest {
        self.ctx.collect_operation(self.request)
    }
}

/// Builder for `GcContext`
///
/// Every collaborator defaults to the implementation shipped with this crate.
pub struct GcContextBuilder {
    config: GcConfig,
    policy: Option<Box<dyn CollectionPolicy>>,
    provider: Option<Box<dyn ChunkProvider>>,
    code_cache: Option<Box<dyn CodeCache>>,
    stack_walker: Option<Box<dyn StackWalker>>,
    sink: Option<Arc<dyn GcEventSink>>,
}

impl GcContextBuilder {
    pub fn policy(mut self, policy: Box<dyn CollectionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn chunk_provider(mut self, provider: Box<dyn ChunkProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn code_cache(mut self, code_cache: Box<dyn CodeCache>) -> Self {
        self.code_cache = Some(code_cache);
        self
    }

    pub fn stack_walker(mut self, walker: Box<dyn StackWalker>) -> Self {
        self.stack_walker = Some(walker);
        self
    }

    /// Telemetry receiver, a console `GcLogger` by default
    pub fn event_sink(mut self, sink: Arc<dyn GcEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<GcContext> {
        let config = self.config;
        config.validate()?;

        let heap = match self.provider {
            Some(provider) => Heap::new(&config, provider),
            None => Heap::with_default_provider(&config),
        };
        let policy = self
            .policy
            .unwrap_or_else(|| Box::new(BasicPolicy::new(&config)));
        let never_collect = policy.is_never_collect();
        let code_cache = self
            .code_cache
            .unwrap_or_else(|| Box::new(RuntimeCodeCache::new()));
        let stack_walker = self
            .stack_walker
            .unwrap_or_else(|| Box::new(FrameStackWalker));
        let sink = self.sink.unwrap_or_else(|| {
            Arc::new(GcLogger::new(GcLoggerConfig {
                console: config.verbose,
                ..Default::default()
            }))
        });

        log::info!(
            "[GC] initialized: {} policy, max heap {} bytes, {} byte chunks, {} old generation",
            policy.name(),
            config.max_heap_size,
            config.aligned_chunk_size,
            if config.compacting_old_generation { "compacting" } else { "copying" }
        );

        Ok(GcContext {
            vm: Mutex::new(VmState::new(heap, policy, code_cache, stack_walker)),
            config,
            never_collect,
            safepoint: Safepoint::new(),
            epoch: AtomicU64::new(0),
            complete_count: AtomicU64::new(0),
            is_complete: AtomicBool::new(false),
            state: StateCell::new(),
            sink,
            reference_handler: ReferenceHandler::new(),
            started: Instant::now(),
        })
    }
}

/// The collector instance of one runtime
///
/// # Examples
///
/// ```rust
/// use sgc::{GcConfig, GcContext, GcCause, ObjectShape};
/// use sgc::util::constants::MB;
///
/// let gc = GcContext::new(GcConfig::for_testing(MB)).unwrap();
/// let thread = gc.attach_thread();
/// let obj = thread.allocate(&ObjectShape::plain(2)).unwrap();
/// thread.set_thread_local(0, Some(obj)).unwrap();
///
/// gc.collect(GcCause::Explicit).unwrap();
/// assert_eq!(gc.collection_epoch(), 1);
/// assert!(thread.thread_local(0).is_some());
/// ```
pub struct GcContext {
    pub(crate) config: GcConfig,
    pub(crate) vm: Mutex<VmState>,
    never_collect: bool,
    pub(crate) safepoint: Safepoint,
    pub(crate) epoch: AtomicU64,
    pub(crate) complete_count: AtomicU64,
    pub(crate) is_complete: AtomicBool,
    pub(crate) state: StateCell,
    pub(crate) sink: Arc<dyn GcEventSink>,
    reference_handler: ReferenceHandler,
    started: Instant,
}

impl GcContext {
    /// Context with the default collaborators
    pub fn new(config: GcConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: GcConfig) -> GcContextBuilder {
        GcContextBuilder {
            config,
            policy: None,
            provider: None,
            code_cache: None,
            stack_walker: None,
            sink: None,
        }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    // ========================================================================
    // COLLECTION REQUESTS
    // ========================================================================

    fn new_request(&self, cause: GcCause, force_full: bool) -> CollectionRequest {
        CollectionRequest {
            cause,
            epoch: self.epoch.load(Ordering::Acquire),
            complete_count: self.complete_count.load(Ordering::Acquire),
            requested_at: Instant::now(),
            force_full,
            out_of_memory: false,
        }
    }

    /// Whether `request` has not been satisfied by a cycle since it was made
    pub fn has_work(&self, request: &CollectionRequest) -> bool {
        if request.force_full {
            self.complete_count.load(Ordering::Acquire) == request.complete_count
        } else {
            self.epoch.load(Ordering::Acquire) == request.epoch
        }
    }

    /// Run the request at a safepoint and hand cleared references over
    fn request_collection(&self, cause: GcCause, force_full: bool) -> Option<CollectionRequest> {
        let request = self.new_request(cause, force_full);
        let outcome = self.safepoint.execute(CollectOperation { ctx: self, request });
        self.do_reference_handling();
        outcome
    }

    fn check_collecting(&self, cause: GcCause) -> Result<()> {
        if self.never_collect {
            return Err(GcError::NeverCollect { cause: cause.name() });
        }
        Ok(())
    }

    fn out_of_memory(&self, requested: usize, used: usize, max: usize) -> GcError {
        self.sink.record(&GcEvent::AllocationFailure {
            size: requested,
            used,
            max,
        });
        log::warn!(
            "[GC] out of memory: requested {} bytes, {} of {} bytes used",
            requested,
            used,
            max
        );
        GcError::OutOfMemory { requested, used, max }
    }

    /// Turn an out-of-memory cycle outcome into an error, or let the policy
    /// resize
    fn check_outcome(&self, outcome: Option<CollectionRequest>, requested: usize) -> Result<()> {
        if !outcome.is_some_and(|r| r.out_of_memory) {
            return Ok(());
        }
        if self.should_ignore_out_of_memory() {
            log::debug!("[GC] heap limit suspended, ignoring out of memory");
            return Ok(());
        }
        let mut vm = self.vm.lock();
        let heap = vm.heap.accounting();
        let used = heap.used_chunk_bytes();
        if vm.policy.is_out_of_memory(used) {
            let max = vm.policy.maximum_heap_size();
            drop(vm);
            return Err(self.out_of_memory(requested, used, max));
        }
        vm.policy.update_size_parameters(&heap);
        Ok(())
    }

    /// Request a collection; the policy decides incremental or complete
    pub fn collect(&self, cause: GcCause) -> Result<()> {
        self.check_collecting(cause)?;
        let outcome = self.request_collection(cause, false);
        self.check_outcome(outcome, 0)
    }

    /// Request a collection with a complete pass
    pub fn collect_completely(&self, cause: GcCause) -> Result<()> {
        self.check_collecting(cause)?;
        let outcome = self.request_collection(cause, true);
        self.check_outcome(outcome, 0)
    }

    /// Collect for an allocation of `size` bytes that could not be satisfied
    ///
    /// Runs at least one cycle unless a concurrent one made it obsolete. The
    /// cycle itself escalates to a complete pass with soft references
    /// treated as weak before out of memory is reported.
    pub fn collect_on_allocation(&self, size: usize) -> Result<()> {
        if self.never_collect {
            let vm = self.vm.lock();
            let heap = vm.heap.accounting();
            let max = vm.policy.maximum_heap_size();
            let over = heap.eden_chunk_bytes.saturating_add(size) > max;
            if over && !self.should_ignore_out_of_memory() {
                drop(vm);
                return Err(self.out_of_memory(size, heap.used_chunk_bytes(), max));
            }
            return Ok(());
        }
        let outcome = self.request_collection(GcCause::Allocation, false);
        self.check_outcome(outcome, size)
    }

    /// Advisory request
    ///
    /// Returns whether a cycle ran for it: `false` when the policy declined
    /// the hint or a concurrent cycle already satisfied the request.
    pub fn collection_hint(&self, full: bool) -> Result<bool> {
        let wanted = {
            let vm = self.vm.lock();
            !self.never_collect && vm.policy.should_collect_on_hint(full, &vm.heap.accounting())
        };
        if !wanted {
            return Ok(false);
        }
        let outcome = self.request_collection(GcCause::Hinted, full);
        let ran = outcome.is_some();
        self.check_outcome(outcome, 0)?;
        Ok(ran)
    }

    /// Hand the pending list to the reference handler
    ///
    /// Runs outside the safepoint. Returns the number of references handed
    /// over.
    pub fn do_reference_handling(&self) -> usize {
        let batch: Vec<PendingReference> = {
            let mut vm = self.vm.lock();
            let pending = vm.heap.take_pending_references();
            pending
                .into_iter()
                .filter_map(|reference| {
                    let object = vm.heap.object(reference)?;
                    Some(PendingReference {
                        reference,
                        kind: object.reference_kind()?,
                        identity: object.identity(),
                    })
                })
                .collect()
        };
        let count = batch.len();
        if count > 0 {
            log::trace!("[GC] handing {} cleared references to the handler", count);
            self.reference_handler.enqueue(batch);
        }
        count
    }

    // ========================================================================
    // OBSERVATION
    // ========================================================================

    /// Number of executed cycles
    pub fn collection_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Whether the current or most recent pass is complete
    pub fn is_complete_collection(&self) -> bool {
        self.is_complete.load(Ordering::Acquire)
    }

    /// Number of complete passes run so far
    pub fn complete_collection_count(&self) -> u64 {
        self.complete_count.load(Ordering::Acquire)
    }

    /// Milliseconds since the last complete pass ended, or since the context
    /// was created when none has run yet
    pub fn millis_since_last_whole_heap_examined(&self) -> u64 {
        let since = self.vm.lock().last_whole_heap_examined.unwrap_or(self.started);
        since.elapsed().as_millis() as u64
    }

    pub fn state(&self) -> CollectorState {
        self.state.get()
    }

    pub fn safepoint(&self) -> &Safepoint {
        &self.safepoint
    }

    pub fn reference_handler(&self) -> &ReferenceHandler {
        &self.reference_handler
    }

    pub fn policy_name(&self) -> &'static str {
        self.vm.lock().policy.name()
    }

    pub fn heap_accounting(&self) -> HeapAccounting {
        self.vm.lock().heap.accounting()
    }

    pub fn accounting(&self) -> GcAccounting {
        self.vm.lock().accounting.clone()
    }

    /// Phase timers of the most recent cycle
    pub fn timers(&self) -> Timers {
        self.vm.lock().timers.clone()
    }

    pub fn last_cycle(&self) -> Option<CycleRecord> {
        self.vm.lock().history.last().cloned()
    }

    /// Records of the most recent cycles, oldest first
    pub fn cycle_history(&self) -> Vec<CycleRecord> {
        self.vm.lock().history.iter().cloned().collect()
    }

    /// Chunk bases handed to the provider by the most recent release
    pub fn last_released_chunks(&self) -> Vec<usize> {
        self.vm.lock().releaser.last_batch().to_vec()
    }

    /// Run `f` on the heap under the VM lock
    pub fn with_heap<R>(&self, f: impl FnOnce(&Heap) -> R) -> R {
        f(&self.vm.lock().heap)
    }

    /// Run `f` on the heap under the VM lock, e.g. to set up image objects
    pub fn with_heap_mut<R>(&self, f: impl FnOnce(&mut Heap) -> R) -> R {
        f(&mut self.vm.lock().heap)
    }

    /// Install compiled code; its constants and tether must be live objects
    pub fn install_code(&self, info: CodeInfo) -> Result<CodeId> {
        let mut vm = self.vm.lock();
        let vm = &mut *vm;
        let objects = info.tether().into_iter().chain(info.constants().iter().flatten().copied());
        for object in objects {
            if !vm.heap.is_valid_reference(object) {
                return Err(GcError::InvalidArgument(format!("{} is not a live object", object)));
            }
        }
        Ok(vm.code_cache.install(info))
    }

    pub fn with_code_cache<R>(&self, f: impl FnOnce(&mut dyn CodeCache) -> R) -> R {
        f(&mut *self.vm.lock().code_cache)
    }

    /// Verify the heap now; failure is fatal
    pub fn verify_heap(&self) {
        let complete = self.is_complete_collection();
        self.vm.lock().verify(VerifyOccasion::After, complete);
    }

    // ========================================================================
    // SHUTDOWN
    // ========================================================================

    pub fn summary(&self) -> GcSummary {
        let vm = self.vm.lock();
        let heap = vm.heap.accounting();
        GcSummary::from_parts(
            vm.policy.name(),
            self.collection_epoch(),
            &vm.accounting,
            &vm.pauses,
            &vm.timers,
            heap.used_chunk_bytes(),
            heap.committed_bytes(),
            self.started.elapsed().as_secs(),
        )
    }

    /// Log the summary and return it
    pub fn print_gc_summary(&self) -> GcSummary {
        let summary = self.summary();
        for line in summary.to_string().lines() {
            log::info!("[GC] {}", line);
        }
        summary
    }

    /// Deliver outstanding references and stop the reference handler
    pub fn shutdown(&self) {
        self.do_reference_handling();
        self.reference_handler.stop();
        if self.config.print_gc_summary {
            self.print_gc_summary();
        }
        log::debug!("[GC] shut down after {} collections", self.collection_epoch());
    }
}

impl fmt::Debug for GcContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcContext")
            .field("epoch", &self.collection_epoch())
            .field("complete_count", &self.complete_collection_count())
            .field("state", &self.state())
            .finish()
    }
}
