//! Collection Cycle - Body of the collection VM operation
//!
//! Runs on the thread that won the safepoint while every mutator is parked:
//!
//! 1. `run`: timers, verification, telemetry and the epoch around the cycle
//! 2. `collect_impl`: one attempt, plus the emergency retry that treats soft
//!    references as weak when the heap is still over its limit
//! 3. `do_collect_impl`: an incremental pass, a complete pass, or both
//! 4. `do_collect_once`: accounting and policy callbacks around one pass
//! 5. `core`: scan, sweep or compact, references, code cache, release

use super::state::CollectorState;
use super::{CollectionRequest, GcContext};
use crate::error::FatalError;
use crate::guarantee;
use crate::heap::verify::{verify_reference, HeapVerifier, VerifyOccasion};
use crate::heap::{ChunkReleaser, Heap, HeapSizes, SpaceRole};
use crate::logging::GcEvent;
use crate::object::ObjRef;
use crate::policy::CollectionPolicy;
use crate::reference::ReferenceProcessor;
use crate::relocate::CompactionPlan;
use crate::runtime::code_cache::CodeCache;
use crate::runtime::{PinnedObjects, ThreadTable};
use crate::scan::grey::resolve_weak;
use crate::scan::roots::clean_code_cache;
use crate::scan::{GreyToBlack, StackFrameVisitor, StackVerifier, StackWalker};
use crate::stats::{CycleHistory, CycleRecord, GcAccounting, GcTimer, Histogram, PassCounters, Timers};
use indexmap::IndexSet;
use std::sync::atomic::Ordering;
use std::time::Instant;

/// Everything the collector mutates, guarded by the context's VM lock
pub struct VmState {
    pub(crate) heap: Heap,
    pub(crate) threads: ThreadTable,
    pub(crate) code_cache: Box<dyn CodeCache>,
    pub(crate) stack_walker: Box<dyn StackWalker>,
    pub(crate) policy: Box<dyn CollectionPolicy>,
    pub(crate) references: ReferenceProcessor,
    pub(crate) releaser: ChunkReleaser,
    pub(crate) pinned: PinnedObjects,
    pub(crate) accounting: GcAccounting,
    pub(crate) timers: Timers,
    pub(crate) pauses: Histogram,
    pub(crate) history: CycleHistory,
    /// End of the last complete pass
    pub(crate) last_whole_heap_examined: Option<Instant>,
}

impl VmState {
    pub(crate) fn new(
        heap: Heap,
        policy: Box<dyn CollectionPolicy>,
        code_cache: Box<dyn CodeCache>,
        stack_walker: Box<dyn StackWalker>,
    ) -> Self {
        let mut timers = Timers::new();
        timers.mutator.open();
        Self {
            heap,
            threads: ThreadTable::new(),
            code_cache,
            stack_walker,
            policy,
            references: ReferenceProcessor::new(),
            releaser: ChunkReleaser::new(),
            pinned: PinnedObjects::new(),
            accounting: GcAccounting::new(),
            timers,
            pauses: Histogram::new(),
            history: CycleHistory::default(),
            last_whole_heap_examined: None,
        }
    }

    /// Verify the heap, every stack, every thread local and the code cache
    pub(crate) fn verify(&mut self, occasion: VerifyOccasion, complete: bool) {
        self.timers.verify.open();
        let verifier = HeapVerifier::new(occasion, complete);
        verifier.verify_or_abort(&self.heap);

        let VmState {
            heap,
            threads,
            code_cache,
            stack_walker,
            ..
        } = self;
        for thread in threads.iter_mut() {
            let stack = StackVerifier::new(heap, thread.id);
            if let Err(details) = stack.verify(&**stack_walker, &mut thread.stack, &**code_cache) {
                verifier.fail(details);
            }
            for target in thread.thread_locals.iter().flatten() {
                if let Err(details) = verify_reference(heap, *target) {
                    verifier.fail(format!("thread local of thread {}: {}", thread.id, details));
                }
            }
        }

        let mut failure = None;
        code_cache.walk_runtime_code(&mut |info| {
            if failure.is_some() {
                return;
            }
            let held = info.tether().into_iter().chain(info.constants().iter().flatten().copied());
            for target in held {
                if let Err(details) = verify_reference(heap, target) {
                    failure = Some(format!("{}: {}", info.id(), details));
                    return;
                }
            }
        });
        if let Some(details) = failure {
            verifier.fail(details);
        }
        self.timers.verify.close();
    }
}

/// Rewrites stack words through the compaction plan
struct ForwardStackSlots<'p> {
    plan: &'p CompactionPlan,
}

impl StackFrameVisitor for ForwardStackSlots<'_> {
    fn visit_reference_slot(&mut self, slot: &mut usize) {
        if let Some(target) = ObjRef::decode(*slot) {
            *slot = self.plan.forward(target).address();
        }
    }
}

/// One executing cycle
struct Cycle<'a> {
    ctx: &'a GcContext,
    vm: &'a mut VmState,
    request: CollectionRequest,
    epoch: u64,
    incremental_passes: u32,
    complete_passes: u32,
    counters: PassCounters,
    references_cleared: u64,
    released_bytes: usize,
}

impl GcContext {
    /// Entry point of the VM operation
    pub(crate) fn collect_operation(&self, request: CollectionRequest) -> CollectionRequest {
        self.state.transition(CollectorState::SafepointReached);
        let mut vm = self.vm.lock();
        let epoch = self.epoch.load(Ordering::Acquire) + 1;
        Cycle {
            ctx: self,
            vm: &mut vm,
            request,
            epoch,
            incremental_passes: 0,
            complete_passes: 0,
            counters: PassCounters::default(),
            references_cleared: 0,
            released_bytes: 0,
        }
        .run()
    }
}

impl Cycle<'_> {
    fn run(mut self) -> CollectionRequest {
        let pause = GcTimer::new();
        self.vm.timers.mutator.close();
        self.vm.timers.reset_all_except_mutator();
        self.vm.timers.collection.open();

        self.vm.heap.begin_collection();
        let pruned = self.vm.pinned.prune();
        if pruned > 0 {
            log::trace!("[GC] dropped {} released pins", pruned);
        }
        let mut sizes = HeapSizes::before(&self.vm.heap.accounting());
        self.ctx.sink.record(&GcEvent::CycleStart {
            epoch: self.epoch,
            cause: self.request.cause.name(),
            force_full: self.request.force_full,
        });

        if self.ctx.config.verify_before_gc {
            self.verify(VerifyOccasion::Before);
        }

        let out_of_memory = self.collect_impl();

        if self.ctx.config.verify_after_gc {
            self.verify(VerifyOccasion::After);
        }

        self.vm.threads.reset_tlabs();
        self.vm.heap.provider.after_garbage_collection();
        self.vm.heap.end_collection();
        sizes.record_after(&self.vm.heap.accounting());
        self.vm.timers.collection.close();

        let pause_ns = pause.elapsed_ns();
        self.vm.pauses.record(pause_ns);
        let record = CycleRecord {
            epoch: self.epoch,
            cause: self.request.cause.name(),
            incremental_passes: self.incremental_passes,
            complete_passes: self.complete_passes,
            pause_ns,
            sizes,
            counters: self.counters,
            references_cleared: self.references_cleared,
            released_bytes: self.released_bytes,
            out_of_memory,
        };
        self.report(&record);
        self.vm.history.push(record);

        self.ctx.state.transition(CollectorState::Idle);
        self.ctx.epoch.fetch_add(1, Ordering::Release);
        self.vm.timers.mutator.open();

        self.request.out_of_memory = out_of_memory;
        self.request
    }

    fn verify(&mut self, occasion: VerifyOccasion) {
        let complete = self.ctx.is_complete.load(Ordering::Relaxed);
        self.vm.verify(occasion, complete);
    }

    fn report(&self, record: &CycleRecord) {
        let sink = &self.ctx.sink;
        sink.record(&GcEvent::PhaseTimes {
            epoch: record.epoch,
            phases: self.vm.timers.phase_times(),
        });
        sink.record(&GcEvent::CycleEnd {
            epoch: record.epoch,
            cause: record.cause,
            incremental_passes: record.incremental_passes,
            complete_passes: record.complete_passes,
            pause_ms: record.pause_ms(),
            used_before: record.sizes.used_before,
            used_after: record.sizes.used_after,
            reclaimed_bytes: record.sizes.reclaimed(),
        });

        let kind = if record.was_complete() { "Full" } else { "Incremental" };
        let line = format!(
            "[GC] {} GC ({}) {}K->{}K, {:.3} ms",
            kind,
            record.cause,
            record.sizes.used_before / 1024,
            record.sizes.used_after / 1024,
            record.pause_ms()
        );
        if self.ctx.config.verbose {
            log::info!("{}", line);
            if self.ctx.config.print_gc_times {
                log::info!("[GC] phases: {}", self.vm.timers.format_phases());
            }
        } else {
            log::debug!("{}", line);
        }
    }

    /// Returns whether the heap is still over its limit
    fn collect_impl(&mut self) -> bool {
        let out_of_memory = self.do_collect_impl(self.request.force_full, false);
        if !out_of_memory {
            return false;
        }

        log::info!(
            "[GC] heap still full after epoch {} attempt, retrying with soft references as weak",
            self.epoch
        );
        let previous = self.vm.references.soft_references_are_weak();
        self.vm.references.set_soft_references_are_weak(true);
        if self.ctx.config.verify_during_gc {
            self.verify(VerifyOccasion::During);
        }
        let out_of_memory = self.do_collect_impl(true, true);
        self.vm.references.set_soft_references_are_weak(previous);
        out_of_memory
    }

    fn sanity_check(&self, when: &str) {
        let heap = &self.vm.heap;
        guarantee!(
            heap.young().to_spaces_empty(),
            FatalError::SanityCheck(format!("survivor to-spaces not empty {} collection", when))
        );
        guarantee!(
            heap.is_compacting() || heap.old().to_space_empty(),
            FatalError::SanityCheck(format!("old to-space not empty {} collection", when))
        );
    }

    fn do_collect_impl(&mut self, force_full: bool, force_no_incremental: bool) -> bool {
        self.sanity_check("before");
        self.vm.heap.provider.before_garbage_collection();

        let mut out_of_memory = false;
        let incremental = !force_no_incremental
            && !self
                .vm
                .policy
                .should_collect_completely(false, &self.vm.heap.accounting());
        if incremental {
            out_of_memory = self.do_collect_once(false);
        }

        let complete = !incremental
            || force_full
            || self
                .vm
                .policy
                .should_collect_completely(true, &self.vm.heap.accounting());
        if complete {
            if incremental {
                self.vm.heap.provider.uncommit_unused_memory();
                if self.ctx.config.verify_during_gc {
                    self.verify(VerifyOccasion::During);
                }
            }
            out_of_memory = self.do_collect_once(true);
        }

        self.ctx.state.transition(CollectorState::Resizing);
        self.vm.heap.provider.free_excess_aligned_chunks();
        self.vm.heap.provider.uncommit_unused_memory();
        self.sanity_check("after");
        out_of_memory
    }

    fn do_collect_once(&mut self, complete: bool) -> bool {
        guarantee!(
            complete || self.complete_passes == 0,
            FatalError::SanityCheck("incremental pass after a complete pass".into())
        );
        self.ctx.is_complete.store(complete, Ordering::Release);

        let timer = GcTimer::new();
        let before = self.vm.heap.accounting();
        self.vm.accounting.before_collect_once(complete, before.used_chunk_bytes());
        self.vm.policy.on_collection_begin(complete, &before);

        let counters = self.core(complete);
        if complete {
            self.vm.last_whole_heap_examined = Some(Instant::now());
        }

        let after = self.vm.heap.accounting();
        self.vm.accounting.after_collect_once(complete, after.used_chunk_bytes(), &counters);
        self.vm.policy.on_collection_end(complete, &after);
        self.counters.add(&counters);
        if complete {
            self.complete_passes += 1;
            self.ctx.complete_count.fetch_add(1, Ordering::Release);
        } else {
            self.incremental_passes += 1;
        }

        let out_of_memory = after.used_chunk_bytes() > self.vm.policy.maximum_heap_size();
        self.ctx.sink.record(&GcEvent::PassEnd {
            epoch: self.epoch,
            complete,
            duration_ms: timer.elapsed_ms(),
            copied_objects: counters.copied_objects,
            promoted_objects: counters.promoted_objects,
            survivor_overflows: counters.survivor_overflows,
            out_of_memory,
        });
        out_of_memory
    }

    fn core(&mut self, complete: bool) -> PassCounters {
        guarantee!(
            self.vm.heap.is_collecting(),
            FatalError::SanityCheck("collection pass outside of the collector context".into())
        );
        let compacting = self.vm.heap.is_compacting();
        self.ctx.state.transition(CollectorState::Scanning);

        let (counters, plan) = self.scan(complete);

        if complete && compacting {
            self.ctx.state.transition(CollectorState::SweepCompact);
            if let Some(plan) = &plan {
                let vm = &mut *self.vm;
                vm.timers.old_compaction.open();
                vm.heap.compact(plan, &mut vm.releaser);
                vm.timers.old_compaction.close();
            }
        }

        self.ctx.state.transition(CollectorState::ReferenceProcessing);
        self.process_references(plan.as_ref(), complete);

        let vm = &mut *self.vm;
        vm.timers.clean_code_cache.open();
        let code = clean_code_cache(&vm.heap, plan.as_ref(), complete, &mut *vm.code_cache);
        vm.timers.clean_code_cache.close();
        if code.invalidated > 0 {
            log::debug!("[GC] {} compiled codes invalidated", code.invalidated);
        }
        drop(plan);

        self.ctx.state.transition(CollectorState::Releasing);
        self.release(complete, compacting);
        guarantee!(
            self.vm.heap.is_collecting(),
            FatalError::SanityCheck("collection pass left the collector context".into())
        );
        counters
    }

    /// Blacken roots and scan grey objects; plan compaction when compacting
    fn scan(&mut self, complete: bool) -> (PassCounters, Option<CompactionPlan>) {
        let compacting_pass = complete && self.vm.heap.is_compacting();
        if compacting_pass {
            self.vm.heap.absorb_young_into(SpaceRole::OldCompacting);
        }
        if complete {
            self.vm.heap.clean_remembered_set();
        }

        let pinned = self.vm.pinned.open_objects();
        let tenuring_age = self.vm.policy.tenuring_age();
        let max_survivor_size = self.vm.policy.maximum_survivor_size();
        let VmState {
            heap,
            threads,
            code_cache,
            stack_walker,
            references,
            timers,
            ..
        } = &mut *self.vm;

        let mut closure = GreyToBlack::new(heap, references, complete, tenuring_age, max_survivor_size);

        timers.root_scan.open();
        timers.promote_pinned_objects.open();
        closure.promote_pinned_objects(&pinned);
        timers.promote_pinned_objects.close();

        if !complete {
            timers.blacken_dirty_cards.open();
            closure.blacken_dirty_card_roots();
            timers.blacken_dirty_cards.close();
        }

        timers.blacken_stack_roots.open();
        let mut on_stack = IndexSet::new();
        for thread in threads.iter_mut() {
            closure.blacken_stack_roots(
                thread.id,
                &mut thread.stack,
                &**stack_walker,
                &**code_cache,
                &mut on_stack,
            );
        }
        closure.blacken_code_tethers(&on_stack, &mut **code_cache);
        timers.blacken_stack_roots.close();

        timers.walk_thread_locals.open();
        for thread in threads.iter_mut() {
            closure.walk_thread_locals(&mut thread.thread_locals);
        }
        timers.walk_thread_locals.close();

        timers.blacken_image_heap_roots.open();
        closure.blacken_image_heap_roots(complete);
        timers.blacken_image_heap_roots.close();

        closure.blacken_pending_list();
        timers.root_scan.close();

        self.ctx.state.transition(CollectorState::Promoting);
        timers.scan_grey_objects.open();
        closure.drain();
        timers.scan_grey_objects.close();

        timers.walk_code_cache.open();
        let code = closure.walk_code_cache(&mut **code_cache);
        timers.walk_code_cache.close();

        timers.scan_grey_objects.open();
        closure.drain();
        timers.scan_grey_objects.close();
        let counters = closure.finish();
        log::trace!(
            "[GC] code cache walk: {} tethered, {} updated, {} deferred",
            code.tethered,
            code.updated,
            code.deferred
        );

        if !compacting_pass {
            return (counters, None);
        }

        timers.old_planning.open();
        let plan = heap.plan_compaction();
        timers.old_planning.close();

        timers.old_fixup.open();
        heap.fixup_references(&plan);
        let mut forward = ForwardStackSlots { plan: &plan };
        for thread in threads.iter_mut() {
            stack_walker.walk_stack(thread.id, &mut thread.stack, &**code_cache, &mut forward);
            thread.thread_locals.iter_mut().for_each(|slot| plan.forward_slot(slot));
        }
        references.forward_discovered(&plan);
        timers.old_fixup.close();

        (counters, Some(plan))
    }

    fn process_references(&mut self, plan: Option<&CompactionPlan>, complete: bool) {
        let vm = &mut *self.vm;
        vm.timers.reference_objects.open();
        let stats = vm
            .references
            .process(&mut vm.heap, |heap, target| resolve_weak(heap, plan, target, complete));
        vm.timers.reference_objects.close();

        self.references_cleared += stats.cleared();
        if stats.discovered > 0 {
            self.ctx.sink.record(&GcEvent::References {
                epoch: self.epoch,
                kept_alive: stats.kept_alive,
                cleared: stats.cleared(),
            });
        }
    }

    fn release(&mut self, complete: bool, compacting: bool) {
        let vm = &mut *self.vm;
        vm.timers.release_spaces.open();
        vm.heap.release_young_spaces(&mut vm.releaser);
        if complete {
            vm.timers.old_sweep.open();
            vm.heap.release_old_spaces(&mut vm.releaser);
            vm.timers.old_sweep.close();
        }

        let chunks = vm.releaser.len();
        let keep_all_aligned = !compacting && !complete;
        let bytes = vm.releaser.release(&mut *vm.heap.provider, keep_all_aligned);
        vm.heap.swap_young_spaces();
        vm.heap.swap_old_spaces();
        vm.timers.release_spaces.close();

        self.released_bytes += bytes;
        if chunks > 0 {
            self.ctx.sink.record(&GcEvent::ChunksReleased {
                epoch: self.epoch,
                chunks,
                bytes,
            });
        }
    }
}
