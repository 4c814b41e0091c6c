//! Test Utilities for the SGC integration suite
//!
//! - `GcFixture`: a context wired to a recording telemetry sink
//! - `RecordingSink`: keeps every `GcEvent` for assertions
//! - `ScriptedPolicy`: a policy whose answers the test changes at runtime
//! - location and identity helpers

#![allow(dead_code)]

use parking_lot::Mutex;
use sgc::heap::{HeapAccounting, Location, SpaceRole};
use sgc::util::constants::MB;
use sgc::{
    CollectionPolicy, GcConfig, GcContext, GcEvent, GcEventSink, MutatorThread, ObjRef,
    ObjectShape,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default heap limit of the suite
pub const DEFAULT_HEAP_SIZE: usize = 16 * MB;

// ============================================================================
// RECORDING SINK
// ============================================================================

/// Telemetry sink that keeps every event
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GcEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<GcEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&GcEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| matches(e)).count()
    }

    pub fn cycle_ends(&self) -> usize {
        self.count(|e| matches!(e, GcEvent::CycleEnd { .. }))
    }

    /// `(complete, out_of_memory)` of every pass, in order
    pub fn passes(&self) -> Vec<(bool, bool)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                GcEvent::PassEnd {
                    complete,
                    out_of_memory,
                    ..
                } => Some((*complete, *out_of_memory)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl GcEventSink for RecordingSink {
    fn record(&self, event: &GcEvent) {
        self.events.lock().push(event.clone());
    }
}

// ============================================================================
// SCRIPTED POLICY
// ============================================================================

/// Answers of a `ScriptedPolicy`, shared with the test
pub struct Script {
    pub max_heap_size: AtomicUsize,
    pub collect_on_allocation: AtomicBool,
    /// Answer before a cycle starts
    pub complete_up_front: AtomicBool,
    /// Answer after an incremental pass
    pub complete_after_incremental: AtomicBool,
    pub tenuring_age: AtomicUsize,
    pub begun: AtomicUsize,
    pub ended: AtomicUsize,
}

pub struct ScriptedPolicy {
    script: Arc<Script>,
    max_young_size: usize,
    max_survivor_size: usize,
}

impl ScriptedPolicy {
    pub fn new(config: &GcConfig) -> (Self, Arc<Script>) {
        let script = Arc::new(Script {
            max_heap_size: AtomicUsize::new(config.max_heap_size),
            collect_on_allocation: AtomicBool::new(false),
            complete_up_front: AtomicBool::new(false),
            complete_after_incremental: AtomicBool::new(false),
            tenuring_age: AtomicUsize::new(config.tenuring_age),
            begun: AtomicUsize::new(0),
            ended: AtomicUsize::new(0),
        });
        (
            Self {
                script: script.clone(),
                max_young_size: config.max_young_size(),
                max_survivor_size: config.max_survivor_size(),
            },
            script,
        )
    }
}

impl CollectionPolicy for ScriptedPolicy {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn should_collect_on_allocation(&self, _heap: &HeapAccounting) -> bool {
        self.script.collect_on_allocation.load(Ordering::SeqCst)
    }

    fn should_collect_on_hint(&self, full: bool, _heap: &HeapAccounting) -> bool {
        full
    }

    fn should_collect_completely(&self, follows_incremental: bool, _heap: &HeapAccounting) -> bool {
        if follows_incremental {
            self.script.complete_after_incremental.load(Ordering::SeqCst)
        } else {
            self.script.complete_up_front.load(Ordering::SeqCst)
        }
    }

    fn on_collection_begin(&mut self, _complete: bool, _heap: &HeapAccounting) {
        self.script.begun.fetch_add(1, Ordering::SeqCst);
    }

    fn on_collection_end(&mut self, _complete: bool, _heap: &HeapAccounting) {
        self.script.ended.fetch_add(1, Ordering::SeqCst);
    }

    fn maximum_heap_size(&self) -> usize {
        self.script.max_heap_size.load(Ordering::SeqCst)
    }

    fn current_heap_capacity(&self) -> usize {
        self.maximum_heap_size()
    }

    fn minimum_heap_size(&self) -> usize {
        0
    }

    fn maximum_young_size(&self) -> usize {
        self.max_young_size
    }

    fn maximum_survivor_size(&self) -> usize {
        self.max_survivor_size
    }

    fn tenuring_age(&self) -> usize {
        self.script.tenuring_age.load(Ordering::SeqCst)
    }
}

// ============================================================================
// GC FIXTURE
// ============================================================================

/// A collector wired to a recording sink
pub struct GcFixture {
    pub gc: GcContext,
    pub sink: Arc<RecordingSink>,
    pub config: GcConfig,
}

impl GcFixture {
    pub fn with_config(config: GcConfig) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let gc = GcContext::builder(config.clone())
            .event_sink(sink.clone())
            .build()
            .expect("GC initialization should succeed");
        Self { gc, sink, config }
    }

    pub fn with_defaults() -> Self {
        Self::with_config(GcConfig::for_testing(DEFAULT_HEAP_SIZE))
    }

    pub fn with_tenuring_age(age: usize) -> Self {
        Self::with_config(GcConfig {
            tenuring_age: age,
            ..GcConfig::for_testing(DEFAULT_HEAP_SIZE)
        })
    }

    pub fn compacting() -> Self {
        Self::with_config(GcConfig {
            compacting_old_generation: true,
            ..GcConfig::for_testing(DEFAULT_HEAP_SIZE)
        })
    }

    /// Context driven by a `ScriptedPolicy`
    pub fn scripted(config: GcConfig) -> (Self, Arc<Script>) {
        let sink = Arc::new(RecordingSink::default());
        let (policy, script) = ScriptedPolicy::new(&config);
        let gc = GcContext::builder(config.clone())
            .policy(Box::new(policy))
            .event_sink(sink.clone())
            .build()
            .expect("GC initialization should succeed");
        (Self { gc, sink, config }, script)
    }

    pub fn location(&self, object: ObjRef) -> Location {
        self.gc.with_heap(|heap| heap.locate(object.address()))
    }

    pub fn role(&self, object: ObjRef) -> Option<SpaceRole> {
        match self.location(object) {
            Location::Chunk { role, .. } => Some(role),
            _ => None,
        }
    }

    pub fn is_old(&self, object: ObjRef) -> bool {
        self.role(object).is_some_and(SpaceRole::is_old)
    }

    pub fn is_young(&self, object: ObjRef) -> bool {
        self.gc.with_heap(|heap| heap.is_young(object))
    }

    /// Base of the chunk holding `object`
    pub fn chunk_of(&self, object: ObjRef) -> Option<usize> {
        self.gc
            .with_heap(|heap| heap.chunk_containing(object.address()).map(|c| c.base()))
    }

    pub fn is_live(&self, object: ObjRef) -> bool {
        self.gc.with_heap(|heap| heap.is_valid_reference(object))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Allocate `count` plain objects rooted in thread locals `0..count`,
/// returning their identities
pub fn allocate_rooted(thread: &MutatorThread<'_>, count: usize, slots: usize) -> Vec<u64> {
    (0..count)
        .map(|i| {
            let object = thread
                .allocate(&ObjectShape::plain(slots))
                .expect("allocation should succeed");
            thread.set_thread_local(i, Some(object)).expect("root store");
            thread.identity(object).expect("identity")
        })
        .collect()
}

/// Current objects in thread locals `0..count`
pub fn rooted(thread: &MutatorThread<'_>, count: usize) -> Vec<ObjRef> {
    (0..count)
        .map(|i| thread.thread_local(i).expect("root should survive"))
        .collect()
}

/// Build a linked list of `length` nodes through slot 0, returning the head
pub fn build_list(thread: &MutatorThread<'_>, length: usize) -> ObjRef {
    let mut head = thread
        .allocate(&ObjectShape::plain(1))
        .expect("allocation should succeed");
    for _ in 1..length {
        // keep the partial list rooted across allocation slow paths
        thread.set_thread_local(0, Some(head)).expect("root store");
        let node = thread
            .allocate(&ObjectShape::plain(1))
            .expect("allocation should succeed");
        head = thread.thread_local(0).expect("rooted head");
        thread.write_slot(node, 0, Some(head)).expect("link");
        head = node;
    }
    head
}

/// Identities along slot 0 starting at `head`
pub fn list_identities(thread: &MutatorThread<'_>, head: ObjRef) -> Vec<u64> {
    let mut identities = Vec::new();
    let mut current = Some(head);
    while let Some(node) = current {
        identities.push(thread.identity(node).expect("live node"));
        current = thread.read_slot(node, 0).expect("readable node");
    }
    identities
}
