//! GC Scenario Tests - End-to-end collection scenarios
//!
//! Each test drives a whole context through the public API:
//! - tenured objects leave the young generation
//! - pinned objects keep their address and chunk
//! - allocation failure escalates once before out of memory is reported
//! - racing requests share one cycle
//! - shared targets are copied once

mod common;

use common::{allocate_rooted, rooted, GcFixture, DEFAULT_HEAP_SIZE};
use sgc::util::constants::KB;
use sgc::{GcCause, GcConfig, GcError, GcEvent, ObjectShape};
use std::sync::atomic::Ordering;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

// ============================================================================
// TENURING
// ============================================================================

#[test]
fn test_tenured_objects_reach_old_generation() {
    let fixture = GcFixture::with_tenuring_age(2);
    let gc = &fixture.gc;
    let thread = gc.attach_thread();
    let identities = allocate_rooted(&thread, 10, 1);
    assert!(rooted(&thread, 10).iter().all(|&o| fixture.is_young(o)));

    thread.collect(GcCause::Explicit).expect("first collection");
    assert!(!gc.is_complete_collection());
    assert!(rooted(&thread, 10).iter().all(|&o| fixture.is_young(o)));

    thread.collect(GcCause::Explicit).expect("second collection");
    assert!(!gc.is_complete_collection());
    let tenured = rooted(&thread, 10);
    assert!(tenured.iter().all(|&o| fixture.is_old(o)));
    let after: Vec<u64> = tenured.iter().filter_map(|&o| thread.identity(o)).collect();
    assert_eq!(after, identities);

    thread.collect(GcCause::Explicit).expect("third collection");
    let cycle = gc.last_cycle().expect("cycle record");
    assert_eq!(cycle.complete_passes, 0);
    assert_eq!(cycle.counters.promoted_objects, 0);
    assert_eq!(cycle.counters.copied_objects, 0);
    assert_eq!(rooted(&thread, 10), tenured);
    assert_eq!(gc.heap_accounting().young_used_bytes(), 0);
}

// ============================================================================
// PINNING
// ============================================================================

#[test]
fn test_pinned_object_keeps_address_and_chunk() {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    let thread = gc.attach_thread();

    let pinned = thread.allocate(&ObjectShape::plain(1)).expect("allocation");
    let garbage = thread.allocate(&ObjectShape::plain(0)).expect("allocation");
    let base = fixture.chunk_of(pinned).expect("chunk");
    assert_eq!(fixture.chunk_of(garbage), Some(base));
    let identity = thread.identity(pinned);

    let handle = thread.pin(pinned).expect("pin");
    gc.collect_completely(GcCause::Explicit).expect("collection");

    assert_eq!(handle.object(), pinned);
    assert!(fixture.is_live(pinned));
    assert_eq!(thread.identity(pinned), identity);
    assert!(fixture.is_old(pinned));
    assert_eq!(fixture.chunk_of(pinned), Some(base));
    assert!(!gc.last_released_chunks().contains(&base));

    drop(handle);
    let pins = gc.with_heap(|heap| heap.chunk(base).map(|c| c.pinned_count()));
    assert_eq!(pins, Some(0));
}

// ============================================================================
// ESCALATION
// ============================================================================

#[test]
fn test_allocation_failure_escalates_once() {
    let (fixture, script) = GcFixture::scripted(GcConfig::for_testing(DEFAULT_HEAP_SIZE));
    let gc = &fixture.gc;
    let thread = gc.attach_thread();
    allocate_rooted(&thread, 4, 0);

    script.max_heap_size.store(1, Ordering::SeqCst);
    script.collect_on_allocation.store(true, Ordering::SeqCst);
    let epoch = gc.collection_epoch();
    let complete = gc.complete_collection_count();

    let result = thread.allocate(&ObjectShape::with_payload(0, 4 * KB));
    assert!(matches!(result, Err(GcError::OutOfMemory { .. })));

    assert_eq!(gc.collection_epoch(), epoch + 1);
    assert_eq!(gc.complete_collection_count(), complete + 1);
    assert_eq!(fixture.sink.passes(), vec![(false, true), (true, true)]);
    assert_eq!(
        fixture
            .sink
            .count(|e| matches!(e, GcEvent::AllocationFailure { .. })),
        1
    );

    let cycle = gc.last_cycle().expect("cycle record");
    assert_eq!((cycle.incremental_passes, cycle.complete_passes), (1, 1));
    assert!(cycle.out_of_memory);
    assert_eq!(rooted(&thread, 4).len(), 4);
}

#[test]
fn test_escalation_recovers_when_memory_is_freed() {
    let (fixture, script) = GcFixture::scripted(GcConfig::for_testing(DEFAULT_HEAP_SIZE));
    let gc = &fixture.gc;
    let thread = gc.attach_thread();
    for _ in 0..64 {
        thread.allocate(&ObjectShape::plain(4)).expect("allocation");
    }

    script.collect_on_allocation.store(true, Ordering::SeqCst);
    thread
        .allocate(&ObjectShape::with_payload(0, 4 * KB))
        .expect("allocation after a collection");
    assert_eq!(gc.collection_epoch(), 1);
    assert_eq!(fixture.sink.passes(), vec![(false, false)]);
}

#[test]
fn test_large_object_churn_reuses_released_ranges() {
    let fixture = GcFixture::with_config(GcConfig::for_testing(sgc::util::constants::MB));
    let gc = &fixture.gc;
    let thread = gc.attach_thread();
    let large = ObjectShape::with_payload(0, 64 * KB);

    // far more large-object bytes than the reserved address range
    for round in 0..200 {
        let object = thread.allocate(&large).expect("large allocation");
        if round % 10 == 0 {
            thread.set_thread_local(0, Some(object)).expect("root");
        }
        gc.collect(GcCause::Explicit).expect("collection");
    }

    assert!(gc.collection_epoch() >= 200);
    assert!(thread.thread_local(0).is_some());
    assert!(gc.with_heap(|heap| heap.object_count()) <= 2);
}

// ============================================================================
// RACING REQUESTS
// ============================================================================

#[test]
fn test_racing_requests_share_one_cycle() {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    // attached and not polling: holds the safepoint until both requests wait
    let gate = gc.attach_thread();
    allocate_rooted(&gate, 3, 0);

    let attached = Barrier::new(2);

    thread::scope(|s| {
        let a = s.spawn(|| {
            let thread = gc.attach_thread();
            attached.wait();
            thread.collect(GcCause::Explicit).map(|()| gc.collection_epoch())
        });
        let b = s.spawn(|| {
            let thread = gc.attach_thread();
            attached.wait();
            thread
                .collect(GcCause::Other("racing"))
                .map(|()| gc.collection_epoch())
        });

        while !gc.safepoint().is_requested() || gc.safepoint().threads_at_safepoint() < 2 {
            thread::sleep(Duration::from_millis(1));
        }
        gate.safepoint_poll();

        assert_eq!(a.join().expect("thread a").expect("collect a"), 1);
        assert_eq!(b.join().expect("thread b").expect("collect b"), 1);
    });

    assert_eq!(gc.collection_epoch(), 1);
    assert_eq!(gc.cycle_history().len(), 1);
    assert_eq!(fixture.sink.cycle_ends(), 1);
    assert_eq!(rooted(&gate, 3).len(), 3);
}

#[test]
fn test_coalesced_hint_reports_no_cycle() {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    let gate = gc.attach_thread();
    let attached = Barrier::new(2);

    let hinted = thread::scope(|s| {
        let forced = s.spawn(|| {
            let _thread = gc.attach_thread();
            attached.wait();
            gc.collect_completely(GcCause::Explicit)
        });
        let hint = s.spawn(|| {
            let _thread = gc.attach_thread();
            attached.wait();
            gc.collection_hint(true)
        });

        while !gc.safepoint().is_requested() || gc.safepoint().threads_at_safepoint() < 2 {
            thread::sleep(Duration::from_millis(1));
        }
        gate.safepoint_poll();

        forced.join().expect("forced").expect("collect");
        hint.join().expect("hint").expect("hint")
    });

    assert_eq!(gc.collection_epoch(), 1);
    assert_eq!(gc.complete_collection_count(), 1);
    let cause = gc.last_cycle().map(|c| c.cause);
    assert_eq!(hinted, cause == Some("Hinted"));
}

// ============================================================================
// SHARED TARGETS
// ============================================================================

#[test]
fn test_shared_target_is_copied_once() {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    let thread = gc.attach_thread();

    let holder = thread.allocate(&ObjectShape::plain(3)).expect("allocation");
    let target = thread.allocate(&ObjectShape::plain(0)).expect("allocation");
    for slot in 0..3 {
        thread.write_slot(holder, slot, Some(target)).expect("store");
    }
    let identity = thread.identity(target);
    thread.set_thread_local(0, Some(holder)).expect("root");
    let objects_before = gc.with_heap(|heap| heap.object_count());

    thread.collect(GcCause::Explicit).expect("collection");

    let holder = thread.thread_local(0).expect("holder survives");
    let slots: Vec<_> = (0..3)
        .map(|i| thread.read_slot(holder, i).expect("slot"))
        .collect();
    let moved = slots[0].expect("target survives");
    assert_ne!(moved, target);
    assert!(slots.iter().all(|&s| s == Some(moved)));
    assert_eq!(thread.identity(moved), identity);
    assert_eq!(gc.with_heap(|heap| heap.object_count()), objects_before);
    assert_eq!(gc.last_cycle().map(|c| c.counters.copied_objects), Some(2));
}
