//! Runtime Integration Tests - References, code cache, stacks and policies
//!
//! Tests for the collaborators a runtime wires into the collector:
//! - reference objects and the reference handler
//! - runtime-compiled code, tethers and embedded constants
//! - compiled frames on mutator stacks
//! - the never-collect policy, summaries and telemetry

mod common;

use anyhow::Result;
use common::{allocate_rooted, GcFixture};
use crossbeam::channel::unbounded;
use sgc::object::ReferenceMap;
use sgc::runtime::CodeInfo;
use sgc::util::constants::MB;
use sgc::{
    CollectorState, Frame, GcCause, GcConfig, GcContext, GcError, GcEvent, NeverCollectPolicy,
    ObjectShape, RefKind,
};
use std::time::Duration;

// ============================================================================
// REFERENCE OBJECTS
// ============================================================================

#[test]
fn test_dead_referents_are_cleared_and_enqueued() -> Result<()> {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    let thread = gc.attach_thread();

    let kinds = [RefKind::Weak, RefKind::Phantom, RefKind::Final];
    for (i, kind) in kinds.iter().enumerate() {
        let reference = thread.allocate(&ObjectShape::reference(*kind))?;
        let referent = thread.allocate(&ObjectShape::plain(0))?;
        thread.set_referent(reference, Some(referent))?;
        thread.set_thread_local(i, Some(reference))?;
    }

    gc.collect(GcCause::Explicit)?;

    let mut pending = gc.reference_handler().try_drain();
    pending.sort_by_key(|p| p.identity);
    assert_eq!(pending.len(), 3);
    for (i, kind) in kinds.iter().enumerate() {
        let reference = thread.thread_local(i).expect("reference rooted");
        assert_eq!(thread.referent(reference)?, None);
        let delivered = pending
            .iter()
            .find(|p| p.reference == reference)
            .expect("reference delivered");
        assert_eq!(delivered.kind, *kind);
        assert_eq!(Some(delivered.identity), thread.identity(reference));
    }
    assert_eq!(gc.last_cycle().map(|c| c.references_cleared), Some(3));
    assert!(gc.with_heap(|heap| heap.pending_references().is_empty()));
    Ok(())
}

#[test]
fn test_reachable_referents_are_updated() -> Result<()> {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    let thread = gc.attach_thread();

    let weak = thread.allocate(&ObjectShape::reference(RefKind::Weak))?;
    let soft = thread.allocate(&ObjectShape::reference(RefKind::Soft))?;
    let strong = thread.allocate(&ObjectShape::plain(0))?;
    let cached = thread.allocate(&ObjectShape::plain(0))?;
    thread.set_referent(weak, Some(strong))?;
    thread.set_referent(soft, Some(cached))?;
    thread.set_thread_local(0, Some(weak))?;
    thread.set_thread_local(1, Some(soft))?;
    thread.set_thread_local(2, Some(strong))?;
    let cached_identity = thread.identity(cached);

    gc.collect(GcCause::Explicit)?;
    gc.collect_completely(GcCause::Explicit)?;

    let weak = thread.thread_local(0).expect("rooted");
    let soft = thread.thread_local(1).expect("rooted");
    let strong = thread.thread_local(2).expect("rooted");
    assert_eq!(thread.referent(weak)?, Some(strong));
    let cached = thread.referent(soft)?.expect("soft referent kept");
    assert_eq!(thread.identity(cached), cached_identity);
    assert!(gc.reference_handler().try_drain().is_empty());
    Ok(())
}

#[test]
fn test_reference_handler_thread_receives_batches() -> Result<()> {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    let (tx, rx) = unbounded();
    assert!(gc.reference_handler().start(Box::new(move |pending| {
        let _ = tx.send(*pending);
    }))?);

    let thread = gc.attach_thread();
    let reference = thread.allocate(&ObjectShape::reference(RefKind::Weak))?;
    let referent = thread.allocate(&ObjectShape::plain(0))?;
    thread.set_referent(reference, Some(referent))?;
    thread.set_thread_local(0, Some(reference))?;
    gc.collect(GcCause::Explicit)?;

    let delivered = rx.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(delivered.kind, RefKind::Weak);
    assert_eq!(Some(delivered.reference), thread.thread_local(0));

    gc.shutdown();
    assert!(!gc.reference_handler().is_running());
    assert_eq!(gc.reference_handler().enqueued_count(), 1);
    Ok(())
}

#[test]
fn test_referent_of_plain_object_is_rejected() -> Result<()> {
    let fixture = GcFixture::with_defaults();
    let thread = fixture.gc.attach_thread();
    let plain = thread.allocate(&ObjectShape::plain(1))?;
    assert!(matches!(
        thread.referent(plain),
        Err(GcError::InvalidArgument(_))
    ));
    Ok(())
}

// ============================================================================
// CODE CACHE
// ============================================================================

#[test]
fn test_code_constants_follow_their_objects() -> Result<()> {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    let thread = gc.attach_thread();
    allocate_rooted(&thread, 2, 0);
    let tether = thread.thread_local(0).expect("rooted");
    let constant = thread.thread_local(1).expect("rooted");
    let identity = thread.identity(constant);

    let code = gc.install_code(CodeInfo::runtime(vec![], vec![constant], tether))?;
    gc.collect(GcCause::Explicit)?;

    let moved = thread.thread_local(1).expect("rooted");
    let (live, constants) = gc.with_code_cache(|cache| {
        let info = cache.code_info(code).expect("installed");
        (info.is_live(), info.constants().to_vec())
    });
    assert!(live);
    assert_eq!(constants, vec![Some(moved)]);
    assert_eq!(thread.identity(moved), identity);
    Ok(())
}

#[test]
fn test_code_with_dead_constant_is_invalidated() -> Result<()> {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    let thread = gc.attach_thread();
    let tether = thread.allocate(&ObjectShape::plain(0))?;
    let constant = thread.allocate(&ObjectShape::plain(0))?;
    let code = gc.install_code(CodeInfo::runtime(vec![], vec![constant], tether))?;

    gc.collect(GcCause::Explicit)?;

    let (live, constants, tether) = gc.with_code_cache(|cache| {
        let info = cache.code_info(code).expect("installed");
        (info.is_live(), info.constants().to_vec(), info.tether())
    });
    assert!(!live);
    assert_eq!(constants, vec![None]);
    assert_eq!(tether, None);
    assert_eq!(gc.with_code_cache(|cache| cache.runtime_code_count()), 0);
    Ok(())
}

#[test]
fn test_code_on_stack_keeps_constants_alive() -> Result<()> {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    let thread = gc.attach_thread();
    let tether = thread.allocate(&ObjectShape::plain(0))?;
    let constant = thread.allocate(&ObjectShape::plain(0))?;
    let local = thread.allocate(&ObjectShape::plain(0))?;
    let local_identity = thread.identity(local);
    let code = gc.install_code(CodeInfo::runtime(
        vec![ReferenceMap::from_slots(&[1])],
        vec![constant],
        tether,
    ))?;
    thread.push_frame(Frame::compiled(code, Some(0), vec![42, local.address()]))?;

    gc.collect(GcCause::Explicit)?;

    let local = thread.stack_reference(0, 1)?.expect("stack slot rewritten");
    assert_eq!(thread.identity(local), local_identity);
    let (live, constants) = gc.with_code_cache(|cache| {
        let info = cache.code_info(code).expect("installed");
        (info.is_live(), info.constants().to_vec())
    });
    assert!(live);
    let constant = constants[0].expect("constant kept");
    assert!(fixture.is_live(constant));

    thread.pop_frame()?;
    gc.collect(GcCause::Explicit)?;
    let live = gc.with_code_cache(|cache| cache.code_info(code).map(|c| c.is_live()));
    assert_eq!(live, Some(false));
    Ok(())
}

#[test]
fn test_installing_code_with_dangling_constant_fails() {
    let fixture = GcFixture::with_defaults();
    let bogus = sgc::ObjRef::from_address(0x18).expect("non-null");
    let result = fixture
        .gc
        .install_code(CodeInfo::runtime(vec![], vec![bogus], bogus));
    assert!(matches!(result, Err(GcError::InvalidArgument(_))));
}

// ============================================================================
// POLICIES
// ============================================================================

#[test]
fn test_never_collect_policy_runs_out_of_memory() {
    let config = GcConfig::for_testing(MB);
    let gc = GcContext::builder(config.clone())
        .policy(Box::new(NeverCollectPolicy::new(&config)))
        .build()
        .expect("context");
    let thread = gc.attach_thread();

    let mut allocated = 0;
    let error = loop {
        match thread.allocate(&ObjectShape::with_payload(0, 512)) {
            Ok(_) => allocated += 1,
            Err(e) => break e,
        }
        assert!(allocated < 100_000, "heap limit never reached");
    };
    assert!(matches!(error, GcError::OutOfMemory { max, .. } if max == MB));
    assert!(allocated > 0);
    assert_eq!(gc.collection_epoch(), 0);
    assert_eq!(gc.policy_name(), "never-collect");
    assert!(matches!(
        gc.collect(GcCause::Explicit),
        Err(GcError::NeverCollect { .. })
    ));
}

// ============================================================================
// TELEMETRY
// ============================================================================

#[test]
fn test_cycle_telemetry_is_reported() -> Result<()> {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    let thread = gc.attach_thread();
    allocate_rooted(&thread, 5, 1);
    gc.collect(GcCause::Explicit)?;
    gc.collect_completely(GcCause::Shutdown)?;

    let events = fixture.sink.events();
    let starts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            GcEvent::CycleStart { epoch, cause, .. } => Some((*epoch, *cause)),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec![(1, "Explicit"), (2, "Shutdown")]);
    assert_eq!(fixture.sink.cycle_ends(), 2);
    assert_eq!(
        fixture.sink.count(|e| matches!(e, GcEvent::PhaseTimes { .. })),
        2
    );

    let json = serde_json::to_string(&events[0])?;
    assert!(json.contains("\"type\":\"cycle_start\""));

    assert_eq!(gc.state(), CollectorState::Idle);
    let summary = gc.summary();
    assert_eq!(summary.collections, 2);
    assert_eq!(summary.complete_collections, 1);
    // the forced cycle ran an incremental pass first
    assert_eq!(summary.incremental_collections, 2);
    assert!(summary.to_string().contains("collections: 2"));
    assert!(gc.timers().phase_times().iter().any(|(_, ms)| *ms >= 0.0));
    Ok(())
}
