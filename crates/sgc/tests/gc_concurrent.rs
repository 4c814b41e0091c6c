//! GC Concurrency Tests - Mutators, safepoints and racing requests
//!
//! Every attached thread either allocates (which polls) or calls into the
//! collector, so no test can leave a safepoint waiting forever.

mod common;

use anyhow::Result;
use common::{build_list, list_identities, GcFixture};
use sgc::{GcCause, ObjectShape};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn test_mutators_park_for_collections() {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;

    thread::scope(|s| {
        for worker in 0..4 {
            s.spawn(move || {
                let thread = gc.attach_thread();
                let head = build_list(&thread, 100);
                thread.set_thread_local(0, Some(head)).expect("root");
                let expected = list_identities(&thread, head);

                for round in 0..50 {
                    for _ in 0..20 {
                        thread
                            .allocate(&ObjectShape::with_payload(1, 32))
                            .expect("allocation");
                    }
                    if round % 10 == worker {
                        thread.collect(GcCause::Explicit).expect("collect");
                    }
                    thread.safepoint_poll();
                }

                let head = thread.thread_local(0).expect("rooted list");
                assert_eq!(list_identities(&thread, head), expected);
            });
        }
    });

    assert!(gc.collection_epoch() >= 1);
    assert_eq!(gc.attached_threads(), 0);
    let epochs: Vec<u64> = gc.cycle_history().iter().map(|c| c.epoch).collect();
    assert!(epochs.windows(2).all(|w| w[1] == w[0] + 1));
}

#[test]
fn test_concurrent_requests_from_unattached_threads() -> Result<()> {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    let main = gc.attach_thread();
    let object = main.allocate(&ObjectShape::plain(0))?;
    let identity = main.identity(object);
    main.set_thread_local(0, Some(object))?;

    let done = AtomicBool::new(false);
    thread::scope(|s| {
        let requesters: Vec<_> = (0..8)
            .map(|i| {
                s.spawn(move || {
                    if i % 2 == 0 {
                        gc.collect(GcCause::Explicit)
                    } else {
                        gc.collect_completely(GcCause::Explicit)
                    }
                })
            })
            .collect();

        let done = &done;
        s.spawn(move || {
            for handle in requesters {
                handle.join().expect("requester").expect("collect");
            }
            done.store(true, Ordering::SeqCst);
        });

        while !done.load(Ordering::SeqCst) {
            main.safepoint_poll();
            thread::sleep(Duration::from_micros(100));
        }
    });

    let epoch = gc.collection_epoch();
    assert!((1..=8).contains(&epoch));
    assert!(gc.complete_collection_count() >= 1);
    let object = main.thread_local(0).expect("rooted");
    assert_eq!(main.identity(object), identity);
    Ok(())
}

#[test]
fn test_blocking_region_lets_collection_proceed() -> Result<()> {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;
    let main = gc.attach_thread();

    let epoch = main.blocking(|| {
        thread::scope(|s| {
            s.spawn(|| {
                let worker = gc.attach_thread();
                worker.collect(GcCause::Explicit).map(|()| gc.collection_epoch())
            })
            .join()
            .expect("worker")
        })
    })?;
    assert_eq!(epoch, 1);
    Ok(())
}

#[test]
fn test_attach_waits_for_running_cycle() {
    let fixture = GcFixture::with_defaults();
    let gc = &fixture.gc;

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..25 {
                    let thread = gc.attach_thread();
                    thread
                        .allocate(&ObjectShape::plain(2))
                        .expect("allocation");
                    thread.collect(GcCause::Explicit).expect("collect");
                }
            });
        }
    });

    assert!(gc.collection_epoch() >= 1);
    assert_eq!(gc.safepoint().attached_threads(), 0);
}
