//! GC Runtime - C ABI over the process-wide collector
//!
//! The runtime owns exactly one `GcContext`, created by `sgc_init`. Threads
//! attach before they allocate and detach before they exit; an attached
//! thread must call `sgc_safepoint_poll` in long-running code. References
//! cross the boundary as raw addresses, `0` meaning null. Addresses held by
//! the caller outside of roots are stale after any collection.

use sgc::{GcCause, GcConfig, GcContext, GcError, ObjRef, ObjectShape};
use std::cell::Cell;
use std::sync::OnceLock;

static CONTEXT: OnceLock<GcContext> = OnceLock::new();

thread_local! {
    /// Collector id of the calling thread, `0` when detached
    static THREAD: Cell<u64> = const { Cell::new(0) };
}

fn context() -> Option<&'static GcContext> {
    let ctx = CONTEXT.get();
    if ctx.is_none() {
        log::error!("[GC] runtime used before sgc_init");
    }
    ctx
}

fn current_thread() -> Option<(&'static GcContext, u64)> {
    let ctx = context()?;
    match THREAD.with(Cell::get) {
        0 => {
            log::error!("[GC] calling thread is not attached");
            None
        }
        id => Some((ctx, id)),
    }
}

/// Report an error and map it to the failure value of the caller
fn report<T>(result: Result<T, GcError>, failure: T) -> T {
    result.unwrap_or_else(|e| {
        if e.is_bug() {
            log::error!("[GC] {}", e);
        } else {
            log::warn!("[GC] {}", e);
        }
        failure
    })
}

/// Create the collector with the `SGC_*` environment configuration
///
/// Returns `true` if the collector exists afterwards.
#[no_mangle]
pub extern "C" fn sgc_init() -> bool {
    init_with(GcConfig::from_env())
}

/// Create the collector with a heap limit, other settings from the
/// environment
#[no_mangle]
pub extern "C" fn sgc_init_with_heap_size(max_heap_size: usize) -> bool {
    let config = GcConfig {
        max_heap_size,
        min_heap_size: max_heap_size / 4,
        ..GcConfig::from_env()
    };
    init_with(config)
}

fn init_with(config: GcConfig) -> bool {
    if CONTEXT.get().is_some() {
        return true;
    }
    match GcContext::new(config) {
        Ok(ctx) => {
            if CONTEXT.set(ctx).is_err() {
                log::debug!("[GC] concurrent sgc_init, keeping the first collector");
            }
            true
        }
        Err(e) => {
            log::error!("[GC] failed to create collector: {}", e);
            false
        }
    }
}

/// Attach the calling thread; returns its id, `0` on failure
#[no_mangle]
pub extern "C" fn sgc_attach_thread() -> u64 {
    let Some(ctx) = context() else {
        return 0;
    };
    THREAD.with(|thread| {
        if thread.get() == 0 {
            thread.set(ctx.attach_current_thread());
        }
        thread.get()
    })
}

#[no_mangle]
pub extern "C" fn sgc_detach_thread() -> bool {
    let Some((ctx, id)) = current_thread() else {
        return false;
    };
    ctx.detach_current_thread(id);
    THREAD.with(|thread| thread.set(0));
    true
}

/// Allocate an object with `slots` reference slots and `payload` bytes
///
/// Returns the address, `0` when out of memory.
#[no_mangle]
pub extern "C" fn sgc_allocate(slots: usize, payload: usize) -> usize {
    let Some((ctx, id)) = current_thread() else {
        return 0;
    };
    let shape = ObjectShape::with_payload(slots, payload);
    report(ctx.allocate(id, &shape).map(ObjRef::address), 0)
}

/// Store a root in thread-local slot `index`
#[no_mangle]
pub extern "C" fn sgc_set_root(index: usize, address: usize) -> bool {
    let Some((ctx, id)) = current_thread() else {
        return false;
    };
    report(
        ctx.set_thread_local(id, index, ObjRef::decode(address)).map(|()| true),
        false,
    )
}

/// Current address of the root in thread-local slot `index`
#[no_mangle]
pub extern "C" fn sgc_get_root(index: usize) -> usize {
    let Some((ctx, id)) = current_thread() else {
        return 0;
    };
    report(ctx.thread_local(id, index).map(ObjRef::encode), 0)
}

#[no_mangle]
pub extern "C" fn sgc_read_slot(holder: usize, index: usize) -> usize {
    let (Some(ctx), Some(holder)) = (context(), ObjRef::decode(holder)) else {
        return 0;
    };
    report(
        ctx.with_heap(|heap| heap.read_slot(holder, index)).map(ObjRef::encode),
        0,
    )
}

/// Store with the write barrier
#[no_mangle]
pub extern "C" fn sgc_write_slot(holder: usize, index: usize, value: usize) -> bool {
    let (Some(ctx), Some(holder)) = (context(), ObjRef::decode(holder)) else {
        return false;
    };
    let value = ObjRef::decode(value);
    report(
        ctx.with_heap_mut(|heap| heap.write_slot(holder, index, value))
            .map(|()| true),
        false,
    )
}

/// Request a collection; `false` when the heap is out of memory
#[no_mangle]
pub extern "C" fn sgc_collect() -> bool {
    let Some(ctx) = context() else {
        return false;
    };
    report(ctx.collect(GcCause::Explicit).map(|()| true), false)
}

#[no_mangle]
pub extern "C" fn sgc_collect_completely() -> bool {
    let Some(ctx) = context() else {
        return false;
    };
    report(ctx.collect_completely(GcCause::Explicit).map(|()| true), false)
}

/// Advisory collection request; returns whether a collection ran
#[no_mangle]
pub extern "C" fn sgc_collection_hint(full: bool) -> bool {
    let Some(ctx) = context() else {
        return false;
    };
    report(ctx.collection_hint(full), false)
}

#[no_mangle]
pub extern "C" fn sgc_collection_epoch() -> u64 {
    context().map_or(0, GcContext::collection_epoch)
}

#[no_mangle]
pub extern "C" fn sgc_is_complete_collection() -> bool {
    context().is_some_and(GcContext::is_complete_collection)
}

#[no_mangle]
pub extern "C" fn sgc_safepoint_poll() {
    if let Some(ctx) = CONTEXT.get() {
        ctx.safepoint().poll();
    }
}

/// Deliver outstanding references and print the summary if configured
#[no_mangle]
pub extern "C" fn sgc_shutdown() {
    if let Some(ctx) = CONTEXT.get() {
        ctx.shutdown();
    }
}
