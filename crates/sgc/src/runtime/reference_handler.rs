//! Reference Handler - Delivery of cleared references outside the safepoint
//!
//! Collections link cleared reference objects into the heap's pending list.
//! `GcContext::do_reference_handling` drains that list after the safepoint
//! and enqueues the snapshots here. A started handler thread passes every
//! batch to its callback; without one the batches wait until `try_drain`.

use crate::object::PendingReference;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Callback receiving one cleared reference
pub type ReferenceCallback = Box<dyn Fn(&PendingReference) + Send + 'static>;

pub struct ReferenceHandler {
    sender: Sender<Vec<PendingReference>>,
    receiver: Receiver<Vec<PendingReference>>,

    /// Handler thread handle
    thread_handle: Mutex<Option<JoinHandle<()>>>,

    /// Running flag
    running: Arc<AtomicBool>,

    enqueued: AtomicU64,
    handled: Arc<AtomicU64>,
}

impl ReferenceHandler {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            thread_handle: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            enqueued: AtomicU64::new(0),
            handled: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the handler thread
    ///
    /// Returns `false` if a handler thread is already running.
    pub fn start(&self, callback: ReferenceCallback) -> std::io::Result<bool> {
        let mut handle = self.thread_handle.lock();
        if handle.is_some() {
            return Ok(false);
        }
        self.running.store(true, Ordering::Release);

        let receiver = self.receiver.clone();
        let running = self.running.clone();
        let handled = self.handled.clone();
        let thread = std::thread::Builder::new()
            .name("sgc-reference-handler".into())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    match receiver.recv_timeout(Duration::from_millis(50)) {
                        Ok(batch) => {
                            batch.iter().for_each(&callback);
                            handled.fetch_add(batch.len() as u64, Ordering::Relaxed);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        *handle = Some(thread);
        log::debug!("[GC] reference handler started");
        Ok(true)
    }

    /// Stop the handler thread, leaving undelivered batches queued
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.lock().take() {
            if handle.join().is_err() {
                log::warn!("[GC] reference handler panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Queue a batch of cleared references
    pub fn enqueue(&self, batch: Vec<PendingReference>) {
        if batch.is_empty() {
            return;
        }
        self.enqueued.fetch_add(batch.len() as u64, Ordering::Relaxed);
        // the handler owns a receiver, so the channel cannot be disconnected
        let _ = self.sender.send(batch);
    }

    /// Take every queued reference without a handler thread
    pub fn try_drain(&self) -> Vec<PendingReference> {
        let drained: Vec<PendingReference> = self.receiver.try_iter().flatten().collect();
        self.handled.fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained
    }

    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn handled_count(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }
}

impl Default for ReferenceHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReferenceHandler {
    fn drop(&mut self) {
        self.stop();
    }
}
