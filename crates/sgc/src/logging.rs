//! GC Logging and Telemetry
//!
//! The collector reports every cycle to a write-only `GcEventSink`. The
//! default sink, `GcLogger`, keeps the most recent events in memory and can
//! echo them to the console, human-readable or as JSON lines.
//!
//! Log Levels:
//! - ERROR: allocation failures
//! - INFO: cycle start and end
//! - DEBUG: passes, phase times, released chunks
//! - TRACE: reference processing

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Log level for GC events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// GC event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GcEvent {
    /// A cycle reached its safepoint
    CycleStart {
        epoch: u64,
        cause: &'static str,
        force_full: bool,
    },

    /// One incremental or complete pass finished
    PassEnd {
        epoch: u64,
        complete: bool,
        duration_ms: f64,
        copied_objects: u64,
        promoted_objects: u64,
        survivor_overflows: u64,
        out_of_memory: bool,
    },

    /// Phase breakdown of a cycle
    PhaseTimes {
        epoch: u64,
        phases: Vec<(&'static str, f64)>,
    },

    /// Reference processing of a pass
    References {
        epoch: u64,
        kept_alive: u64,
        cleared: u64,
    },

    /// Chunks handed back to the provider
    ChunksReleased {
        epoch: u64,
        chunks: usize,
        bytes: usize,
    },

    /// A cycle finished and the epoch advanced
    CycleEnd {
        epoch: u64,
        cause: &'static str,
        incremental_passes: u32,
        complete_passes: u32,
        pause_ms: f64,
        used_before: usize,
        used_after: usize,
        reclaimed_bytes: usize,
    },

    /// Allocation failed after the escalation path
    AllocationFailure {
        size: usize,
        used: usize,
        max: usize,
    },
}

impl GcEvent {
    /// Level an event is reported at
    pub fn level(&self) -> LogLevel {
        match self {
            GcEvent::AllocationFailure { .. } => LogLevel::Error,
            GcEvent::CycleStart { .. } | GcEvent::CycleEnd { .. } => LogLevel::Info,
            GcEvent::PassEnd { .. } | GcEvent::PhaseTimes { .. } | GcEvent::ChunksReleased { .. } => {
                LogLevel::Debug
            }
            GcEvent::References { .. } => LogLevel::Trace,
        }
    }

    /// Epoch the event belongs to, if any
    pub fn epoch(&self) -> Option<u64> {
        match self {
            GcEvent::CycleStart { epoch, .. }
            | GcEvent::PassEnd { epoch, .. }
            | GcEvent::PhaseTimes { epoch, .. }
            | GcEvent::References { epoch, .. }
            | GcEvent::ChunksReleased { epoch, .. }
            | GcEvent::CycleEnd { epoch, .. } => Some(*epoch),
            GcEvent::AllocationFailure { .. } => None,
        }
    }
}

/// Write-only receiver of collector telemetry
pub trait GcEventSink: Send + Sync {
    fn record(&self, event: &GcEvent);
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl GcEventSink for NullSink {
    fn record(&self, _event: &GcEvent) {}
}

/// GC Logger configuration
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Enable console output
    pub console: bool,

    /// Enable JSON format
    pub json: bool,

    /// Enable timestamps
    pub timestamps: bool,

    /// Number of events kept in memory
    pub capacity: usize,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: true,
            json: false,
            timestamps: true,
            capacity: 1024,
        }
    }
}

/// GC Logger - bounded in-memory event log with optional console output
pub struct GcLogger {
    config: GcLoggerConfig,
    events: Mutex<VecDeque<(DateTime<Local>, GcEvent)>>,
    enabled: AtomicBool,
}

impl GcLogger {
    /// Create new GC logger
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(config.capacity.min(1024))),
            config,
            enabled: AtomicBool::new(true),
        }
    }

    /// Enable logging
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a GC event
    pub fn log(&self, event: GcEvent) {
        if !self.is_enabled() || event.level() > self.config.level {
            return;
        }

        let timestamp = Local::now();
        if self.config.console {
            println!("{}", self.render(&timestamp, &event));
        }

        let mut events = self.events.lock();
        if events.len() == self.config.capacity.max(1) {
            events.pop_front();
        }
        events.push_back((timestamp, event));
    }

    /// Format an event as a console line
    pub fn render(&self, timestamp: &DateTime<Local>, event: &GcEvent) -> String {
        let body = if self.config.json {
            serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
        } else {
            Self::human(event)
        };
        if self.config.timestamps {
            format!("[{}] {}", timestamp.format("%Y-%m-%d %H:%M:%S%.3f"), body)
        } else {
            body
        }
    }

    /// Human-readable form of an event
    fn human(event: &GcEvent) -> String {
        match event {
            GcEvent::CycleStart {
                epoch,
                cause,
                force_full,
            } => format!(
                "[GC] Cycle {} started (cause: {}{})",
                epoch,
                cause,
                if *force_full { ", full" } else { "" }
            ),
            GcEvent::PassEnd {
                epoch,
                complete,
                duration_ms,
                copied_objects,
                promoted_objects,
                survivor_overflows,
                out_of_memory,
            } => format!(
                "[GC] Cycle {}: {} pass {:.3}ms, {} copied, {} promoted, {} survivor overflows{}",
                epoch,
                if *complete { "complete" } else { "incremental" },
                duration_ms,
                copied_objects,
                promoted_objects,
                survivor_overflows,
                if *out_of_memory { ", out of memory" } else { "" }
            ),
            GcEvent::PhaseTimes { epoch, phases } => format!(
                "[GC] Cycle {} phases: {}",
                epoch,
                phases
                    .iter()
                    .map(|(name, ms)| format!("{}: {:.3}ms", name, ms))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            GcEvent::References {
                epoch,
                kept_alive,
                cleared,
            } => format!(
                "[GC] Cycle {}: references {} kept, {} cleared",
                epoch, kept_alive, cleared
            ),
            GcEvent::ChunksReleased { epoch, chunks, bytes } => {
                format!("[GC] Cycle {}: released {} chunks ({} bytes)", epoch, chunks, bytes)
            }
            GcEvent::CycleEnd {
                epoch,
                cause,
                incremental_passes,
                complete_passes,
                pause_ms,
                used_before,
                used_after,
                reclaimed_bytes,
            } => format!(
                "[GC] Cycle {} completed ({}, {}i/{}c passes): {}K->{}K, reclaimed {} bytes, {:.3}ms",
                epoch,
                cause,
                incremental_passes,
                complete_passes,
                used_before / 1024,
                used_after / 1024,
                reclaimed_bytes,
                pause_ms
            ),
            GcEvent::AllocationFailure { size, used, max } => format!(
                "[GC] Allocation failure: {} bytes (heap used: {} of {})",
                size, used, max
            ),
        }
    }

    /// Get all retained events, oldest first
    pub fn events(&self) -> Vec<GcEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Clear all events
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(GcLoggerConfig::default())
    }
}

impl GcEventSink for GcLogger {
    fn record(&self, event: &GcEvent) {
        self.log(event.clone());
    }
}
