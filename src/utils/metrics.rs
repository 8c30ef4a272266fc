//! Observability and Metrics
//!
//! Per-device counters for command traffic, failures and liveness pings.
//!
//! Uses atomic counters so the facade can read them while the worker updates them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for one device communication instance
#[derive(Debug)]
pub struct Metrics {
    /// Commands accepted by `enqueue`
    pub commands_enqueued: AtomicU64,
    /// Command frames put on the wire
    pub commands_sent: AtomicU64,
    /// Commands that produced a successful result event
    pub responses_ok: AtomicU64,
    /// Commands that produced an error result event
    pub responses_error: AtomicU64,
    /// Exchanges that hit the receive timeout
    pub timeouts: AtomicU64,
    /// Replies dropped because the frame was structurally invalid
    pub frames_discarded: AtomicU64,
    /// Handshake frames sent
    pub pings_sent: AtomicU64,
    /// Pings that got a reply
    pub pings_ok: AtomicU64,
    /// Pings that exhausted every attempt
    pub pings_failed: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            commands_enqueued: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            responses_ok: AtomicU64::new(0),
            responses_error: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            pings_sent: AtomicU64::new(0),
            pings_ok: AtomicU64::new(0),
            pings_failed: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn command_enqueued(&self) {
        self.commands_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a command frame sent
    pub fn command_sent(&self, byte_count: u64) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a datagram received
    pub fn datagram_received(&self, byte_count: u64) {
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn response_ok(&self) {
        self.responses_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_error(&self) {
        self.responses_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_discarded(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handshake frame sent
    pub fn ping_sent(&self, byte_count: u64) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn ping_ok(&self) {
        self.pings_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ping_failed(&self) {
        self.pings_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_enqueued: self.commands_enqueued.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            responses_ok: self.responses_ok.load(Ordering::Relaxed),
            responses_error: self.responses_error.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            pings_ok: self.pings_ok.load(Ordering::Relaxed),
            pings_failed: self.pings_failed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            commands_enqueued = snapshot.commands_enqueued,
            commands_sent = snapshot.commands_sent,
            responses_ok = snapshot.responses_ok,
            responses_error = snapshot.responses_error,
            timeouts = snapshot.timeouts,
            frames_discarded = snapshot.frames_discarded,
            pings_sent = snapshot.pings_sent,
            pings_ok = snapshot.pings_ok,
            pings_failed = snapshot.pings_failed,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            uptime_seconds = snapshot.uptime_seconds,
            "Device metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub commands_enqueued: u64,
    pub commands_sent: u64,
    pub responses_ok: u64,
    pub responses_error: u64,
    pub timeouts: u64,
    pub frames_discarded: u64,
    pub pings_sent: u64,
    pub pings_ok: u64,
    pub pings_failed: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
