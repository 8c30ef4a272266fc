//! Device liveness tracking.
//!
//! The tracker holds the belief about whether the device is reachable, the
//! consecutive exchange error counter and the negotiated clock offset. It
//! performs no I/O: the dispatcher runs the handshake exchanges and reports
//! their outcome here, which keeps every mutation on the worker.
//!
//! ```text
//!            ping ok                      ping exhausted
//!  Unknown ───────────► Connected ◄──────┐   ───────────► Disconnected
//!                          │  ▲          │
//!     errors > max and     │  │ any      │ ping ok
//!     forced ping fails    ▼  │ success  │
//!                        ConfigError ────┘
//! ```

use crate::core::message::MiioMessage;
use crate::protocol::listener::{ListenerSet, MiioEvent};
use crate::utils::crypto::Token;
use crate::utils::time::{clock_offset, unix_seconds};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Externally observable connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectivityState {
    /// Nothing exchanged yet
    Unknown,
    Connected,
    Disconnected,
    /// Repeated failures although the device answered before; likely a wrong
    /// token or device id rather than a network blip
    ConfigError,
}

impl ConnectivityState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectivityState::Unknown => 0,
            ConnectivityState::Connected => 1,
            ConnectivityState::Disconnected => 2,
            ConnectivityState::ConfigError => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectivityState::Connected,
            2 => ConnectivityState::Disconnected,
            3 => ConnectivityState::ConfigError,
            _ => ConnectivityState::Unknown,
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectivityState::Unknown => "UNKNOWN",
            ConnectivityState::Connected => "CONNECTED",
            ConnectivityState::Disconnected => "DISCONNECTED",
            ConnectivityState::ConfigError => "CONFIG_ERROR",
        };
        f.write_str(text)
    }
}

/// Link facts written by the worker and read by the facade
#[derive(Debug)]
pub struct LinkState {
    status: AtomicU8,
    errors: AtomicU32,
    clock_offset: AtomicI64,
    device_id: AtomicU32,
    discovered_token: Mutex<Option<Token>>,
}

impl LinkState {
    pub fn new(device_id: [u8; 4]) -> Self {
        Self {
            status: AtomicU8::new(ConnectivityState::Unknown.as_u8()),
            errors: AtomicU32::new(0),
            clock_offset: AtomicI64::new(0),
            device_id: AtomicU32::new(u32::from_be_bytes(device_id)),
            discovered_token: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ConnectivityState {
        ConnectivityState::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Consecutive exchange failures since the last success
    pub fn error_count(&self) -> u32 {
        self.errors.load(Ordering::Acquire)
    }

    /// Device clock minus local clock, in seconds
    pub fn clock_offset(&self) -> i64 {
        self.clock_offset.load(Ordering::Acquire)
    }

    pub fn device_id(&self) -> [u8; 4] {
        self.device_id.load(Ordering::Acquire).to_be_bytes()
    }

    /// Replace the device id used for every later frame
    pub fn set_device_id(&self, device_id: [u8; 4]) {
        self.device_id
            .store(u32::from_be_bytes(device_id), Ordering::Release);
    }

    /// Token revealed by an unprovisioned device during the handshake
    pub fn discovered_token(&self) -> Option<Token> {
        *self
            .discovered_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// What a successful handshake taught us
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub device_id: [u8; 4],
    pub announced_token: Option<Token>,
}

/// Liveness state machine driven by the dispatcher worker
pub struct LivenessTracker {
    link: Arc<LinkState>,
    listeners: Arc<ListenerSet>,
    max_errors: u32,
}

impl LivenessTracker {
    pub fn new(link: Arc<LinkState>, listeners: Arc<ListenerSet>, max_errors: u32) -> Self {
        Self {
            link,
            listeners,
            max_errors,
        }
    }

    pub fn status(&self) -> ConnectivityState {
        self.link.status()
    }

    fn transition(&self, next: ConnectivityState) -> bool {
        let previous = ConnectivityState::from_u8(self.link.status.swap(next.as_u8(), Ordering::AcqRel));
        previous != next
    }

    fn emit(&self, status: ConnectivityState) {
        self.listeners.emit(MiioEvent::Status(status));
    }

    /// Fold the timestamp of any valid reply into the clock offset.
    ///
    /// Handshake replies are unauthenticated, so a single spoofed reply can
    /// shift the timestamps of every later frame. This trust boundary is left
    /// open: the device protocol itself offers nothing to check the clock against.
    pub fn observe_clock(&self, device_timestamp: u32) {
        let offset = clock_offset(device_timestamp, unix_seconds());
        let previous = self.link.clock_offset.swap(offset, Ordering::AcqRel);
        if previous != offset {
            debug!(offset, previous, "Clock offset updated");
        }
    }

    /// A command exchange succeeded
    pub fn record_success(&self) {
        self.link.errors.store(0, Ordering::Release);
        if self.transition(ConnectivityState::Connected) {
            info!("Device connected");
            self.emit(ConnectivityState::Connected);
        }
    }

    /// A command exchange failed. Returns `true` when the failure crossed the
    /// threshold and the caller should run a forced ping.
    pub fn record_failure(&self) -> bool {
        let errors = self.link.errors.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        let status = self.status();
        debug!(errors, %status, "Exchange failure recorded");
        errors > self.max_errors && status != ConnectivityState::ConfigError
    }

    /// A ping got a valid handshake reply
    pub fn ping_succeeded(&self, reply: &MiioMessage) -> HandshakeInfo {
        self.observe_clock(reply.timestamp());

        let configured = self.link.device_id();
        let reported = reply.device_id();
        if configured == [0u8; 4] || configured == [0xFF; 4] {
            info!(device_id = %hex::encode(reported), "Learned device id from handshake");
            self.link.set_device_id(reported);
        } else if configured != reported {
            warn!(
                configured = %hex::encode(configured),
                reported = %hex::encode(reported),
                "Device reports a different id than configured"
            );
        }

        let announced_token = reply.announced_token();
        if let Some(token) = announced_token {
            let mut slot = self
                .link
                .discovered_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref() != Some(&token) {
                info!("Device announced its token during handshake");
                *slot = Some(token);
            }
        }

        self.record_success();
        HandshakeInfo {
            device_id: self.link.device_id(),
            announced_token,
        }
    }

    /// Every ping attempt went unanswered. `forced` marks the ping triggered
    /// by crossing the error threshold.
    pub fn ping_failed(&self, forced: bool) {
        let status = self.status();
        if forced {
            if status != ConnectivityState::ConfigError {
                self.transition(ConnectivityState::ConfigError);
                warn!(errors = self.link.error_count(), "Device unreachable after repeated failures");
                self.emit(ConnectivityState::ConfigError);
            }
            return;
        }

        if status == ConnectivityState::ConfigError {
            debug!("Ping failed while already in configuration error");
            return;
        }
        self.transition(ConnectivityState::Disconnected);
        info!("Device did not answer ping");
        self.emit(ConnectivityState::Disconnected);
    }
}
