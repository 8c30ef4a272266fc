//! # Error Types
//!
//! Error handling for Mi IO device communication.
//!
//! This module defines every failure that can happen while talking to a
//! device, from socket-level I/O up to responses that decrypt into garbage.
//!
//! ## Error Categories
//! - **Exchange Errors**: timeouts, socket failures, bad frames, crypto failures
//! - **Caller Errors**: malformed command parameters, use after close
//! - **Configuration Errors**: invalid tokens, addresses or timeouts
//!
//! Exchange errors never escape the dispatcher: they are converted into a
//! result event of the shape `{"error": "<reason>"}` via [`MiioError::reason`].
//!
//! ## Example Usage
//! ```rust
//! use miio_protocol::error::{MiioError, Result};
//! use tracing::{error, info};
//!
//! fn parse_port(raw: &str) -> Result<u16> {
//!     raw.parse::<u16>()
//!         .map_err(|e| MiioError::ConfigError(format!("invalid port: {e}")))
//! }
//!
//! match parse_port("54321") {
//!     Ok(port) => info!(port, "Using port"),
//!     Err(e) => error!(error = %e, "Bad port"),
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Reasons reported to listeners inside `{"error": ...}`
    pub const REASON_NO_RESPONSE: &str = "No Response";
    pub const REASON_CHECKSUM: &str = "Checksum Error";
    pub const REASON_CRYPTO: &str = "Crypto Error";
    pub const REASON_MALFORMED: &str = "Malformed Response";
    pub const REASON_TRANSPORT: &str = "Transport Error";
    pub const REASON_INVALID_FRAME: &str = "Invalid Frame";
    pub const REASON_CLOSED: &str = "Connection Closed";
    pub const REASON_INVALID_COMMAND: &str = "Invalid Command";
    pub const REASON_CONFIG: &str = "Configuration Error";
    pub const REASON_INTERNAL: &str = "Internal Error";

    /// Cipher errors
    pub const ERR_DECRYPTION_FAILED: &str = "Decryption failed";
    pub const ERR_NOT_UTF8: &str = "Decrypted payload is not valid UTF-8";

    /// Command validation errors
    pub const ERR_PARAMS_NOT_JSON: &str = "Command parameters are not valid JSON";
    pub const ERR_PARAMS_SHAPE: &str = "Command parameters must be a JSON array or object";
    pub const ERR_EMPTY_METHOD: &str = "Command method cannot be empty";
    pub const ERR_REQUEST_TOO_LARGE: &str = "Command does not fit in a single frame";
    pub const ERR_FRAME_TOO_LARGE: &str = "Frame exceeds the 16-bit length field";

    /// Lock poisoning
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// Structural reason a datagram was rejected by the frame codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFault {
    /// Fewer bytes than the fixed 32-byte header
    TooShort,
    /// First two bytes are not the Mi IO magic
    BadMagic,
    /// Declared length differs from the datagram length
    LengthMismatch,
    /// MD5 digest over header, token and body does not match
    ChecksumMismatch,
}

impl fmt::Display for FrameFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FrameFault::TooShort => "frame shorter than header",
            FrameFault::BadMagic => "bad magic",
            FrameFault::LengthMismatch => "length field does not match datagram",
            FrameFault::ChecksumMismatch => "checksum mismatch",
        };
        f.write_str(text)
    }
}

// MiioError is the primary error type for all device communication
#[derive(Error, Debug)]
pub enum MiioError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("No response within the receive timeout")]
    Timeout,

    #[error("Invalid frame: {0}")]
    InvalidFrame(FrameFault),

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Communication closed")]
    Closed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MiioError {
    /// Reason string delivered to listeners as `{"error": "<reason>"}`.
    pub fn reason(&self) -> &'static str {
        match self {
            MiioError::Timeout => constants::REASON_NO_RESPONSE,
            MiioError::InvalidFrame(FrameFault::ChecksumMismatch) => constants::REASON_CHECKSUM,
            MiioError::InvalidFrame(_) => constants::REASON_INVALID_FRAME,
            MiioError::CryptoError(_) => constants::REASON_CRYPTO,
            MiioError::MalformedResponse(_) => constants::REASON_MALFORMED,
            MiioError::Io(_) | MiioError::TransportError(_) => constants::REASON_TRANSPORT,
            MiioError::Closed => constants::REASON_CLOSED,
            MiioError::InvalidCommand(_) => constants::REASON_INVALID_COMMAND,
            MiioError::ConfigError(_) => constants::REASON_CONFIG,
            MiioError::Internal(_) => constants::REASON_INTERNAL,
        }
    }

    /// Whether the error came out of a network exchange and therefore feeds
    /// the consecutive-error counter.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            MiioError::Io(_)
                | MiioError::Timeout
                | MiioError::InvalidFrame(_)
                | MiioError::CryptoError(_)
                | MiioError::MalformedResponse(_)
                | MiioError::TransportError(_)
        )
    }

    /// A structurally broken reply is dropped without producing a result event.
    pub fn is_discardable(&self) -> bool {
        matches!(
            self,
            MiioError::InvalidFrame(
                FrameFault::TooShort | FrameFault::BadMagic | FrameFault::LengthMismatch
            )
        )
    }
}

/// Type alias for Results using MiioError
pub type Result<T> = std::result::Result<T, MiioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_no_response() {
        assert_eq!(MiioError::Timeout.reason(), "No Response");
        assert!(MiioError::Timeout.counts_as_failure());
        assert!(!MiioError::Timeout.is_discardable());
    }

    #[test]
    fn length_mismatch_is_discarded_but_checksum_is_reported() {
        let length = MiioError::InvalidFrame(FrameFault::LengthMismatch);
        let checksum = MiioError::InvalidFrame(FrameFault::ChecksumMismatch);
        assert!(length.is_discardable());
        assert!(!checksum.is_discardable());
        assert_eq!(checksum.reason(), "Checksum Error");
    }

    #[test]
    fn caller_errors_do_not_count() {
        assert!(!MiioError::InvalidCommand("x".into()).counts_as_failure());
        assert!(!MiioError::Closed.counts_as_failure());
    }

    #[test]
    fn local_errors_keep_their_own_reason() {
        assert_eq!(MiioError::InvalidCommand("x".into()).reason(), "Invalid Command");
        assert_eq!(MiioError::ConfigError("x".into()).reason(), "Configuration Error");
        assert_eq!(MiioError::Internal("x".into()).reason(), "Internal Error");
        assert_eq!(
            MiioError::TransportError("x".into()).reason(),
            "Transport Error"
        );
    }
}
