//! # Core Protocol Components
//!
//! Wire framing and command envelopes.
//!
//! ## Components
//! - **Message**: the binary Mi IO frame with its MD5 checksum
//! - **Command**: JSON request envelopes, device replies and result events
//!
//! ## Wire Format
//! ```text
//! [Magic(2)] [Length(2)] [Unknown(4)] [DeviceId(4)] [Stamp(4)] [Checksum(16)] [Body(N)]
//! ```
//!
//! ## Validation
//! - Frames shorter than the 32-byte header are never parsed
//! - The length field must equal the datagram length
//! - Bodies are only trusted after the checksum matches the token

pub mod command;
pub mod message;
