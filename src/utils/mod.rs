//! # Utility Modules
//!
//! Supporting utilities for the payload cipher, logging, metrics and timing.
//!
//! ## Components
//! - **Crypto**: token parsing, MD5 digests and the AES-128-CBC payload cipher
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Per-device observability counters
//! - **Time**: Unix clock and device clock offset arithmetic
//! - **Timeout**: Async timeout wrappers

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod time;
pub mod timeout;

pub use crypto::{MiioCrypto, Token};
pub use metrics::{Metrics, MetricsSnapshot};
