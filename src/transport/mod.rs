//! # Transport Layer
//!
//! One request datagram out, one reply datagram back.
//!
//! The dispatcher owns exactly one [`Transport`] and is the only caller, so
//! implementations need no internal locking. Cancellation is the caller's
//! job: dropping the `exchange` future (the worker does this when the
//! communication is closed) abandons a pending receive immediately.
//!
//! ## Implementations
//! - **UDP**: [`udp::UdpTransport`], a lazily bound tokio socket

use crate::error::{MiioError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

pub mod udp;

pub use udp::UdpTransport;

/// A request/response datagram exchange
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send `frame` to `addr` and wait for a single reply datagram.
    ///
    /// # Errors
    /// `MiioError::Timeout` when nothing arrives before the receive timeout,
    /// `MiioError::TransportError` on socket failures.
    async fn exchange(&mut self, frame: &[u8], addr: SocketAddr) -> Result<Bytes>;

    /// Wait for another reply to the last exchange, within what is left of
    /// its receive timeout. The dispatcher calls this after skipping a reply
    /// that belongs to an earlier command.
    async fn receive_more(&mut self, addr: SocketAddr) -> Result<Bytes> {
        let _ = addr;
        Err(MiioError::Timeout)
    }

    /// Release the underlying socket. The next exchange opens a fresh one.
    fn close(&mut self);
}
