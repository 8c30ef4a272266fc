//! UDP transport for Mi IO devices.

use crate::config::MAX_DATAGRAM_SIZE;
use crate::error::{MiioError, Result};
use crate::transport::Transport;
use crate::utils::timeout::DEFAULT_TIMEOUT;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

/// A single UDP socket bound to an ephemeral port, reused across exchanges
#[derive(Debug)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    recv_timeout: Duration,
    recv_buf: Vec<u8>,
    /// End of the receive window opened by the last send
    deadline: Option<Instant>,
}

impl UdpTransport {
    pub fn new(recv_timeout: Duration) -> Self {
        Self {
            socket: None,
            recv_timeout,
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
            deadline: None,
        }
    }

    pub fn recv_timeout(&self) -> Duration {
        self.recv_timeout
    }

    /// Whether a socket is currently open
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    async fn ensure_socket(&mut self) -> Result<()> {
        if self.socket.is_none() {
            let socket = UdpSocket::bind("0.0.0.0:0")
                .await
                .map_err(|e| MiioError::TransportError(format!("bind failed: {e}")))?;
            debug!(local = ?socket.local_addr().ok(), "Opened UDP socket");
            self.socket = Some(socket);
        }
        Ok(())
    }

    /// Throw away datagrams that arrived after an earlier exchange gave up,
    /// so they cannot pass for the reply to the next request.
    fn drain_stale(&mut self) {
        let Some(sock) = self.socket.as_ref() else {
            return;
        };
        let mut dropped = 0usize;
        loop {
            match sock.try_recv_from(self.recv_buf.as_mut_slice()) {
                Ok(_) => dropped += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    trace!(error = %e, "Error while draining socket");
                    break;
                }
            }
        }
        if dropped > 0 {
            debug!(dropped, "Dropped late datagrams before sending");
        }
    }

    /// Receive the next datagram from `addr` until the current deadline.
    async fn receive_until_deadline(&mut self, addr: SocketAddr) -> Result<Bytes> {
        let Self {
            socket,
            recv_buf,
            deadline,
            ..
        } = self;
        let Some(until) = *deadline else {
            return Err(MiioError::Timeout);
        };
        let Some(sock) = socket.as_ref() else {
            return Err(MiioError::TransportError("socket unavailable".into()));
        };

        let received = tokio::time::timeout_at(until, async {
            loop {
                let (len, from) = sock
                    .recv_from(recv_buf.as_mut_slice())
                    .await
                    .map_err(|e| MiioError::TransportError(format!("receive failed: {e}")))?;
                if from == addr {
                    return Ok(Bytes::copy_from_slice(&recv_buf[..len]));
                }
                trace!(%from, "Ignoring datagram from unexpected peer");
            }
        })
        .await
        .unwrap_or(Err(MiioError::Timeout));

        if matches!(received, Err(MiioError::TransportError(_))) {
            *socket = None;
            *deadline = None;
        }
        received
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    #[instrument(skip(self, frame), fields(len = frame.len()), level = "debug")]
    async fn exchange(&mut self, frame: &[u8], addr: SocketAddr) -> Result<Bytes> {
        self.ensure_socket().await?;
        self.drain_stale();

        let Some(sock) = self.socket.as_ref() else {
            return Err(MiioError::TransportError("socket unavailable".into()));
        };
        let sent = sock.send_to(frame, addr).await;
        if let Err(e) = sent {
            warn!(error = %e, %addr, "Send failed, dropping socket");
            self.socket = None;
            self.deadline = None;
            return Err(MiioError::TransportError(format!("send failed: {e}")));
        }

        self.deadline = Some(Instant::now() + self.recv_timeout);
        self.receive_until_deadline(addr).await
    }

    async fn receive_more(&mut self, addr: SocketAddr) -> Result<Bytes> {
        self.receive_until_deadline(addr).await
    }

    fn close(&mut self) {
        self.deadline = None;
        if self.socket.take().is_some() {
            debug!("Closed UDP socket");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn echo_roundtrip_over_loopback() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = peer.recv_from(&mut buf).await.unwrap();
            peer.send_to(&buf[..len], from).await.unwrap();
        });

        let mut transport = UdpTransport::new(Duration::from_secs(2));
        let reply = transport.exchange(b"ping", peer_addr).await.unwrap();
        assert_eq!(reply.as_ref(), b"ping");
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let mut transport = UdpTransport::new(Duration::from_millis(100));
        let result = transport.exchange(b"hello", peer_addr).await;
        assert!(matches!(result, Err(MiioError::Timeout)));
        drop(peer);
    }

    #[tokio::test]
    async fn socket_is_recreated_after_close() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            for _ in 0..2 {
                let (len, from) = peer.recv_from(&mut buf).await.unwrap();
                peer.send_to(&buf[..len], from).await.unwrap();
            }
        });

        let mut transport = UdpTransport::new(Duration::from_secs(2));
        transport.exchange(b"one", peer_addr).await.unwrap();
        transport.close();
        assert!(!transport.is_open());
        let reply = transport.exchange(b"two", peer_addr).await.unwrap();
        assert_eq!(reply.as_ref(), b"two");
    }

    #[tokio::test]
    async fn late_datagram_is_not_taken_for_the_next_reply() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (_, from) = peer.recv_from(&mut buf).await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            peer.send_to(b"late", from).await.unwrap();
            let (len, from) = peer.recv_from(&mut buf).await.unwrap();
            peer.send_to(&buf[..len], from).await.unwrap();
        });

        let mut transport = UdpTransport::new(Duration::from_millis(50));
        let first = transport.exchange(b"one", peer_addr).await;
        assert!(matches!(first, Err(MiioError::Timeout)));

        tokio::time::sleep(Duration::from_millis(250)).await;
        transport.recv_timeout = Duration::from_secs(2);
        let reply = transport.exchange(b"two", peer_addr).await.unwrap();
        assert_eq!(reply.as_ref(), b"two");
    }

    #[tokio::test]
    async fn receive_more_reads_within_the_same_window() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (_, from) = peer.recv_from(&mut buf).await.unwrap();
            peer.send_to(b"stale", from).await.unwrap();
            peer.send_to(b"fresh", from).await.unwrap();
        });

        let mut transport = UdpTransport::new(Duration::from_millis(500));
        let first = transport.exchange(b"req", peer_addr).await.unwrap();
        assert_eq!(first.as_ref(), b"stale");
        let second = transport.receive_more(peer_addr).await.unwrap();
        assert_eq!(second.as_ref(), b"fresh");
        assert!(matches!(
            transport.receive_more(peer_addr).await,
            Err(MiioError::Timeout)
        ));
    }

    #[tokio::test]
    async fn receive_more_without_exchange_times_out() {
        let mut transport = UdpTransport::default();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(
            transport.receive_more(addr).await,
            Err(MiioError::Timeout)
        ));
    }
}
