//! # miio-protocol
//!
//! Asynchronous communication with Xiaomi Mi IO devices on the local network.
//!
//! A device is addressed by IP and a 16-byte token. Every command is
//! encrypted with a key derived from the token, wrapped in a 32-byte
//! checksummed frame and sent as one UDP datagram to port 54321; the device
//! answers with one datagram. This crate queues commands, sends them strictly
//! one at a time from a single worker task, delivers every outcome to the
//! registered listeners and keeps track of whether the device is reachable.
//!
//! ## Layers
//! - [`core`]: frame codec and command envelopes
//! - [`utils::crypto`]: token cipher and digests
//! - [`transport`]: datagram exchange abstraction and its UDP implementation
//! - [`protocol`]: dispatcher worker, liveness tracking, event fan-out
//! - [`service`]: [`MiioCommunication`], the per-device facade
//! - [`config`]: TOML / environment configuration with validation
//!
//! ## Quick Start
//! ```rust,no_run
//! use miio_protocol::{MiioCommunication, MiioEvent};
//! use miio_protocol::service::DeviceEndpoint;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> miio_protocol::Result<()> {
//!     let endpoint = DeviceEndpoint::new(
//!         "192.168.1.40:54321".parse().expect("address"),
//!         "00112233445566778899aabbccddeeff",
//!     )?;
//!     let comms = MiioCommunication::new(endpoint)?;
//!     let (_, mut events) = comms.subscribe()?;
//!
//!     comms.enqueue("get_prop", r#"["power"]"#)?;
//!     if let Some(MiioEvent::Result(response)) = events.next().await {
//!         println!("{} -> {}", response.method, response.payload);
//!     }
//!     comms.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::command::MiioResponse;
pub use crate::core::message::MiioMessage;
pub use error::{MiioError, Result};
pub use protocol::{ConnectivityState, ListenerId, MiioEvent, MiioListener};
pub use service::{DeviceEndpoint, MiioCommunication};
