//! # Protocol Layer
//!
//! Command dispatch, liveness and event delivery for one device.
//!
//! ## Components
//! - **Dispatcher**: the single worker that serializes every exchange
//! - **Liveness**: connectivity state machine, error counter, clock offset
//! - **Listener**: fan-out of result and status events
//!
//! ## Flow
//! 1. The facade validates a command and pushes it onto the FIFO queue
//! 2. The worker encrypts, frames and sends it, then waits for one reply
//! 3. The reply (or the failure reason) is emitted to every listener
//! 4. Failures feed the liveness tracker, which may force a ping

pub mod dispatcher;
pub mod listener;
pub mod liveness;


pub use dispatcher::{Dispatcher, DispatcherHandle, DispatcherState};
pub use listener::{EventStream, ListenerId, MiioEvent, MiioListener};
pub use liveness::ConnectivityState;
