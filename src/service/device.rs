//! # Device Communication
//!
//! [`MiioCommunication`] is the host-facing handle for one physical device.
//! It validates and queues commands, owns the dispatcher worker and exposes
//! the liveness facts the worker maintains.
//!
//! ## Example
//! ```rust,no_run
//! use miio_protocol::service::{DeviceEndpoint, MiioCommunication};
//! use futures::StreamExt;
//!
//! # async fn run() -> miio_protocol::error::Result<()> {
//! let endpoint = DeviceEndpoint::new(
//!     "192.168.1.40:54321".parse().expect("address"),
//!     "00112233445566778899aabbccddeeff",
//! )?;
//! let comms = MiioCommunication::new(endpoint)?;
//! let (_id, mut events) = comms.subscribe()?;
//!
//! let id = comms.enqueue("get_prop", r#"["power"]"#)?;
//! while let Some(event) = events.next().await {
//!     println!("{id}: {event:?}");
//! }
//! comms.close().await;
//! # Ok(())
//! # }
//! ```

use crate::config::{DispatcherConfig, MiioConfig};
use crate::core::command::CommandDraft;
use crate::core::message::UNKNOWN_DEVICE_ID;
use crate::error::{MiioError, Result};
use crate::protocol::dispatcher::{Dispatcher, DispatcherContext, DispatcherHandle, DispatcherState};
use crate::protocol::listener::{EventStream, ListenerId, ListenerSet, MiioListener};
use crate::protocol::liveness::{ConnectivityState, LinkState};
use crate::transport::{Transport, UdpTransport};
use crate::utils::crypto::{parse_token, MiioCrypto, Token};
use crate::utils::metrics::{Metrics, MetricsSnapshot};
use crate::utils::timeout::DEFAULT_TIMEOUT;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Where and how to reach one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    pub addr: SocketAddr,
    /// `[0xFF; 4]` or `[0; 4]` to learn it from the handshake
    pub device_id: [u8; 4],
    pub token: Token,
    /// Receive timeout for one exchange
    pub timeout: Duration,
}

impl DeviceEndpoint {
    /// Endpoint with an unknown device id and the default timeout
    pub fn new(addr: SocketAddr, hex_token: &str) -> Result<Self> {
        Ok(Self {
            addr,
            device_id: UNKNOWN_DEVICE_ID,
            token: parse_token(hex_token)?,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_device_id(mut self, device_id: [u8; 4]) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build an endpoint from validated configuration
    pub fn from_config(config: &MiioConfig) -> Result<Self> {
        let device = &config.device;
        Ok(Self {
            addr: device.socket_addr()?,
            device_id: device
                .device_id
                .map(u32::to_be_bytes)
                .unwrap_or(UNKNOWN_DEVICE_ID),
            token: parse_token(&device.token)?,
            timeout: device.timeout,
        })
    }
}

/// Asynchronous command channel to one Mi IO device
pub struct MiioCommunication {
    endpoint: DeviceEndpoint,
    link: Arc<LinkState>,
    listeners: Arc<ListenerSet>,
    metrics: Arc<Metrics>,
    dispatcher: DispatcherHandle,
    next_id: AtomicU32,
    ping_on_enqueue: bool,
    runtime: Handle,
}

impl MiioCommunication {
    /// Talk to `endpoint` over UDP with default dispatcher settings.
    ///
    /// Must be called from within a tokio runtime; the worker and listener
    /// tasks are spawned onto it.
    pub fn new(endpoint: DeviceEndpoint) -> Result<Self> {
        let transport = UdpTransport::new(endpoint.timeout);
        Self::with_transport(endpoint, transport, DispatcherConfig::default())
    }

    /// Build from a full configuration file, validating it first
    pub fn from_config(config: &MiioConfig) -> Result<Self> {
        config.validate_strict()?;
        let endpoint = DeviceEndpoint::from_config(config)?;
        let transport = UdpTransport::new(endpoint.timeout);
        Self::with_transport(endpoint, transport, config.dispatcher.clone())
    }

    /// Use a custom transport, e.g. a simulated device
    pub fn with_transport<T: Transport>(
        endpoint: DeviceEndpoint,
        transport: T,
        settings: DispatcherConfig,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            MiioError::ConfigError(format!("must be created inside a tokio runtime: {e}"))
        })?;

        let link = Arc::new(LinkState::new(endpoint.device_id));
        let listeners = Arc::new(ListenerSet::new());
        let metrics = Arc::new(Metrics::new());

        let dispatcher = Dispatcher::create(
            DispatcherContext {
                transport: Box::new(transport),
                crypto: MiioCrypto::new(&endpoint.token),
                addr: endpoint.addr,
                link: link.clone(),
                listeners: listeners.clone(),
                metrics: metrics.clone(),
                max_errors: settings.max_errors,
                ping_attempts: settings.ping_attempts,
            },
            runtime.clone(),
        );

        info!(device = %endpoint.addr, "Device communication created");
        Ok(Self {
            endpoint,
            link,
            listeners,
            metrics,
            dispatcher,
            next_id: AtomicU32::new(1),
            ping_on_enqueue: settings.ping_on_enqueue,
            runtime,
        })
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue `method` with JSON `params` (array or object) for delivery.
    ///
    /// Returns the correlation id that the eventual result will carry.
    ///
    /// # Errors
    /// `MiioError::InvalidCommand` for malformed input, `MiioError::Closed`
    /// after [`close`](Self::close).
    pub fn enqueue(&self, method: &str, params: &str) -> Result<u32> {
        self.submit(CommandDraft::new(method, params)?)
    }

    /// Like [`enqueue`](Self::enqueue) with already parsed parameters
    pub fn enqueue_value(&self, method: &str, params: Value) -> Result<u32> {
        self.submit(CommandDraft::with_value(method, params)?)
    }

    // Ids are only taken for commands that will actually be queued.
    fn submit(&self, draft: CommandDraft) -> Result<u32> {
        self.ensure_open()?;
        let id = self.next_id();
        let command = draft.assign(id);
        debug!(id, method = command.method(), "Queueing command");
        self.dispatcher.submit(command)?;
        self.metrics.command_enqueued();

        if self.ping_on_enqueue && self.status() != ConnectivityState::Connected {
            self.dispatcher.request_ping();
        }
        self.dispatcher.start()?;
        Ok(id)
    }

    /// Register a callback listener and make sure the worker runs.
    /// Registering the same `Arc` twice is a no-op.
    pub fn register_listener(&self, listener: Arc<dyn MiioListener>) -> Result<ListenerId> {
        self.ensure_open()?;
        let id = self.listeners.register(listener, &self.runtime)?;
        self.dispatcher.start()?;
        Ok(id)
    }

    /// Stream-style registration; dropping the stream unregisters it
    pub fn subscribe(&self) -> Result<(ListenerId, EventStream)> {
        self.ensure_open()?;
        let subscription = self.listeners.subscribe()?;
        self.dispatcher.start()?;
        Ok(subscription)
    }

    /// Returns whether the listener was registered
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    /// Run a handshake ahead of queued commands and report reachability
    pub async fn ping(&self) -> bool {
        self.dispatcher.ping().await
    }

    /// Stop the worker, abandon queued commands and drop all listeners.
    /// The communication cannot be reused afterwards.
    pub async fn close(&self) {
        if self.dispatcher.state() == DispatcherState::Stopped {
            return;
        }
        self.dispatcher.stop().await;
        self.listeners.clear();
        self.metrics.log_metrics();
        info!(device = %self.endpoint.addr, "Device communication closed");
    }

    fn ensure_open(&self) -> Result<()> {
        match self.dispatcher.state() {
            DispatcherState::Stopped => Err(MiioError::Closed),
            _ => Ok(()),
        }
    }

    pub fn status(&self) -> ConnectivityState {
        self.link.status()
    }

    /// Consecutive exchange failures since the last success
    pub fn error_count(&self) -> u32 {
        self.link.error_count()
    }

    /// Commands accepted but not yet picked up by the worker
    pub fn queue_len(&self) -> usize {
        self.dispatcher.queue_len()
    }

    /// Device clock minus local clock, in seconds
    pub fn clock_offset(&self) -> i64 {
        self.link.clock_offset()
    }

    pub fn device_id(&self) -> [u8; 4] {
        self.link.device_id()
    }

    /// Override the device id used for every later frame
    pub fn set_device_id(&self, device_id: [u8; 4]) {
        self.link.set_device_id(device_id);
    }

    /// Token announced by an unprovisioned device, if any
    pub fn discovered_token(&self) -> Option<Token> {
        self.link.discovered_token()
    }

    pub fn dispatcher_state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }
}

impl std::fmt::Debug for MiioCommunication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiioCommunication")
            .field("addr", &self.endpoint.addr)
            .field("status", &self.status())
            .field("queue_len", &self.queue_len())
            .finish()
    }
}
