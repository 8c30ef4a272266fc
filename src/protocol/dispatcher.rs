//! Serialized command dispatcher.
//!
//! Exactly one worker task owns the transport. Commands arrive over an
//! unbounded FIFO channel, liveness pings over a second channel, and a
//! cancellation token stops everything. The worker selects over the three
//! with a fixed priority (shutdown, then pings, then commands), so it sleeps
//! until there is work and at most one datagram exchange is ever in flight.
//!
//! Per command the pipeline is:
//!
//! ```text
//! encrypt -> frame -> exchange -> unframe -> decrypt -> parse -> emit
//! ```
//!
//! Replies carrying the id of an earlier command (late answers to exchanges
//! that already timed out) are skipped and the worker keeps listening for
//! the current one until the receive timeout.
//!
//! A failure only affects the command in flight: it becomes an error result
//! (or is discarded if the reply frame is structurally broken) and the loop
//! moves on to the next queued command.

use crate::core::command::{DeviceReply, MiioResponse, QueuedCommand};
use crate::core::message::MiioMessage;
use crate::error::{constants, MiioError, Result};
use crate::protocol::listener::{ListenerSet, MiioEvent};
use crate::protocol::liveness::{LinkState, LivenessTracker};
use crate::transport::Transport;
use crate::utils::crypto::{is_placeholder_token, MiioCrypto};
use crate::utils::metrics::{Metrics, Timer};
use crate::utils::time::{device_timestamp, unix_seconds};
use crate::utils::timeout::SHUTDOWN_TIMEOUT;
use bytes::Bytes;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of the dispatcher worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Created, worker not spawned yet; commands accumulate
    Idle,
    Running,
    /// Terminal
    Stopped,
}

/// A request to run the handshake on the worker
#[derive(Debug)]
pub struct PingRequest {
    /// `None` for opportunistic pings nobody waits for
    reply: Option<oneshot::Sender<bool>>,
}

/// Counters shared between the worker and its handle
#[derive(Debug, Default)]
struct WorkerShared {
    queue_len: AtomicUsize,
    ping_pending: AtomicBool,
}

/// Everything the worker needs besides its channels
pub struct DispatcherContext {
    pub transport: Box<dyn Transport>,
    pub crypto: MiioCrypto,
    pub addr: SocketAddr,
    pub link: Arc<LinkState>,
    pub listeners: Arc<ListenerSet>,
    pub metrics: Arc<Metrics>,
    pub max_errors: u32,
    pub ping_attempts: u32,
}

/// The worker side: owns the transport and drains the queues
pub struct Dispatcher {
    transport: Box<dyn Transport>,
    crypto: MiioCrypto,
    addr: SocketAddr,
    link: Arc<LinkState>,
    tracker: LivenessTracker,
    listeners: Arc<ListenerSet>,
    metrics: Arc<Metrics>,
    shared: Arc<WorkerShared>,
    commands: mpsc::UnboundedReceiver<QueuedCommand>,
    pings: mpsc::UnboundedReceiver<PingRequest>,
    shutdown: CancellationToken,
    ping_attempts: u32,
}

enum Lifecycle {
    Idle(Box<Dispatcher>),
    Running(JoinHandle<()>),
    Stopped,
}

/// The caller side: enqueues work and controls the worker lifecycle
pub struct DispatcherHandle {
    commands: mpsc::UnboundedSender<QueuedCommand>,
    pings: mpsc::UnboundedSender<PingRequest>,
    shutdown: CancellationToken,
    shared: Arc<WorkerShared>,
    lifecycle: Mutex<Lifecycle>,
    runtime: Handle,
}

impl Dispatcher {
    /// Build an idle worker and the handle that controls it.
    pub fn create(context: DispatcherContext, runtime: Handle) -> DispatcherHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (ping_tx, ping_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let shared = Arc::new(WorkerShared::default());

        let tracker = LivenessTracker::new(
            context.link.clone(),
            context.listeners.clone(),
            context.max_errors,
        );

        let worker = Dispatcher {
            transport: context.transport,
            crypto: context.crypto,
            addr: context.addr,
            link: context.link,
            tracker,
            listeners: context.listeners,
            metrics: context.metrics,
            shared: shared.clone(),
            commands: command_rx,
            pings: ping_rx,
            shutdown: shutdown.clone(),
            ping_attempts: context.ping_attempts.max(1),
        };

        DispatcherHandle {
            commands: command_tx,
            pings: ping_tx,
            shutdown,
            shared,
            lifecycle: Mutex::new(Lifecycle::Idle(Box::new(worker))),
            runtime,
        }
    }

    #[instrument(skip(self), fields(device = %self.addr), name = "miio_worker")]
    async fn run(mut self) {
        info!("Dispatcher worker started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(request) = self.pings.recv() => {
                    let opportunistic = request.reply.is_none();
                    let reachable = self.ping(false).await;
                    if opportunistic {
                        self.shared.ping_pending.store(false, Ordering::Release);
                    }
                    if let Some(reply) = request.reply {
                        let _ = reply.send(reachable);
                    }
                }

                Some(command) = self.commands.recv() => {
                    self.shared.queue_len.fetch_sub(1, Ordering::AcqRel);
                    self.process(command).await;
                }

                else => break,
            }
        }

        self.transport.close();
        info!("Dispatcher worker stopped");
    }

    /// One exchange on the shared transport, abandoned as soon as shutdown is requested
    async fn exchange(&mut self, frame: &[u8]) -> Result<Bytes> {
        let _timer = Timer::start("exchange");
        let reply = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(MiioError::Closed),
            reply = self.transport.exchange(frame, self.addr) => reply,
        };
        self.count_received(reply)
    }

    /// Keep listening within the current exchange's receive window
    async fn receive_more(&mut self) -> Result<Bytes> {
        let reply = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(MiioError::Closed),
            reply = self.transport.receive_more(self.addr) => reply,
        };
        self.count_received(reply)
    }

    fn count_received(&self, reply: Result<Bytes>) -> Result<Bytes> {
        if let Ok(bytes) = &reply {
            self.metrics.datagram_received(bytes.len() as u64);
        }
        reply
    }

    #[instrument(skip(self, command), fields(id = command.id(), method = command.method()))]
    async fn process(&mut self, command: QueuedCommand) {
        match self.execute(&command).await {
            Ok(payload) => {
                self.tracker.record_success();
                self.metrics.response_ok();
                self.listeners
                    .emit(MiioEvent::Result(MiioResponse::success(&command, payload)));
            }
            Err(MiioError::Closed) => {
                debug!("Command abandoned on shutdown");
            }
            Err(e) if e.is_discardable() => {
                warn!(error = %e, "Discarding invalid reply frame");
                self.metrics.frame_discarded();
                if self.tracker.record_failure() {
                    self.ping(true).await;
                }
            }
            Err(e) => {
                if matches!(e, MiioError::Timeout) {
                    self.metrics.timeout();
                }
                warn!(error = %e, "Command failed");
                let forced = e.counts_as_failure() && self.tracker.record_failure();
                self.metrics.response_error();
                self.listeners
                    .emit(MiioEvent::Result(MiioResponse::error(&command, e.reason())));
                if forced {
                    self.ping(true).await;
                }
            }
        }
    }

    async fn execute(&mut self, command: &QueuedCommand) -> Result<Value> {
        let encrypted = self.crypto.encrypt(command.request().as_bytes())?;
        let timestamp = device_timestamp(unix_seconds(), self.link.clock_offset());
        let frame = MiioMessage::encode(
            &self.link.device_id(),
            timestamp,
            self.crypto.token(),
            &encrypted,
        )?;
        debug!(request = command.request(), "Sending command");
        self.metrics.command_sent(frame.len() as u64);

        let expected = u64::from(command.id());
        let mut raw = self.exchange(&frame).await?;
        loop {
            let reply = self.read_reply(&raw)?;
            match reply.id {
                Some(id) if id < expected => {
                    debug!(stale = id, "Skipping reply to an earlier command");
                    self.metrics.frame_discarded();
                    raw = self.receive_more().await?;
                }
                Some(id) if id == expected => return Ok(reply.payload),
                other => {
                    warn!(expected, got = ?other, "Reply id does not match command");
                    return Ok(reply.payload);
                }
            }
        }
    }

    /// Unframe, decrypt and parse one reply datagram
    fn read_reply(&self, raw: &[u8]) -> Result<DeviceReply> {
        let message = MiioMessage::decode(raw, self.crypto.token())?;
        self.tracker.observe_clock(message.timestamp());
        if message.is_handshake() {
            return Err(MiioError::MalformedResponse("reply carries no body".into()));
        }

        let text = self.crypto.decrypt(message.body())?;
        debug!(response = %text, "Received reply");
        DeviceReply::parse(&text)
    }

    /// Send up to `ping_attempts` handshake frames; the first valid reply wins.
    async fn ping(&mut self, forced: bool) -> bool {
        let hello = MiioMessage::hello();

        for attempt in 1..=self.ping_attempts {
            self.metrics.ping_sent(hello.len() as u64);
            match self.exchange(&hello).await {
                Ok(raw) => match MiioMessage::parse(&raw) {
                    Ok(reply) => {
                        self.metrics.ping_ok();
                        let info = self.tracker.ping_succeeded(&reply);
                        if let Some(token) = info.announced_token {
                            if is_placeholder_token(self.crypto.token()) {
                                info!("Using token announced by the device");
                                self.crypto = MiioCrypto::new(&token);
                            }
                        }
                        return true;
                    }
                    Err(e) => debug!(attempt, error = %e, "Ignoring invalid handshake reply"),
                },
                Err(MiioError::Closed) => return false,
                Err(e) => debug!(attempt, error = %e, "Ping attempt failed"),
            }
        }

        self.metrics.ping_failed();
        self.tracker.ping_failed(forced);
        false
    }
}

impl DispatcherHandle {
    pub fn state(&self) -> DispatcherState {
        match &*self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) {
            Lifecycle::Idle(_) => DispatcherState::Idle,
            Lifecycle::Running(_) => DispatcherState::Running,
            Lifecycle::Stopped => DispatcherState::Stopped,
        }
    }

    /// Spawn the worker. Returns `Ok(false)` if it already runs.
    pub fn start(&self) -> Result<bool> {
        let mut lifecycle = self
            .lifecycle
            .lock()
            .map_err(|_| MiioError::Internal(constants::ERR_LOCK_POISONED.into()))?;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Idle(worker) => {
                *lifecycle = Lifecycle::Running(self.runtime.spawn((*worker).run()));
                Ok(true)
            }
            Lifecycle::Running(handle) => {
                *lifecycle = Lifecycle::Running(handle);
                Ok(false)
            }
            Lifecycle::Stopped => Err(MiioError::Closed),
        }
    }

    /// Append a command to the queue
    pub fn submit(&self, command: QueuedCommand) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(MiioError::Closed);
        }
        self.shared.queue_len.fetch_add(1, Ordering::AcqRel);
        self.commands.send(command).map_err(|_| {
            self.shared.queue_len.fetch_sub(1, Ordering::AcqRel);
            MiioError::Closed
        })
    }

    /// Queue an opportunistic ping unless one is already pending.
    /// Returns whether a new ping was queued.
    pub fn request_ping(&self) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        if self
            .shared
            .ping_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if self.pings.send(PingRequest { reply: None }).is_err() {
            self.shared.ping_pending.store(false, Ordering::Release);
            return false;
        }
        true
    }

    /// Run a ping on the worker ahead of queued commands and wait for it.
    pub async fn ping(&self) -> bool {
        if self.start().is_err() {
            return false;
        }
        let (tx, rx) = oneshot::channel();
        if self.pings.send(PingRequest { reply: Some(tx) }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Commands waiting to be dispatched
    pub fn queue_len(&self) -> usize {
        self.shared.queue_len.load(Ordering::Acquire)
    }

    /// Stop the worker and wait for it to release the transport
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let previous = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        };

        match previous {
            Lifecycle::Running(handle) => {
                if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                    warn!("Dispatcher worker did not stop in time");
                }
            }
            Lifecycle::Idle(mut worker) => worker.transport.close(),
            Lifecycle::Stopped => {}
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
