//! Event fan-out to registered listeners.
//!
//! Every subscriber owns an unbounded channel. The worker only ever pushes
//! into those channels, so a slow or panicking subscriber can neither block
//! the dispatcher nor starve the other subscribers. Callback-style listeners
//! get their own delivery task that drains the channel and isolates panics.

use crate::core::command::MiioResponse;
use crate::error::{constants, MiioError, Result};
use crate::protocol::liveness::ConnectivityState;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error};

/// Something that happened on the device connection
#[derive(Debug, Clone, PartialEq)]
pub enum MiioEvent {
    /// A command finished, successfully or not
    Result(MiioResponse),
    /// Liveness changed
    Status(ConnectivityState),
}

/// Callback surface for hosts that prefer observers over streams
pub trait MiioListener: Send + Sync + 'static {
    fn on_result(&self, response: &MiioResponse);
    fn on_status_changed(&self, status: ConnectivityState);
}

/// Handle identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Stream of events for a channel subscriber
pub type EventStream = UnboundedReceiverStream<MiioEvent>;

#[derive(Default)]
struct Registry {
    senders: Vec<(ListenerId, mpsc::UnboundedSender<MiioEvent>)>,
    // Arc data pointer of callback listeners, for idempotent registration
    handles: HashMap<usize, ListenerId>,
}

/// The set of subscribers; safe to mutate while the worker emits
pub struct ListenerSet {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a channel subscriber
    pub fn subscribe(&self) -> Result<(ListenerId, EventStream)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry
            .write()
            .map_err(|_| MiioError::Internal(constants::ERR_LOCK_POISONED.into()))?
            .senders
            .push((id, tx));
        debug!(listener = id.0, "Subscriber added");
        Ok((id, UnboundedReceiverStream::new(rx)))
    }

    /// Add a callback listener. Registering the same `Arc` twice returns the
    /// existing id.
    pub fn register(&self, listener: Arc<dyn MiioListener>, runtime: &Handle) -> Result<ListenerId> {
        let key = Arc::as_ptr(&listener) as *const () as usize;
        let mut registry = self
            .registry
            .write()
            .map_err(|_| MiioError::Internal(constants::ERR_LOCK_POISONED.into()))?;
        if let Some(existing) = registry.handles.get(&key) {
            return Ok(*existing);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<MiioEvent>();
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        registry.senders.push((id, tx));
        registry.handles.insert(key, id);
        drop(registry);

        runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| match &event {
                    MiioEvent::Result(response) => listener.on_result(response),
                    MiioEvent::Status(status) => listener.on_status_changed(*status),
                }));
                if delivered.is_err() {
                    error!(listener = id.0, "Listener callback panicked");
                }
            }
            debug!(listener = id.0, "Listener delivery task finished");
        });

        debug!(listener = id.0, "Listener registered");
        Ok(id)
    }

    /// Remove a registration. Returns whether it was present.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = registry.senders.len();
        registry.senders.retain(|(existing, _)| *existing != id);
        registry.handles.retain(|_, existing| *existing != id);
        before != registry.senders.len()
    }

    /// Deliver an event to every subscriber, dropping the ones that went away
    pub fn emit(&self, event: MiioEvent) {
        let snapshot: Vec<(ListenerId, mpsc::UnboundedSender<MiioEvent>)> = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .senders
            .clone();

        let mut gone = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(event.clone()).is_err() {
                gone.push(id);
            }
        }

        for id in gone {
            debug!(listener = id.0, "Subscriber dropped its stream");
            self.unregister(id);
        }
    }

    pub fn len(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .senders
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every subscriber; their streams end once drained
    pub fn clear(&self) {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        registry.senders.clear();
        registry.handles.clear();
    }
}

impl Default for ListenerSet {
    fn default() -> Self {
        Self::new()
    }
}
