//! Live subscriber registry
//!
//! Subscribers are keyed by a [`SubscriberId`]. A broadcast snapshots the
//! current set under the lock and delivers outside of it, so a slow or dead
//! subscriber never blocks attach/detach. Any subscriber whose delivery fails
//! is detached.

use crate::models::StreamMessage;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Default capacity of a subscriber channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Opaque subscriber identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a message could not be handed to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The subscriber is not draining its queue
    #[error("subscriber queue is full")]
    Full,
    /// The subscriber went away
    #[error("subscriber is closed")]
    Closed,
}

/// A live consumer of [`StreamMessage`]s
///
/// `deliver` must not block: it is called from the polling task.
pub trait Subscriber: Send + Sync {
    fn id(&self) -> SubscriberId;
    fn deliver(&self, message: &StreamMessage) -> Result<(), DeliveryError>;
}

/// Subscriber backed by a bounded tokio channel
///
/// The receiving half is typically drained by a WebSocket writer task.
#[derive(Debug)]
pub struct ChannelSubscriber {
    id: SubscriberId,
    tx: mpsc::Sender<StreamMessage>,
}

impl ChannelSubscriber {
    pub fn new(tx: mpsc::Sender<StreamMessage>) -> Self {
        Self {
            id: SubscriberId::new(),
            tx,
        }
    }

    /// Creates a subscriber and the receiver fed by it
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<StreamMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(tx)), rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn deliver(&self, message: &StreamMessage) -> Result<(), DeliveryError> {
        self.tx.try_send(message.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Set of live subscribers
///
/// Cloning shares the same set.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    subscribers: Arc<Mutex<HashMap<SubscriberId, Arc<dyn Subscriber>>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber
    ///
    /// Returns `false` (and changes nothing) if the id is already registered.
    pub fn attach(&self, subscriber: Arc<dyn Subscriber>) -> bool {
        let id = subscriber.id();
        let mut subscribers = self.lock();
        if subscribers.contains_key(&id) {
            return false;
        }
        subscribers.insert(id, subscriber);
        debug!("Subscriber {} attached ({} live)", id, subscribers.len());
        true
    }

    /// Removes a subscriber; detaching an unknown id is a no-op
    pub fn detach(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.lock();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            debug!("Subscriber {} detached ({} live)", id, subscribers.len());
        }
        removed
    }

    /// Delivers a message to every subscriber
    ///
    /// Returns the number of successful deliveries. Subscribers whose
    /// delivery failed are detached.
    pub fn broadcast(&self, message: &StreamMessage) -> usize {
        let snapshot: Vec<Arc<dyn Subscriber>> = self.lock().values().cloned().collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for subscriber in snapshot {
            match subscriber.deliver(message) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    trace!("Delivery to {} failed: {}", subscriber.id(), e);
                    failed.push(subscriber.id());
                }
            }
        }

        for id in failed {
            self.detach(id);
        }
        delivered
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, Arc<dyn Subscriber>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.len())
            .finish()
    }
}
