//! Subscriber registry: fan-out of push frames to live browser connections.
//!
//! Each connected push endpoint owns a bounded queue; the registry keeps the
//! sending halves. [`SubscriberRegistry::broadcast`] serialises a frame once,
//! snapshots the current membership, and offers the frame to every open
//! subscriber with a non-blocking send, so a stalled browser tab misses
//! frames instead of slowing everybody else down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};

use ponyka_types::{BridgeError, PushMessage};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error};
use uuid::Uuid;

/// Default per-subscriber queue depth (frames buffered before new ones are
/// dropped for that subscriber).
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Sending handle of one push endpoint.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: Uuid,
    peer: Option<SocketAddr>,
    tx: mpsc::Sender<String>,
}

impl Subscriber {
    /// Create a subscriber and the receiving end its transport drains.
    pub fn channel(peer: Option<SocketAddr>, depth: usize) -> (Self, SubscriberReceiver) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let subscriber = Self {
            id: Uuid::new_v4(),
            peer,
            tx,
        };
        (subscriber, SubscriberReceiver { rx })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// `false` once the receiving end has been dropped or closed.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Receiving end of a [`Subscriber`]'s queue.
#[derive(Debug)]
pub struct SubscriberReceiver {
    rx: mpsc::Receiver<String>,
}

impl SubscriberReceiver {
    /// Wait for the next JSON frame. `None` once the subscriber is removed
    /// from the registry and every queued frame has been read.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Take a queued frame without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Mark the subscriber closed; later broadcasts skip it.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Set of live push subscribers. Share it behind an `Arc`.
#[derive(Debug)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
    queue_depth: usize,
}

impl SubscriberRegistry {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            queue_depth,
        }
    }

    /// Create a subscriber for `peer`, register it, and hand back both ends.
    pub fn subscribe(&self, peer: Option<SocketAddr>) -> (Subscriber, SubscriberReceiver) {
        let (subscriber, receiver) = Subscriber::channel(peer, self.queue_depth);
        self.add(subscriber.clone());
        (subscriber, receiver)
    }

    /// Register `subscriber`. Re-adding the same id replaces the old entry.
    pub fn add(&self, subscriber: Subscriber) {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        subscribers.insert(subscriber.id, subscriber);
    }

    /// Deregister the subscriber with `id`. Returns whether it was present.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        subscribers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every subscriber whose receiving end is gone. Returns how many
    /// were removed.
    pub fn prune_closed(&self) -> usize {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|_, s| s.is_open());
        before - subscribers.len()
    }

    /// Send `message` to every open subscriber.
    ///
    /// Membership is snapshotted before the first send, so concurrent
    /// `add`/`remove` calls neither block nor disturb this broadcast. Returns
    /// the number of subscribers the frame was queued for.
    pub fn broadcast(&self, message: &PushMessage) -> usize {
        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(e) => {
                let e = BridgeError::Serialization(e.to_string());
                error!(kind = %message.kind, error = %e, "push frame dropped");
                return 0;
            }
        };
        self.broadcast_frame(&frame)
    }

    /// Send a pre-serialised frame to every open subscriber.
    pub fn broadcast_frame(&self, frame: &str) -> usize {
        let snapshot: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut delivered = 0;
        let mut closed = 0;
        for subscriber in &snapshot {
            match subscriber.tx.try_send(frame.to_owned()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(
                        subscriber = %subscriber.id(),
                        peer = ?subscriber.peer(),
                        "subscriber queue full; frame dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => closed += 1,
            }
        }
        if closed > 0 {
            let pruned = self.prune_closed();
            debug!(pruned, "closed subscribers removed");
        }
        delivered
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}
