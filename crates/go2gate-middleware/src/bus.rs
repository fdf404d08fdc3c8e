//! In-process publish/subscribe event bus.
//!
//! Every subscriber owns a private bounded [`tokio::sync::mpsc`] queue. The
//! bus keeps only the sending halves in a registry guarded by a single mutex:
//! `publish` snapshots the registry under the lock, releases it, then offers
//! the envelope to each queue with `try_send`. A full queue loses that one
//! delivery; nobody else is affected and the publisher never waits.
//!
//! Dropping a [`Subscription`] unregisters it, so a relay that exits on any
//! path (clean close, error, panic) never leaves a dangling queue behind.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use go2gate_types::Envelope;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default per-subscriber queue capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// Opaque handle identifying one registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0.simple())
    }
}

/// Point-in-time delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub subscribers: usize,
}

type Registry = HashMap<SubscriptionId, mpsc::Sender<Arc<Envelope>>>;

#[derive(Debug)]
struct Shared {
    capacity: usize,
    subscribers: Mutex<Registry>,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // The registry holds plain senders; a panic mid-update cannot leave
        // it logically inconsistent, so a poisoned lock is still usable.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        self.registry().remove(&id).is_some()
    }
}

/// Shared event bus. Clone it cheaply; all clones share one registry.
#[derive(Clone, Debug)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl EventBus {
    /// Create a bus whose subscriptions each buffer up to `capacity`
    /// undelivered envelopes (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                subscribers: Mutex::new(HashMap::new()),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Register a new bounded queue and return its receiving end.
    ///
    /// Only envelopes published after this call can reach it.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.shared.capacity);
        let id = SubscriptionId(Uuid::new_v4());
        self.shared.registry().insert(id, tx);
        debug!(subscription = %id, "subscribed");
        Subscription {
            id,
            receiver: rx,
            bus: Arc::downgrade(&self.shared),
        }
    }

    /// Remove a registration. Returns `false` when it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.shared.remove(id);
        if removed {
            debug!(subscription = %id, "unsubscribed");
        }
        removed
    }

    /// Offer `envelope` to every currently registered queue without waiting.
    ///
    /// Returns how many queues accepted it. Queues at capacity skip this
    /// envelope; queues whose receiver is gone are pruned.
    pub fn publish(&self, envelope: Envelope) -> usize {
        let envelope = Arc::new(envelope);
        let snapshot: Vec<(SubscriptionId, mpsc::Sender<Arc<Envelope>>)> = self
            .shared
            .registry()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut dropped = 0;
        let mut closed = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(Arc::clone(&envelope)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    warn!(subscription = %id, kind = envelope.kind(), "subscriber queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut registry = self.shared.registry();
            for id in closed {
                registry.remove(&id);
            }
        }

        self.shared.published.fetch_add(1, Ordering::Relaxed);
        self.shared
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.shared.dropped.fetch_add(dropped, Ordering::Relaxed);
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry().len()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.shared.published.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving end of one observer's queue.
///
/// Holds only a weak reference back to the bus; unregisters itself on drop.
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Arc<Envelope>>,
    bus: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next envelope.
    ///
    /// Returns `None` once the subscription has been removed from the bus
    /// (or the bus itself is gone) and the queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        self.receiver.recv().await
    }

    /// Take the next envelope if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        match self.receiver.try_recv() {
            Ok(envelope) => Some(envelope),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.bus.upgrade()
            && shared.remove(self.id)
        {
            debug!(subscription = %self.id, "subscription dropped");
        }
    }
}
