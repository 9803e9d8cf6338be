//! Publish/subscribe hub with per-subscriber delivery.
//!
//! Every subscriber owns a Tokio task fed by an unbounded channel. Publishing
//! only enqueues, so it never waits on a handler. Handlers run on the
//! blocking pool, one event at a time per subscriber, so a slow or failing
//! handler delays nobody but itself, even on a current-thread runtime.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Outcome of a handler invocation; errors are logged, never propagated.
pub type HandlerResult = Result<(), Box<dyn StdError + Send + Sync>>;

struct Slot<T> {
    sender: mpsc::UnboundedSender<T>,
    active: Arc<AtomicBool>,
}

struct Hub<T> {
    topic: &'static str,
    next_id: AtomicU64,
    slots: Mutex<HashMap<u64, Slot<T>>>,
}

/// Type-erased removal, so a `Subscription` does not carry the event type.
trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
}

impl<T: Send + 'static> Detach for Hub<T> {
    fn detach(&self, id: u64) -> bool {
        let removed = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        match removed {
            Some(slot) => {
                // Queued events are dropped as well.
                slot.active.store(false, Ordering::SeqCst);
                debug!("{} subscriber {} removed", self.topic, id);
                true
            }
            None => false,
        }
    }
}

/// Set of handlers receiving events of type `T`.
pub struct Subscribers<T> {
    hub: Arc<Hub<T>>,
}

impl<T: Clone + Send + 'static> Subscribers<T> {
    /// Create an empty hub; `topic` names it in logs.
    pub fn new(topic: &'static str) -> Self {
        Self {
            hub: Arc::new(Hub {
                topic,
                next_id: AtomicU64::new(1),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a handler.
    ///
    /// Must be called within a Tokio runtime. Events reach the handler in
    /// publish order on the blocking pool, so it may block; an error or
    /// panic is logged and the handler keeps receiving.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.hub.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, mut receiver) = mpsc::unbounded_channel::<T>();
        let active = Arc::new(AtomicBool::new(true));

        let topic = self.hub.topic;
        let running = Arc::clone(&active);
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let handler = Arc::clone(&handler);
                let outcome = tokio::task::spawn_blocking(move || {
                    panic::catch_unwind(AssertUnwindSafe(|| handler(&event)))
                })
                .await;
                match outcome {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => warn!("{} subscriber {} failed: {}", topic, id, e),
                    Ok(Err(_)) => error!("{} subscriber {} panicked", topic, id),
                    Err(e) => error!("{} subscriber {} was cancelled: {}", topic, id, e),
                }
            }
            debug!("{} subscriber {} delivery ended", topic, id);
        });

        self.hub
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Slot { sender, active });

        let strong: Arc<dyn Detach> = self.hub.clone();
        Subscription {
            id,
            hub: Arc::downgrade(&strong),
        }
    }

    /// Queue an event for every subscriber. Returns the number of recipients.
    pub fn publish(&self, event: &T) -> usize {
        let mut slots = self.hub.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, slot| slot.sender.send(event.clone()).is_ok());
        slots.len()
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.hub
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by `subscribe`; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    id: u64,
    hub: Weak<dyn Detach>,
}

impl Subscription {
    /// Subscriber id, as it appears in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unsubscribe now. Returns `false` if already removed.
    pub fn unsubscribe(self) -> bool {
        self.detach()
    }

    fn detach(&self) -> bool {
        self.hub
            .upgrade()
            .map(|hub| hub.detach(self.id))
            .unwrap_or(false)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
