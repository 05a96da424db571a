//! Live message feed
//!
//! Push side of the engine's inputs: one event per newly received message,
//! no replay. Each subscriber gets its own unbounded queue so publishing never
//! waits on a slow consumer. A `Subscription` is the disposer: it stops
//! delivery when unsubscribed or dropped.

use hangouts_history::RawMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A source of live message events
pub trait LiveFeed: Send + Sync {
    fn subscribe(&self) -> Subscription;
}

type Registry = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<RawMessage>>>>;

/// In-process fan-out feed
#[derive(Clone, Default)]
pub struct ChannelFeed {
    subscribers: Registry,
    next_id: Arc<AtomicU64>,
}

impl ChannelFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `raw` to every live subscriber. Returns how many received it.
    pub fn publish(&self, raw: RawMessage) -> usize {
        let mut subscribers = match self.subscribers.lock() {
            Ok(s) => s,
            Err(e) => {
                warn!("Feed registry lock poisoned, dropping event: {}", e);
                return 0;
            }
        };

        // Receivers gone without unsubscribing are pruned here
        subscribers.retain(|id, tx| {
            let alive = tx.send(raw.clone()).is_ok();
            if !alive {
                debug!("Pruning closed feed subscriber {}", id);
            }
            alive
        });

        debug!(
            "Published live message from {:?} to {} subscribers",
            raw.address,
            subscribers.len()
        );
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl LiveFeed for ChannelFeed {
    fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        match self.subscribers.lock() {
            Ok(mut subscribers) => {
                subscribers.insert(id, tx);
            }
            Err(e) => warn!("Feed registry lock poisoned, subscription {} is inert: {}", id, e),
        }
        debug!("Feed subscription {} opened", id);

        Subscription {
            id,
            rx,
            registry: self.subscribers.clone(),
        }
    }
}

/// Receiving end of a feed subscription, and its disposer
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<RawMessage>,
    registry: Registry,
}

impl Subscription {
    /// Wait for the next event. `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<RawMessage> {
        self.rx.recv().await
    }

    /// Next queued event, without waiting
    pub fn try_recv(&mut self) -> Option<RawMessage> {
        self.rx.try_recv().ok()
    }

    /// Stop delivery. Events still queued are discarded.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut subscribers) = self.registry.lock() {
            if subscribers.remove(&self.id).is_some() {
                debug!("Feed subscription {} closed", self.id);
            }
        }
    }
}
