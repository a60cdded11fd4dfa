//! Fan-out of outbound messages to connected observers.
//!
//! Each observer owns a bounded queue. Publishing never waits: a message
//! is offered to every queue with `try_send`, and an observer whose queue
//! is full (it stopped draining) or closed (it went away) is dropped on
//! the spot. One slow observer therefore costs the pipeline nothing and
//! never delays the others.
//!
//! Messages are shared behind [`Arc`]; observers never receive a mutable
//! view of store data.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use geofusion_types::OutboundMessage;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

/// Identifier of a registered observer.
pub type ObserverId = u64;

/// The receiving half handed to an observer.
#[derive(Debug)]
pub struct Subscription {
    /// Observer id, for [`Distributor::unregister`].
    pub id: ObserverId,
    /// Messages in publication order.
    pub rx: mpsc::Receiver<Arc<OutboundMessage>>,
}

/// Outcome of one [`Distributor::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Observers that accepted the message.
    pub delivered: usize,
    /// Observers dropped because their queue was full or closed.
    pub dropped: usize,
}

struct Observer {
    id: ObserverId,
    tx: mpsc::Sender<Arc<OutboundMessage>>,
}

/// Registry of observer queues.
pub struct Distributor {
    next_id: AtomicU64,
    observers: Mutex<Vec<Observer>>,
}

impl Distributor {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer with a queue of `capacity` messages.
    pub async fn register(&self, capacity: usize) -> Subscription {
        self.register_with(capacity, None).await
    }

    /// Register an observer whose queue starts with `first`.
    ///
    /// Used to deliver `initial_state` ahead of any later broadcast.
    pub async fn register_with(
        &self,
        capacity: usize,
        first: Option<Arc<OutboundMessage>>,
    ) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        if let Some(message) = first {
            // A fresh queue has room for at least one message.
            let _ = tx.try_send(message);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().await.push(Observer { id, tx });
        info!(observer_id = id, capacity, "Observer registered");
        Subscription { id, rx }
    }

    /// Remove an observer. Unknown ids are ignored.
    pub async fn unregister(&self, id: ObserverId) {
        let mut observers = self.observers.lock().await;
        let before = observers.len();
        observers.retain(|o| o.id != id);
        if observers.len() < before {
            info!(observer_id = id, "Observer unregistered");
        }
    }

    /// Offer `message` to every observer without waiting.
    pub async fn publish(&self, message: Arc<OutboundMessage>) -> PublishStats {
        let mut observers = self.observers.lock().await;
        let mut stats = PublishStats::default();
        observers.retain(|o| match o.tx.try_send(Arc::clone(&message)) {
            Ok(()) => {
                stats.delivered = stats.delivered.saturating_add(1);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                info!(observer_id = o.id, "Observer queue full, dropping observer");
                stats.dropped = stats.dropped.saturating_add(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(observer_id = o.id, "Observer gone, removing");
                stats.dropped = stats.dropped.saturating_add(1);
                false
            }
        });
        debug!(
            kind = message.kind(),
            delivered = stats.delivered,
            dropped = stats.dropped,
            "Published message"
        );
        stats
    }

    /// Number of registered observers.
    pub async fn observer_count(&self) -> usize {
        self.observers.lock().await.len()
    }
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use geofusion_types::RiskLevel;

    use super::*;

    fn risk_update(level: u8) -> Arc<OutboundMessage> {
        let mut risk = RiskLevel::nominal();
        risk.level = level;
        Arc::new(OutboundMessage::RiskUpdate { risk })
    }

    #[tokio::test]
    async fn stalled_observer_is_dropped_others_keep_receiving() {
        let distributor = Distributor::new();
        let mut fast_a = distributor.register(8).await;
        let mut fast_b = distributor.register(8).await;
        let _stalled = distributor.register(2).await;

        for level in 1..=5 {
            distributor.publish(risk_update(level)).await;
            // The fast observers drain as they go.
            for sub in [&mut fast_a, &mut fast_b] {
                let msg = sub.rx.recv().await.unwrap();
                assert!(matches!(&*msg, OutboundMessage::RiskUpdate { risk } if risk.level == level));
            }
        }
        assert_eq!(distributor.observer_count().await, 2);
    }

    #[tokio::test]
    async fn closed_observer_is_removed_on_publish() {
        let distributor = Distributor::new();
        let sub = distributor.register(4).await;
        drop(sub);
        let stats = distributor.publish(risk_update(1)).await;
        assert_eq!(stats, PublishStats { delivered: 0, dropped: 1 });
        assert_eq!(distributor.observer_count().await, 0);
    }

    #[tokio::test]
    async fn first_message_is_queued_ahead_of_broadcasts() {
        let distributor = Distributor::new();
        let mut sub = distributor.register_with(4, Some(risk_update(3))).await;
        distributor.publish(risk_update(4)).await;
        let first = sub.rx.recv().await.unwrap();
        let second = sub.rx.recv().await.unwrap();
        assert!(matches!(&*first, OutboundMessage::RiskUpdate { risk } if risk.level == 3));
        assert!(matches!(&*second, OutboundMessage::RiskUpdate { risk } if risk.level == 4));
    }

    #[tokio::test]
    async fn unregister_removes_observer() {
        let distributor = Distributor::new();
        let sub = distributor.register(4).await;
        distributor.unregister(sub.id).await;
        assert_eq!(distributor.observer_count().await, 0);
    }
}
