//! Indexed-transaction notifications.
//!
//! Every transaction the indexer finishes, committed or aborted, is sent to
//! each subscriber in log order after it is visible to readers.
//!
//! ```rust,ignore
//! let subscription = node.subscribe(EventFilter::default().with_operations(true));
//! node.submit_tx(ops)?;
//! let event = subscription.recv_timeout(Duration::from_secs(1))?;
//! assert!(event.committed);
//! ```

use crate::operation::TxOperation;
use crate::types::{Timestamp, TxId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A transaction finished indexing.
    IndexedTx,
}

/// Sent after each indexed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedTxEvent {
    /// Always [`EventType::IndexedTx`].
    pub event_type: EventType,
    /// Transaction id.
    pub tx_id: TxId,
    /// Transaction time.
    pub tx_time: Timestamp,
    /// `false` if the transaction aborted.
    pub committed: bool,
    /// The transaction's operations, when the subscriber asked for them.
    pub operations: Option<Vec<TxOperation>>,
}

/// What a subscriber wants to receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Attach each transaction's operations.
    pub with_operations: bool,
}

impl EventFilter {
    /// Sets whether operations are attached.
    #[must_use]
    pub const fn with_operations(mut self, value: bool) -> Self {
        self.with_operations = value;
        self
    }
}

struct Subscriber {
    id: u64,
    filter: EventFilter,
    sender: Sender<IndexedTxEvent>,
}

/// Distributes indexed-transaction events to subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber.
    pub fn subscribe(self: &Arc<Self>, filter: EventFilter) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push(Subscriber { id, filter, sender });
        Subscription {
            id,
            receiver: Some(receiver),
            bus: Arc::downgrade(self),
        }
    }

    /// Returns `true` if any subscriber wants operations attached.
    #[must_use]
    pub fn wants_operations(&self) -> bool {
        self.subscribers.read().iter().any(|s| s.filter.with_operations)
    }

    /// Sends an event to every subscriber, dropping those that hung up.
    pub fn emit(&self, event: &IndexedTxEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|sub| {
            let event = if sub.filter.with_operations {
                event.clone()
            } else {
                IndexedTxEvent {
                    operations: None,
                    ..event.clone()
                }
            };
            sub.sender.send(event).is_ok()
        });
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.write().retain(|sub| sub.id != id);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A live subscription. Closing or dropping it unregisters it; no event is
/// delivered afterwards.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: Option<Receiver<IndexedTxEvent>>,
    bus: Weak<EventBus>,
}

impl Subscription {
    /// Blocks for the next event. `None` once closed or the node is gone.
    pub fn recv(&self) -> Option<IndexedTxEvent> {
        self.receiver.as_ref()?.recv().ok()
    }

    /// Blocks for the next event, at most `timeout`.
    ///
    /// # Errors
    ///
    /// [`RecvTimeoutError::Timeout`] when nothing arrived,
    /// [`RecvTimeoutError::Disconnected`] once closed.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<IndexedTxEvent, RecvTimeoutError> {
        match &self.receiver {
            Some(receiver) => receiver.recv_timeout(timeout),
            None => Err(RecvTimeoutError::Disconnected),
        }
    }

    /// Takes an event if one is queued.
    ///
    /// # Errors
    ///
    /// [`TryRecvError::Empty`] when nothing is queued,
    /// [`TryRecvError::Disconnected`] once closed.
    pub fn try_recv(&self) -> Result<IndexedTxEvent, TryRecvError> {
        match &self.receiver {
            Some(receiver) => receiver.try_recv(),
            None => Err(TryRecvError::Disconnected),
        }
    }

    /// Events as they arrive, until closed.
    pub fn iter(&self) -> impl Iterator<Item = IndexedTxEvent> + '_ {
        std::iter::from_fn(move || self.recv())
    }

    /// Unregisters and discards anything still queued.
    pub fn close(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
        self.receiver = None;
    }

    /// Returns `true` once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;

    fn event(tx: u64) -> IndexedTxEvent {
        IndexedTxEvent {
            event_type: EventType::IndexedTx,
            tx_id: TxId::new(tx),
            tx_time: Timestamp::from_millis(tx as i64),
            committed: true,
            operations: Some(vec![TxOperation::Evict {
                entity_id: EntityId::from(tx as i64),
            }]),
        }
    }

    #[test]
    fn subscribers_receive_events_in_order() {
        let bus = Arc::new(EventBus::new());
        let plain = bus.subscribe(EventFilter::default());
        let full = bus.subscribe(EventFilter::default().with_operations(true));
        assert!(bus.wants_operations());

        bus.emit(&event(0));
        bus.emit(&event(1));

        let first = plain.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(first.tx_id, TxId::new(0));
        assert_eq!(first.operations, None);
        assert_eq!(plain.try_recv().unwrap().tx_id, TxId::new(1));
        assert_eq!(full.recv().unwrap(), event(0));
    }

    #[test]
    fn closed_subscriptions_get_nothing_more() {
        let bus = Arc::new(EventBus::new());
        let mut sub = bus.subscribe(EventFilter::default());
        bus.emit(&event(0));
        sub.close();
        bus.emit(&event(1));

        assert!(sub.is_closed());
        assert_eq!(sub.recv(), None);
        assert_eq!(sub.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dropping_a_subscription_unregisters_it() {
        let bus = Arc::new(EventBus::new());
        {
            let _sub = bus.subscribe(EventFilter::default());
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(&event(0));
    }
}
