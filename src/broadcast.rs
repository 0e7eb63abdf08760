// src/broadcast.rs
//
// Live fan-out of newly ingested records.
//
// Every subscriber owns a bounded queue. Delivery never waits: a subscriber
// whose queue is full misses that record, and a subscriber whose receiver has
// been dropped is removed the next time a record is sent.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::record::SpeedRecord;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Capability handed to the ingestion pipeline: called once per persisted
/// record, in ingestion order.
pub trait RecordListener: Send + Sync {
    fn notify(&self, record: &SpeedRecord);
}

/// Identifier of one registered subscriber.
pub type SubscriberId = u64;

/// Receiving half held by a live client.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: mpsc::Receiver<Arc<SpeedRecord>>,
}

/// Result of one fan-out, for logging and tests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub lagged: usize,
    pub pruned: usize,
}

/// Subscriber registry with add/remove operations.
pub struct Broadcaster {
    subscribers: Mutex<BTreeMap<SubscriberId, mpsc::Sender<Arc<SpeedRecord>>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Broadcaster {
            subscribers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.insert(id, tx);
            tlog!("[broadcast] Subscriber {} added (total: {})", id, subs.len());
        }
        Subscription { id, rx }
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        match self.subscribers.lock() {
            Ok(mut subs) => {
                let removed = subs.remove(&id).is_some();
                if removed {
                    tlog!("[broadcast] Subscriber {} removed (remaining: {})", id, subs.len());
                }
                removed
            }
            Err(_) => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Offer `record` to every subscriber without waiting on any of them.
    pub fn send(&self, record: &SpeedRecord) -> Delivery {
        let mut delivery = Delivery::default();
        let Ok(mut subs) = self.subscribers.lock() else {
            tlog!("[broadcast] Subscriber registry poisoned, dropping record {}", record.id);
            return delivery;
        };

        let shared = Arc::new(record.clone());
        subs.retain(|id, tx| match tx.try_send(shared.clone()) {
            Ok(()) => {
                delivery.delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tlog!("[broadcast] Subscriber {} is lagging, skipped record {}", id, record.id);
                delivery.lagged += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                delivery.pruned += 1;
                false
            }
        });

        if delivery.pruned > 0 {
            tlog!(
                "[broadcast] Pruned {} closed subscriber(s) (remaining: {})",
                delivery.pruned,
                subs.len()
            );
        }
        delivery
    }
}

impl RecordListener for Broadcaster {
    fn notify(&self, record: &SpeedRecord) {
        self.send(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewRecord;

    fn record(id: i64) -> SpeedRecord {
        SpeedRecord::from_new(id, &NewRecord::stamped_now(1, id, 10.0))
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers_in_order() {
        let hub = Broadcaster::new(8);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.notify(&record(1));
        hub.notify(&record(2));

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.rx.recv().await.unwrap().id, 1);
            assert_eq!(sub.rx.recv().await.unwrap().id, 2);
        }
    }

    #[test]
    fn test_closed_subscriber_pruned_on_next_send() {
        let hub = Broadcaster::new(8);
        let keep = hub.subscribe();
        let gone = hub.subscribe();
        drop(gone);
        assert_eq!(hub.subscriber_count(), 2);

        let delivery = hub.send(&record(1));
        assert_eq!(delivery, Delivery { delivered: 1, lagged: 0, pruned: 1 });
        assert_eq!(hub.subscriber_count(), 1);
        drop(keep);
    }

    #[test]
    fn test_full_subscriber_does_not_block_others() {
        let hub = Broadcaster::new(1);
        let _slow = hub.subscribe();
        let mut fast = hub.subscribe();

        assert_eq!(hub.send(&record(1)).delivered, 2);
        assert_eq!(fast.rx.try_recv().unwrap().id, 1);

        let delivery = hub.send(&record(2));
        assert_eq!(delivery, Delivery { delivered: 1, lagged: 1, pruned: 0 });
        assert_eq!(fast.rx.try_recv().unwrap().id, 2);
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let hub = Broadcaster::default();
        let sub = hub.subscribe();
        assert!(hub.unsubscribe(sub.id));
        assert!(!hub.unsubscribe(sub.id));
        assert_eq!(hub.send(&record(1)), Delivery::default());
    }

    #[test]
    fn test_ids_are_unique() {
        let hub = Broadcaster::default();
        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_ne!(a.id, b.id);
    }
}
