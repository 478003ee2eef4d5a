//! Bounded queue of lazy refresh requests raised by cache misses.
//!
//! Enqueue never blocks. When the queue is full the new request is dropped.
//! A request whose key is already waiting in the queue is coalesced into
//! the waiting one; after the scheduler takes it off the queue the same key
//! can be queued again.

use observability::TriggerOutcome;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::models::RegionTypeKey;

/// Default number of requests the queue holds
pub const DEFAULT_TRIGGER_CAPACITY: usize = 100;

/// Sending half, held by the read path
#[derive(Debug, Clone)]
pub struct TriggerQueue {
    tx: mpsc::Sender<RegionTypeKey>,
    pending: Arc<Mutex<HashSet<RegionTypeKey>>>,
}

/// Receiving half, owned by the refresh scheduler
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<RegionTypeKey>,
    pending: Arc<Mutex<HashSet<RegionTypeKey>>>,
}

/// Create a trigger queue holding at most `capacity` requests
pub fn trigger_queue(capacity: usize) -> (TriggerQueue, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let pending = Arc::new(Mutex::new(HashSet::new()));
    (
        TriggerQueue {
            tx,
            pending: Arc::clone(&pending),
        },
        TriggerReceiver { rx, pending },
    )
}

impl TriggerQueue {
    /// Queue a refresh request without waiting
    pub fn enqueue(&self, key: RegionTypeKey) -> TriggerOutcome {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if pending.contains(&key) {
            return TriggerOutcome::Coalesced;
        }
        match self.tx.try_send(key.clone()) {
            Ok(()) => {
                pending.insert(key);
                TriggerOutcome::Queued
            }
            Err(_) => TriggerOutcome::Dropped,
        }
    }
}

impl TriggerReceiver {
    /// Wait for the next request. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<RegionTypeKey> {
        let key = self.rx.recv().await?;
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.remove(&key);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_and_receive() {
        let (queue, mut rx) = trigger_queue(4);
        let key = RegionTypeKey::new("eu-west-9", "x9.large");

        assert_eq!(queue.enqueue(key.clone()), TriggerOutcome::Queued);
        assert_eq!(rx.recv().await, Some(key));
    }

    #[tokio::test]
    async fn test_duplicates_coalesce_while_queued() {
        let (queue, mut rx) = trigger_queue(4);
        let key = RegionTypeKey::new("us-east-1", "m5.large");

        assert_eq!(queue.enqueue(key.clone()), TriggerOutcome::Queued);
        assert_eq!(queue.enqueue(key.clone()), TriggerOutcome::Coalesced);

        assert_eq!(rx.recv().await, Some(key.clone()));
        assert_eq!(queue.enqueue(key), TriggerOutcome::Queued);
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let (queue, mut rx) = trigger_queue(2);

        assert_eq!(queue.enqueue(RegionTypeKey::new("r", "a")), TriggerOutcome::Queued);
        assert_eq!(queue.enqueue(RegionTypeKey::new("r", "b")), TriggerOutcome::Queued);
        assert_eq!(queue.enqueue(RegionTypeKey::new("r", "c")), TriggerOutcome::Dropped);

        assert_eq!(rx.recv().await, Some(RegionTypeKey::new("r", "a")));
        assert_eq!(rx.recv().await, Some(RegionTypeKey::new("r", "b")));

        // a dropped request is not remembered as pending
        assert_eq!(queue.enqueue(RegionTypeKey::new("r", "c")), TriggerOutcome::Queued);
    }

    #[tokio::test]
    async fn test_recv_ends_when_senders_dropped() {
        let (queue, mut rx) = trigger_queue(1);
        drop(queue);
        assert_eq!(rx.recv().await, None);
    }
}
