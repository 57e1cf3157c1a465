//! ChangeBroker - coalescing pub/sub for change notifications
//!
//! Every subscriber owns a capacity-1 channel. `publish` never blocks: a
//! full slot means a wakeup is already pending for that subscriber, so the
//! burst collapses into one event. A slow subscriber therefore sees fewer
//! events than were published but always sees at least one event after the
//! last publish it missed.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use super::types::ChangeEvent;

struct BrokerInner {
    subscribers: Vec<mpsc::Sender<ChangeEvent>>,
    stopped: bool,
}

/// Fan-out of "state changed" events with at-most-once coalescing
#[derive(Clone)]
pub struct ChangeBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

impl ChangeBroker {
    /// Create a new broker with no subscribers
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BrokerInner {
                subscribers: Vec::new(),
                stopped: false,
            })),
        }
    }

    /// Subscribe to change events
    ///
    /// The stream ends when the broker is stopped. Dropping the stream
    /// unsubscribes; the publisher prunes the slot on its next publish.
    pub fn subscribe(&self) -> ChangeStream {
        let (tx, rx) = mpsc::channel(1);
        match self.inner.lock() {
            Ok(mut inner) => {
                if !inner.stopped {
                    inner.subscribers.push(tx);
                }
                // A stopped broker keeps tx out of the list, so rx reports
                // closed immediately.
            }
            Err(_) => debug!("broker lock poisoned on subscribe"),
        }
        debug!("broker subscriber added");
        ChangeStream { rx }
    }

    /// Publish an event to all live subscribers; never blocks
    ///
    /// Subscribers with a pending event keep it (the burst coalesces);
    /// disconnected subscribers are dropped from the list.
    pub fn publish(&self, event: ChangeEvent) {
        let Ok(mut inner) = self.inner.lock() else {
            debug!("broker lock poisoned on publish");
            return;
        };
        if inner.stopped {
            return;
        }

        debug!(kind = event.kind(), "broker publish");
        inner.subscribers.retain(|tx| {
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                // Slot occupied: a wakeup is already pending, coalesce.
                Err(mpsc::error::TrySendError::Full(_)) => true,
                // Receiver gone: forget the subscriber.
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Stop the broker: all streams end, later subscribes get closed
    /// streams, later publishes are dropped.
    pub fn stop(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.stopped = true;
            inner.subscribers.clear();
        }
        debug!("broker stopped");
    }

    /// Number of live subscriber slots
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.subscribers.len()).unwrap_or(0)
    }
}

impl Default for ChangeBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's stream of change events
pub struct ChangeStream {
    rx: mpsc::Receiver<ChangeEvent>,
}

impl ChangeStream {
    /// Receive the next event; `None` means the broker stopped
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive for tests and opportunistic drains
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let broker = ChangeBroker::new();
        let mut a = broker.subscribe();
        let mut b = broker.subscribe();
        assert_eq!(broker.subscriber_count(), 2);

        broker.publish(ChangeEvent::StoreChanged);

        assert_eq!(a.recv().await, Some(ChangeEvent::StoreChanged));
        assert_eq!(b.recv().await, Some(ChangeEvent::StoreChanged));
    }

    #[tokio::test]
    async fn test_burst_coalesces_to_one_event() {
        let broker = ChangeBroker::new();
        let mut stream = broker.subscribe();

        for _ in 0..100 {
            broker.publish(ChangeEvent::StoreChanged);
        }

        // Exactly one pending event survives the burst
        assert!(stream.try_recv().is_some());
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_event_after_publish_is_always_seen() {
        let broker = ChangeBroker::new();
        let mut stream = broker.subscribe();

        broker.publish(ChangeEvent::StoreChanged);
        // Drain, then publish again: the new event must arrive even though
        // the previous burst was coalesced.
        assert!(stream.try_recv().is_some());
        broker.publish(ChangeEvent::StoreChanged);
        assert!(stream.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers() {
        let broker = ChangeBroker::new();
        // Must not panic or block
        broker.publish(ChangeEvent::StoreChanged);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let broker = ChangeBroker::new();
        let stream = broker.subscribe();
        drop(stream);

        broker.publish(ChangeEvent::StoreChanged);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_closes_streams() {
        let broker = ChangeBroker::new();
        let mut stream = broker.subscribe();

        broker.stop();
        assert_eq!(stream.recv().await, None);

        // Subscribing after stop yields a closed stream
        let mut late = broker.subscribe();
        assert_eq!(late.recv().await, None);
    }

    #[tokio::test]
    async fn test_watcher_error_event_payload() {
        let broker = ChangeBroker::new();
        let mut stream = broker.subscribe();

        broker.publish(ChangeEvent::WatcherError {
            message: "mtime read failed".to_string(),
        });

        match stream.recv().await {
            Some(ChangeEvent::WatcherError { message }) => {
                assert_eq!(message, "mtime read failed");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_fast_one() {
        let broker = ChangeBroker::new();
        let mut slow = broker.subscribe();
        let mut fast = broker.subscribe();

        broker.publish(ChangeEvent::StoreChanged);
        assert!(fast.try_recv().is_some());

        // slow never drained; publishing again still reaches fast
        broker.publish(ChangeEvent::StoreChanged);
        assert!(fast.try_recv().is_some());
        assert!(slow.try_recv().is_some());
    }
}
