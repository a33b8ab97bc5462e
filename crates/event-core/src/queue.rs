//! Ingress queue
//!
//! A bounded MPSC channel decoupling event arrival from processing.
//! Producers are the gateway's working threads, so `submit` must never
//! block; once the bridge is stopping, submissions are quietly dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::events::Event;

/// Item flowing through the queue; `Shutdown` is the poison sentinel.
#[derive(Debug)]
pub enum QueueItem {
    Event(Event),
    Shutdown,
}

/// One batch yielded to the consumer
#[derive(Debug, Default)]
pub struct Batch {
    pub events: Vec<Event>,
    /// The sentinel was consumed while filling this batch
    pub shutdown: bool,
}

/// Producer side, cheap to clone
#[derive(Clone)]
pub struct IngressQueue {
    tx: mpsc::Sender<QueueItem>,
    stopping: Arc<AtomicBool>,
}

/// Single consumer side
pub struct QueueConsumer {
    rx: mpsc::Receiver<QueueItem>,
}

impl IngressQueue {
    pub fn new(capacity: usize) -> (IngressQueue, QueueConsumer) {
        let (tx, rx) = mpsc::channel(capacity);
        let queue = IngressQueue {
            tx,
            stopping: Arc::new(AtomicBool::new(false)),
        };
        (queue, QueueConsumer { rx })
    }

    /// Non-blocking enqueue. Returns `false` when the event was dropped
    /// (bridge stopping, queue full, or consumer gone).
    pub fn submit(&self, event: Event) -> bool {
        if self.stopping.load(Ordering::SeqCst) {
            trace!("Dropping event submitted while stopping");
            return false;
        }
        match self.tx.try_send(QueueItem::Event(event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Ingress queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("Ingress queue closed, dropping event");
                false
            }
        }
    }

    /// Stop accepting events and push the sentinel for the consumer.
    pub async fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        // The consumer is draining, so a full queue resolves itself.
        let _ = self.tx.send(QueueItem::Shutdown).await;
    }
}

impl QueueConsumer {
    /// Blocking dequeue of a single item. `None` means every producer is
    /// gone, which the dispatcher treats like a sentinel.
    pub async fn take(&mut self) -> Option<QueueItem> {
        self.rx.recv().await
    }

    /// Dequeue up to `max` already-queued events.
    ///
    /// Waits for the first item only; the rest of the batch is whatever
    /// is immediately available. Never waits to fill a batch.
    pub async fn take_batch(&mut self, max: usize) -> Batch {
        let mut batch = Batch::default();
        match self.rx.recv().await {
            None | Some(QueueItem::Shutdown) => {
                batch.shutdown = true;
                return batch;
            }
            Some(QueueItem::Event(event)) => batch.events.push(event),
        }
        while batch.events.len() < max {
            match self.rx.try_recv() {
                Ok(QueueItem::Event(event)) => batch.events.push(event),
                Ok(QueueItem::Shutdown) => {
                    batch.shutdown = true;
                    break;
                }
                Err(_) => break,
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(n: u64) -> Event {
        Event::new(64, 0, n, Some(n), json!({}))
    }

    #[tokio::test]
    async fn submit_and_take_preserve_fifo_order() {
        let (queue, mut consumer) = IngressQueue::new(16);
        for n in 0..5 {
            assert!(queue.submit(event(n)));
        }
        for n in 0..5 {
            match consumer.take().await.unwrap() {
                QueueItem::Event(e) => assert_eq!(e.session_id, n),
                QueueItem::Shutdown => panic!("unexpected sentinel"),
            }
        }
    }

    #[tokio::test]
    async fn batch_never_waits_beyond_availability() {
        let (queue, mut consumer) = IngressQueue::new(16);
        for n in 0..3 {
            queue.submit(event(n));
        }
        let batch = consumer.take_batch(100).await;
        assert_eq!(batch.events.len(), 3);
        assert!(!batch.shutdown);
    }

    #[tokio::test]
    async fn batch_is_capped_at_max() {
        let (queue, mut consumer) = IngressQueue::new(16);
        for n in 0..10 {
            queue.submit(event(n));
        }
        let batch = consumer.take_batch(4).await;
        assert_eq!(batch.events.len(), 4);
        let rest = consumer.take_batch(100).await;
        assert_eq!(rest.events.len(), 6);
    }

    #[tokio::test]
    async fn sentinel_terminates_and_later_submits_drop() {
        let (queue, mut consumer) = IngressQueue::new(16);
        queue.submit(event(1));
        queue.shutdown().await;
        assert!(!queue.submit(event(2)));

        let batch = consumer.take_batch(100).await;
        assert_eq!(batch.events.len(), 1);
        assert!(batch.shutdown);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (queue, _consumer) = IngressQueue::new(2);
        assert!(queue.submit(event(1)));
        assert!(queue.submit(event(2)));
        assert!(!queue.submit(event(3)));
    }
}
