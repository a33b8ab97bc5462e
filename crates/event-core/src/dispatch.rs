//! Event classification and dispatch
//!
//! A single consumer drains the ingress queue and routes each event to
//! the handler registered for its type. Handler failures are logged at
//! the dispatch boundary; one bad event never takes the loop down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use crate::errors::Result;
use crate::events::{wall_clock_micros, Event, EventType};
use crate::queue::QueueConsumer;

/// Upper bound on one grouped batch
pub const GROUP_MAX: usize = 100;

/// Observable dispatcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherState {
    Idle = 0,
    Dispatching = 1,
    Draining = 2,
    Stopped = 3,
}

/// Shared view of the dispatcher state
#[derive(Clone)]
pub struct StateHandle(Arc<AtomicU8>);

impl StateHandle {
    fn new() -> Self {
        StateHandle(Arc::new(AtomicU8::new(DispatcherState::Idle as u8)))
    }

    fn set(&self, state: DispatcherState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    pub fn get(&self) -> DispatcherState {
        match self.0.load(Ordering::SeqCst) {
            0 => DispatcherState::Idle,
            1 => DispatcherState::Dispatching,
            2 => DispatcherState::Draining,
            _ => DispatcherState::Stopped,
        }
    }
}

/// One implementation per event type; the registry deduplicates all the
/// shared network/store plumbing behind the implementations.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<()>;
}

/// Routes dequeued events to their handlers
pub struct Dispatcher {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
    state: StateHandle,
    grouping: bool,
}

impl Dispatcher {
    pub fn new(grouping: bool) -> Self {
        Self {
            handlers: HashMap::new(),
            state: StateHandle::new(),
            grouping,
        }
    }

    pub fn register(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type, handler);
    }

    pub fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    /// Consume the queue until the shutdown sentinel arrives.
    pub async fn run(self, mut consumer: QueueConsumer) {
        debug!("Dispatcher loop starting");
        let max = if self.grouping { GROUP_MAX } else { 1 };
        loop {
            self.state.set(DispatcherState::Idle);
            let batch = consumer.take_batch(max).await;

            if !batch.events.is_empty() {
                self.state.set(DispatcherState::Dispatching);
                for event in &batch.events {
                    self.dispatch(event).await;
                }
            }

            if batch.shutdown {
                self.state.set(DispatcherState::Draining);
                break;
            }
        }
        self.state.set(DispatcherState::Stopped);
        info!("Dispatcher stopped");
    }

    async fn dispatch(&self, event: &Event) {
        trace!(
            "Handling event after {} us",
            wall_clock_micros().saturating_sub(event.timestamp)
        );
        let Some(event_type) = event.event_type() else {
            warn!("Unknown type of event '{}'", event.tag);
            return;
        };
        let Some(handler) = self.handlers.get(&event_type) else {
            debug!("No handler registered for {:?}", event_type);
            return;
        };
        if let Err(e) = handler.handle(event).await {
            warn!("{:?} handler failed: {}", event_type, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BridgeError;
    use crate::queue::IngressQueue;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        seen: Arc<Mutex<Vec<u64>>>,
        fail_on: Option<u64>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &Event) -> Result<()> {
            self.seen.lock().unwrap().push(event.session_id);
            if self.fail_on == Some(event.session_id) {
                return Err(BridgeError::NotFound);
            }
            Ok(())
        }
    }

    fn plugin_event(n: u64) -> Event {
        Event::new(64, 0, n, Some(1), json!({}))
    }

    #[tokio::test]
    async fn events_dispatch_in_order_to_the_matching_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new(false);
        dispatcher.register(
            EventType::Plugin,
            Arc::new(Recorder { seen: Arc::clone(&seen), fail_on: None }),
        );
        let state = dispatcher.state_handle();

        let (queue, consumer) = IngressQueue::new(16);
        for n in 0..5 {
            queue.submit(plugin_event(n));
        }
        queue.shutdown().await;
        dispatcher.run(consumer).await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(state.get(), DispatcherState::Stopped);
    }

    #[tokio::test]
    async fn handler_failure_does_not_stop_the_loop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new(false);
        dispatcher.register(
            EventType::Plugin,
            Arc::new(Recorder { seen: Arc::clone(&seen), fail_on: Some(1) }),
        );

        let (queue, consumer) = IngressQueue::new(16);
        for n in 0..3 {
            queue.submit(plugin_event(n));
        }
        queue.shutdown().await;
        dispatcher.run(consumer).await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn unknown_and_unregistered_types_are_dropped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new(false);
        dispatcher.register(
            EventType::Plugin,
            Arc::new(Recorder { seen: Arc::clone(&seen), fail_on: None }),
        );

        let (queue, consumer) = IngressQueue::new(16);
        // Tag 3 is not a known type; tag 1 (session) has no handler here.
        queue.submit(Event::new(3, 0, 7, None, json!({})));
        queue.submit(Event::new(1, 0, 8, None, json!({})));
        queue.submit(plugin_event(9));
        queue.shutdown().await;
        dispatcher.run(consumer).await;

        assert_eq!(*seen.lock().unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn grouping_preserves_per_event_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new(true);
        dispatcher.register(
            EventType::Plugin,
            Arc::new(Recorder { seen: Arc::clone(&seen), fail_on: None }),
        );

        let (queue, consumer) = IngressQueue::new(256);
        for n in 0..150 {
            queue.submit(plugin_event(n));
        }
        queue.shutdown().await;
        dispatcher.run(consumer).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 150);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }
}
