//! Bridge facade
//!
//! Wires the queue, dispatcher, store, clients and liveness monitor
//! together, filters submissions through the subscribed event mask, and
//! owns orderly shutdown: sentinel in, dispatcher drained, liveness
//! tasks cancelled and awaited.

use std::sync::Arc;
use std::time::Duration;

use statsbridge_auth_core::{AuthClient, AuthConfig};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, trace};

use crate::config::{BridgeConfig, EventMask};
use crate::delivery::{DeliveryClient, DeliveryConfig};
use crate::dispatch::{Dispatcher, DispatcherState, StateHandle};
use crate::errors::Result;
use crate::events::Event;
use crate::handlers::build_registry;
use crate::liveness::{LivenessConfig, LivenessMonitor};
use crate::queue::IngressQueue;
use crate::store::CorrelationStore;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The running event bridge
pub struct EventBridge {
    queue: IngressQueue,
    mask: EventMask,
    store: Arc<CorrelationStore>,
    liveness: Arc<LivenessMonitor>,
    state: StateHandle,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridge").finish_non_exhaustive()
    }
}

impl EventBridge {
    /// Validate the configuration, build the pipeline and start the
    /// dispatcher. A disabled or invalid configuration aborts here and
    /// nowhere later.
    pub fn start(config: BridgeConfig) -> Result<EventBridge> {
        config.validate()?;
        let mask = config.event_mask();

        let store = Arc::new(CorrelationStore::new());
        let auth = Arc::new(AuthClient::new(AuthConfig {
            authority_url: config.authority.clone(),
            app_id: config.app_id.clone(),
            key_id: config.key_id.clone(),
            private_key_path: config.private_key_path.clone(),
        })?);
        let delivery = Arc::new(DeliveryClient::new(DeliveryConfig {
            base_url: config.backend.clone(),
            stats_url: config.stats_backend().to_string(),
            app_id: config.app_id.clone(),
            backend_user: config.backend_user.clone(),
            backend_pwd: config.backend_pwd.clone(),
            client_cert_path: config.client_cert_path.clone(),
            client_key_path: config.client_key_path.clone(),
            max_retransmissions: config.max_retransmissions,
            retransmissions_backoff: Duration::from_millis(config.retransmissions_backoff_ms),
        })?);
        let liveness = Arc::new(LivenessMonitor::new(
            Arc::clone(&store),
            Arc::clone(&delivery),
            LivenessConfig {
                alive_interval: Duration::from_secs(config.alive_interval_secs),
                retry_interval: Duration::from_secs(config.retry_interval_secs),
                max_failures: config.liveness_max_failures,
            },
        ));

        let mut dispatcher = Dispatcher::new(config.grouping);
        for (event_type, handler) in build_registry(
            Arc::clone(&store),
            auth,
            Arc::clone(&delivery),
            Arc::clone(&liveness),
        ) {
            dispatcher.register(event_type, handler);
        }
        let state = dispatcher.state_handle();

        let (queue, consumer) = IngressQueue::new(config.queue_capacity);
        let handle = tokio::spawn(dispatcher.run(consumer));

        info!("Event bridge started, forwarding to {}", config.backend);
        Ok(EventBridge {
            queue,
            mask,
            store,
            liveness,
            state,
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    /// Fire-and-forget submission from the event producer. Never blocks
    /// the caller; returns whether the event was accepted.
    pub fn submit(&self, event: Event) -> bool {
        if !self.mask.contains_tag(event.tag) {
            trace!("Event type {} not subscribed, dropping", event.tag);
            return false;
        }
        self.queue.submit(event)
    }

    pub fn state(&self) -> DispatcherState {
        self.state.get()
    }

    /// The correlation store, for host introspection.
    pub fn store(&self) -> Arc<CorrelationStore> {
        Arc::clone(&self.store)
    }

    /// Orderly shutdown: drain the queue via the sentinel, wait for the
    /// dispatcher, then cancel and await the liveness tasks.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        if let Some(handle) = self.dispatcher.lock().await.take() {
            let _ = handle.await;
        }
        self.liveness.shutdown(SHUTDOWN_TIMEOUT).await;
        info!("Event bridge stopped");
    }
}
