//! Lifecycle handlers, one per event type
//!
//! The interesting ones are Handle (attach: decode identity, create the
//! record, fetch a token), Plugin (join/leave: delivery calls, record
//! enrichment, liveness task spawn/teardown) and Core (store lifecycle).
//! The rest are log-only extension points.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use statsbridge_auth_core::AuthClient;
use tracing::{debug, info, warn};

use crate::delivery::DeliveryClient;
use crate::dispatch::EventHandler;
use crate::errors::{BridgeError, Result};
use crate::events::{Event, EventType, OpaqueIdentity};
use crate::liveness::LivenessMonitor;
use crate::store::{CorrelationStore, ParticipantKey, ParticipantRecord};

/// Extension point for event types the bridge only observes.
pub struct LogOnlyHandler {
    kind: &'static str,
}

impl LogOnlyHandler {
    pub fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl EventHandler for LogOnlyHandler {
    async fn handle(&self, event: &Event) -> Result<()> {
        debug!("{} event for session {}", self.kind, event.session_id);
        Ok(())
    }
}

/// Handle attach/detach events
pub struct HandleHandler {
    store: Arc<CorrelationStore>,
    auth: Arc<AuthClient>,
}

impl HandleHandler {
    pub fn new(store: Arc<CorrelationStore>, auth: Arc<AuthClient>) -> Self {
        Self { store, auth }
    }

    async fn on_attached(&self, event: &Event) -> Result<()> {
        let Some(handle_id) = event.handle_id else {
            debug!("Attach event without handle id, ignoring");
            return Ok(());
        };
        let Some(blob) = event.payload.get("opaque_id").and_then(Value::as_str) else {
            debug!("Attach event carries no opaque identity, ignoring");
            return Ok(());
        };
        let identity = OpaqueIdentity::decode(blob)?;

        let key = ParticipantKey::new(event.session_id, handle_id);
        let record = ParticipantRecord {
            user_id: identity.user.clone(),
            conf_id: identity.conf_id(),
            conf_num: identity.room_id.to_string(),
            device_id: identity.device_id.clone(),
            ..Default::default()
        };
        self.store.insert(key, record)?;
        info!(
            "Tracking participant '{}' in conference '{}' (session {} handle {})",
            identity.user,
            identity.conf_id(),
            key.session_id,
            key.handle_id
        );

        // Token failures are not fatal: the record proceeds without one
        // and the backend rejects later deliveries, which we log.
        match self.auth.authenticate(&identity.user).await {
            Ok(token) => self.store.set_token(&key, token.into_inner())?,
            Err(e) => warn!("Token acquisition for '{}' failed: {}", identity.user, e),
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for HandleHandler {
    async fn handle(&self, event: &Event) -> Result<()> {
        match event.payload.get("name").and_then(Value::as_str) {
            Some("attached") => self.on_attached(event).await,
            Some("detached") => Ok(()), // reserved
            other => {
                debug!("Handle event '{:?}' ignored", other);
                Ok(())
            }
        }
    }
}

/// Media-plugin join/leave events
pub struct PluginHandler {
    store: Arc<CorrelationStore>,
    delivery: Arc<DeliveryClient>,
    liveness: Arc<LivenessMonitor>,
}

impl PluginHandler {
    pub fn new(store: Arc<CorrelationStore>, delivery: Arc<DeliveryClient>, liveness: Arc<LivenessMonitor>) -> Self {
        Self { store, delivery, liveness }
    }

    async fn on_joined(&self, key: ParticipantKey, data: &Value, timestamp: i64) -> Result<()> {
        if let Some(user_num) = data.get("id").and_then(Value::as_i64) {
            // An untracked key is a join we never saw an attach for;
            // skip it rather than surfacing a handler failure.
            match self.store.set_user_num(&key, user_num.to_string()) {
                Ok(()) => {}
                Err(BridgeError::NotFound) => {
                    debug!("Join for untracked participant, ignoring");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        let Some(record) = self.store.get(&key)? else {
            debug!("Join for untracked participant, ignoring");
            return Ok(());
        };

        match self.delivery.user_joined(&record, timestamp).await {
            Ok(connection_id) => {
                info!("Participant '{}' joined, connection {}", record.user_id, connection_id);
                self.store.set_connection_id(&key, connection_id)?;
            }
            Err(e) => warn!("Join delivery for '{}' failed: {}", record.user_id, e),
        }

        // Heartbeats start regardless of the join outcome; they keep
        // retrying until the record disappears.
        self.liveness.spawn(key).await;
        Ok(())
    }

    async fn on_unpublished(&self, key: ParticipantKey, timestamp: i64) -> Result<()> {
        if let Some(record) = self.store.get(&key)? {
            // A participant whose join never completed has no connection
            // to scope a "left" call to; it still gets cleaned up below.
            if record.connection_id.is_some() {
                if self.delivery.user_left(&record, timestamp).await {
                    info!("Participant '{}' left", record.user_id);
                } else {
                    warn!("Left delivery for '{}' failed", record.user_id);
                }
            } else {
                debug!("Participant '{}' left before join completed", record.user_id);
            }
        }
        // Deletion is unconditional once attempted; the liveness task
        // observes the absence and stops within one poll.
        self.store.remove(&key)?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for PluginHandler {
    async fn handle(&self, event: &Event) -> Result<()> {
        let Some(handle_id) = event.handle_id else {
            debug!("Plugin event without handle id, ignoring");
            return Ok(());
        };
        let key = ParticipantKey::new(event.session_id, handle_id);
        let data = &event.payload["data"];
        match data.get("event").and_then(Value::as_str) {
            Some("joined") => self.on_joined(key, data, event.timestamp).await,
            Some("unpublished") => self.on_unpublished(key, event.timestamp).await,
            other => {
                debug!("Plugin event '{:?}' ignored", other);
                Ok(())
            }
        }
    }
}

/// Gateway core status events drive the store lifecycle.
pub struct CoreHandler {
    store: Arc<CorrelationStore>,
}

impl CoreHandler {
    pub fn new(store: Arc<CorrelationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for CoreHandler {
    async fn handle(&self, event: &Event) -> Result<()> {
        match event.payload.get("status").and_then(Value::as_str) {
            Some("started") => {
                info!("Gateway started, opening correlation store");
                self.store.open();
            }
            Some("shutdown") => {
                info!("Gateway shutting down, closing correlation store");
                self.store.close();
            }
            other => debug!("Core status '{:?}' ignored", other),
        }
        Ok(())
    }
}

/// Build the full handler registry.
pub fn build_registry(
    store: Arc<CorrelationStore>,
    auth: Arc<AuthClient>,
    delivery: Arc<DeliveryClient>,
    liveness: Arc<LivenessMonitor>,
) -> HashMap<EventType, Arc<dyn EventHandler>> {
    let mut registry: HashMap<EventType, Arc<dyn EventHandler>> = HashMap::new();
    registry.insert(EventType::Session, Arc::new(LogOnlyHandler::new("Session")));
    registry.insert(EventType::External, Arc::new(LogOnlyHandler::new("External")));
    registry.insert(EventType::Jsep, Arc::new(LogOnlyHandler::new("JSEP")));
    registry.insert(EventType::WebRtc, Arc::new(LogOnlyHandler::new("WebRTC")));
    registry.insert(EventType::Media, Arc::new(LogOnlyHandler::new("Media")));
    registry.insert(EventType::Transport, Arc::new(LogOnlyHandler::new("Transport")));
    registry.insert(EventType::Handle, Arc::new(HandleHandler::new(Arc::clone(&store), auth)));
    registry.insert(
        EventType::Plugin,
        Arc::new(PluginHandler::new(Arc::clone(&store), delivery, liveness)),
    );
    registry.insert(EventType::Core, Arc::new(CoreHandler::new(store)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::delivery::DeliveryConfig;
    use crate::liveness::LivenessConfig;

    fn plugin_handler(store: Arc<CorrelationStore>) -> PluginHandler {
        let delivery = Arc::new(
            DeliveryClient::new(DeliveryConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                stats_url: "http://127.0.0.1:9".to_string(),
                app_id: "app-1".to_string(),
                backend_user: None,
                backend_pwd: None,
                client_cert_path: None,
                client_key_path: None,
                max_retransmissions: 0,
                retransmissions_backoff: Duration::from_millis(1),
            })
            .unwrap(),
        );
        let liveness = Arc::new(LivenessMonitor::new(
            Arc::clone(&store),
            Arc::clone(&delivery),
            LivenessConfig::default(),
        ));
        PluginHandler::new(store, delivery, liveness)
    }

    #[tokio::test]
    async fn join_for_untracked_participant_is_not_an_error() {
        let store = Arc::new(CorrelationStore::new());
        store.open();
        let handler = plugin_handler(Arc::clone(&store));

        // No attach ever happened for this key.
        let event = Event::new(64, 0, 1, Some(2), json!({
            "data": {"event": "joined", "id": 555}
        }));
        handler.handle(&event).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn join_on_a_closed_store_is_still_a_failure() {
        let store = Arc::new(CorrelationStore::new());
        let handler = plugin_handler(Arc::clone(&store));

        let event = Event::new(64, 0, 1, Some(2), json!({
            "data": {"event": "joined", "id": 555}
        }));
        assert!(matches!(
            handler.handle(&event).await,
            Err(BridgeError::StoreClosed)
        ));
    }
}
