//! Per-participant liveness heartbeats
//!
//! One background task per joined participant re-asserts presence until
//! the participant leaves. The task re-fetches its record on every pass;
//! the record disappearing from the store is the normal exit signal, not
//! an error. Shutdown broadcasts a cancellation token and waits for the
//! tasks with a timeout instead of abandoning them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::delivery::DeliveryClient;
use crate::events::wall_clock_micros;
use crate::store::{CorrelationStore, ParticipantKey};

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Pause after a delivered heartbeat
    pub alive_interval: Duration,
    /// Pause after a failed heartbeat; retry soon, no exponential growth
    pub retry_interval: Duration,
    /// Consecutive failures before giving up; `None` never gives up
    pub max_failures: Option<u32>,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            alive_interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(1),
            max_failures: None,
        }
    }
}

/// Spawns and tracks heartbeat tasks
pub struct LivenessMonitor {
    store: Arc<CorrelationStore>,
    delivery: Arc<DeliveryClient>,
    config: LivenessConfig,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl LivenessMonitor {
    pub fn new(store: Arc<CorrelationStore>, delivery: Arc<DeliveryClient>, config: LivenessConfig) -> Self {
        Self {
            store,
            delivery,
            config,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Start a heartbeat task for `key`. Tasks are independent and share
    /// nothing beyond the store they each re-read.
    pub async fn spawn(&self, key: ParticipantKey) {
        let token = self.cancel.child_token();
        let store = Arc::clone(&self.store);
        let delivery = Arc::clone(&self.delivery);
        let config = self.config.clone();
        debug!("Starting liveness task for session {} handle {}", key.session_id, key.handle_id);
        let mut tasks = self.tasks.lock().await;
        // The set retains completed tasks until they are joined; reap
        // them here so it only ever tracks live loops.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(heartbeat_loop(key, store, delivery, config, token));
    }

    /// Cancel all heartbeat tasks and wait for them, up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancel.cancel();
        let mut tasks = self.tasks.lock().await;
        let drained = tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Liveness tasks did not stop within {:?}, detaching", timeout);
        }
    }
}

async fn heartbeat_loop(
    key: ParticipantKey,
    store: Arc<CorrelationStore>,
    delivery: Arc<DeliveryClient>,
    config: LivenessConfig,
    token: CancellationToken,
) {
    let mut failures = 0u32;
    loop {
        if token.is_cancelled() {
            break;
        }

        // Absent record means the participant left. A closed store means
        // the gateway is going down; both end the task.
        let record = match store.get(&key) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(
                    "Participant left, stopping liveness task for session {} handle {}",
                    key.session_id, key.handle_id
                );
                break;
            }
            Err(_) => break,
        };

        let delivered = delivery.user_alive(&record, wall_clock_micros()).await;
        let pause = if delivered {
            failures = 0;
            config.alive_interval
        } else {
            failures += 1;
            if let Some(max) = config.max_failures {
                if failures >= max {
                    warn!(
                        "Giving up liveness for session {} handle {} after {} consecutive failures",
                        key.session_id, key.handle_id, failures
                    );
                    break;
                }
            }
            config.retry_interval
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryConfig;
    use crate::store::ParticipantRecord;

    // Unroutable address: every heartbeat fails with a transport error.
    fn unroutable_delivery() -> Arc<DeliveryClient> {
        Arc::new(
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
        )
    }

    fn joined_record() -> ParticipantRecord {
        ParticipantRecord {
            user_id: "u1".to_string(),
            conf_id: "Demo-Room".to_string(),
            conf_num: "1234".to_string(),
            device_id: "d1".to_string(),
            connection_id: Some("conn-1".to_string()),
            ..Default::default()
        }
    }

    fn fast_config(max_failures: Option<u32>) -> LivenessConfig {
        LivenessConfig {
            alive_interval: Duration::from_millis(10),
            retry_interval: Duration::from_millis(10),
            max_failures,
        }
    }

    #[tokio::test]
    async fn finished_tasks_are_reaped_on_spawn() {
        let store = Arc::new(CorrelationStore::new());
        store.open();
        let monitor = LivenessMonitor::new(Arc::clone(&store), unroutable_delivery(), fast_config(None));

        // No records: every loop observes absence and exits immediately.
        for handle_id in 0..32 {
            monitor.spawn(ParticipantKey::new(1, handle_id)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        monitor.spawn(ParticipantKey::new(2, 0)).await;
        assert_eq!(monitor.tasks.lock().await.len(), 1);

        monitor.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn failure_cap_stops_the_loop() {
        let store = Arc::new(CorrelationStore::new());
        store.open();
        let key = ParticipantKey::new(1, 2);
        store.insert(key, joined_record()).unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            heartbeat_loop(key, store, unroutable_delivery(), fast_config(Some(3)), CancellationToken::new()),
        )
        .await
        .expect("loop should give up after three failed heartbeats");
    }

    #[tokio::test]
    async fn without_a_cap_the_loop_keeps_retrying() {
        let store = Arc::new(CorrelationStore::new());
        store.open();
        let key = ParticipantKey::new(1, 2);
        store.insert(key, joined_record()).unwrap();

        let still_running = tokio::time::timeout(
            Duration::from_millis(300),
            heartbeat_loop(key, store, unroutable_delivery(), fast_config(None), CancellationToken::new()),
        )
        .await
        .is_err();
        assert!(still_running, "loop gave up without a failure cap");
    }
}
