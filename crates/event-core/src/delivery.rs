//! Delivery client for the analytics backend
//!
//! Five participant-scoped POST operations share one request/response
//! helper: build a JSON body from the current record, attach the bearer
//! token, require HTTP 200 and interpret the reply. Transport failures
//! are retried a bounded number of times with a fixed backoff; protocol
//! failures are final. Nothing in here is ever fatal to the pipeline.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::{BridgeError, Result};
use crate::store::ParticipantRecord;

/// How the bridge describes itself in join payloads
const ENDPOINT_TYPE: &str = "middlebox";
const BUILD_NAME: &str = "statsbridge";
const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for the delivery client
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Events endpoint base, e.g. `https://events.example.com`
    pub base_url: String,
    /// Stats endpoint base; often the same host as `base_url`
    pub stats_url: String,
    pub app_id: String,
    pub backend_user: Option<String>,
    pub backend_pwd: Option<String>,
    /// Client certificate/key (PEM paths) for mTLS, both or neither
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    /// Transport-failure retries per request
    pub max_retransmissions: u32,
    pub retransmissions_backoff: Duration,
}

/// HTTP client for the analytics backend
pub struct DeliveryClient {
    config: DeliveryConfig,
    http: reqwest::Client,
}

impl DeliveryClient {
    pub fn new(config: DeliveryConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let (Some(cert), Some(key)) = (&config.client_cert_path, &config.client_key_path) {
            let mut pem = std::fs::read(cert)
                .map_err(|e| BridgeError::Config(format!("client cert {}: {}", cert, e)))?;
            let key_pem = std::fs::read(key)
                .map_err(|e| BridgeError::Config(format!("client key {}: {}", key, e)))?;
            pem.extend_from_slice(&key_pem);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| BridgeError::Config(format!("client identity: {}", e)))?;
            builder = builder.identity(identity);
        }
        let http = builder.build().map_err(|e| BridgeError::Config(e.to_string()))?;
        Ok(Self { config, http })
    }

    /// Announce a participant. Success yields the backend-assigned
    /// connection id that scopes every later per-connection call.
    pub async fn user_joined(&self, record: &ParticipantRecord, timestamp_us: i64) -> Result<String> {
        let url = format!(
            "{}/v1/apps/{}/conferences/{}",
            self.config.base_url, self.config.app_id, record.conf_id
        );
        let mut payload = base_payload(record, timestamp_us);
        payload["endpointInfo"] = json!({
            "type": ENDPOINT_TYPE,
            "buildName": BUILD_NAME,
            "buildVersion": BUILD_VERSION,
            "appVersion": BUILD_VERSION,
        });

        let response = self.post_json(&url, &payload, record.token.as_deref()).await?;
        response
            .get("ucID")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Protocol("missing ucID in join response".to_string()))
    }

    /// Periodic presence heartbeat. `true` means delivered.
    pub async fn user_alive(&self, record: &ParticipantRecord, timestamp_us: i64) -> bool {
        self.connection_event(record, timestamp_us, "events/user/alive", |p, _| p)
            .await
    }

    /// Participant departure. `true` means delivered.
    pub async fn user_left(&self, record: &ParticipantRecord, timestamp_us: i64) -> bool {
        self.connection_event(record, timestamp_us, "events/user/left", |p, _| p)
            .await
    }

    /// Connection (transport fabric) establishment notification.
    pub async fn fabric_setup(&self, record: &ParticipantRecord, timestamp_us: i64) -> bool {
        self.connection_event(record, timestamp_us, "events/fabric", |mut payload, conn| {
            payload["remoteID"] = json!(BUILD_NAME);
            payload["connectionID"] = json!(conn);
            payload["eventType"] = json!("fabricSetup");
            payload
        })
        .await
    }

    /// Per-connection media statistics post, against the stats endpoint.
    pub async fn conf_stats(&self, record: &ParticipantRecord, timestamp_us: i64) -> bool {
        let Some(connection_id) = record.connection_id.as_deref() else {
            debug!("No connection id yet, skipping stats post");
            return false;
        };
        let url = format!(
            "{}/v1/apps/{}/conferences/{}/{}/events/stats",
            self.config.stats_url, self.config.app_id, record.conf_id, connection_id
        );
        let mut payload = base_payload(record, timestamp_us);
        payload["remoteID"] = json!(BUILD_NAME);
        payload["connectionID"] = json!(connection_id);
        self.deliver(&url, &payload, record.token.as_deref()).await
    }

    async fn connection_event<F>(&self, record: &ParticipantRecord, timestamp_us: i64, suffix: &str, decorate: F) -> bool
    where
        F: FnOnce(Value, &str) -> Value,
    {
        let Some(connection_id) = record.connection_id.as_deref() else {
            debug!("No connection id yet, skipping {}", suffix);
            return false;
        };
        let url = format!(
            "{}/v1/apps/{}/conferences/{}/{}/{}",
            self.config.base_url, self.config.app_id, record.conf_id, connection_id, suffix
        );
        let payload = decorate(base_payload(record, timestamp_us), connection_id);
        self.deliver(&url, &payload, record.token.as_deref()).await
    }

    /// Post and interpret a `status == "success"` reply as a boolean.
    async fn deliver(&self, url: &str, payload: &Value, token: Option<&str>) -> bool {
        match self.post_json(url, payload, token).await {
            Ok(response) => match expect_success(&response) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Delivery to {} rejected: {}", url, e);
                    false
                }
            },
            Err(e) => {
                warn!("Delivery to {} failed: {}", url, e);
                false
            }
        }
    }

    /// Shared POST helper with bounded transport-failure retry.
    async fn post_json(&self, url: &str, payload: &Value, token: Option<&str>) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            match self.post_once(url, payload, token).await {
                Ok(response) => return Ok(response),
                Err(BridgeError::Transport(e)) if attempt < self.config.max_retransmissions => {
                    attempt += 1;
                    debug!(
                        "Transport failure toward {} (attempt {}/{}): {}",
                        url, attempt, self.config.max_retransmissions, e
                    );
                    tokio::time::sleep(self.config.retransmissions_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once(&self, url: &str, payload: &Value, token: Option<&str>) -> Result<Value> {
        let mut request = self.http.post(url).json(payload);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(user) = &self.config.backend_user {
            request = request.basic_auth(user, self.config.backend_pwd.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(BridgeError::Protocol(format!("backend responded with {}", status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| BridgeError::Protocol(format!("malformed response body: {}", e)))
    }
}

fn base_payload(record: &ParticipantRecord, timestamp_us: i64) -> Value {
    json!({
        "localID": record.user_id,
        "deviceID": record.device_id,
        "timestamp": timestamp_seconds(timestamp_us),
    })
}

/// Fractional seconds, the unit the backend expects.
fn timestamp_seconds(timestamp_us: i64) -> f64 {
    timestamp_us as f64 / 1_000_000.0
}

fn expect_success(response: &Value) -> Result<()> {
    match response.get("status").and_then(Value::as_str) {
        Some("success") => Ok(()),
        Some(other) => Err(BridgeError::Protocol(format!("backend status '{}'", other))),
        None => Err(BridgeError::Protocol("missing status in response".to_string())),
    }
}
