//! Bridge configuration
//!
//! The host's configuration loader hands the bridge a deserialized
//! [`BridgeConfig`]; validation failures are fatal at startup and nowhere
//! else.

use serde::Deserialize;
use tracing::warn;

use crate::errors::{BridgeError, Result};
use crate::events::EventType;

/// Which event types the bridge subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u32);

impl EventMask {
    pub const fn none() -> Self {
        EventMask(0)
    }

    pub const fn all() -> Self {
        EventMask(u32::MAX)
    }

    /// Parse the `events` setting: `none`, `all`, or a comma-separated
    /// list of type names. Unknown names are warned about and skipped.
    pub fn parse(list: &str) -> Self {
        let list = list.trim();
        if list.eq_ignore_ascii_case("none") {
            return EventMask::none();
        }
        if list.eq_ignore_ascii_case("all") {
            return EventMask::all();
        }
        let mut mask = 0u32;
        for name in list.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            match EventType::from_config_name(name) {
                Some(t) => mask |= t.tag(),
                None => warn!("Unknown event type '{}' in subscription list", name),
            }
        }
        EventMask(mask)
    }

    pub fn contains_tag(&self, tag: u32) -> bool {
        self.0 & tag != 0
    }

    pub fn contains(&self, event_type: EventType) -> bool {
        self.contains_tag(event_type.tag())
    }
}

fn default_max_retransmissions() -> u32 {
    5
}

fn default_retransmissions_backoff_ms() -> u64 {
    100
}

fn default_events() -> String {
    "all".to_string()
}

fn default_queue_capacity() -> usize {
    8192
}

fn default_alive_interval_secs() -> u64 {
    10
}

fn default_retry_interval_secs() -> u64 {
    1
}

/// Full bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// The bridge refuses to start unless explicitly enabled
    #[serde(default)]
    pub enabled: bool,

    /// Analytics events endpoint, e.g. `https://events.example.com`
    #[serde(default)]
    pub backend: String,
    /// Stats endpoint; defaults to `backend` when absent
    #[serde(default)]
    pub stats_backend: Option<String>,
    #[serde(default)]
    pub backend_user: Option<String>,
    #[serde(default)]
    pub backend_pwd: Option<String>,

    /// Identity authority endpoint
    #[serde(default)]
    pub authority: String,
    /// Application identifier, embedded in request URLs and assertions
    #[serde(default)]
    pub app_id: String,
    /// Signing key identifier registered with the authority
    #[serde(default)]
    pub key_id: String,
    /// Path to the EC private key (PEM) for assertion signing
    #[serde(default)]
    pub private_key_path: String,

    /// Client certificate/key pair for mTLS toward the analytics backend
    #[serde(default)]
    pub client_cert_path: Option<String>,
    #[serde(default)]
    pub client_key_path: Option<String>,

    #[serde(default = "default_max_retransmissions")]
    pub max_retransmissions: u32,
    #[serde(default = "default_retransmissions_backoff_ms")]
    pub retransmissions_backoff_ms: u64,

    /// Subscription: `none`, `all`, or a comma list of type names
    #[serde(default = "default_events")]
    pub events: String,
    /// Drain already-queued events in batches of up to 100
    #[serde(default)]
    pub grouping: bool,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_alive_interval_secs")]
    pub alive_interval_secs: u64,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Consecutive heartbeat failures before a liveness task gives up;
    /// `None` means the task only exits when its record disappears.
    #[serde(default)]
    pub liveness_max_failures: Option<u32>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: String::new(),
            stats_backend: None,
            backend_user: None,
            backend_pwd: None,
            authority: String::new(),
            app_id: String::new(),
            key_id: String::new(),
            private_key_path: String::new(),
            client_cert_path: None,
            client_key_path: None,
            max_retransmissions: default_max_retransmissions(),
            retransmissions_backoff_ms: default_retransmissions_backoff_ms(),
            events: default_events(),
            grouping: false,
            queue_capacity: default_queue_capacity(),
            alive_interval_secs: default_alive_interval_secs(),
            retry_interval_secs: default_retry_interval_secs(),
            liveness_max_failures: None,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Err(BridgeError::Config("bridge not enabled".to_string()));
        }
        if !self.backend.starts_with("http") {
            return Err(BridgeError::Config(format!(
                "missing or invalid backend '{}'",
                self.backend
            )));
        }
        if self.retransmissions_backoff_ms == 0 {
            return Err(BridgeError::Config(
                "retransmissions_backoff_ms must be positive".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(BridgeError::Config("queue_capacity must be positive".to_string()));
        }
        Ok(())
    }

    pub fn event_mask(&self) -> EventMask {
        EventMask::parse(&self.events)
    }

    pub fn stats_backend(&self) -> &str {
        self.stats_backend.as_deref().unwrap_or(&self.backend)
    }
}
