//! Event model and identity decoding
//!
//! Events arrive from the gateway as tagged records. The tag values match
//! the gateway's wire encoding, so an [`Event`] keeps the raw tag and the
//! dispatcher decides what to do with tags it does not recognize.

use serde::{Deserialize, Serialize};

use crate::errors::{BridgeError, Result};

/// Classified event types, with their gateway wire tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Session,
    Handle,
    External,
    Jsep,
    WebRtc,
    Media,
    Plugin,
    Transport,
    Core,
}

impl EventType {
    pub const fn tag(&self) -> u32 {
        match self {
            EventType::Session => 1,
            EventType::Handle => 2,
            EventType::External => 4,
            EventType::Jsep => 8,
            EventType::WebRtc => 16,
            EventType::Media => 32,
            EventType::Plugin => 64,
            EventType::Transport => 128,
            EventType::Core => 256,
        }
    }

    pub fn from_tag(tag: u32) -> Option<EventType> {
        match tag {
            1 => Some(EventType::Session),
            2 => Some(EventType::Handle),
            4 => Some(EventType::External),
            8 => Some(EventType::Jsep),
            16 => Some(EventType::WebRtc),
            32 => Some(EventType::Media),
            64 => Some(EventType::Plugin),
            128 => Some(EventType::Transport),
            256 => Some(EventType::Core),
            _ => None,
        }
    }

    /// Name used in the `events` configuration list
    pub fn from_config_name(name: &str) -> Option<EventType> {
        match name.to_ascii_lowercase().as_str() {
            "sessions" => Some(EventType::Session),
            "handles" => Some(EventType::Handle),
            "external" => Some(EventType::External),
            "jsep" => Some(EventType::Jsep),
            "webrtc" => Some(EventType::WebRtc),
            "media" => Some(EventType::Media),
            "plugins" => Some(EventType::Plugin),
            "transports" => Some(EventType::Transport),
            "core" => Some(EventType::Core),
            _ => None,
        }
    }
}

/// One lifecycle event received from the gateway.
///
/// Immutable once built; consumed read-only by exactly one handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Raw wire tag; see [`EventType::from_tag`]
    #[serde(rename = "type")]
    pub tag: u32,
    /// Monotonic microseconds at the gateway when the event happened
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    pub handle_id: Option<u64>,
    /// Type-dependent nested data
    #[serde(rename = "event", default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(tag: u32, timestamp: i64, session_id: u64, handle_id: Option<u64>, payload: serde_json::Value) -> Self {
        Self { tag, timestamp, session_id, handle_id, payload }
    }

    pub fn event_type(&self) -> Option<EventType> {
        EventType::from_tag(self.tag)
    }

    /// Parse an event from the gateway's JSON shape.
    pub fn from_json(value: serde_json::Value) -> Result<Event> {
        serde_json::from_value(value).map_err(|e| BridgeError::Decode(e.to_string()))
    }
}

/// Identity recovered from a handle's attach request.
///
/// The blob is an application-supplied, string-encoded JSON value; its
/// absence just means the handle is not one the bridge tracks.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OpaqueIdentity {
    pub user: String,
    #[serde(rename = "roomDesc")]
    pub room_desc: String,
    #[serde(rename = "roomId")]
    pub room_id: i64,
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

impl OpaqueIdentity {
    pub fn decode(blob: &str) -> Result<OpaqueIdentity> {
        serde_json::from_str(blob).map_err(|e| BridgeError::Decode(format!("opaque identity: {}", e)))
    }

    /// Conference identifier safe to embed in a request URL.
    pub fn conf_id(&self) -> String {
        collapse_whitespace(&self.room_desc)
    }
}

/// Collapse each run of whitespace to a single `-`.
pub fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_gap = false;
    for c in input.chars() {
        if c.is_whitespace() {
            if !in_gap {
                out.push('-');
                in_gap = true;
            }
        } else {
            out.push(c);
            in_gap = false;
        }
    }
    out
}

/// Wall-clock microseconds, for delivery timestamps.
pub fn wall_clock_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}
