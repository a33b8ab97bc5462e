//! Error types for the event pipeline

use statsbridge_auth_core::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Network or TLS failure talking to a backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-200 response or malformed/missing field in a backend reply
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Correlation key absent. Expected during normal operation, never fatal.
    #[error("Participant record not found")]
    NotFound,

    /// Store operation attempted outside its open/close lifecycle
    #[error("Correlation store is closed")]
    StoreClosed,

    /// Fatal at startup only
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed event or opaque identity blob; the event is skipped
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
