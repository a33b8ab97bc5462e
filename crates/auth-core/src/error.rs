//! Error types for authentication operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unreadable private key: {0}")]
    KeyUnreadable(String),

    #[error("Failed to sign assertion: {0}")]
    Signing(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authority responded with status {0}")]
    Status(u16),

    #[error("Missing field in authority response: {0}")]
    MissingField(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
