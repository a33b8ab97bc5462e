//! # Auth-Core - Identity authority client for statsbridge
//!
//! This crate exchanges a user identity for a short-lived access token.
//! The exchange is an authorization-code-style grant: a locally signed
//! JWT assertion is posted to the identity authority, which answers with
//! the bearer token used by the delivery side of the bridge.

pub mod assertion;
pub mod client;
pub mod error;

pub use client::{AccessToken, AuthClient, AuthConfig};
pub use error::{AuthError, Result};
