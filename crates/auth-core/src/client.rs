//! Token exchange with the identity authority

use serde::Deserialize;
use tracing::{debug, warn};

use crate::assertion::{load_private_key, sign_assertion};
use crate::error::{AuthError, Result};

/// Configuration for the identity authority exchange
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Authority endpoint, e.g. `https://auth.example.com/authenticate`
    pub authority_url: String,
    /// Application identifier registered with the authority
    pub app_id: String,
    /// Identifier of the signing key registered with the authority
    pub key_id: String,
    /// Path to the EC private key (PEM) used to sign assertions
    pub private_key_path: String,
}

/// Short-lived bearer token issued by the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for AccessToken {
    fn from(token: String) -> Self {
        AccessToken(token)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Client for the authorization-code-style token grant
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: AuthConfig,
    http: reqwest::Client,
}

impl AuthClient {
    pub fn new(config: AuthConfig) -> Result<Self> {
        if config.authority_url.is_empty() {
            return Err(AuthError::Config("empty authority URL".to_string()));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AuthError::Config(e.to_string()))?;
        Ok(Self { config, http })
    }

    /// Exchange `user_id` for an access token.
    ///
    /// Builds a signed assertion and posts it as a form-encoded
    /// authorization-code grant. Every failure mode (unreadable key,
    /// signing, network, non-200, missing `access_token`) surfaces as an
    /// [`AuthError`]; none of them should take the pipeline down.
    pub async fn authenticate(&self, user_id: &str) -> Result<AccessToken> {
        let private_key = load_private_key(&self.config.private_key_path).await?;
        let assertion = sign_assertion(&private_key, &self.config.key_id, &self.config.app_id, user_id)?;

        let client_id = format!("{}@{}", user_id, self.config.app_id);
        let form = [
            ("grant_type", "authorization_code"),
            ("code", assertion.as_str()),
            ("client_id", client_id.as_str()),
        ];

        debug!("Requesting access token for {}", client_id);
        let response = self
            .http
            .post(&self.config.authority_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() != 200 {
            warn!("Authority rejected token request for {}: {}", client_id, status);
            return Err(AuthError::Status(status.as_u16()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        body.access_token
            .map(AccessToken::from)
            .ok_or(AuthError::MissingField("access_token"))
    }
}
