//! JWT assertion building
//!
//! The identity authority expects an ES256-signed assertion carrying the
//! user, key and application identifiers as grants. The signing key is a
//! locally-held EC private key in PEM form.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Grants embedded in the signed assertion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionClaims {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "keyID")]
    pub key_id: String,
    #[serde(rename = "appID")]
    pub app_id: String,
}

/// Read the signing key from disk.
///
/// A missing or unreadable key is reported as [`AuthError::KeyUnreadable`];
/// the caller decides whether that is fatal (for the bridge it never is).
pub async fn load_private_key(path: &str) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AuthError::KeyUnreadable(format!("{}: {}", path, e)))
}

/// Sign an assertion for `user_id` with the given EC private key.
pub fn sign_assertion(private_key_pem: &str, key_id: &str, app_id: &str, user_id: &str) -> Result<String> {
    let claims = AssertionClaims {
        user_id: user_id.to_string(),
        key_id: key_id.to_string(),
        app_id: app_id.to_string(),
    };

    let key = EncodingKey::from_ec_pem(private_key_pem.as_bytes())
        .map_err(|e| AuthError::Signing(e.to_string()))?;

    encode(&Header::new(Algorithm::ES256), &claims, &key)
        .map_err(|e| AuthError::Signing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_serialize_with_wire_names() {
        let claims = AssertionClaims {
            user_id: "u1".to_string(),
            key_id: "k1".to_string(),
            app_id: "a1".to_string(),
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["userID"], "u1");
        assert_eq!(json["keyID"], "k1");
        assert_eq!(json["appID"], "a1");
    }

    #[test]
    fn garbage_key_is_a_signing_error() {
        let err = sign_assertion("not a pem", "k1", "a1", "u1").unwrap_err();
        assert!(matches!(err, AuthError::Signing(_)));
    }

    #[tokio::test]
    async fn missing_key_file_is_unreadable() {
        let err = load_private_key("/nonexistent/key.pem").await.unwrap_err();
        assert!(matches!(err, AuthError::KeyUnreadable(_)));
    }
}
