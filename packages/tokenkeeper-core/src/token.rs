//! Claim checks on cached access tokens.
//!
//! The signing keys are not available locally, so only the structure and the
//! registered claims are checked: the token must be a well-formed JWT issued by
//! the expected issuer and, when it carries `exp`, not yet expired.

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;

use crate::error::{AuthError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

impl TokenClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

fn validation(issuer: &str) -> Validation {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.set_issuer(&[issuer]);
    validation.set_required_spec_claims(&["iss"]);
    validation.validate_aud = false;
    validation.leeway = 0;
    validation
}

/// Decode `token` and check its issuer and expiry.
pub fn inspect(token: &str, issuer: &str) -> Result<TokenClaims> {
    decode_header(token).map_err(|e| AuthError::InvalidToken(format!("malformed header: {e}")))?;
    let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation(issuer))
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    Ok(data.claims)
}

/// True if `token` is a well-formed, unexpired token from `issuer`.
pub fn is_valid(token: &str, issuer: &str) -> bool {
    match inspect(token, issuer) {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("Cached access token rejected: {}", e);
            false
        }
    }
}

#[cfg(test)]
pub(crate) fn mint(issuer: &str, exp: Option<i64>) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let mut claims = serde_json::json!({ "iss": issuer, "sub": "user|42" });
    if let Some(exp) = exp {
        claims["exp"] = serde_json::json!(exp);
    }
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap()
}
