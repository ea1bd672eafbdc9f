//! Exchanging a stored refresh token for a new access token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::cancel::or_cancelled;
use crate::error::{AuthError, Result};
use crate::secrets::{SECRETS_NAMESPACE, SecretStore};
use crate::settings::AuthSettings;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in_secs: i64,
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Obtain a new access token for `system`. Fails with `RefreshFailed`
    /// when the refresh token is missing or rejected, or the provider cannot
    /// be reached.
    async fn refresh(&self, ctx: &CancellationToken, system: &str) -> Result<RefreshedToken>;
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
}

/// Refresh-token grant against the configured token endpoint.
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    settings: AuthSettings,
    secrets: Arc<dyn SecretStore>,
}

impl HttpTokenRefresher {
    pub fn new(settings: AuthSettings, secrets: Arc<dyn SecretStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            settings,
            secrets,
        })
    }

    async fn exchange(&self, system: &str) -> std::result::Result<RefreshedToken, String> {
        let refresh_token = match self.secrets.get(SECRETS_NAMESPACE, system) {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => return Err("no refresh token stored".to_string()),
            Err(e) => return Err(e.to_string()),
        };

        let resp = self
            .client
            .post(&self.settings.token_endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.settings.client_id.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| format!("failed to reach token endpoint: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("server returned error: {status} - {body}"));
        }

        let body = resp
            .json::<RefreshResponse>()
            .await
            .map_err(|e| format!("failed to parse refresh response: {e}"))?;
        Ok(RefreshedToken {
            access_token: body.access_token,
            expires_in_secs: body.expires_in,
        })
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, ctx: &CancellationToken, system: &str) -> Result<RefreshedToken> {
        let outcome = or_cancelled(ctx, self.exchange(system))
            .await
            .ok_or(AuthError::Cancelled)?;
        match outcome {
            Ok(token) => {
                tracing::debug!("Access token for {} renewed", system);
                Ok(token)
            }
            Err(reason) => Err(AuthError::RefreshFailed {
                system: system.to_string(),
                reason,
            }),
        }
    }
}
