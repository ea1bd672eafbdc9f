//! OAuth 2.0 Device Authorization Grant (RFC 8628).
//!
//! `start` asks the identity provider for a device code; `wait` polls the
//! token endpoint until the user approves the login in a browser, the code
//! expires, or the cancellation token fires.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::cancel::or_cancelled;
use crate::error::{AuthError, Result};
use crate::settings::AuthSettings;

const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A pending device authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorization {
    /// Short code the user confirms in the browser.
    pub user_code: String,
    pub verification_uri: String,
    /// Opaque code used to poll for the token.
    pub device_code: String,
    pub interval: Duration,
    pub expires_in: Duration,
}

/// Tokens issued once the user completes the login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Empty when the provider did not issue one.
    pub refresh_token: String,
    pub expires_in_secs: i64,
}

#[async_trait]
pub trait DeviceFlow: Send + Sync {
    /// Request a device code for the given scopes.
    async fn start(&self, ctx: &CancellationToken, scopes: &[String]) -> Result<DeviceAuthorization>;

    /// Block until the user completes the login for `state`.
    async fn wait(&self, ctx: &CancellationToken, state: &DeviceAuthorization) -> Result<TokenGrant>;
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    verification_uri_complete: Option<String>,
    expires_in: u64,
    interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Device flow against the configured identity provider.
#[derive(Debug, Clone)]
pub struct HttpDeviceFlow {
    client: reqwest::Client,
    settings: AuthSettings,
    min_poll_interval: Duration,
}

impl HttpDeviceFlow {
    pub fn new(settings: AuthSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            settings,
            min_poll_interval: Duration::from_secs(1),
        })
    }

    /// Lower bound for the poll interval the provider asks for.
    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }

    async fn request_device_code(&self, scopes: &[String]) -> Result<DeviceAuthorization> {
        let scope = scopes.join(" ");
        let resp = self
            .client
            .post(&self.settings.device_code_endpoint)
            .form(&[
                ("client_id", self.settings.client_id.as_str()),
                ("scope", scope.as_str()),
                ("audience", self.settings.audience.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::StartFailed(format!("failed to request device code: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::StartFailed(format!(
                "server returned error: {status} - {body}"
            )));
        }

        let code = resp
            .json::<DeviceCodeResponse>()
            .await
            .map_err(|e| AuthError::StartFailed(format!("failed to parse device code response: {e}")))?;

        tracing::debug!("Device code issued, expires in {}s", code.expires_in);
        Ok(DeviceAuthorization {
            user_code: code.user_code,
            verification_uri: code.verification_uri_complete.unwrap_or(code.verification_uri),
            device_code: code.device_code,
            interval: Duration::from_secs(code.interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS)),
            expires_in: Duration::from_secs(code.expires_in),
        })
    }

    async fn poll_for_token(&self, device_code: &str) -> Result<PollOutcome> {
        let resp = self
            .client
            .post(&self.settings.token_endpoint)
            .form(&[
                ("grant_type", DEVICE_CODE_GRANT_TYPE),
                ("device_code", device_code),
                ("client_id", self.settings.client_id.as_str()),
            ])
            .send()
            .await?;

        if resp.status().is_success() {
            let token = resp.json::<TokenResponse>().await?;
            return Ok(PollOutcome::Granted(TokenGrant {
                access_token: token.access_token,
                refresh_token: token.refresh_token.unwrap_or_default(),
                expires_in_secs: token.expires_in,
            }));
        }

        let status = resp.status();
        let err = match resp.json::<TokenErrorResponse>().await {
            Ok(err) => err,
            Err(_) => return Err(AuthError::Http(format!("server returned error: {status}"))),
        };
        match err.error.as_str() {
            "authorization_pending" => Ok(PollOutcome::Pending),
            "slow_down" => Ok(PollOutcome::SlowDown),
            "expired_token" => Err(AuthError::AuthTimeout),
            "access_denied" => Err(AuthError::AuthDenied(
                err.error_description.unwrap_or(err.error),
            )),
            _ => Err(AuthError::Http(format!(
                "{}: {}",
                err.error,
                err.error_description.unwrap_or_default()
            ))),
        }
    }
}

enum PollOutcome {
    Granted(TokenGrant),
    Pending,
    SlowDown,
}

#[async_trait]
impl DeviceFlow for HttpDeviceFlow {
    async fn start(&self, ctx: &CancellationToken, scopes: &[String]) -> Result<DeviceAuthorization> {
        or_cancelled(ctx, self.request_device_code(scopes))
            .await
            .ok_or(AuthError::Cancelled)?
    }

    async fn wait(&self, ctx: &CancellationToken, state: &DeviceAuthorization) -> Result<TokenGrant> {
        // No deadline if the advertised lifetime does not fit an Instant
        let deadline = Instant::now().checked_add(state.expires_in);
        let mut interval = state.interval.max(self.min_poll_interval);

        loop {
            or_cancelled(ctx, sleep(interval))
                .await
                .ok_or(AuthError::Cancelled)?;

            if deadline.is_some_and(|d| Instant::now() > d) {
                return Err(AuthError::AuthTimeout);
            }

            match or_cancelled(ctx, self.poll_for_token(&state.device_code))
                .await
                .ok_or(AuthError::Cancelled)??
            {
                PollOutcome::Granted(grant) => {
                    tracing::info!("Device authorization completed");
                    return Ok(grant);
                }
                PollOutcome::Pending => {
                    tracing::trace!("Authorization pending");
                }
                PollOutcome::SlowDown => {
                    interval += SLOW_DOWN_INCREMENT;
                    tracing::debug!("Provider asked to slow down, polling every {:?}", interval);
                }
            }
        }
    }
}
