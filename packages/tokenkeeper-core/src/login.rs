//! Interactive device flow login.
//!
//! The runner sequences the human-facing steps: request a device code, show
//! it, open the browser, wait for the user, then store the refresh token and
//! the new system record. Secondary failures (browser, secret store) are
//! reported as [`LoginEvent`]s and never fail the login.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::SystemRecord;
use crate::device_flow::{DeviceAuthorization, DeviceFlow};
use crate::evaluator::expires_at_after;
use crate::error::{AuthError, Result};
use crate::secrets::{SECRETS_NAMESPACE, SecretStore};
use crate::session::Session;

/// Progress and warnings emitted while logging in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginEvent {
    /// The cached credentials could not be used and a new login starts.
    ReauthorizationRequired { system: String },
    /// Renewing the access token failed; a full login follows.
    RefreshFailed { system: String, reason: String },
    DeviceCode {
        user_code: String,
        verification_uri: String,
    },
    BrowserOpenFailed { url: String, reason: String },
    WaitingForBrowser,
    WaitFinished { success: bool },
    LoggedIn { system: String },
    /// The refresh token could not be kept; the next expiry needs a new login.
    RefreshTokenNotStored { reason: String },
}

/// Receives login events and asks for confirmation before the browser opens.
#[async_trait]
pub trait LoginObserver: Send + Sync {
    fn on_event(&self, event: &LoginEvent);

    async fn confirm(&self, _ctx: &CancellationToken, _auth: &DeviceAuthorization) -> Result<()> {
        Ok(())
    }
}

/// Observer that only logs.
#[derive(Debug, Default, Clone)]
pub struct LogObserver;

#[async_trait]
impl LoginObserver for LogObserver {
    fn on_event(&self, event: &LoginEvent) {
        match event {
            LoginEvent::RefreshFailed { .. }
            | LoginEvent::BrowserOpenFailed { .. }
            | LoginEvent::RefreshTokenNotStored { .. } => tracing::warn!("{:?}", event),
            _ => tracing::debug!("{:?}", event),
        }
    }
}

pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Opens URLs in the default browser (if the `browser` feature is enabled).
#[derive(Debug, Default, Clone)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        #[cfg(feature = "browser")]
        {
            webbrowser::open(url)
        }

        #[cfg(not(feature = "browser"))]
        {
            let _ = url;
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "built without browser support",
            ))
        }
    }
}

pub struct LoginRunner {
    device_flow: Arc<dyn DeviceFlow>,
    secrets: Arc<dyn SecretStore>,
    browser: Arc<dyn BrowserOpener>,
    observer: Arc<dyn LoginObserver>,
}

impl LoginRunner {
    pub fn new(
        device_flow: Arc<dyn DeviceFlow>,
        secrets: Arc<dyn SecretStore>,
        browser: Arc<dyn BrowserOpener>,
        observer: Arc<dyn LoginObserver>,
    ) -> Self {
        Self {
            device_flow,
            secrets,
            browser,
            observer,
        }
    }

    pub(crate) fn set_observer(&mut self, observer: Arc<dyn LoginObserver>) {
        self.observer = observer;
    }

    pub(crate) fn emit(&self, event: LoginEvent) {
        self.observer.on_event(&event);
    }

    /// Log in to the session's selected system and persist the result.
    ///
    /// `expired` marks a login forced by unusable cached credentials, which
    /// only changes the messaging.
    pub async fn run(
        &self,
        ctx: &CancellationToken,
        session: &Session,
        expired: bool,
    ) -> Result<SystemRecord> {
        let system = session.selected_system()?;
        let failed = |e: AuthError| AuthError::login_failed(system, e);

        if expired {
            self.emit(LoginEvent::ReauthorizationRequired {
                system: system.to_string(),
            });
        }

        let scopes = session.required_scopes();
        let state = self.device_flow.start(ctx, &scopes).await.map_err(failed)?;

        self.emit(LoginEvent::DeviceCode {
            user_code: state.user_code.clone(),
            verification_uri: state.verification_uri.clone(),
        });
        self.observer.confirm(ctx, &state).await.map_err(failed)?;

        if let Err(e) = self.browser.open(&state.verification_uri) {
            tracing::warn!(
                "Failed to open browser automatically: {}. User can use the manual link.",
                e
            );
            self.emit(LoginEvent::BrowserOpenFailed {
                url: state.verification_uri.clone(),
                reason: e.to_string(),
            });
        }

        self.emit(LoginEvent::WaitingForBrowser);
        let waited = self.device_flow.wait(ctx, &state).await;
        self.emit(LoginEvent::WaitFinished {
            success: waited.is_ok(),
        });
        let grant = waited.map_err(failed)?;
        let expires_at = expires_at_after(Utc::now(), grant.expires_in_secs).ok_or_else(|| {
            failed(AuthError::Http(format!(
                "token endpoint returned an unusable expires_in of {}s",
                grant.expires_in_secs
            )))
        })?;

        tracing::info!("Logged in to system '{}'", system);
        self.emit(LoginEvent::LoggedIn {
            system: system.to_string(),
        });

        let stored = if grant.refresh_token.is_empty() {
            Err(AuthError::SecretStore("no refresh token was issued".to_string()))
        } else {
            self.secrets
                .set(SECRETS_NAMESPACE, system, &grant.refresh_token)
        };
        if let Err(e) = stored {
            tracing::warn!("Could not store the refresh token for '{}': {}", system, e);
            self.emit(LoginEvent::RefreshTokenNotStored {
                reason: e.to_string(),
            });
        }

        let record = SystemRecord {
            access_token: grant.access_token,
            scopes: Some(scopes),
            expires_at,
        };
        session.add_system(record.clone()).map_err(failed)?;
        Ok(record)
    }
}
