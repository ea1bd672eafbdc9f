//! Per-process authentication state for the selected system.
//!
//! A `Session` loads the credential file at most once. The outcome of that
//! load, success or error, is cached and replayed to every later caller,
//! including concurrent ones.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigStore, FileConfigStore, SystemRecord};
use crate::device_flow::{DeviceFlow, HttpDeviceFlow};
use crate::error::{AuthError, Result};
use crate::evaluator::{TokenAction, evaluate, expires_at_after, expiry_threshold};
use crate::login::{BrowserOpener, LogObserver, LoginEvent, LoginObserver, LoginRunner, SystemBrowser};
use crate::refresh::{HttpTokenRefresher, TokenRefresher};
use crate::scopes::{ScopeProvider, StaticScopes};
use crate::secrets::{SecretStore, default_secret_store};
use crate::settings::AuthSettings;
use crate::token;

/// What `prepare_system` does when the selected system has no record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingRecordPolicy {
    /// Fail with `NotAuthenticated` / `UnknownSystem`.
    #[default]
    Fail,
    /// Treat the system as having an empty token and log in.
    Login,
}

/// External services a session talks to.
pub struct Collaborators {
    pub device_flow: Arc<dyn DeviceFlow>,
    pub refresher: Arc<dyn TokenRefresher>,
    pub secrets: Arc<dyn SecretStore>,
    pub scopes: Arc<dyn ScopeProvider>,
    pub browser: Arc<dyn BrowserOpener>,
    pub observer: Arc<dyn LoginObserver>,
}

impl Collaborators {
    /// HTTP device flow and refresher for `settings`, with refresh tokens in
    /// this build's default secret store.
    pub fn from_settings(settings: &AuthSettings, secrets_dir: &Path) -> Result<Self> {
        let secrets: Arc<dyn SecretStore> = Arc::from(default_secret_store(secrets_dir));
        Ok(Self {
            device_flow: Arc::new(HttpDeviceFlow::new(settings.clone())?),
            refresher: Arc::new(HttpTokenRefresher::new(settings.clone(), secrets.clone())?),
            secrets,
            scopes: Arc::new(StaticScopes::default()),
            browser: Arc::new(SystemBrowser),
            observer: Arc::new(LogObserver),
        })
    }
}

pub struct Session {
    system: Option<String>,
    store: Arc<dyn ConfigStore>,
    issuer: String,
    scopes: Arc<dyn ScopeProvider>,
    refresher: Arc<dyn TokenRefresher>,
    secrets: Arc<dyn SecretStore>,
    login: LoginRunner,
    missing_record: MissingRecordPolicy,
    init: OnceLock<Result<()>>,
    config: Mutex<Config>,
}

impl Session {
    pub fn new(
        system: Option<String>,
        store: Arc<dyn ConfigStore>,
        issuer: impl Into<String>,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            device_flow,
            refresher,
            secrets,
            scopes,
            browser,
            observer,
        } = collaborators;
        Self {
            system: system.filter(|s| !s.is_empty()),
            store,
            issuer: issuer.into(),
            scopes,
            refresher,
            secrets: secrets.clone(),
            login: LoginRunner::new(device_flow, secrets, browser, observer),
            missing_record: MissingRecordPolicy::default(),
            init: OnceLock::new(),
            config: Mutex::new(Config::default()),
        }
    }

    /// Resolve settings from the environment and build a session backed by
    /// the credential file at `config_path`.
    pub fn open(config_path: impl Into<PathBuf>, system: Option<String>) -> Result<Self> {
        let settings = AuthSettings::load()?;
        let config_path = config_path.into();
        let secrets_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let collaborators = Collaborators::from_settings(&settings, &secrets_dir)?;
        Ok(Self::new(
            system,
            Arc::new(FileConfigStore::new(config_path)),
            settings.issuer(),
            collaborators,
        ))
    }

    pub fn with_observer(mut self, observer: Arc<dyn LoginObserver>) -> Self {
        self.login.set_observer(observer);
        self
    }

    pub fn with_missing_record_policy(mut self, policy: MissingRecordPolicy) -> Self {
        self.missing_record = policy;
        self
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    /// Location of the credential storage.
    pub fn path(&self) -> &Path {
        self.store.location()
    }

    /// Issuer expected in access tokens of this session.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn secret_store(&self) -> &dyn SecretStore {
        self.secrets.as_ref()
    }

    pub fn required_scopes(&self) -> Vec<String> {
        self.scopes.required_scopes()
    }

    pub(crate) fn selected_system(&self) -> Result<&str> {
        self.system.as_deref().ok_or(AuthError::NoSystemSelected)
    }

    fn init(&self) -> Result<()> {
        self.init
            .get_or_init(|| {
                let config = self.store.load()?;
                *self.config.lock() = config;
                Ok(())
            })
            .clone()
    }

    /// Best-effort check that a usable token is cached for the selected
    /// system. Never fails: load errors simply read as "not logged in".
    pub fn is_logged_in(&self) -> bool {
        let _ = self.init();

        let Some(system) = self.system.as_deref() else {
            return false;
        };
        let access_token = self
            .config
            .lock()
            .systems
            .get(system)
            .map(|s| s.access_token.clone())
            .unwrap_or_default();

        token::is_valid(&access_token, &self.issuer)
    }

    /// The cached record of the selected system, as stored.
    pub fn system_record(&self) -> Result<SystemRecord> {
        let system = self.selected_system()?;
        self.init()?;
        self.config
            .lock()
            .systems
            .get(system)
            .cloned()
            .ok_or_else(|| AuthError::UnknownSystem {
                system: system.to_string(),
            })
    }

    /// Store `record` for the selected system and rewrite the credential file.
    ///
    /// Starts from an empty config if nothing was stored yet.
    pub fn add_system(&self, record: SystemRecord) -> Result<()> {
        let system = self.selected_system()?;
        match self.init() {
            Ok(()) | Err(AuthError::NotAuthenticated) => {}
            Err(e) => return Err(e),
        }

        // Held across persist so writes never interleave
        let mut config = self.config.lock();
        config.systems.insert(system.to_string(), record);
        self.store.persist(&config)
    }

    /// Return a record with a usable access token for the selected system,
    /// refreshing it or logging in again as needed.
    pub async fn prepare_system(&self, ctx: &CancellationToken) -> Result<SystemRecord> {
        let system = self.selected_system()?;
        let record = match self.system_record() {
            Ok(record) => record,
            Err(AuthError::NotAuthenticated | AuthError::UnknownSystem { .. })
                if self.missing_record == MissingRecordPolicy::Login =>
            {
                tracing::debug!("No cached credentials for '{}'", system);
                SystemRecord::default()
            }
            Err(e) => return Err(e),
        };

        let required = self.required_scopes();
        let now = Utc::now();
        match evaluate(&record, Some(&required), now, expiry_threshold()) {
            TokenAction::UseAsIs => Ok(record),
            TokenAction::FullLogin => {
                tracing::info!("Credentials for '{}' need a new login", system);
                self.login.run(ctx, self, true).await
            }
            TokenAction::Refresh => {
                let renewed = self.refresher.refresh(ctx, system).await.and_then(|renewed| {
                    let expires_at = expires_at_after(Utc::now(), renewed.expires_in_secs)
                        .ok_or_else(|| AuthError::RefreshFailed {
                            system: system.to_string(),
                            reason: format!(
                                "token endpoint returned an unusable expires_in of {}s",
                                renewed.expires_in_secs
                            ),
                        })?;
                    Ok((renewed.access_token, expires_at))
                });

                match renewed {
                    Ok((access_token, expires_at)) => {
                        let updated = SystemRecord {
                            access_token,
                            expires_at,
                            ..record
                        };
                        self.add_system(updated.clone())?;
                        tracing::info!("Renewed access token for '{}'", system);
                        Ok(updated)
                    }
                    Err(e) if e.is_cancelled() => Err(e),
                    Err(e) => {
                        tracing::warn!("Failed to renew access token: {}", e);
                        self.login.emit(LoginEvent::RefreshFailed {
                            system: system.to_string(),
                            reason: e.to_string(),
                        });
                        self.login.run(ctx, self, true).await
                    }
                }
            }
        }
    }

    /// Run the interactive login for the selected system unconditionally.
    pub async fn login(&self, ctx: &CancellationToken) -> Result<SystemRecord> {
        self.login.run(ctx, self, false).await
    }
}
