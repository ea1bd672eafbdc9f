//! Endpoint settings for the identity provider.
//!
//! Each option is resolved independently with priority:
//! 1. Environment variable (`TOKENKEEPER_*`)
//! 2. `[auth]` table of `~/.config/tokenkeeper/settings.toml`
//! 3. Production default
//!
//! Anything that cannot be decoded is fatal: a CLI pointed at a half-parsed
//! endpoint would send credentials somewhere unexpected.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::Deserialize;

use crate::error::{AuthError, Result};

const DEFAULT_AUDIENCE: &str = "https://login.tokenkeeper.dev/api/v2/";
const DEFAULT_CLIENT_ID: &str = "tk-cli-7f3c91d2a8";
const DEFAULT_DEVICE_CODE_ENDPOINT: &str = "https://login.tokenkeeper.dev/oauth/device/code";
const DEFAULT_TOKEN_ENDPOINT: &str = "https://login.tokenkeeper.dev/oauth/token";

pub const ENV_AUDIENCE: &str = "TOKENKEEPER_AUDIENCE";
pub const ENV_CLIENT_ID: &str = "TOKENKEEPER_CLIENT_ID";
pub const ENV_DEVICE_CODE_ENDPOINT: &str = "TOKENKEEPER_DEVICE_CODE_ENDPOINT";
pub const ENV_TOKEN_ENDPOINT: &str = "TOKENKEEPER_TOKEN_ENDPOINT";

const APP_DIR: &str = "tokenkeeper";
const SETTINGS_FILE: &str = "settings.toml";
const CREDENTIALS_FILE: &str = "auth.json";

/// Settings file structure
#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    auth: Option<AuthTable>,
}

#[derive(Debug, Deserialize, Default)]
struct AuthTable {
    audience: Option<String>,
    client_id: Option<String>,
    device_code_endpoint: Option<String>,
    token_endpoint: Option<String>,
}

/// Where a setting came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Default,
    Environment,
    SettingsFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::SettingsFile => write!(f, "settings file"),
        }
    }
}

/// Resolved identity provider settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub audience: String,
    pub client_id: String,
    pub device_code_endpoint: String,
    pub token_endpoint: String,
    pub(crate) sources: Vec<(&'static str, ConfigSource)>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            audience: DEFAULT_AUDIENCE.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            device_code_endpoint: DEFAULT_DEVICE_CODE_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            sources: Vec::new(),
        }
    }
}

impl AuthSettings {
    /// Resolve settings from the process environment and the default
    /// settings file.
    pub fn load() -> Result<Self> {
        let file = settings_file_path();
        Self::resolve(|key| std::env::var_os(key), file.as_deref())
    }

    /// Resolve settings from an arbitrary environment lookup and settings file.
    pub fn resolve<F>(env: F, settings_file: Option<&Path>) -> Result<Self>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let table = match settings_file {
            Some(path) => load_settings_file(path)?.and_then(|f| f.auth),
            None => None,
        }
        .unwrap_or_default();

        let mut sources = Vec::with_capacity(4);
        let mut pick = |key: &'static str,
                        from_file: Option<String>,
                        default: &str|
         -> Result<String> {
            let (value, source) = match env_value(&env, key)? {
                Some(v) => (v, ConfigSource::Environment),
                None => match clean(from_file) {
                    Some(v) => (v, ConfigSource::SettingsFile),
                    None => (default.to_string(), ConfigSource::Default),
                },
            };
            sources.push((key, source));
            Ok(value)
        };

        let audience = pick(ENV_AUDIENCE, table.audience, DEFAULT_AUDIENCE)?;
        let client_id = pick(ENV_CLIENT_ID, table.client_id, DEFAULT_CLIENT_ID)?;
        let device_code_endpoint = pick(
            ENV_DEVICE_CODE_ENDPOINT,
            table.device_code_endpoint,
            DEFAULT_DEVICE_CODE_ENDPOINT,
        )?;
        let token_endpoint = pick(ENV_TOKEN_ENDPOINT, table.token_endpoint, DEFAULT_TOKEN_ENDPOINT)?;

        for (key, url) in [
            (ENV_AUDIENCE, &audience),
            (ENV_DEVICE_CODE_ENDPOINT, &device_code_endpoint),
            (ENV_TOKEN_ENDPOINT, &token_endpoint),
        ] {
            validate_url(key, url)?;
        }

        let settings = Self {
            audience,
            client_id,
            device_code_endpoint,
            token_endpoint,
            sources,
        };
        tracing::debug!("Resolved auth settings: {:?}", settings.sources);
        Ok(settings)
    }

    /// Default settings talking to other endpoints, e.g. a staging or test
    /// identity provider.
    pub fn with_endpoints(
        device_code_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            device_code_endpoint: device_code_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            ..Self::default()
        }
    }

    /// Source of the setting read from the given environment key.
    pub fn source_of(&self, key: &str) -> ConfigSource {
        self.sources
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, s)| *s)
            .unwrap_or(ConfigSource::Default)
    }

    /// The issuer expected in access tokens: the audience's origin plus `/`.
    pub fn issuer(&self) -> String {
        match Url::parse(&self.audience) {
            Ok(url) => format!("{}/", url.origin().ascii_serialization()),
            Err(_) => self.audience.clone(),
        }
    }
}

fn env_value<F>(env: &F, key: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<OsString>,
{
    match env(key) {
        None => Ok(None),
        Some(raw) => {
            let value = raw.into_string().map_err(|_| AuthError::ConfigDecodeFailed {
                key: key.to_string(),
                reason: "value is not valid unicode".to_string(),
            })?;
            Ok(clean(Some(value)))
        }
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate_url(key: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).map_err(|e| AuthError::ConfigDecodeFailed {
        key: key.to_string(),
        reason: format!("{value:?} is not a valid URL: {e}"),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(AuthError::ConfigDecodeFailed {
            key: key.to_string(),
            reason: format!("unsupported URL scheme {other:?}"),
        }),
    }
}

fn load_settings_file(path: &Path) -> Result<Option<SettingsFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|e| AuthError::ConfigDecodeFailed {
        key: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let parsed = toml::from_str(&content).map_err(|e| AuthError::ConfigDecodeFailed {
        key: path.display().to_string(),
        reason: e.to_string(),
    })?;
    tracing::debug!("Loaded settings from {:?}", path);
    Ok(Some(parsed))
}

/// Get the tokenkeeper config directory
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join(APP_DIR))
}

pub fn settings_file_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(SETTINGS_FILE))
}

/// Default location of the per-system credential file.
pub fn default_credentials_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CREDENTIALS_FILE))
}

/// Generate example settings file content
pub fn generate_example_settings() -> String {
    format!(
        r#"# tokenkeeper settings
# Place this file at: ~/.config/tokenkeeper/settings.toml
# Environment variables (TOKENKEEPER_*) take precedence over this file.

[auth]
# audience = "{DEFAULT_AUDIENCE}"
# client_id = "{DEFAULT_CLIENT_ID}"
# device_code_endpoint = "{DEFAULT_DEVICE_CODE_ENDPOINT}"
# token_endpoint = "{DEFAULT_TOKEN_ENDPOINT}"
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_overrides() {
        let settings = AuthSettings::resolve(env_of(&[]), None).unwrap();
        assert_eq!(settings.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(settings.token_endpoint, DEFAULT_TOKEN_ENDPOINT);
        assert_eq!(settings.source_of(ENV_AUDIENCE), ConfigSource::Default);
        assert_eq!(settings.issuer(), "https://login.tokenkeeper.dev/");
    }

    #[test]
    fn environment_beats_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "[auth]\nclient_id = \"from-file\"\ntoken_endpoint = \"https://file.example.com/token\"\n",
        )
        .unwrap();

        let env = env_of(&[(ENV_CLIENT_ID, "from-env")]);
        let settings = AuthSettings::resolve(env, Some(&path)).unwrap();

        assert_eq!(settings.client_id, "from-env");
        assert_eq!(settings.source_of(ENV_CLIENT_ID), ConfigSource::Environment);
        assert_eq!(settings.token_endpoint, "https://file.example.com/token");
        assert_eq!(settings.source_of(ENV_TOKEN_ENDPOINT), ConfigSource::SettingsFile);
    }

    #[test]
    fn blank_environment_value_is_ignored() {
        let settings = AuthSettings::resolve(env_of(&[(ENV_CLIENT_ID, "  ")]), None).unwrap();
        assert_eq!(settings.client_id, DEFAULT_CLIENT_ID);
    }

    #[test]
    fn invalid_url_is_fatal() {
        let err = AuthSettings::resolve(env_of(&[(ENV_TOKEN_ENDPOINT, "not a url")]), None)
            .unwrap_err();
        assert!(matches!(err, AuthError::ConfigDecodeFailed { ref key, .. } if key == ENV_TOKEN_ENDPOINT));
    }

    #[test]
    fn non_http_scheme_is_fatal() {
        let err = AuthSettings::resolve(env_of(&[(ENV_AUDIENCE, "ftp://example.com/")]), None)
            .unwrap_err();
        assert!(matches!(err, AuthError::ConfigDecodeFailed { .. }));
    }

    #[test]
    fn malformed_settings_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[auth\nclient_id = ").unwrap();

        let err = AuthSettings::resolve(env_of(&[]), Some(&path)).unwrap_err();
        assert!(matches!(err, AuthError::ConfigDecodeFailed { .. }));
    }

    #[test]
    fn missing_settings_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(AuthSettings::resolve(env_of(&[]), Some(&path)).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn non_unicode_environment_value_is_fatal() {
        use std::os::unix::ffi::OsStringExt;
        let env = |key: &str| {
            (key == ENV_CLIENT_ID).then(|| OsString::from_vec(vec![0x66, 0x6f, 0x80]))
        };
        let err = AuthSettings::resolve(env, None).unwrap_err();
        assert!(matches!(err, AuthError::ConfigDecodeFailed { ref key, .. } if key == ENV_CLIENT_ID));
    }

    #[test]
    fn issuer_is_origin_of_audience() {
        let env = env_of(&[(ENV_AUDIENCE, "https://id.example.com:8443/api/v2/")]);
        let settings = AuthSettings::resolve(env, None).unwrap();
        assert_eq!(settings.issuer(), "https://id.example.com:8443/");
    }

    #[test]
    fn with_endpoints_keeps_other_defaults() {
        let settings = AuthSettings::with_endpoints("http://127.0.0.1:9/device", "http://127.0.0.1:9/token");
        assert_eq!(settings.device_code_endpoint, "http://127.0.0.1:9/device");
        assert_eq!(settings.token_endpoint, "http://127.0.0.1:9/token");
        assert_eq!(settings.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(settings.issuer(), "https://login.tokenkeeper.dev/");
        assert_eq!(settings.source_of(ENV_TOKEN_ENDPOINT), ConfigSource::Default);
    }
}
