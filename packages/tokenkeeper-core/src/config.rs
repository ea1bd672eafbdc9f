//! Persistent per-system credential records.
//!
//! The whole `Config` lives in one JSON file:
//!
//! ```json
//! {
//!   "systems": {
//!     "prod": {
//!       "access_token": "eyJ...",
//!       "scopes": ["openid", "offline_access"],
//!       "expires_at": "2026-10-19T12:00:00Z"
//!     }
//!   }
//! }
//! ```
//!
//! The file holds bearer tokens, so it is written owner-only (`0600`) inside
//! an owner-only directory (`0700`).

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Root of the credential file. A missing key means the system was never
/// logged in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub systems: BTreeMap<String, SystemRecord>,
}

/// Cached credential state of one system.
///
/// `scopes` is what was granted when the token was issued. `None` (never
/// recorded) and `Some(vec![])` are deliberately different values; empty
/// lists are omitted on disk and therefore reload as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "scopes_omitted")]
    pub scopes: Option<Vec<String>>,
    pub expires_at: DateTime<Utc>,
}

fn scopes_omitted(scopes: &Option<Vec<String>>) -> bool {
    scopes.as_ref().is_none_or(|s| s.is_empty())
}

/// Durable storage for the `Config`.
pub trait ConfigStore: Send + Sync {
    /// Read the stored config. Fails with `NotAuthenticated` when nothing has
    /// been stored yet.
    fn load(&self) -> Result<Config>;

    /// Replace the stored config with `config`, all or nothing.
    fn persist(&self, config: &Config) -> Result<()>;

    /// Human-readable location of the storage, for messages.
    fn location(&self) -> &Path;
}

/// `ConfigStore` backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Config> {
        let content = match fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No credential file at {:?}", self.path);
                return Err(AuthError::NotAuthenticated);
            }
            Err(e) => return Err(AuthError::io(&self.path, e)),
        };

        let config: Config =
            serde_json::from_slice(&content).map_err(|e| AuthError::parse(&self.path, e))?;
        tracing::debug!(
            "Loaded {} system record(s) from {:?}",
            config.systems.len(),
            self.path
        );
        Ok(config)
    }

    fn persist(&self, config: &Config) -> Result<()> {
        // Serialize first so a failure never touches the file
        let json = serde_json::to_vec_pretty(config)
            .map_err(|e| AuthError::Serialize(std::sync::Arc::new(e)))?;

        write_private_atomic(&self.path, &json).map_err(|e| AuthError::io(&self.path, e))?;

        tracing::debug!(
            "Saved {} system record(s) to {:?}",
            config.systems.len(),
            self.path
        );
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "auth.json".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

/// Replace `path` with `content` via an owner-only temp file and a rename.
/// A missing parent directory is created owner-only.
pub(crate) fn write_private_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            create_private_dir(dir)?;
        }
    }

    let tmp = temp_path_for(path);
    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Err(e) = write_private_file(&tmp, content) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
    }

    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir)
    }
}

fn write_private_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600); // Owner read/write only
    }

    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(token: &str, scopes: &[&str]) -> SystemRecord {
        SystemRecord {
            access_token: token.to_string(),
            scopes: Some(scopes.iter().map(|s| s.to_string()).collect()),
            expires_at: DateTime::from_timestamp(1_790_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn missing_file_is_not_authenticated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("auth.json"));
        assert!(matches!(store.load(), Err(AuthError::NotAuthenticated)));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        fs::write(&path, "{\"systems\": [").unwrap();

        let store = FileConfigStore::new(&path);
        assert!(matches!(store.load(), Err(AuthError::Parse { .. })));
    }

    #[test]
    fn persisted_config_reloads_equal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("nested").join("deeper").join("auth.json"));

        let mut config = Config::default();
        config
            .systems
            .insert("prod".to_string(), record("tok-prod", &["openid", "offline_access"]));
        config.systems.insert("dev".to_string(), record("tok-dev", &["openid"]));
        store.persist(&config).unwrap();

        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn overwrite_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("auth.json"));

        let mut config = Config::default();
        config.systems.insert("prod".to_string(), record("old", &["openid"]));
        store.persist(&config).unwrap();

        config.systems.insert("prod".to_string(), record("new", &["openid"]));
        store.persist(&config).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.systems["prod"].access_token, "new");
        assert!(!temp_path_for(store.location()).exists());
    }

    #[test]
    fn empty_fields_are_omitted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        let store = FileConfigStore::new(&path);

        let mut config = Config::default();
        config.systems.insert(
            "prod".to_string(),
            SystemRecord {
                access_token: String::new(),
                scopes: Some(Vec::new()),
                expires_at: Utc::now() + Duration::hours(1),
            },
        );
        store.persist(&config).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let prod = &raw["systems"]["prod"];
        assert!(prod.get("access_token").is_none());
        assert!(prod.get("scopes").is_none());
        assert!(prod.get("expires_at").is_some());

        // An explicitly empty scope list comes back as "never recorded"
        assert_eq!(store.load().unwrap().systems["prod"].scopes, None);
    }

    #[test]
    fn empty_object_loads_as_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        fs::write(&path, "{}").unwrap();

        let config = FileConfigStore::new(&path).load().unwrap();
        assert!(config.systems.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join("tokenkeeper");
        let path = cfg_dir.join("auth.json");
        let store = FileConfigStore::new(&path);
        store.persist(&Config::default()).unwrap();

        let dir_mode = fs::metadata(&cfg_dir).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }
}
