//! Refresh token storage with platform keyring and file-based fallback.
//!
//! Storage selection:
//! 1. Platform keyring (if `keyring-storage` is enabled and `file-storage` is not)
//! 2. File-based storage (owner-only JSON file next to the credential file)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::config::write_private_atomic;
use crate::error::{AuthError, Result};

/// Namespace under which refresh tokens are stored.
pub const SECRETS_NAMESPACE: &str = "tokenkeeper";

const SECRETS_FILE: &str = "secrets.json";

pub trait SecretStore: Send + Sync {
    fn set(&self, namespace: &str, key: &str, secret: &str) -> Result<()>;

    /// Returns `Ok(None)` when nothing is stored under `key`.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    fn delete(&self, namespace: &str, key: &str) -> Result<()>;

    /// Description of where secrets end up (for status output)
    fn describe(&self) -> String;
}

// ============================================================================
// Keyring-based storage (optional, platform-specific)
// ============================================================================

#[cfg(feature = "keyring-storage")]
#[derive(Debug, Default, Clone)]
pub struct KeyringSecretStore;

#[cfg(feature = "keyring-storage")]
impl KeyringSecretStore {
    fn entry(namespace: &str, key: &str) -> Result<keyring::Entry> {
        tracing::trace!("Creating keyring entry for service='{}', user='{}'", namespace, key);
        keyring::Entry::new(namespace, key).map_err(|e| {
            tracing::error!(
                "Failed to create keyring entry (service='{}', user='{}'): {}",
                namespace,
                key,
                e
            );
            AuthError::SecretStore(format!("failed to create keyring entry: {e}"))
        })
    }
}

#[cfg(feature = "keyring-storage")]
impl SecretStore for KeyringSecretStore {
    fn set(&self, namespace: &str, key: &str, secret: &str) -> Result<()> {
        Self::entry(namespace, key)?
            .set_password(secret)
            .map_err(|e| AuthError::SecretStore(format!("failed to store secret in keyring: {e}")))
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        match Self::entry(namespace, key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::SecretStore(format!(
                "failed to read secret from keyring: {e}"
            ))),
        }
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        match Self::entry(namespace, key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::SecretStore(format!(
                "failed to delete secret from keyring: {e}"
            ))),
        }
    }

    fn describe(&self) -> String {
        #[cfg(target_os = "windows")]
        {
            "Windows Credential Manager".to_string()
        }
        #[cfg(target_os = "macos")]
        {
            "macOS Keychain".to_string()
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            "Linux Secret Service (GNOME Keyring/KWallet)".to_string()
        }
    }
}

// ============================================================================
// File-based storage (always available)
// ============================================================================

/// Secrets kept in an owner-only JSON file, keyed by `namespace/key`.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match fs::read(&self.path) {
            Ok(content) => serde_json::from_slice(&content).map_err(|e| AuthError::parse(&self.path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(AuthError::io(&self.path, e)),
        }
    }

    fn write_all(&self, secrets: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_vec(secrets)
            .map_err(|e| AuthError::Serialize(std::sync::Arc::new(e)))?;
        write_private_atomic(&self.path, &json).map_err(|e| AuthError::io(&self.path, e))?;
        tracing::debug!("Secrets saved to file: {:?}", self.path);
        Ok(())
    }

    fn slot(namespace: &str, key: &str) -> String {
        format!("{namespace}/{key}")
    }
}

impl SecretStore for FileSecretStore {
    fn set(&self, namespace: &str, key: &str, secret: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut secrets = self.read_all()?;
        secrets.insert(Self::slot(namespace, key), secret.to_string());
        self.write_all(&secrets)
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(&Self::slot(namespace, key)))
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut secrets = self.read_all()?;
        if secrets.remove(&Self::slot(namespace, key)).is_some() {
            self.write_all(&secrets)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("File-based storage: {}", self.path.display())
    }
}

/// The secret store this build is configured for. `dir` is where the file
/// store keeps its data.
pub fn default_secret_store(dir: &Path) -> Box<dyn SecretStore> {
    #[cfg(all(feature = "keyring-storage", not(feature = "file-storage")))]
    {
        let _ = dir;
        Box::new(KeyringSecretStore)
    }

    #[cfg(not(all(feature = "keyring-storage", not(feature = "file-storage"))))]
    {
        Box::new(FileSecretStore::new(dir.join(SECRETS_FILE)))
    }
}

/// In-memory store for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemorySecretStore {
    pub(crate) secrets: Mutex<BTreeMap<String, String>>,
    pub(crate) fail_writes: bool,
}

#[cfg(test)]
impl SecretStore for MemorySecretStore {
    fn set(&self, namespace: &str, key: &str, secret: &str) -> Result<()> {
        if self.fail_writes {
            return Err(AuthError::SecretStore("keychain locked".to_string()));
        }
        self.secrets
            .lock()
            .insert(format!("{namespace}/{key}"), secret.to_string());
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self.secrets.lock().get(&format!("{namespace}/{key}")).cloned())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        self.secrets.lock().remove(&format!("{namespace}/{key}"));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secrets.json"));

        store.set(SECRETS_NAMESPACE, "prod", "refresh-prod").unwrap();
        store.set(SECRETS_NAMESPACE, "dev", "refresh-dev").unwrap();

        assert_eq!(store.get(SECRETS_NAMESPACE, "prod").unwrap().as_deref(), Some("refresh-prod"));
        assert_eq!(store.get(SECRETS_NAMESPACE, "dev").unwrap().as_deref(), Some("refresh-dev"));
        assert_eq!(store.get("other", "prod").unwrap(), None);
    }

    #[test]
    fn file_store_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secrets.json"));

        store.set(SECRETS_NAMESPACE, "prod", "refresh").unwrap();
        store.delete(SECRETS_NAMESPACE, "prod").unwrap();
        store.delete(SECRETS_NAMESPACE, "prod").unwrap();
        assert_eq!(store.get(SECRETS_NAMESPACE, "prod").unwrap(), None);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("none").join("secrets.json"));
        assert_eq!(store.get(SECRETS_NAMESPACE, "prod").unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn secrets_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        FileSecretStore::new(&path).set(SECRETS_NAMESPACE, "prod", "x").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn secrets_dir_is_created_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let secrets_dir = dir.path().join("tokenkeeper");
        FileSecretStore::new(secrets_dir.join("secrets.json"))
            .set(SECRETS_NAMESPACE, "prod", "x")
            .unwrap();

        let mode = fs::metadata(&secrets_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[cfg(not(all(feature = "keyring-storage", not(feature = "file-storage"))))]
    #[test]
    fn headless_build_keeps_secrets_in_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = default_secret_store(dir.path());
        assert!(store.describe().starts_with("File-based storage"));

        store.set(SECRETS_NAMESPACE, "prod", "refresh").unwrap();
        assert!(dir.path().join(SECRETS_FILE).exists());
    }
}
