//! Error taxonomy shared by every tokenkeeper operation.
//!
//! `AuthError` is `Clone` so that the outcome of the one-time config load can
//! be cached and handed out verbatim to every later caller. Sources that are
//! not `Clone` themselves are kept behind an `Arc`.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

pub type Result<T, E = AuthError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No credential file exists, so no system was ever logged in.
    #[error("not logged in. Try 'tokenkeeper login'")]
    NotAuthenticated,

    /// The credential file exists but holds no record for this system.
    #[error("unable to find system: {system}; run 'tokenkeeper login --system {system}' to configure a new system")]
    UnknownSystem { system: String },

    #[error("no system selected; pass --system or set TOKENKEEPER_SYSTEM")]
    NoSystemSelected,

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: Arc<serde_json::Error>,
    },

    #[error("failed to serialize credentials: {0}")]
    Serialize(Arc<serde_json::Error>),

    #[error("failed to renew access token for {system}: {reason}")]
    RefreshFailed { system: String, reason: String },

    #[error("login to {system} failed: {source}")]
    LoginFailed {
        system: String,
        #[source]
        source: Box<AuthError>,
    },

    #[error("could not start the authentication process: {0}")]
    StartFailed(String),

    #[error("device code expired before the login was completed")]
    AuthTimeout,

    #[error("login was denied: {0}")]
    AuthDenied(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("could not decode setting {key}: {reason}")]
    ConfigDecodeFailed { key: String, reason: String },

    #[error("invalid access token: {0}")]
    InvalidToken(String),

    #[error("secret store error: {0}")]
    SecretStore(String),

    #[error("http request failed: {0}")]
    Http(String),
}

impl AuthError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AuthError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        AuthError::Parse {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn login_failed(system: &str, source: AuthError) -> Self {
        AuthError::LoginFailed {
            system: system.to_string(),
            source: Box::new(source),
        }
    }

    /// True when the error, or the login failure wrapping it, came from the
    /// user interrupting the process.
    pub fn is_cancelled(&self) -> bool {
        match self {
            AuthError::Cancelled => true,
            AuthError::LoginFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        AuthError::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_seen_through_login_failure() {
        let err = AuthError::login_failed("prod", AuthError::Cancelled);
        assert!(err.is_cancelled());
        assert!(!AuthError::AuthTimeout.is_cancelled());
    }

    #[test]
    fn unknown_system_message_guides_to_login() {
        let err = AuthError::UnknownSystem {
            system: "prod".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("prod"));
        assert!(msg.contains("tokenkeeper login"));
    }
}
