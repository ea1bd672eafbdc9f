//! tokenkeeper Core Library
//!
//! This crate decides, for a named system, whether a cached access token can
//! be used as is, must be refreshed, or needs a new interactive login:
//! - Credential file persistence (one JSON file mapping systems to tokens)
//! - Token evaluation (scope changes and expiry)
//! - OAuth device flow login and refresh-token renewal
//! - Refresh token storage (keyring with file fallback)
//!
//! # Features
//!
//! - `keyring-storage` (default): Use platform keyring for refresh tokens
//! - `file-storage`: Use file-based refresh token storage (for headless Linux)
//! - `browser`: Automatically open browser during OAuth device flow
//!
//! # Example
//!
//! ```no_run
//! use tokenkeeper_core::{InterruptGuard, Session, settings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let path = settings::default_credentials_path().expect("no config directory");
//!     let session = Session::open(path, Some("prod".to_string()))?;
//!
//!     let interrupt = InterruptGuard::on_interrupt();
//!     let record = session.prepare_system(interrupt.token()).await?;
//!     println!("token expires at {}", record.expires_at);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod device_flow;
pub mod error;
pub mod evaluator;
pub mod login;
pub mod refresh;
pub mod scopes;
pub mod secrets;
pub mod session;
pub mod settings;
pub mod token;

// Re-export commonly used types
pub use cancel::InterruptGuard;
pub use config::{Config, ConfigStore, FileConfigStore, SystemRecord};
pub use device_flow::{DeviceAuthorization, DeviceFlow, HttpDeviceFlow, TokenGrant};
pub use error::{AuthError, Result};
pub use evaluator::{TokenAction, evaluate};
pub use login::{BrowserOpener, LoginEvent, LoginObserver, LoginRunner};
pub use refresh::{HttpTokenRefresher, RefreshedToken, TokenRefresher};
pub use scopes::{ScopeProvider, StaticScopes};
pub use secrets::{SecretStore, SECRETS_NAMESPACE};
pub use session::{Collaborators, MissingRecordPolicy, Session};
pub use settings::{AuthSettings, ConfigSource};
pub use tokio_util::sync::CancellationToken;
