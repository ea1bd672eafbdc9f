//! Permission scopes the tool currently needs.
//!
//! Changing this list in a new release makes every cached token stale and
//! sends users through a fresh login.

/// Scopes requested by this release of tokenkeeper.
pub const DEFAULT_REQUIRED_SCOPES: &[&str] = &["openid", "offline_access"];

pub trait ScopeProvider: Send + Sync {
    fn required_scopes(&self) -> Vec<String>;
}

/// Provider with a fixed scope list.
#[derive(Debug, Clone)]
pub struct StaticScopes(Vec<String>);

impl StaticScopes {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(scopes.into_iter().map(Into::into).collect())
    }
}

impl Default for StaticScopes {
    fn default() -> Self {
        Self::new(DEFAULT_REQUIRED_SCOPES.iter().copied())
    }
}

impl ScopeProvider for StaticScopes {
    fn required_scopes(&self) -> Vec<String> {
        self.0.clone()
    }
}
