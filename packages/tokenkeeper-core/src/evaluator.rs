//! Decides what a cached access token is good for.

use chrono::{DateTime, Duration, Utc};

use crate::config::SystemRecord;

const ACCESS_TOKEN_EXPIRY_THRESHOLD_MINUTES: i64 = 5;

/// Margin subtracted from a token's lifetime so it does not expire between
/// the check and its use.
pub fn expiry_threshold() -> Duration {
    Duration::minutes(ACCESS_TOKEN_EXPIRY_THRESHOLD_MINUTES)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAction {
    /// The cached token can be used as is.
    UseAsIs,
    /// Scopes match but the token is expired or about to expire.
    Refresh,
    /// No token, or it was granted for a different set of scopes.
    FullLogin,
}

/// Decide how to proceed with `record` given the scopes the tool needs now.
///
/// Scope changes are checked before expiry: a token granted for other scopes
/// needs a new grant no matter how long it is still valid.
pub fn evaluate(
    record: &SystemRecord,
    required_scopes: Option<&[String]>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> TokenAction {
    if record.access_token.is_empty()
        || scopes_changed(record.scopes.as_deref(), required_scopes)
    {
        return TokenAction::FullLogin;
    }
    if is_expired(record.expires_at, now, threshold) {
        return TokenAction::Refresh;
    }
    TokenAction::UseAsIs
}

/// True if `now + threshold` is after `expires_at`.
pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> bool {
    now + threshold > expires_at
}

/// Expiry of a token issued at `now` with a lifetime of `expires_in_secs`.
///
/// `None` for a negative lifetime or one that does not fit a timestamp.
pub fn expires_at_after(now: DateTime<Utc>, expires_in_secs: i64) -> Option<DateTime<Utc>> {
    if expires_in_secs < 0 {
        return None;
    }
    Duration::try_seconds(expires_in_secs).and_then(|lifetime| now.checked_add_signed(lifetime))
}

/// Compare granted and required scopes as sets.
///
/// An absent list never equals a present one, even an empty one.
pub fn scopes_changed(granted: Option<&[String]>, required: Option<&[String]>) -> bool {
    let (granted, required) = match (granted, required) {
        (None, None) => return false,
        (Some(g), Some(r)) => (g, r),
        _ => return true,
    };
    if granted.len() != required.len() {
        return true;
    }

    let mut granted = granted.to_vec();
    let mut required = required.to_vec();
    granted.sort();
    required.sort();
    granted != required
}
