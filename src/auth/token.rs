use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profile payload returned by the identity provider.
///
/// Only `username` is relied upon; everything else the backend sends is kept
/// verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Token payload returned by the token, refresh, and credential-login endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// An authenticated principal.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use langchef_auth::auth::{Session, TokenGrant};
///
/// let grant = TokenGrant {
///     access_token: "T1".to_string(),
///     token_type: "bearer".to_string(),
///     refresh_token: None,
///     expires_in: Some(3600),
///     user: None,
/// };
/// let now = Utc::now();
/// let session = Session::from_grant(grant, now, Duration::from_secs(86_400), None);
/// assert!(session.is_valid_at(now));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
    pub issued_at: DateTime<Utc>,
    pub last_refresh: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_address: Option<IpAddr>,
}

impl Session {
    /// Build a session from a freshly issued grant.
    ///
    /// `default_ttl` applies when the backend omits `expires_in`.
    pub fn from_grant(
        grant: TokenGrant,
        now: DateTime<Utc>,
        default_ttl: Duration,
        bound_address: Option<IpAddr>,
    ) -> Self {
        let expires_at = expiry(now, grant.expires_in, default_ttl);
        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            token_type: grant.token_type,
            expires_at,
            user: grant.user.unwrap_or_default(),
            issued_at: now,
            last_refresh: None,
            bound_address,
        }
    }

    /// Replace credentials in place after a successful refresh.
    ///
    /// The previous refresh token is kept when the backend does not rotate it,
    /// and the profile is only replaced when the response carries one.
    pub fn apply_refresh(&mut self, grant: TokenGrant, now: DateTime<Utc>, default_ttl: Duration) {
        self.expires_at = expiry(now, grant.expires_in, default_ttl);
        self.access_token = grant.access_token;
        self.token_type = grant.token_type;
        if grant.refresh_token.is_some() {
            self.refresh_token = grant.refresh_token;
        }
        if let Some(user) = grant.user {
            self.user = user;
        }
        self.last_refresh = Some(now);
    }

    /// A session is valid strictly before its expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Remaining lifetime, zero once expired.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

fn expiry(now: DateTime<Utc>, expires_in: Option<u64>, default_ttl: Duration) -> DateTime<Utc> {
    let ttl = expires_in.map(Duration::from_secs).unwrap_or(default_ttl);
    expires_after(now, ttl)
}

/// `now + ttl`, saturating at the latest representable instant.
pub(crate) fn expires_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
