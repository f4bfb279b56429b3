use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::token::expires_after;

/// Ephemeral client credentials registered for one login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Device authorization response from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// In-flight device-grant handshake.
///
/// Persisted after every mutation so a restarted client resumes polling the
/// same device code with the backed-off interval intact.
///
/// # Example
/// ```
/// use chrono::Utc;
/// use langchef_auth::auth::{ClientRegistration, DeviceAuthorization, DeviceAuthorizationState};
///
/// let state = DeviceAuthorizationState::new(
///     ClientRegistration {
///         client_id: "client".to_string(),
///         client_secret: "secret".to_string(),
///         expires_at: None,
///     },
///     DeviceAuthorization {
///         device_code: "D1".to_string(),
///         user_code: "ABCD-EFGH".to_string(),
///         verification_uri: "https://device.sso.us-east-1.amazonaws.com/".to_string(),
///         verification_uri_complete: None,
///         expires_in: 600,
///         interval: 5,
///     },
///     Utc::now(),
/// );
/// assert_eq!(state.interval().as_secs(), 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAuthorizationState {
    pub attempt_id: Uuid,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<DateTime<Utc>>,
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub interval_ms: u64,
    #[serde(default)]
    pub consecutive_pending: u32,
    #[serde(default)]
    pub consecutive_errors: u32,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DeviceAuthorizationState {
    pub fn new(
        registration: ClientRegistration,
        authorization: DeviceAuthorization,
        now: DateTime<Utc>,
    ) -> Self {
        let verification_uri_complete = authorization
            .verification_uri_complete
            .unwrap_or_else(|| authorization.verification_uri.clone());
        Self {
            attempt_id: Uuid::new_v4(),
            client_id: registration.client_id,
            client_secret: registration.client_secret,
            client_secret_expires_at: registration.expires_at,
            device_code: authorization.device_code,
            user_code: authorization.user_code,
            verification_uri: authorization.verification_uri,
            verification_uri_complete,
            interval_ms: authorization.interval.max(1).saturating_mul(1000),
            consecutive_pending: 0,
            consecutive_errors: 0,
            started_at: now,
            expires_at: expires_after(now, Duration::from_secs(authorization.expires_in)),
        }
    }

    /// Current poll interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// The identity provider no longer accepts this device code.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// The handshake has run longer than the client-side ceiling.
    pub fn exceeded_ceiling(&self, now: DateTime<Utc>, ceiling: Duration) -> bool {
        let elapsed = (now - self.started_at).to_std().unwrap_or(Duration::ZERO);
        elapsed > ceiling
    }

    /// The registered client credentials are no longer accepted.
    pub fn client_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.client_secret_expires_at.is_some_and(|at| now >= at)
    }

    /// Whether a persisted snapshot can still be resumed.
    pub fn is_resumable_at(&self, now: DateTime<Utc>, ceiling: Duration) -> bool {
        !self.is_expired_at(now)
            && !self.exceeded_ceiling(now, ceiling)
            && !self.client_expired_at(now)
    }
}
