use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// Normalized authentication errors raised by the identity provider client,
/// the session store, and the controller.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Access denied")]
    AccessDenied,
    #[error("Expired or invalid grant")]
    ExpiredOrInvalidGrant,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Rate limited")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Could not open verification page: {0}")]
    Browser(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// User-facing failure published alongside the auth status.
///
/// Transient conditions (pending authorization, slow-down requests, network
/// blips) never surface here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailure {
    #[strum(to_string = "The sign-in code expired. Start the login again.")]
    SessionExpired,
    #[strum(to_string = "Your session has expired. Please sign in again.")]
    SessionLapsed,
    #[strum(to_string = "Sign-in was denied.")]
    AccessDenied,
    #[strum(to_string = "Sign-in was not completed in time.")]
    TimedOut,
    #[strum(to_string = "Your session could not be renewed. Please sign in again.")]
    RefreshFailed,
    #[strum(to_string = "The sign-in service is unavailable.")]
    Unavailable,
}

impl From<&AuthError> for AuthFailure {
    fn from(error: &AuthError) -> Self {
        match error {
            AuthError::AccessDenied => Self::AccessDenied,
            AuthError::ExpiredOrInvalidGrant | AuthError::Unauthorized => Self::RefreshFailed,
            _ => Self::Unavailable,
        }
    }
}
