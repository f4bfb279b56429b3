//! Identity provider seam used by the controller.

use async_trait::async_trait;

use super::device_code::{ClientRegistration, DeviceAuthorization, DeviceAuthorizationState};
use super::error::AuthError;
use super::token::{TokenGrant, UserProfile};

/// Outcome of one token-endpoint poll, decoded once at the provider boundary.
///
/// Transport failures and unrecognized responses are returned as `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenPoll {
    Authorized(TokenGrant),
    Pending,
    SlowDown,
    Expired,
    Denied,
}

/// Remote identity provider consumed by [`super::AuthController`].
///
/// [`super::providers::http::HttpIdentityProvider`] talks to the LangChef
/// backend; tests substitute scripted implementations.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register an ephemeral client for one login attempt.
    async fn register_client(&self) -> Result<ClientRegistration, AuthError>;

    /// Request a device code and user code.
    async fn start_device_authorization(
        &self,
        client: &ClientRegistration,
    ) -> Result<DeviceAuthorization, AuthError>;

    /// Poll the token endpoint for an in-flight handshake.
    async fn create_token(&self, state: &DeviceAuthorizationState) -> Result<TokenPoll, AuthError>;

    /// Mint a new access token.
    ///
    /// A rejected grant is reported as [`AuthError::ExpiredOrInvalidGrant`].
    async fn refresh(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<TokenGrant, AuthError>;

    /// Revoke an access token.
    async fn revoke(&self, access_token: &str) -> Result<(), AuthError>;

    /// Fetch the current user's profile.
    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, AuthError>;

    /// Exchange the backend's configured AWS credentials for a session.
    async fn credential_login(&self) -> Result<TokenGrant, AuthError>;
}
