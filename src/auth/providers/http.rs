use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::auth::backend::{IdentityProvider, TokenPoll};
use crate::auth::device_code::{ClientRegistration, DeviceAuthorization, DeviceAuthorizationState};
use crate::auth::error::AuthError;
use crate::auth::token::{TokenGrant, UserProfile};

const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// LangChef backend auth endpoints over HTTP.
///
/// # Example
/// ```no_run
/// use langchef_auth::auth::providers::http::HttpIdentityProvider;
///
/// let idp = HttpIdentityProvider::new("https://langchef.example.com/api")
///     .with_revoke_url("https://langchef.example.com/api/auth/logout");
/// ```
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    register_client_url: String,
    device_authorization_url: String,
    token_url: String,
    refresh_url: String,
    revoke_url: String,
    profile_url: String,
    credential_login_url: String,
}

impl Default for HttpIdentityProvider {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl HttpIdentityProvider {
    /// Derive every endpoint from the API base URL (`.../api`).
    pub fn new(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            register_client_url: format!("{base}/auth/register-client"),
            device_authorization_url: format!("{base}/auth/device-authorization"),
            token_url: format!("{base}/auth/token"),
            refresh_url: format!("{base}/auth/refresh"),
            revoke_url: format!("{base}/auth/revoke"),
            profile_url: format!("{base}/auth/me"),
            credential_login_url: format!("{base}/auth/aws-login"),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_register_client_url(mut self, url: impl Into<String>) -> Self {
        self.register_client_url = url.into();
        self
    }

    pub fn with_device_authorization_url(mut self, url: impl Into<String>) -> Self {
        self.device_authorization_url = url.into();
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn with_refresh_url(mut self, url: impl Into<String>) -> Self {
        self.refresh_url = url.into();
        self
    }

    pub fn with_revoke_url(mut self, url: impl Into<String>) -> Self {
        self.revoke_url = url.into();
        self
    }

    pub fn with_profile_url(mut self, url: impl Into<String>) -> Self {
        self.profile_url = url.into();
        self
    }

    pub fn with_credential_login_url(mut self, url: impl Into<String>) -> Self {
        self.credential_login_url = url.into();
        self
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn register_client(&self) -> Result<ClientRegistration, AuthError> {
        let resp = self
            .client
            .post(&self.register_client_url)
            .header("Accept", "application/json")
            .send()
            .await?;
        let payload: RegisterClientResponse = json_or_error(resp, "Client registration").await?;
        let expires_at = payload.expiration.and_then(|value| match parse_epoch(&value) {
            Ok(at) => Some(at),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unparseable client registration expiration");
                None
            }
        });
        Ok(ClientRegistration {
            client_id: payload.client_id,
            client_secret: payload.client_secret,
            expires_at,
        })
    }

    async fn start_device_authorization(
        &self,
        client: &ClientRegistration,
    ) -> Result<DeviceAuthorization, AuthError> {
        let resp = self
            .client
            .post(&self.device_authorization_url)
            .json(&ClientCredentials {
                client_id: &client.client_id,
                client_secret: &client.client_secret,
            })
            .send()
            .await?;
        json_or_error(resp, "Device authorization").await
    }

    async fn create_token(&self, state: &DeviceAuthorizationState) -> Result<TokenPoll, AuthError> {
        let resp = self
            .client
            .post(&self.token_url)
            .json(&CreateTokenRequest {
                client_id: &state.client_id,
                client_secret: &state.client_secret,
                device_code: &state.device_code,
            })
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            let grant: TokenGrant = resp.json().await?;
            return Ok(TokenPoll::Authorized(grant));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(TokenPoll::SlowDown);
        }
        let body = resp.text().await.unwrap_or_default();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            if let Some(code) = extract_error_code(&body) {
                return match DeviceGrantError::from_str(&code) {
                    Ok(DeviceGrantError::AuthorizationPending) => Ok(TokenPoll::Pending),
                    Ok(DeviceGrantError::SlowDown) => Ok(TokenPoll::SlowDown),
                    Ok(DeviceGrantError::ExpiredToken) => Ok(TokenPoll::Expired),
                    Ok(DeviceGrantError::AccessDenied) => Ok(TokenPoll::Denied),
                    Err(_) => Err(AuthError::InvalidResponse(format!(
                        "Device token error: {code}"
                    ))),
                };
            }
        }
        Err(AuthError::InvalidResponse(format!(
            "Device token request failed with status {status}"
        )))
    }

    async fn refresh(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<TokenGrant, AuthError> {
        let resp = self
            .client
            .post(&self.refresh_url)
            .bearer_auth(access_token)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::ExpiredOrInvalidGrant);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AuthError::RateLimited {
                retry_after_ms: retry_after_ms(resp.headers()),
            });
        }
        json_or_error(resp, "Refresh").await
    }

    async fn revoke(&self, access_token: &str) -> Result<(), AuthError> {
        let resp = self
            .client
            .post(&self.revoke_url)
            .bearer_auth(access_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AuthError::InvalidResponse(format!(
                "Revoke failed with status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        let resp = self
            .client
            .get(&self.profile_url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(AuthError::Unauthorized);
        }
        json_or_error(resp, "Profile").await
    }

    async fn credential_login(&self) -> Result<TokenGrant, AuthError> {
        let resp = self
            .client
            .post(&self.credential_login_url)
            .header("Accept", "application/json")
            .send()
            .await?;
        if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN {
            return Err(AuthError::AccessDenied);
        }
        json_or_error(resp, "Credential login").await
    }
}

/// RFC 8628 §3.5 error codes the backend relays in `detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
enum DeviceGrantError {
    AuthorizationPending,
    SlowDown,
    ExpiredToken,
    AccessDenied,
}

#[derive(Debug, Serialize)]
struct ClientCredentials<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    device_code: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RegisterClientResponse {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    expiration: Option<serde_json::Value>,
}

async fn json_or_error<T: serde::de::DeserializeOwned>(
    resp: Response,
    what: &str,
) -> Result<T, AuthError> {
    if !resp.status().is_success() {
        return Err(AuthError::InvalidResponse(format!(
            "{what} request failed with status {}",
            resp.status()
        )));
    }
    Ok(resp.json().await?)
}

/// Pull the OAuth error code out of `{"detail": ".."}` or `{"error": ".."}`.
fn extract_error_code(body: &str) -> Option<String> {
    let value = serde_json::from_str::<serde_json::Value>(body).ok()?;
    ["detail", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .map(|code| code.trim().to_string())
}

fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}

/// Parse an epoch timestamp sent as a number or numeric string, in seconds
/// or milliseconds.
fn parse_epoch(value: &serde_json::Value) -> Result<DateTime<Utc>, AuthError> {
    let raw = match value {
        serde_json::Value::Number(num) => num.as_i64(),
        serde_json::Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| AuthError::InvalidResponse(format!("Invalid expiration: {value}")))?;
    let secs = if raw > 10_000_000_000 { raw / 1000 } else { raw };
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| AuthError::InvalidResponse(format!("Expiration out of range: {raw}")))
}
