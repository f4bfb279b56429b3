//! Authorized HTTP client for LangChef API resources.

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::AuthController;
use crate::error::{ClientError, Result};

/// HTTP client that attaches the session's bearer token to every request.
///
/// A request rejected with 401 triggers one session refresh (shared with any
/// refresh already in flight) and is retried exactly once with the new token.
///
/// # Example
///
/// ```ignore
/// let api = ApiClient::new(controller.clone())?;
/// let prompts: serde_json::Value = api.get_json("/prompts").await?;
/// ```
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: AuthController,
}

impl ApiClient {
    /// Client for the API base URL configured on `auth`.
    pub fn new(auth: AuthController) -> Result<Self> {
        let http = auth.config().http_client()?;
        let base_url = auth.config().api_base_url.trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Absolute URL for an API path such as `/prompts`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request built by `build`, recovering once from a 401.
    ///
    /// `build` is called again for the retry, so it must produce the same
    /// request each time. Non-401 responses are returned as-is.
    pub async fn execute<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let token = self.auth.access_token().ok_or(ClientError::NotLoggedIn)?;
        let response = build(&self.http).bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!(url = %response.url(), "Request unauthorized; renewing session");
        let fresh = self
            .auth
            .recover_unauthorized(&token)
            .await
            .ok_or(ClientError::Unauthorized)?;
        let retry = build(&self.http).bearer_auth(&fresh).send().await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(url = %retry.url(), "Request still unauthorized after renewing session");
            return Err(ClientError::Unauthorized);
        }
        Ok(retry)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self.execute(|http| http.get(&url)).await?;
        decode(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let response = self.execute(|http| http.post(&url).json(body)).await?;
        decode(response).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let response = self.execute(|http| http.put(&url).json(body)).await?;
        decode(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        let response = self.execute(|http| http.delete(&url)).await?;
        ensure_success(response).await.map(|_| ())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = ensure_success(response).await?;
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::api(status.as_u16(), error_message(&body)))
}

/// Prefer the backend's `detail` field over the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| match value.get("detail") {
            Some(serde_json::Value::String(detail)) => Some(detail.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .unwrap_or_else(|| body.to_string())
}
