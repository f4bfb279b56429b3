//! LangChef client authentication.
//!
//! Signs in to LangChef through the AWS SSO device-authorization flow
//! (RFC 8628), keeps the resulting session fresh, and provides an HTTP client
//! that attaches the session token to API requests.
//!
//! # Quick Start
//!
//! ```no_run
//! use langchef_auth::prelude::*;
//!
//! # async fn example() -> langchef_auth::error::Result<()> {
//! let controller = AuthController::from_config(AuthConfig::from_env())?.build();
//! if controller.init().await != AuthStatus::Authenticated {
//!     controller.login().await?;
//! }
//! let api = ApiClient::new(controller.clone())?;
//! let me: serde_json::Value = api.get_json("/auth/me").await?;
//! println!("{me}");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod prelude;

#[cfg(feature = "cli")]
pub mod cli;
