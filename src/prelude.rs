//! Convenience re-exports for common use.

pub use crate::api::ApiClient;
pub use crate::auth::{
    AuthController, AuthError, AuthFailure, AuthSnapshot, AuthStatus, PendingVerification,
    Session, UserProfile,
};
pub use crate::config::AuthConfig;
pub use crate::error::{ClientError, Result};
