//! Device-code sign-in and session lifecycle.

pub mod backend;
pub mod backoff;
pub mod binding;
pub mod controller;
pub mod device_code;
pub mod error;
pub mod opener;
pub mod providers;
pub mod schedule;
pub mod store;
mod timer;
pub mod token;

pub use backend::{IdentityProvider, TokenPoll};
pub use backoff::{BackoffPolicy, Escalation, PollSignal};
pub use binding::{AddressBinding, AddressSource};
pub use controller::{
    AuthController, AuthControllerBuilder, AuthSnapshot, AuthStatus, PendingVerification,
};
pub use device_code::{ClientRegistration, DeviceAuthorization, DeviceAuthorizationState};
pub use error::{AuthError, AuthFailure};
#[cfg(feature = "cli")]
pub use opener::SystemBrowser;
pub use opener::{ManualEntry, VerificationOpener};
pub use providers::http::HttpIdentityProvider;
pub use schedule::RefreshPolicy;
pub use store::{FileSessionStore, SessionStore, StoreConfig};
pub use token::{Session, TokenGrant, UserProfile};
