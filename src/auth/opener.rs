//! Directing the user to the verification page.

use super::error::AuthError;

/// Opens the verification URI in a place the user can act on it.
///
/// A failure is never fatal: the controller falls back to publishing the
/// user code and plain verification URI for manual entry.
pub trait VerificationOpener: Send + Sync {
    fn open(&self, uri: &str) -> Result<(), AuthError>;
}

/// Opener for headless environments; always defers to manual entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualEntry;

impl VerificationOpener for ManualEntry {
    fn open(&self, _uri: &str) -> Result<(), AuthError> {
        Err(AuthError::Browser("no browser available".to_string()))
    }
}

/// Opens the verification URI in the system's default browser.
#[cfg(feature = "cli")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

#[cfg(feature = "cli")]
impl VerificationOpener for SystemBrowser {
    fn open(&self, uri: &str) -> Result<(), AuthError> {
        open::that(uri).map_err(|e| AuthError::Browser(e.to_string()))
    }
}
