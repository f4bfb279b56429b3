//! Single-slot cancellable timers for the controller's background tasks.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Holds the cancellation token of at most one outstanding task.
///
/// Arming the slot cancels whatever was armed before, so a slot never has two
/// live timers.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    current: Mutex<Option<CancellationToken>>,
}

impl TimerSlot {
    /// Cancel the previous token, if any, and install a fresh one.
    pub(crate) fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.lock().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    pub(crate) fn cancel(&self) {
        if let Some(token) = self.lock().take() {
            token.cancel();
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    fn lock(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sleep for `duration` unless `token` fires first.
///
/// Returns `true` when the full duration elapsed.
pub(crate) async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
