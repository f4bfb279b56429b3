//! Session refresh timing.

use std::time::Duration;

/// Proactive refresh, retry, and liveness settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Attempts for a silent (background) refresh, including the first.
    pub max_attempts: u32,
    /// Fixed delay between silent refresh attempts.
    pub retry_delay: Duration,
    /// Refresh no later than this long before expiry.
    pub lead: Duration,
    /// Lower bound on the scheduled delay so very short sessions do not
    /// refresh in a tight loop.
    pub min_delay: Duration,
    /// How often the liveness check verifies the session has not expired.
    pub liveness_interval: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(60),
            lead: Duration::from_secs(30 * 60),
            min_delay: Duration::from_secs(30),
            liveness_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl RefreshPolicy {
    /// Delay until the next proactive refresh for a session with `ttl` left.
    ///
    /// Refreshes at the halfway point or `lead` before expiry, whichever comes
    /// first, but never sooner than `min(min_delay, ttl / 2)`.
    pub fn refresh_delay(&self, ttl: Duration) -> Duration {
        let halfway = ttl / 2;
        let before_expiry = ttl.saturating_sub(self.lead);
        let target = halfway.min(before_expiry);
        target.max(self.min_delay.min(halfway))
    }
}
