//! Poll-interval policy for the device-code handshake.
//!
//! Every non-terminal poll response feeds one [`PollSignal`] into
//! [`BackoffPolicy::apply`]. Pending responses and transport errors escalate
//! the same way (grow by a factor once a consecutive-count threshold is
//! reached, up to a ceiling), while `slow_down` applies the RFC 8628 step.
//! The interval never decreases.

use std::time::Duration;

use super::device_code::DeviceAuthorizationState;

/// Non-terminal outcome of a poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSignal {
    /// `authorization_pending`.
    Pending,
    /// `slow_down` or HTTP 429.
    SlowDown,
    /// Network failure or an unrecognized response.
    TransportError,
}

/// Consecutive-signal escalation: once `threshold` signals in a row have been
/// seen, each further one multiplies the interval by `factor`, capped at
/// `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Escalation {
    pub threshold: u32,
    pub factor: f64,
    pub ceiling: Duration,
}

/// Interval policy for the polling loop.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub pending: Escalation,
    pub errors: Escalation,
    /// Minimum additive increase on `slow_down`.
    pub slow_down_step: Duration,
    /// Multiplicative increase on `slow_down`; the larger of the two wins.
    pub slow_down_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            pending: Escalation {
                threshold: 3,
                factor: 1.2,
                ceiling: Duration::from_secs(15),
            },
            errors: Escalation {
                threshold: 3,
                factor: 2.0,
                ceiling: Duration::from_secs(30),
            },
            slow_down_step: Duration::from_secs(5),
            slow_down_factor: 1.5,
        }
    }
}

impl BackoffPolicy {
    /// Update counters and interval for one signal.
    ///
    /// Returns `true` when the interval changed.
    pub fn apply(&self, state: &mut DeviceAuthorizationState, signal: PollSignal) -> bool {
        let before = state.interval_ms;
        match signal {
            PollSignal::Pending => {
                state.consecutive_pending = state.consecutive_pending.saturating_add(1);
                state.consecutive_errors = 0;
                if state.consecutive_pending >= self.pending.threshold {
                    state.interval_ms = escalate(state.interval_ms, &self.pending);
                }
            }
            PollSignal::TransportError => {
                state.consecutive_errors = state.consecutive_errors.saturating_add(1);
                state.consecutive_pending = 0;
                if state.consecutive_errors >= self.errors.threshold {
                    state.interval_ms = escalate(state.interval_ms, &self.errors);
                }
            }
            PollSignal::SlowDown => {
                state.consecutive_pending = 0;
                state.consecutive_errors = 0;
                let stepped = state.interval_ms.saturating_add(millis(self.slow_down_step));
                let scaled = scale(state.interval_ms, self.slow_down_factor);
                state.interval_ms = stepped.max(scaled);
            }
        }
        state.interval_ms != before
    }
}

fn escalate(current_ms: u64, escalation: &Escalation) -> u64 {
    let grown = scale(current_ms, escalation.factor).min(millis(escalation.ceiling));
    current_ms.max(grown)
}

fn scale(value_ms: u64, factor: f64) -> u64 {
    (value_ms as f64 * factor).round() as u64
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
