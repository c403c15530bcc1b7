//! Component C: a three-state circuit breaker, one per provider
//! (spec.md §4.3).
//!
//! This has no direct analogue in the teacher crate — `prompt-scaler`
//! retries transient failures (see [`crate::retry`]) but never gives up
//! on a provider for a cooldown period. The state machine below is new,
//! but it follows the same "monotonic clock, plain struct, no hidden
//! global state" style the teacher uses for [`crate::rate_limit`].

use std::time::{Duration, Instant};

use crate::prelude::*;

/// The three breaker states from spec.md §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Whether a call was allowed to proceed past the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allow {
    Allowed,
    Rejected,
}

/// Per-provider breaker state (spec.md §3, §4.3).
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    /// Defaults per spec.md §6: `threshold = 3`, `recovery_timeout = 30s`.
    pub fn new() -> Self {
        Self::with_params(3, Duration::from_millis(30_000))
    }

    pub fn with_params(threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            threshold,
            recovery_timeout,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Check whether a call is currently allowed. In the `open` state,
    /// this may transition the breaker to `half_open` (spec.md §4.3,
    /// row "open, allow check, recovery elapsed").
    pub fn allow(&mut self) -> Allow {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Allow::Allowed,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_timeout {
                    self.transition_to(CircuitState::HalfOpen);
                    Allow::Allowed
                } else {
                    Allow::Rejected
                }
            }
        }
    }

    /// Record a successful call (spec.md §4.3).
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                self.consecutive_failures = 0;
                self.transition_to(CircuitState::Closed);
            }
            CircuitState::Open => {
                // A success can't be observed while open; callers always
                // check `allow()` first. Treat defensively as closed.
                self.consecutive_failures = 0;
                self.transition_to(CircuitState::Closed);
            }
        }
    }

    /// Record a failed call (spec.md §4.3).
    pub fn record_failure(&mut self) {
        self.last_failure = Some(Instant::now());
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.threshold {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open);
            }
            CircuitState::Open => {
                // Already open; stays open, failure count isn't meaningful.
            }
        }
    }

    fn transition_to(&mut self, to: CircuitState) {
        if to != self.state {
            warn!(from = ?self.state, to = ?to, "circuit breaker transition");
            self.state = to;
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_success_resets_failures() {
        let mut cb = CircuitBreaker::with_params(3, Duration::from_millis(1));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.consecutive_failures(), 2);
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_opens_at_threshold() {
        let mut cb = CircuitBreaker::with_params(3, Duration::from_millis(30_000));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_open_rejects_until_recovery_timeout() {
        let mut cb = CircuitBreaker::with_params(1, Duration::from_millis(30));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.allow(), Allow::Rejected);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cb.allow(), Allow::Allowed);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_success_closes() {
        let mut cb = CircuitBreaker::with_params(1, Duration::from_millis(1));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.allow(), Allow::Allowed);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut cb = CircuitBreaker::with_params(1, Duration::from_millis(1));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.allow(), Allow::Allowed);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
