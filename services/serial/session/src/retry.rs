//! Reconnect gating for failure streaks.

use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of a failure consultation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Attempt another reconnect
    Retry,
    /// The streak outlived its window; tear the session down
    GiveUp,
}

/// Caps the total duration of a failure streak rather than its attempt count.
#[derive(Debug)]
pub struct RetryGate {
    /// Maximum streak duration; zero means unbounded
    timeout: Duration,
    /// Timestamp of the first failure in the current streak
    window_start: Option<Instant>,
}

impl RetryGate {
    /// Create a gate with the given streak timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            window_start: None,
        }
    }

    /// Current streak timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Replace the streak timeout. The running window is kept.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Start of the active streak, if any
    pub fn window_start(&self) -> Option<Instant> {
        self.window_start
    }

    /// Record a failure at `now`.
    ///
    /// `target_present` is false once an explicit disconnect cleared the
    /// target address, which ends any streak after its first failure.
    pub fn on_failure(&mut self, now: Instant, target_present: bool) -> RetryDecision {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            debug!("Retry streak started");
            return RetryDecision::Retry;
        };

        if !target_present {
            debug!("Target address cleared, giving up");
            return RetryDecision::GiveUp;
        }

        let elapsed = now.saturating_duration_since(start);
        if !self.timeout.is_zero() && elapsed >= self.timeout {
            warn!(
                "Retry window of {:?} exhausted after {:?}",
                self.timeout, elapsed
            );
            return RetryDecision::GiveUp;
        }

        debug!("Retrying, {:?} into the streak", elapsed);
        RetryDecision::Retry
    }

    /// End the current streak
    pub fn reset(&mut self) {
        if self.window_start.take().is_some() {
            debug!("Retry streak cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_failure_opens_window() {
        let mut gate = RetryGate::new(Duration::from_secs(10));
        let t0 = Instant::now();

        assert_eq!(gate.on_failure(t0, true), RetryDecision::Retry);
        assert_eq!(gate.window_start(), Some(t0));

        // Later failures do not move the window start
        assert_eq!(gate.on_failure(t0 + Duration::from_secs(3), true), RetryDecision::Retry);
        assert_eq!(gate.window_start(), Some(t0));
    }

    #[test]
    fn test_retry_bound() {
        let timeout = Duration::from_millis(500);
        let mut gate = RetryGate::new(timeout);
        let t0 = Instant::now();

        assert_eq!(gate.on_failure(t0, true), RetryDecision::Retry);
        assert_eq!(gate.on_failure(t0 + Duration::from_millis(100), true), RetryDecision::Retry);
        assert_eq!(gate.on_failure(t0 + Duration::from_millis(499), true), RetryDecision::Retry);
        assert_eq!(gate.on_failure(t0 + timeout, true), RetryDecision::GiveUp);
        assert_eq!(gate.on_failure(t0 + Duration::from_secs(3), true), RetryDecision::GiveUp);
    }

    #[test]
    fn test_zero_timeout_is_unbounded() {
        let mut gate = RetryGate::new(Duration::ZERO);
        let t0 = Instant::now();

        assert_eq!(gate.on_failure(t0, true), RetryDecision::Retry);
        for hours in [1, 24, 24 * 365] {
            let now = t0 + Duration::from_secs(3600 * hours);
            assert_eq!(gate.on_failure(now, true), RetryDecision::Retry);
        }

        // Until the target address goes away
        assert_eq!(gate.on_failure(t0, false), RetryDecision::GiveUp);
    }

    #[test]
    fn test_cleared_target_gives_up() {
        let mut gate = RetryGate::new(Duration::from_secs(60));
        let t0 = Instant::now();

        assert_eq!(gate.on_failure(t0, true), RetryDecision::Retry);
        assert_eq!(gate.on_failure(t0, false), RetryDecision::GiveUp);
    }

    #[test]
    fn test_reset_starts_new_streak() {
        let mut gate = RetryGate::new(Duration::from_millis(100));
        let t0 = Instant::now();

        gate.on_failure(t0, true);
        gate.reset();
        assert_eq!(gate.window_start(), None);

        let t1 = t0 + Duration::from_secs(5);
        assert_eq!(gate.on_failure(t1, true), RetryDecision::Retry);
        assert_eq!(gate.window_start(), Some(t1));
    }
}
