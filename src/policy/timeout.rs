use std::time::Duration;

use crate::context::RetryContext;

use super::RetryPolicy;

/// Retry while the episode is younger than `timeout`.
///
/// Elapsed time is measured on the monotonic clock from the moment the
/// episode's context was created, so wall-clock adjustments have no effect.
/// The check happens after each failure; an attempt already in flight is not
/// interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    timeout: Duration,
}

impl TimeoutPolicy {
    /// Default time budget.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

    /// Retry for at most `timeout` after the episode starts.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The time budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

impl<E> RetryPolicy<E> for TimeoutPolicy {
    fn can_retry(&self, ctx: &RetryContext<E>) -> bool {
        ctx.elapsed() < self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::failed_context;

    #[test]
    fn test_within_budget() {
        let policy = TimeoutPolicy::new(Duration::from_secs(60));
        assert!(policy.can_retry(&failed_context(10, ())));
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = TimeoutPolicy::new(Duration::ZERO);
        assert!(!policy.can_retry(&failed_context(1, ())));
    }

    #[test]
    fn test_budget_expires() {
        let policy = TimeoutPolicy::new(Duration::from_millis(20));
        let ctx = failed_context(1, ());
        std::thread::sleep(Duration::from_millis(40));
        assert!(!policy.can_retry(&ctx));
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(TimeoutPolicy::default().timeout(), Duration::from_secs(1));
    }
}
