use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::context::RetryContext;

use super::RetryPolicy;

/// Stops calling a failing operation for a while once its delegate gives up.
///
/// The breaker wraps a delegate policy and keeps one circuit, shared by every
/// episode run under it.
///
/// While the circuit is closed, retries follow the delegate. When the
/// delegate gives up on an episode younger than `open_timeout`, the circuit
/// opens and keeps the failure that tripped it. Exhaustion that took longer
/// than that means failures are sparse, and the circuit stays closed.
///
/// While the circuit is open, nothing is retried and the engine ends each
/// episode before invoking the operation, as though the tripping failure had
/// happened again: the recovery runs if there is one, otherwise that failure
/// is returned. Once the circuit has been open for `reset_timeout`, the next
/// episode closes it and calls the operation again.
///
/// Time is read from the tokio clock.
///
/// # Examples
///
/// ```rust
/// use secondwind::policy::{CircuitBreakerPolicy, MaxAttemptsPolicy};
/// use secondwind::RetryTemplate;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let breaker = Arc::new(
///     CircuitBreakerPolicy::new(MaxAttemptsPolicy::new(2))
///         .with_reset_timeout(Duration::from_secs(30)),
/// );
/// let template = RetryTemplate::<String>::builder()
///     .shared_retry_policy(breaker.clone())
///     .build();
///
/// let _ = template.execute(|_ctx| async { Err::<(), _>("down".to_string()) }).await;
/// assert!(breaker.is_open());
///
/// let fallback = template
///     .execute_with_recovery(
///         |_ctx| async { Ok("live".to_string()) },
///         |_ctx| async { Ok("cached".to_string()) },
///     )
///     .await;
/// assert_eq!(fallback.unwrap(), "cached");
/// # });
/// ```
pub struct CircuitBreakerPolicy<E> {
    delegate: Arc<dyn RetryPolicy<E>>,
    open_timeout: Duration,
    reset_timeout: Duration,
    circuit: Mutex<Circuit<E>>,
}

enum Circuit<E> {
    Closed,
    Open { since: Instant, failure: E },
}

impl<E> CircuitBreakerPolicy<E> {
    /// Default window in which the delegate must give up to open the circuit.
    pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_millis(5000);

    /// Default time the circuit stays open.
    pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_millis(20000);

    /// Closed breaker around `delegate`.
    pub fn new(delegate: impl RetryPolicy<E> + 'static) -> Self {
        Self::shared(Arc::new(delegate))
    }

    /// Closed breaker around a delegate that is already shared.
    pub fn shared(delegate: Arc<dyn RetryPolicy<E>>) -> Self {
        Self {
            delegate,
            open_timeout: Self::DEFAULT_OPEN_TIMEOUT,
            reset_timeout: Self::DEFAULT_RESET_TIMEOUT,
            circuit: Mutex::new(Circuit::Closed),
        }
    }

    /// Set the window in which exhaustion opens the circuit.
    pub fn with_open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self
    }

    /// Set how long the circuit stays open.
    pub fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    /// The window in which exhaustion opens the circuit.
    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    /// How long the circuit stays open.
    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Whether the circuit is open and its reset timeout has not passed.
    pub fn is_open(&self) -> bool {
        match &*self.lock() {
            Circuit::Open { since, .. } => since.elapsed() < self.reset_timeout,
            Circuit::Closed => false,
        }
    }

    /// Close the circuit now.
    pub fn reset(&self) {
        *self.lock() = Circuit::Closed;
    }

    fn lock(&self) -> MutexGuard<'_, Circuit<E>> {
        self.circuit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Clone + Send> RetryPolicy<E> for CircuitBreakerPolicy<E> {
    fn can_retry(&self, ctx: &RetryContext<E>) -> bool {
        if self.is_open() {
            return false;
        }
        if self.delegate.can_retry(ctx) {
            return true;
        }

        if ctx.elapsed() <= self.open_timeout {
            if let Some(failure) = ctx.last_failure() {
                tracing::debug!(attempts = ctx.attempt_count(), "opening circuit");
                *self.lock() = Circuit::Open {
                    since: Instant::now(),
                    failure: failure.clone(),
                };
            }
        }
        false
    }

    fn short_circuit(&self, _ctx: &RetryContext<E>) -> Option<E> {
        let mut circuit = self.lock();
        if let Circuit::Open { since, failure } = &*circuit {
            if since.elapsed() < self.reset_timeout {
                return Some(failure.clone());
            }
            tracing::debug!("reset timeout passed, closing circuit");
            *circuit = Circuit::Closed;
        }
        None
    }
}

impl<E> fmt::Debug for CircuitBreakerPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerPolicy")
            .field("open_timeout", &self.open_timeout)
            .field("reset_timeout", &self.reset_timeout)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{failed_context, CompositePolicy, MaxAttemptsPolicy, NeverRetry};

    #[test]
    fn test_follows_delegate_while_closed() {
        let breaker = CircuitBreakerPolicy::new(MaxAttemptsPolicy::new(3));

        assert!(breaker.can_retry(&failed_context(1, "boom")));
        assert!(breaker.can_retry(&failed_context(2, "boom")));
        assert!(!breaker.is_open());
        assert_eq!(breaker.short_circuit(&failed_context(0, "boom")), None);
    }

    #[test]
    fn test_exhausted_delegate_opens_circuit() {
        let breaker = CircuitBreakerPolicy::new(MaxAttemptsPolicy::new(2));

        assert!(!breaker.can_retry(&failed_context(2, "boom")));
        assert!(breaker.is_open());
        assert_eq!(breaker.short_circuit(&failed_context(0, "other")), Some("boom"));
        // nothing is retried while open
        assert!(!breaker.can_retry(&failed_context(1, "other")));
    }

    #[test]
    fn test_slow_exhaustion_keeps_circuit_closed() {
        let breaker =
            CircuitBreakerPolicy::new(NeverRetry).with_open_timeout(Duration::from_millis(5));
        let ctx = failed_context(1, "boom");
        std::thread::sleep(Duration::from_millis(20));

        assert!(!breaker.can_retry(&ctx));
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_circuit_closes_after_reset_timeout() {
        let breaker =
            CircuitBreakerPolicy::new(NeverRetry).with_reset_timeout(Duration::from_millis(20));
        assert!(!breaker.can_retry(&failed_context(1, "boom")));
        assert!(breaker.is_open());

        std::thread::sleep(Duration::from_millis(40));

        assert!(!breaker.is_open());
        assert_eq!(breaker.short_circuit(&failed_context(0, "boom")), None);
        assert_eq!(breaker.short_circuit(&failed_context(0, "boom")), None);
    }

    #[test]
    fn test_manual_reset() {
        let breaker = CircuitBreakerPolicy::new(NeverRetry);
        assert!(!breaker.can_retry(&failed_context(1, "boom")));

        breaker.reset();

        assert!(!breaker.is_open());
        assert_eq!(breaker.short_circuit(&failed_context(0, "boom")), None);
    }

    #[test]
    fn test_composite_forwards_short_circuit() {
        let open = Arc::new(CircuitBreakerPolicy::new(NeverRetry));
        assert!(!open.can_retry(&failed_context(1, "boom")));
        let closed = Arc::new(CircuitBreakerPolicy::new(NeverRetry));
        let ctx = failed_context(0, "x");

        let pessimistic = CompositePolicy::pessimistic()
            .with_shared(open.clone())
            .with_shared(closed.clone());
        let optimistic = CompositePolicy::optimistic()
            .with_shared(open.clone())
            .with_shared(closed);
        let all_open = CompositePolicy::optimistic().with_shared(open);

        assert_eq!(pessimistic.short_circuit(&ctx), Some("boom"));
        assert_eq!(optimistic.short_circuit(&ctx), None);
        assert_eq!(all_open.short_circuit(&ctx), Some("boom"));
    }

    #[test]
    fn test_defaults() {
        let breaker = CircuitBreakerPolicy::<()>::new(NeverRetry);
        assert_eq!(breaker.open_timeout(), Duration::from_secs(5));
        assert_eq!(breaker.reset_timeout(), Duration::from_secs(20));
    }
}
