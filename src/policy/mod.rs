//! Retry policies: may the engine try again?
//!
//! A [`RetryPolicy`] is consulted after every failed attempt, with the failure
//! already recorded in the [`RetryContext`]. Policies can be shared between
//! engines and threads; all but the circuit breaker are immutable.
//!
//! - [`MaxAttemptsPolicy`]: a bounded number of attempts for retryable failures
//! - [`TimeoutPolicy`]: keep trying until a time budget is spent
//! - [`CompositePolicy`]: combine policies pessimistically or optimistically
//! - [`ClassifierPolicy`]: pick a policy by failure category
//! - [`CircuitBreakerPolicy`]: stop calling an operation for a while once
//!   another policy gives up on it
//! - [`NeverRetry`] / [`AlwaysRetry`]: the trivial extremes
//!
//! # Examples
//!
//! ```rust
//! use secondwind::policy::{CompositePolicy, MaxAttemptsPolicy, TimeoutPolicy};
//! use std::time::Duration;
//!
//! // At most 5 attempts, and only within 2 seconds.
//! let policy = CompositePolicy::<std::io::Error>::pessimistic()
//!     .with(MaxAttemptsPolicy::new(5))
//!     .with(TimeoutPolicy::new(Duration::from_secs(2)));
//! ```

mod circuit_breaker;
mod classifier;
mod composite;
mod simple;
mod timeout;

pub use circuit_breaker::CircuitBreakerPolicy;
pub use classifier::ClassifierPolicy;
pub use composite::{CompositeMode, CompositePolicy};
pub use simple::MaxAttemptsPolicy;
pub use timeout::TimeoutPolicy;

use std::sync::Arc;

use crate::context::RetryContext;

/// Decides whether another attempt is permitted.
pub trait RetryPolicy<E>: Send + Sync {
    /// Whether the episode described by `ctx` may try again.
    fn can_retry(&self, ctx: &RetryContext<E>) -> bool;

    /// Consulted before every invocation of the operation.
    ///
    /// Returning a failure ends the episode without invoking the operation,
    /// as if it had failed with that failure and the policy had declined.
    /// Only stateful policies such as [`CircuitBreakerPolicy`] do this.
    fn short_circuit(&self, _ctx: &RetryContext<E>) -> Option<E> {
        None
    }
}

impl<E, P: RetryPolicy<E> + ?Sized> RetryPolicy<E> for Arc<P> {
    fn can_retry(&self, ctx: &RetryContext<E>) -> bool {
        (**self).can_retry(ctx)
    }

    fn short_circuit(&self, ctx: &RetryContext<E>) -> Option<E> {
        (**self).short_circuit(ctx)
    }
}

impl<E, P: RetryPolicy<E> + ?Sized> RetryPolicy<E> for Box<P> {
    fn can_retry(&self, ctx: &RetryContext<E>) -> bool {
        (**self).can_retry(ctx)
    }

    fn short_circuit(&self, ctx: &RetryContext<E>) -> Option<E> {
        (**self).short_circuit(ctx)
    }
}

/// Allow the first attempt only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl<E> RetryPolicy<E> for NeverRetry {
    fn can_retry(&self, _ctx: &RetryContext<E>) -> bool {
        false
    }
}

/// Retry forever.
///
/// Only useful combined with something that bounds the episode, such as a
/// [`TimeoutPolicy`] inside a pessimistic [`CompositePolicy`] or cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E> RetryPolicy<E> for AlwaysRetry {
    fn can_retry(&self, _ctx: &RetryContext<E>) -> bool {
        true
    }
}

#[cfg(test)]
pub(crate) fn failed_context<E>(attempts: u32, failure: E) -> RetryContext<E> {
    let mut ctx = RetryContext::new();
    for _ in 0..attempts {
        ctx.begin_attempt();
    }
    ctx.record_failure(failure);
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trivial_policies() {
        let ctx = failed_context(1, "boom");
        assert!(!NeverRetry.can_retry(&ctx));
        assert!(AlwaysRetry.can_retry(&ctx));
    }

    #[test]
    fn test_shared_policy() {
        let policy: Arc<dyn RetryPolicy<&str>> = Arc::new(MaxAttemptsPolicy::new(2));
        assert!(policy.can_retry(&failed_context(1, "boom")));
        assert!(!policy.can_retry(&failed_context(2, "boom")));
    }
}
