//! # Secondwind
//!
//! Pluggable retry, backoff and recovery for fallible async operations.
//!
//! A [`RetryTemplate`] runs an operation until it succeeds or its
//! [`RetryPolicy`] gives up, waiting between attempts as its
//! [`BackoffStrategy`] dictates. When an episode gives up, an optional
//! recovery supplies the result instead; without one, the operation's own
//! last error is returned untouched.
//!
//! ## Building blocks
//!
//! - **Policies** decide whether another attempt is allowed:
//!   [`MaxAttemptsPolicy`], [`TimeoutPolicy`], [`ClassifierPolicy`],
//!   [`CompositePolicy`] and [`CircuitBreakerPolicy`].
//! - **Backoff strategies** decide how long to wait: [`NoBackoff`],
//!   [`FixedBackoff`], [`UniformRandomBackoff`], [`ExponentialBackoff`] and
//!   [`ExponentialRandomBackoff`].
//! - **Listeners** observe episodes: [`TracingListener`], [`StatsListener`]
//!   or your own [`RetryListener`].
//! - **Stateful retry** spreads an episode over several calls, keyed by a
//!   [`RetryState`], for work that must be rolled back between attempts.
//!
//! ## Quick Example
//!
//! ```rust
//! use secondwind::prelude::*;
//! use std::time::Duration;
//!
//! #[derive(Debug, PartialEq)]
//! enum RpcError {
//!     Unavailable,
//!     Rejected,
//! }
//!
//! # tokio_test::block_on(async {
//! let template = RetryTemplate::<RpcError>::builder()
//!     .retry_policy(
//!         MaxAttemptsPolicy::new(3)
//!             .with_classifier(|e: &RpcError| matches!(e, RpcError::Unavailable)),
//!     )
//!     .backoff(ExponentialBackoff::new(Duration::from_millis(1), 2.0))
//!     .build();
//!
//! let user = template
//!     .execute_with_recovery(
//!         |_ctx| async { Err(RpcError::Unavailable) },
//!         |ctx| {
//!             let attempts = ctx.attempt_count();
//!             async move { Ok(format!("guest after {} attempts", attempts)) }
//!         },
//!     )
//!     .await;
//!
//! assert_eq!(user, Ok("guest after 3 attempts".to_string()));
//! # });
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod backoff;
pub mod classify;
pub mod config;
pub mod context;
pub mod error;
pub mod guard;
pub mod listener;
pub mod policy;
pub mod sleeper;
pub mod state;
pub mod template;
pub mod testing;

// Re-exports
pub use backoff::{
    BackoffState, BackoffStrategy, ExponentialBackoff, ExponentialRandomBackoff, FixedBackoff,
    NoBackoff, UniformRandomBackoff,
};
pub use classify::{AlwaysRetryable, Classifier, NeverRetryable};
pub use config::{BackoffConfig, RetryConfig};
pub use context::{ParentContext, RetryContext, TOTAL_BACKOFF};
pub use error::{ConfigError, ListenerError};
pub use guard::Retryable;
pub use listener::{EpisodeOutcome, RetryListener, StatsListener, TracingListener};
pub use policy::{
    AlwaysRetry, CircuitBreakerPolicy, ClassifierPolicy, CompositeMode, CompositePolicy,
    MaxAttemptsPolicy, NeverRetry, RetryPolicy, TimeoutPolicy,
};
pub use sleeper::{Sleeper, TokioSleeper};
pub use state::RetryState;
pub use template::{RetryTemplate, RetryTemplateBuilder};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backoff::{
        BackoffStrategy, ExponentialBackoff, ExponentialRandomBackoff, FixedBackoff, NoBackoff,
        UniformRandomBackoff,
    };
    pub use crate::context::RetryContext;
    pub use crate::listener::{RetryListener, TracingListener};
    pub use crate::policy::{
        CircuitBreakerPolicy, ClassifierPolicy, CompositePolicy, MaxAttemptsPolicy, RetryPolicy,
        TimeoutPolicy,
    };
    pub use crate::state::RetryState;
    pub use crate::template::RetryTemplate;
}
