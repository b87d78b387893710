//! Reusable retry-wrapped operations.
//!
//! A [`Retryable`] binds an operation (and optionally a recovery) to a shared
//! [`RetryTemplate`] once, so call sites just say `.call().await`.
//!
//! # Example
//!
//! ```rust
//! use secondwind::{Retryable, RetryTemplate};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let template = Arc::new(RetryTemplate::<String>::builder().max_attempts(2).build());
//!
//! let lookup = Retryable::new(template.clone(), |_ctx| async {
//!     Err::<u32, _>("dns timeout".to_string())
//! })
//! .with_recovery(|_ctx| async { Ok(0) });
//!
//! assert_eq!(lookup.call().await, Ok(0));
//! assert_eq!(lookup.call().await, Ok(0));
//! # });
//! ```

use std::fmt;
use std::future::{Future, Ready};
use std::sync::Arc;

use tracing::Instrument;

use crate::context::RetryContext;
use crate::template::RetryTemplate;

/// An operation bound to a retry template.
///
/// Each [`call`](Self::call) is an independent stateless episode.
pub struct Retryable<E, F, R> {
    template: Arc<RetryTemplate<E>>,
    operation: F,
    recovery: Option<R>,
}

impl<E, F> Retryable<E, F, ()> {
    /// Bind `operation` to `template`, without recovery.
    #[allow(clippy::new_ret_no_self)]
    pub fn new<T, Fut>(
        template: Arc<RetryTemplate<E>>,
        operation: F,
    ) -> Retryable<E, F, fn(&RetryContext<E>) -> Ready<Result<T, E>>>
    where
        F: Fn(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        Retryable {
            template,
            operation,
            recovery: None,
        }
    }
}

impl<E, F, R> Retryable<E, F, R> {
    /// Use `recovery` when an episode gives up.
    pub fn with_recovery<R2, T, RFut>(self, recovery: R2) -> Retryable<E, F, R2>
    where
        R2: Fn(&RetryContext<E>) -> RFut,
        RFut: Future<Output = Result<T, E>>,
    {
        Retryable {
            template: self.template,
            operation: self.operation,
            recovery: Some(recovery),
        }
    }

    /// The template the operation runs under.
    pub fn template(&self) -> &Arc<RetryTemplate<E>> {
        &self.template
    }

    /// Whether a recovery is bound.
    pub fn has_recovery(&self) -> bool {
        self.recovery.is_some()
    }

    /// Run one retry episode.
    pub async fn call<T, Fut, RFut>(&self) -> Result<T, E>
    where
        F: Fn(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&RetryContext<E>) -> RFut,
        RFut: Future<Output = Result<T, E>>,
    {
        let template = &self.template;
        template
            .run_stateless(template.open(), &self.operation, self.recovery.as_ref())
            .instrument(template.span("guarded"))
            .await
    }
}

impl<E, F, R> fmt::Debug for Retryable<E, F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retryable")
            .field("template", &self.template)
            .field("recovery", &self.recovery.is_some())
            .finish_non_exhaustive()
    }
}

impl<E> RetryTemplate<E> {
    /// Bind `operation` to this template. Shorthand for [`Retryable::new`].
    pub fn guard<T, F, Fut>(
        self: &Arc<Self>,
        operation: F,
    ) -> Retryable<E, F, fn(&RetryContext<E>) -> Ready<Result<T, E>>>
    where
        F: Fn(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        Retryable::new(Arc::clone(self), operation)
    }
}
