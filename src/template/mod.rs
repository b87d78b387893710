//! The retry engine.
//!
//! [`RetryTemplate`] ties a [`RetryPolicy`], a [`BackoffStrategy`], listeners
//! and a [`Sleeper`] together and runs operations under them.
//!
//! # Stateless and stateful retry
//!
//! Without a [`RetryState`] the engine owns the whole episode: it invokes the
//! operation, waits between failures and keeps going until the operation
//! succeeds or the policy gives up. The caller only ever sees the final
//! result.
//!
//! With a [`RetryState`] every call is a single attempt. A retryable failure
//! is handed straight back to the caller, without waiting, so that an
//! enclosing transaction can roll back; the episode's context stays cached
//! under the state's key until the caller comes back with the same key.
//!
//! # Quick Start
//!
//! ```rust
//! use secondwind::{FixedBackoff, RetryTemplate};
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let template = RetryTemplate::<String>::builder()
//!     .max_attempts(3)
//!     .backoff(FixedBackoff::new(Duration::from_millis(1)))
//!     .build();
//!
//! let calls = AtomicU32::new(0);
//! let result = template
//!     .execute(|_ctx| {
//!         let n = calls.fetch_add(1, Ordering::SeqCst);
//!         async move {
//!             if n < 2 {
//!                 Err("transient".to_string())
//!             } else {
//!                 Ok(n)
//!             }
//!         }
//!     })
//!     .await;
//!
//! assert_eq!(result, Ok(2));
//! # });
//! ```

mod builder;

pub use builder::RetryTemplateBuilder;

use std::fmt;
use std::future::{Future, Ready};
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::backoff::BackoffStrategy;
use crate::context::RetryContext;
use crate::error::ListenerError;
use crate::listener::{EpisodeOutcome, RetryListener};
use crate::policy::RetryPolicy;
use crate::sleeper::Sleeper;
use crate::state::{ContextCache, RetryState};

/// Recovery type used when an episode has none.
pub(crate) type NoRecovery<T, E> = fn(&RetryContext<E>) -> Ready<Result<T, E>>;

/// Runs fallible operations under a retry policy, a backoff strategy and an
/// optional recovery.
///
/// A template is configuration plus the stateful episode cache. Build it
/// once and share it (it is `Sync` when `E` and `K` are `Send`).
pub struct RetryTemplate<E, K = String> {
    name: Option<Arc<str>>,
    policy: Arc<dyn RetryPolicy<E>>,
    backoff: Arc<dyn BackoffStrategy>,
    listeners: Vec<Arc<dyn RetryListener<E>>>,
    sleeper: Arc<dyn Sleeper>,
    cancellation: Option<CancellationToken>,
    cache: ContextCache<K, E>,
}

impl<E: 'static, K: Hash + Eq> RetryTemplate<E, K> {
    /// Start configuring a template.
    pub fn builder() -> RetryTemplateBuilder<E, K> {
        RetryTemplateBuilder::new()
    }
}

impl<E: 'static, K: Hash + Eq> Default for RetryTemplate<E, K> {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<E, K> RetryTemplate<E, K>
where
    K: Hash + Eq + Clone,
{
    /// Run `op` until it succeeds or the policy gives up.
    ///
    /// On exhaustion, or on a failure the policy refuses to retry, the last
    /// failure is returned exactly as the operation produced it.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_stateless(self.open(), op, None::<NoRecovery<T, E>>)
            .instrument(self.span("stateless"))
            .await
    }

    /// Run `op` until it succeeds; if the episode gives up, return what
    /// `recovery` produces instead.
    ///
    /// `recovery` runs at most once, with the final context. If it fails,
    /// its error is returned in place of the operation's failure.
    ///
    /// # Example
    ///
    /// ```rust
    /// use secondwind::RetryTemplate;
    ///
    /// # tokio_test::block_on(async {
    /// let template = RetryTemplate::<String>::builder().max_attempts(2).build();
    ///
    /// let result = template
    ///     .execute_with_recovery(
    ///         |_ctx| async { Err::<String, _>("rpc unavailable".to_string()) },
    ///         |ctx| {
    ///             let attempts = ctx.attempt_count();
    ///             async move { Ok(format!("fallback after {} attempts", attempts)) }
    ///         },
    ///     )
    ///     .await;
    ///
    /// assert_eq!(result.unwrap(), "fallback after 2 attempts");
    /// # });
    /// ```
    pub async fn execute_with_recovery<T, F, Fut, R, RFut>(
        &self,
        op: F,
        recovery: R,
    ) -> Result<T, E>
    where
        F: FnMut(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce(&RetryContext<E>) -> RFut,
        RFut: Future<Output = Result<T, E>>,
    {
        self.run_stateless(self.open(), op, Some(recovery))
            .instrument(self.span("stateless"))
            .await
    }

    /// Run a stateless episode nested inside `parent`.
    ///
    /// The new episode's context links to a snapshot of `parent`; the parent
    /// itself is not touched.
    pub async fn execute_nested<P, T, F, Fut>(
        &self,
        parent: &RetryContext<P>,
        op: F,
    ) -> Result<T, E>
    where
        F: FnMut(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ctx = self.open().with_parent(parent.as_parent());
        self.run_stateless(ctx, op, None::<NoRecovery<T, E>>)
            .instrument(self.span("nested"))
            .await
    }

    /// Make one attempt of the episode identified by `state`.
    ///
    /// A retryable failure with attempts left is returned to the caller at
    /// once and the episode is kept for the next call with the same key. A
    /// success or a final failure ends the episode and forgets the key.
    ///
    /// The cached context keeps the failure, so the next call sees it as
    /// [`last_failure`](RetryContext::last_failure); the caller gets a clone.
    pub async fn execute_stateful<T, F, Fut>(
        &self,
        op: F,
        state: &RetryState<K, E>,
    ) -> Result<T, E>
    where
        E: Clone,
        F: FnOnce(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_stateful(op, None::<NoRecovery<T, E>>, state)
            .instrument(self.span("stateful"))
            .await
    }

    /// Like [`execute_stateful`](Self::execute_stateful), with a recovery for
    /// the call that ends the episode without success.
    pub async fn execute_stateful_with_recovery<T, F, Fut, R, RFut>(
        &self,
        op: F,
        recovery: R,
        state: &RetryState<K, E>,
    ) -> Result<T, E>
    where
        E: Clone,
        F: FnOnce(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce(&RetryContext<E>) -> RFut,
        RFut: Future<Output = Result<T, E>>,
    {
        self.run_stateful(op, Some(recovery), state)
            .instrument(self.span("stateful"))
            .await
    }

    /// Whether a stateful episode is in progress for `key`.
    pub fn is_pending(&self, key: &K) -> bool {
        self.cache.contains(key)
    }

    /// Number of stateful episodes in progress.
    pub fn pending_episodes(&self) -> usize {
        self.cache.len()
    }

    /// Maximum number of stateful episodes kept at once.
    pub fn cache_capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// The episode label, if configured.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) async fn run_stateless<T, F, Fut, R, RFut>(
        &self,
        mut ctx: RetryContext<E>,
        mut op: F,
        recovery: Option<R>,
    ) -> Result<T, E>
    where
        F: FnMut(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce(&RetryContext<E>) -> RFut,
        RFut: Future<Output = Result<T, E>>,
    {
        self.notify("on_episode_start", |l| l.on_episode_start(&ctx));
        let mut backoff = self.backoff.start();

        loop {
            if self.short_circuit(&mut ctx) {
                break;
            }
            ctx.begin_attempt();
            let failure = match op(&ctx).await {
                Ok(value) => {
                    self.notify_end(&ctx, &EpisodeOutcome::Succeeded);
                    return Ok(value);
                }
                Err(failure) => failure,
            };
            self.record_failure(&mut ctx, failure);

            if !self.policy.can_retry(&ctx) {
                tracing::debug!(attempts = ctx.attempt_count(), "retry policy declined");
                break;
            }

            let delay = self.backoff.next_delay(&mut backoff);
            if !self.pause(delay).await {
                tracing::debug!(
                    attempts = ctx.attempt_count(),
                    "backoff cancelled, abandoning episode"
                );
                ctx.mark_cancelled();
                break;
            }
            ctx.add_backoff(delay);
            tracing::debug!(
                attempt = ctx.attempt_count() + 1,
                delay_ms = delay.as_millis() as u64,
                "retrying"
            );
        }

        self.conclude(ctx, recovery).await
    }

    async fn run_stateful<T, F, Fut, R, RFut>(
        &self,
        op: F,
        recovery: Option<R>,
        state: &RetryState<K, E>,
    ) -> Result<T, E>
    where
        E: Clone,
        F: FnOnce(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce(&RetryContext<E>) -> RFut,
        RFut: Future<Output = Result<T, E>>,
    {
        let cached = self.cache.take(state.key());
        let mut ctx = match cached {
            Some(ctx) if !state.force_refresh() => ctx,
            cached => {
                if cached.is_some() {
                    tracing::debug!("force refresh, discarding cached episode");
                }
                let ctx = self.open();
                self.notify("on_episode_start", |l| l.on_episode_start(&ctx));
                ctx
            }
        };

        if self.short_circuit(&mut ctx) {
            return self.conclude(ctx, recovery).await;
        }
        ctx.begin_attempt();
        let failure = match op(&ctx).await {
            Ok(value) => {
                self.notify_end(&ctx, &EpisodeOutcome::Succeeded);
                return Ok(value);
            }
            Err(failure) => failure,
        };

        let eligible = state.is_retryable(&failure);
        self.record_failure(&mut ctx, failure);

        if eligible && self.policy.can_retry(&ctx) {
            if let Some(failure) = ctx.last_failure().cloned() {
                tracing::debug!(
                    attempts = ctx.attempt_count(),
                    "stateful attempt failed, handing failure back to caller"
                );
                if self.cache.put(state.key().clone(), ctx) {
                    tracing::debug!("episode cache full, evicted oldest episode");
                }
                return Err(failure);
            }
        }

        tracing::debug!(
            attempts = ctx.attempt_count(),
            eligible,
            "stateful episode ending"
        );
        self.conclude(ctx, recovery).await
    }

    /// Finish an episode that will not try again.
    async fn conclude<T, R, RFut>(
        &self,
        mut ctx: RetryContext<E>,
        recovery: Option<R>,
    ) -> Result<T, E>
    where
        R: FnOnce(&RetryContext<E>) -> RFut,
        RFut: Future<Output = Result<T, E>>,
    {
        ctx.mark_exhausted();

        if let Some(recover) = recovery {
            let result = recover(&ctx).await;
            match &result {
                Ok(_) => {
                    ctx.mark_recovered();
                    self.notify_end(&ctx, &EpisodeOutcome::Recovered);
                }
                Err(e) => self.notify_end(&ctx, &EpisodeOutcome::RecoveryFailed(e)),
            }
            return result;
        }

        match ctx.take_last_failure() {
            Some(failure) => {
                self.notify_end(&ctx, &EpisodeOutcome::Failed(&failure));
                Err(failure)
            }
            None => unreachable!("a concluded episode always holds its last failure"),
        }
    }

    pub(crate) fn open(&self) -> RetryContext<E> {
        RetryContext::new().with_name(self.name.clone())
    }

    pub(crate) fn span(&self, mode: &'static str) -> tracing::Span {
        tracing::debug_span!(
            "retry_episode",
            mode,
            name = self.name.as_deref().unwrap_or_default()
        )
    }

    /// Ask the policy whether the next invocation should be skipped. If so,
    /// its failure is recorded as the episode's last.
    fn short_circuit(&self, ctx: &mut RetryContext<E>) -> bool {
        match self.policy.short_circuit(ctx) {
            Some(failure) => {
                tracing::debug!(
                    attempts = ctx.attempt_count(),
                    "circuit open, operation not invoked"
                );
                ctx.record_failure(failure);
                ctx.mark_circuit_open();
                true
            }
            None => false,
        }
    }

    fn record_failure(&self, ctx: &mut RetryContext<E>, failure: E) {
        ctx.record_failure(failure);
        let ctx: &RetryContext<E> = ctx;
        self.notify("on_attempt_failed", |l| match ctx.last_failure() {
            Some(failure) => l.on_attempt_failed(ctx, failure),
            None => Ok(()),
        });
    }

    /// Wait out `delay`. Returns false if the wait was cancelled.
    async fn pause(&self, delay: Duration) -> bool {
        let Some(token) = &self.cancellation else {
            if !delay.is_zero() {
                self.sleeper.sleep(delay).await;
            }
            return true;
        };

        if token.is_cancelled() {
            return false;
        }
        if delay.is_zero() {
            return true;
        }
        tokio::select! {
            _ = self.sleeper.sleep(delay) => true,
            _ = token.cancelled() => false,
        }
    }

    fn notify(
        &self,
        event: &'static str,
        call: impl Fn(&dyn RetryListener<E>) -> Result<(), ListenerError>,
    ) {
        for listener in &self.listeners {
            contain(event, || call(listener.as_ref()));
        }
    }

    fn notify_end(&self, ctx: &RetryContext<E>, outcome: &EpisodeOutcome<'_, E>) {
        for listener in self.listeners.iter().rev() {
            contain("on_episode_end", || listener.on_episode_end(ctx, outcome));
        }
    }
}

/// Run one listener callback; errors and panics are logged, never propagated.
fn contain(event: &'static str, call: impl FnOnce() -> Result<(), ListenerError>) {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(event, error = %err, "retry listener failed"),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("non-string panic payload");
            tracing::warn!(event, panic = message, "retry listener panicked");
        }
    }
}

impl<E, K> fmt::Debug for RetryTemplate<E, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTemplate")
            .field("name", &self.name)
            .field("listeners", &self.listeners.len())
            .field("cancellable", &self.cancellation.is_some())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
