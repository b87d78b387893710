use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backoff::{BackoffStrategy, NoBackoff};
use crate::listener::RetryListener;
use crate::policy::{MaxAttemptsPolicy, RetryPolicy};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::state::ContextCache;

use super::RetryTemplate;

/// Builder for [`RetryTemplate`].
///
/// Defaults: three attempts for any failure, no backoff, the tokio timer, no
/// listeners, no cancellation and room for 4096 stateful episodes.
///
/// # Example
///
/// ```rust
/// use secondwind::{ExponentialBackoff, RetryTemplate, TracingListener};
/// use std::time::Duration;
///
/// let template = RetryTemplate::<std::io::Error>::builder()
///     .name("fetch-profile")
///     .max_attempts(4)
///     .backoff(ExponentialBackoff::new(Duration::from_millis(200), 2.0))
///     .listener(TracingListener::new("fetch-profile"))
///     .build();
///
/// assert_eq!(template.name(), Some("fetch-profile"));
/// ```
pub struct RetryTemplateBuilder<E, K = String> {
    name: Option<Arc<str>>,
    policy: Arc<dyn RetryPolicy<E>>,
    backoff: Arc<dyn BackoffStrategy>,
    listeners: Vec<Arc<dyn RetryListener<E>>>,
    sleeper: Arc<dyn Sleeper>,
    cancellation: Option<CancellationToken>,
    cache_capacity: usize,
    _key: PhantomData<fn() -> K>,
}

impl<E: 'static, K: Hash + Eq> RetryTemplateBuilder<E, K> {
    /// Builder with default settings.
    pub fn new() -> Self {
        Self {
            name: None,
            policy: Arc::new(MaxAttemptsPolicy::<E>::default()),
            backoff: Arc::new(NoBackoff),
            listeners: Vec::new(),
            sleeper: Arc::new(TokioSleeper),
            cancellation: None,
            cache_capacity: ContextCache::<K, E>::DEFAULT_CAPACITY,
            _key: PhantomData,
        }
    }

    /// Label every episode's context with `name`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Arc::from(name.into()));
        self
    }

    /// Shorthand for a [`MaxAttemptsPolicy`] that retries every failure.
    pub fn max_attempts(self, max_attempts: u32) -> Self {
        self.retry_policy(MaxAttemptsPolicy::new(max_attempts))
    }

    /// Decide retries with `policy`.
    pub fn retry_policy(mut self, policy: impl RetryPolicy<E> + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Decide retries with a policy shared with other templates.
    pub fn shared_retry_policy(mut self, policy: Arc<dyn RetryPolicy<E>>) -> Self {
        self.policy = policy;
        self
    }

    /// Wait between attempts according to `backoff`.
    pub fn backoff(mut self, backoff: impl BackoffStrategy + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Wait between attempts according to a shared strategy.
    pub fn shared_backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Append a listener. Listeners are notified in the order added, and in
    /// reverse order when an episode ends.
    pub fn listener(mut self, listener: impl RetryListener<E> + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Wait with `sleeper` instead of the tokio timer.
    pub fn sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Abandon backoff waits as soon as `token` is cancelled.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Keep at most `capacity` stateful episodes (minimum 1).
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Build the template.
    pub fn build(self) -> RetryTemplate<E, K> {
        RetryTemplate {
            name: self.name,
            policy: self.policy,
            backoff: self.backoff,
            listeners: self.listeners,
            sleeper: self.sleeper,
            cancellation: self.cancellation,
            cache: ContextCache::new(self.cache_capacity),
        }
    }
}

impl<E: 'static, K: Hash + Eq> Default for RetryTemplateBuilder<E, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, K> fmt::Debug for RetryTemplateBuilder<E, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTemplateBuilder")
            .field("name", &self.name)
            .field("listeners", &self.listeners.len())
            .field("cache_capacity", &self.cache_capacity)
            .finish_non_exhaustive()
    }
}
