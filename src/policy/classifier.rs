use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::classify::Classifier;
use crate::context::RetryContext;

use super::{NeverRetry, RetryPolicy};

/// Route each failure to the policy registered for its category.
///
/// The classifier maps the last failure to a category `C`; the policy
/// registered for that category decides. Categories without a registration,
/// and contexts without a failure, fall back to the default policy, which is
/// [`NeverRetry`] unless replaced.
///
/// # Examples
///
/// ```rust
/// use secondwind::policy::{ClassifierPolicy, MaxAttemptsPolicy, TimeoutPolicy};
/// use std::time::Duration;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum Kind {
///     Network,
///     Throttled,
///     Invalid,
/// }
///
/// #[derive(Debug)]
/// struct ApiError(Kind);
///
/// let policy = ClassifierPolicy::new(|e: &ApiError| e.0)
///     .route(Kind::Network, MaxAttemptsPolicy::new(5))
///     .route(Kind::Throttled, TimeoutPolicy::new(Duration::from_secs(30)));
/// // `Kind::Invalid` uses the default: never retry.
/// # let _ = policy;
/// ```
pub struct ClassifierPolicy<E, C> {
    classifier: Arc<dyn Classifier<E, C>>,
    routes: HashMap<C, Arc<dyn RetryPolicy<E>>>,
    default: Arc<dyn RetryPolicy<E>>,
}

impl<E, C> ClassifierPolicy<E, C>
where
    C: Hash + Eq + Send + Sync + 'static,
{
    /// Policy that categorises failures with `classifier`.
    pub fn new(classifier: impl Classifier<E, C> + 'static) -> Self {
        Self {
            classifier: Arc::new(classifier),
            routes: HashMap::new(),
            default: Arc::new(NeverRetry),
        }
    }

    /// Use `policy` for failures in `category`.
    pub fn route(mut self, category: C, policy: impl RetryPolicy<E> + 'static) -> Self {
        self.routes.insert(category, Arc::new(policy));
        self
    }

    /// Use `policy` for failures in no registered category.
    pub fn with_default(mut self, policy: impl RetryPolicy<E> + 'static) -> Self {
        self.default = Arc::new(policy);
        self
    }

    /// The policy that would decide for `failure`.
    pub fn policy_for(&self, failure: &E) -> &dyn RetryPolicy<E> {
        let category = self.classifier.classify(failure);
        self.routes
            .get(&category)
            .map_or(&*self.default, |p| &**p)
    }
}

impl<E, C> fmt::Debug for ClassifierPolicy<E, C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierPolicy")
            .field("categories", &self.routes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<E, C> RetryPolicy<E> for ClassifierPolicy<E, C>
where
    C: Hash + Eq + Send + Sync + 'static,
{
    fn can_retry(&self, ctx: &RetryContext<E>) -> bool {
        match ctx.last_failure() {
            Some(failure) => self.policy_for(failure).can_retry(ctx),
            None => self.default.can_retry(ctx),
        }
    }
}
