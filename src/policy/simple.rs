use std::fmt;
use std::sync::Arc;

use crate::classify::{AlwaysRetryable, Classifier};
use crate::context::RetryContext;

use super::RetryPolicy;

/// Retry retryable failures until `max_attempts` invocations have been made.
///
/// `max_attempts` counts the first attempt: a value of 3 means one attempt and
/// up to two retries. Values below 1 are raised to 1. Failures the classifier
/// rejects stop the episode immediately.
///
/// # Examples
///
/// ```rust
/// use secondwind::policy::MaxAttemptsPolicy;
///
/// #[derive(Debug)]
/// enum DbError {
///     Deadlock,
///     ConstraintViolation,
/// }
///
/// let policy = MaxAttemptsPolicy::<DbError>::new(3)
///     .with_classifier(|e: &DbError| matches!(e, DbError::Deadlock));
///
/// assert_eq!(policy.max_attempts(), 3);
/// ```
pub struct MaxAttemptsPolicy<E> {
    max_attempts: u32,
    classifier: Arc<dyn Classifier<E>>,
}

impl<E> MaxAttemptsPolicy<E> {
    /// Default number of attempts.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Allow up to `max_attempts` attempts for any failure.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            classifier: Arc::new(AlwaysRetryable),
        }
    }

    /// Only count failures accepted by `classifier` as retryable.
    pub fn with_classifier(mut self, classifier: impl Classifier<E> + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// The attempt limit, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether the classifier accepts `failure` as retryable.
    pub fn is_retryable(&self, failure: &E) -> bool {
        self.classifier.classify(failure)
    }
}

impl<E> Default for MaxAttemptsPolicy<E> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

impl<E> Clone for MaxAttemptsPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            classifier: Arc::clone(&self.classifier),
        }
    }
}

impl<E> fmt::Debug for MaxAttemptsPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaxAttemptsPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> for MaxAttemptsPolicy<E> {
    fn can_retry(&self, ctx: &RetryContext<E>) -> bool {
        ctx.attempt_count() < self.max_attempts
            && ctx.last_failure().is_none_or(|e| self.is_retryable(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::failed_context;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Transient,
        Permanent,
    }

    #[test]
    fn test_allows_until_limit() {
        let policy = MaxAttemptsPolicy::new(3);
        assert!(policy.can_retry(&failed_context(1, TestError::Transient)));
        assert!(policy.can_retry(&failed_context(2, TestError::Transient)));
        assert!(!policy.can_retry(&failed_context(3, TestError::Transient)));
    }

    #[test]
    fn test_classifier_rejects_permanent() {
        let policy = MaxAttemptsPolicy::new(5)
            .with_classifier(|e: &TestError| *e == TestError::Transient);
        assert!(policy.can_retry(&failed_context(1, TestError::Transient)));
        assert!(!policy.can_retry(&failed_context(1, TestError::Permanent)));
    }

    #[test]
    fn test_zero_is_raised_to_one() {
        let policy = MaxAttemptsPolicy::<TestError>::new(0);
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.can_retry(&failed_context(1, TestError::Transient)));
    }

    #[test]
    fn test_default_is_three() {
        assert_eq!(MaxAttemptsPolicy::<TestError>::default().max_attempts(), 3);
    }

    #[test]
    fn test_debug_and_clone() {
        let policy = MaxAttemptsPolicy::<TestError>::new(4);
        let cloned = policy.clone();
        assert_eq!(cloned.max_attempts(), 4);
        assert!(format!("{:?}", policy).contains("max_attempts: 4"));
    }
}
