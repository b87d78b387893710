//! Failure classification.
//!
//! A [`Classifier`] maps a failure to a decision. Most policies want a plain
//! "is this retryable?" answer (`C = bool`), while
//! [`ClassifierPolicy`](crate::policy::ClassifierPolicy) routes failures by a
//! richer category.

/// Maps a failure to a category, by default a retryable/not-retryable flag.
///
/// Classifiers are pure: the answer depends only on the failure.
///
/// Any `Fn(&E) -> C` closure is a classifier:
///
/// ```rust
/// use secondwind::Classifier;
///
/// #[derive(Debug)]
/// enum RpcError {
///     Unavailable,
///     BadRequest,
/// }
///
/// let transient = |e: &RpcError| matches!(e, RpcError::Unavailable);
///
/// assert!(transient.classify(&RpcError::Unavailable));
/// assert!(!transient.classify(&RpcError::BadRequest));
/// ```
pub trait Classifier<E: ?Sized, C = bool>: Send + Sync {
    /// Classify the failure.
    fn classify(&self, failure: &E) -> C;
}

impl<E: ?Sized, C, F> Classifier<E, C> for F
where
    F: Fn(&E) -> C + Send + Sync,
{
    fn classify(&self, failure: &E) -> C {
        self(failure)
    }
}

/// Classifies every failure as retryable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetryable;

impl<E: ?Sized> Classifier<E> for AlwaysRetryable {
    fn classify(&self, _failure: &E) -> bool {
        true
    }
}

/// Classifies every failure as not retryable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetryable;

impl<E: ?Sized> Classifier<E> for NeverRetryable {
    fn classify(&self, _failure: &E) -> bool {
        false
    }
}
