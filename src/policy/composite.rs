use std::fmt;
use std::sync::Arc;

use crate::context::RetryContext;

use super::RetryPolicy;

/// How a [`CompositePolicy`] combines its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// Retry only if every member allows it. Any member can veto.
    Pessimistic,
    /// Retry if any member allows it.
    Optimistic,
}

/// A set of policies combined under one [`CompositeMode`].
///
/// An empty pessimistic composite allows retries (nobody vetoes); an empty
/// optimistic composite forbids them (nobody allows).
///
/// # Examples
///
/// ```rust
/// use secondwind::policy::{CompositePolicy, MaxAttemptsPolicy, NeverRetry};
///
/// // The permissive member wins: up to 3 attempts.
/// let optimistic = CompositePolicy::<String>::optimistic()
///     .with(NeverRetry)
///     .with(MaxAttemptsPolicy::new(3));
///
/// // The forbidding member wins: a single attempt.
/// let pessimistic = CompositePolicy::<String>::pessimistic()
///     .with(NeverRetry)
///     .with(MaxAttemptsPolicy::new(3));
/// # let _ = (optimistic, pessimistic);
/// ```
pub struct CompositePolicy<E> {
    mode: CompositeMode,
    policies: Vec<Arc<dyn RetryPolicy<E>>>,
}

impl<E> CompositePolicy<E> {
    /// Empty composite in the given mode.
    pub fn new(mode: CompositeMode) -> Self {
        Self {
            mode,
            policies: Vec::new(),
        }
    }

    /// Empty composite where every member must allow a retry.
    pub fn pessimistic() -> Self {
        Self::new(CompositeMode::Pessimistic)
    }

    /// Empty composite where any member may allow a retry.
    pub fn optimistic() -> Self {
        Self::new(CompositeMode::Optimistic)
    }

    /// Add a member.
    pub fn with(mut self, policy: impl RetryPolicy<E> + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Add a member that is already shared.
    pub fn with_shared(mut self, policy: Arc<dyn RetryPolicy<E>>) -> Self {
        self.policies.push(policy);
        self
    }

    /// The combination mode.
    pub fn mode(&self) -> CompositeMode {
        self.mode
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// True if there are no members.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl<E> Clone for CompositePolicy<E> {
    fn clone(&self) -> Self {
        Self {
            mode: self.mode,
            policies: self.policies.clone(),
        }
    }
}

impl<E> fmt::Debug for CompositePolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositePolicy")
            .field("mode", &self.mode)
            .field("policies", &self.policies.len())
            .finish()
    }
}

impl<E> RetryPolicy<E> for CompositePolicy<E> {
    fn can_retry(&self, ctx: &RetryContext<E>) -> bool {
        match self.mode {
            CompositeMode::Pessimistic => self.policies.iter().all(|p| p.can_retry(ctx)),
            CompositeMode::Optimistic => self.policies.iter().any(|p| p.can_retry(ctx)),
        }
    }

    /// Pessimistic: any member can stop the attempt. Optimistic: every member
    /// has to.
    fn short_circuit(&self, ctx: &RetryContext<E>) -> Option<E> {
        match self.mode {
            CompositeMode::Pessimistic => self.policies.iter().find_map(|p| p.short_circuit(ctx)),
            CompositeMode::Optimistic => {
                let mut first = None;
                for policy in &self.policies {
                    match policy.short_circuit(ctx) {
                        Some(failure) => {
                            first.get_or_insert(failure);
                        }
                        None => return None,
                    }
                }
                first
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{failed_context, AlwaysRetry, MaxAttemptsPolicy, NeverRetry};

    #[test]
    fn test_optimistic_permissive_member_wins() {
        let policy = CompositePolicy::optimistic()
            .with(NeverRetry)
            .with(MaxAttemptsPolicy::new(3));

        assert!(policy.can_retry(&failed_context(1, ())));
        assert!(policy.can_retry(&failed_context(2, ())));
        assert!(!policy.can_retry(&failed_context(3, ())));
    }

    #[test]
    fn test_pessimistic_forbidding_member_wins() {
        let policy = CompositePolicy::pessimistic()
            .with(NeverRetry)
            .with(MaxAttemptsPolicy::new(3));

        assert!(!policy.can_retry(&failed_context(1, ())));
    }

    #[test]
    fn test_pessimistic_all_allow() {
        let policy = CompositePolicy::pessimistic()
            .with(AlwaysRetry)
            .with(MaxAttemptsPolicy::new(2));

        assert!(policy.can_retry(&failed_context(1, ())));
        assert!(!policy.can_retry(&failed_context(2, ())));
    }

    #[test]
    fn test_empty_composites() {
        let ctx = failed_context(1, ());
        assert!(CompositePolicy::pessimistic().can_retry(&ctx));
        assert!(!CompositePolicy::optimistic().can_retry(&ctx));
        assert!(CompositePolicy::<()>::optimistic().is_empty());
    }

    #[test]
    fn test_shared_members() {
        let shared: Arc<dyn RetryPolicy<()>> = Arc::new(MaxAttemptsPolicy::new(2));
        let a = CompositePolicy::optimistic().with_shared(Arc::clone(&shared));
        let b = CompositePolicy::pessimistic().with_shared(shared);

        assert_eq!(a.len(), 1);
        assert_eq!(b.mode(), CompositeMode::Pessimistic);
        assert!(a.can_retry(&failed_context(1, ())));
        assert!(b.can_retry(&failed_context(1, ())));
    }
}
