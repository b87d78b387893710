//! Stateful retry: episodes that span several calls.
//!
//! With a [`RetryState`], each call to the engine makes exactly one attempt.
//! The episode's [`RetryContext`] survives between calls in a bounded cache,
//! keyed by the state's key, until the episode succeeds or gives up.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::classify::{AlwaysRetryable, Classifier};
use crate::context::RetryContext;

/// Identifies one logical retry episode across calls.
///
/// The key must be unique per unit of work, such as a business transaction
/// id. Two calls with the same key must not run at the same time: the engine
/// takes the cached context out for the duration of a call, so concurrent
/// calls would each see their own context and the last one to finish would
/// win. Callers that might overlap must serialise them.
///
/// # Examples
///
/// ```rust
/// use secondwind::RetryState;
///
/// #[derive(Debug)]
/// enum TxError {
///     Deadlock,
///     Invalid,
/// }
///
/// let state = RetryState::new("order-1042".to_string())
///     .with_classifier(|e: &TxError| matches!(e, TxError::Deadlock));
///
/// assert_eq!(state.key(), "order-1042");
/// assert!(!state.force_refresh());
/// ```
pub struct RetryState<K, E> {
    key: K,
    force_refresh: bool,
    classifier: Arc<dyn Classifier<E>>,
}

impl<K, E> RetryState<K, E> {
    /// State for the episode identified by `key`.
    pub fn new(key: K) -> Self {
        Self {
            key,
            force_refresh: false,
            classifier: Arc::new(AlwaysRetryable),
        }
    }

    /// Discard any cached context for the key and start a fresh episode.
    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    /// Only failures accepted by `classifier` may be retried under this key.
    pub fn with_classifier(mut self, classifier: impl Classifier<E> + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// The episode key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Whether a fresh episode is forced.
    pub fn force_refresh(&self) -> bool {
        self.force_refresh
    }

    /// Whether `failure` may be retried under this key.
    pub fn is_retryable(&self, failure: &E) -> bool {
        self.classifier.classify(failure)
    }
}

impl<K: Clone, E> Clone for RetryState<K, E> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            force_refresh: self.force_refresh,
            classifier: Arc::clone(&self.classifier),
        }
    }
}

impl<K: fmt::Debug, E> fmt::Debug for RetryState<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryState")
            .field("key", &self.key)
            .field("force_refresh", &self.force_refresh)
            .finish_non_exhaustive()
    }
}

/// Bounded store of in-progress stateful episodes.
///
/// When the cache is full, storing a new episode evicts the one that has
/// waited longest since it was last stored; an evicted episode simply starts
/// over on its next call.
pub(crate) struct ContextCache<K, E> {
    capacity: usize,
    entries: Mutex<Entries<K, E>>,
}

struct Entries<K, E> {
    slots: HashMap<K, Slot<E>>,
    next_stamp: u64,
}

struct Slot<E> {
    stamp: u64,
    ctx: RetryContext<E>,
}

impl<K: Hash + Eq, E> ContextCache<K, E> {
    /// Default number of episodes held.
    pub(crate) const DEFAULT_CAPACITY: usize = 4096;

    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Entries {
                slots: HashMap::new(),
                next_stamp: 0,
            }),
        }
    }

    /// Remove and return the context for `key`, if any.
    pub(crate) fn take(&self, key: &K) -> Option<RetryContext<E>> {
        self.lock().slots.remove(key).map(|slot| slot.ctx)
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.lock().slots.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Entries<K, E>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K: Hash + Eq + Clone, E> ContextCache<K, E> {
    /// Store the context for `key`, returning true if another episode was
    /// evicted to make room.
    pub(crate) fn put(&self, key: K, ctx: RetryContext<E>) -> bool {
        let mut entries = self.lock();
        let mut evicted = false;
        if !entries.slots.contains_key(&key) && entries.slots.len() >= self.capacity {
            let oldest = entries
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.stamp)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.slots.remove(&oldest);
                evicted = true;
            }
        }
        let stamp = entries.next_stamp;
        entries.next_stamp += 1;
        entries.slots.insert(key, Slot { stamp, ctx });
        evicted
    }
}

impl<K, E> fmt::Debug for ContextCache<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextCache")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_removes_entry() {
        let cache = ContextCache::<&str, ()>::new(4);
        cache.put("a", RetryContext::new());
        assert!(cache.contains(&"a"));
        assert!(cache.take(&"a").is_some());
        assert!(!cache.contains(&"a"));
        assert!(cache.take(&"a").is_none());
    }

    #[test]
    fn test_evicts_longest_waiting_episode() {
        let cache = ContextCache::<u32, ()>::new(2);
        assert!(!cache.put(1, RetryContext::new()));
        assert!(!cache.put(2, RetryContext::new()));
        assert!(cache.put(3, RetryContext::new()));

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&1));
        assert!(cache.contains(&3));
    }

    #[test]
    fn test_restored_episode_counts_as_fresh() {
        let cache = ContextCache::<u32, ()>::new(2);
        cache.put(1, RetryContext::new());
        cache.put(2, RetryContext::new());
        let ctx = cache.take(&1).unwrap();
        cache.put(1, ctx);

        assert!(cache.put(3, RetryContext::new()));
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
    }

    #[test]
    fn test_replacing_does_not_evict() {
        let cache = ContextCache::<u32, ()>::new(1);
        assert!(!cache.put(1, RetryContext::new()));
        assert!(!cache.put(1, RetryContext::new()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        assert_eq!(ContextCache::<u32, ()>::new(0).capacity(), 1);
    }

    #[test]
    fn test_state_classifier() {
        let state = RetryState::new(1u64).with_classifier(|e: &i32| *e > 0);
        assert!(state.is_retryable(&5));
        assert!(!state.is_retryable(&-5));

        let default = RetryState::<u64, i32>::new(2);
        assert!(default.is_retryable(&-5));
    }

    #[test]
    fn test_state_debug_and_clone() {
        let state = RetryState::<_, ()>::new("k").with_force_refresh(true);
        let cloned = state.clone();
        assert!(cloned.force_refresh());
        assert!(format!("{:?}", cloned).contains("\"k\""));
    }
}
