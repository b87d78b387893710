//! Per-episode retry state.
//!
//! A [`RetryContext`] is created by the engine when an episode starts and is
//! handed to the operation, the policy, the listeners and finally the
//! recovery. In stateful mode the same context is cached between calls that
//! share a [`RetryState`](crate::RetryState) key.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Attribute key under which the engine accumulates the total time spent
/// waiting between attempts, stored as a [`Duration`].
pub const TOTAL_BACKOFF: &str = "secondwind.total_backoff";

/// Mutable record of one retry episode.
///
/// `attempt_count` counts invocations of the operation. It is bumped just
/// before each invocation, so when a policy is consulted after a failure it
/// equals the number of failures seen so far. It never goes down within an
/// episode.
///
/// # Examples
///
/// ```rust
/// use secondwind::RetryContext;
///
/// let mut ctx = RetryContext::<String>::new();
/// ctx.set_attribute("tenant", "acme".to_string());
///
/// assert_eq!(ctx.attempt_count(), 0);
/// assert!(ctx.last_failure().is_none());
/// assert_eq!(ctx.attribute::<String>("tenant").map(String::as_str), Some("acme"));
/// ```
pub struct RetryContext<E> {
    name: Option<Arc<str>>,
    attempt_count: u32,
    last_failure: Option<E>,
    started: Instant,
    exhausted: bool,
    recovered: bool,
    cancelled: bool,
    circuit_open: bool,
    attributes: HashMap<String, Box<dyn Any + Send + Sync>>,
    parent: Option<Arc<ParentContext>>,
}

impl<E> RetryContext<E> {
    /// Create a fresh context with no attempts recorded.
    pub fn new() -> Self {
        Self {
            name: None,
            attempt_count: 0,
            last_failure: None,
            started: Instant::now(),
            exhausted: false,
            recovered: false,
            cancelled: false,
            circuit_open: false,
            attributes: HashMap::new(),
            parent: None,
        }
    }

    pub(crate) fn with_name(mut self, name: Option<Arc<str>>) -> Self {
        self.name = name;
        self
    }

    pub(crate) fn with_parent(mut self, parent: Arc<ParentContext>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// The episode label configured on the engine, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of times the operation has been invoked in this episode.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// The most recent failure, if one has been recorded.
    pub fn last_failure(&self) -> Option<&E> {
        self.last_failure.as_ref()
    }

    /// Time elapsed since the episode started, on the tokio clock (which
    /// honours paused test time).
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// When the episode started.
    pub fn started(&self) -> Instant {
        self.started
    }

    /// True once the engine has decided not to try again.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// True if a recovery produced the episode's result.
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    /// True if a backoff wait was cut short by cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// True if an open circuit ended the episode before the operation ran.
    ///
    /// The last failure is then the one that opened the circuit.
    pub fn is_circuit_open(&self) -> bool {
        self.circuit_open
    }

    /// The enclosing episode, for nested retries.
    pub fn parent(&self) -> Option<&ParentContext> {
        self.parent.as_deref()
    }

    /// Look up a typed attribute.
    ///
    /// Returns `None` if the key is absent or holds a value of another type.
    pub fn attribute<T: Any>(&self, key: &str) -> Option<&T> {
        self.attributes.get(key)?.downcast_ref::<T>()
    }

    /// Look up a typed attribute for in-place modification.
    pub fn attribute_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.attributes.get_mut(key)?.downcast_mut::<T>()
    }

    /// Store an attribute, replacing any previous value under the key.
    pub fn set_attribute<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.attributes.insert(key.into(), Box::new(value));
    }

    /// Remove an attribute, returning it if it had the requested type.
    pub fn remove_attribute<T: Any>(&mut self, key: &str) -> Option<T> {
        let value = self.attributes.remove(key)?;
        value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Whether an attribute exists under the key, whatever its type.
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Snapshot this context as the parent of a nested episode.
    pub fn as_parent(&self) -> Arc<ParentContext> {
        Arc::new(ParentContext {
            name: self.name.clone(),
            attempt_count: self.attempt_count,
            parent: self.parent.clone(),
        })
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
    }

    pub(crate) fn record_failure(&mut self, failure: E) {
        self.last_failure = Some(failure);
    }

    pub(crate) fn take_last_failure(&mut self) -> Option<E> {
        self.last_failure.take()
    }

    pub(crate) fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub(crate) fn mark_recovered(&mut self) {
        self.recovered = true;
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub(crate) fn mark_circuit_open(&mut self) {
        self.circuit_open = true;
    }

    pub(crate) fn add_backoff(&mut self, delay: Duration) {
        match self.attribute_mut::<Duration>(TOTAL_BACKOFF) {
            Some(total) => *total = total.saturating_add(delay),
            None => self.set_attribute(TOTAL_BACKOFF, delay),
        }
    }
}

impl<E> Default for RetryContext<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: fmt::Debug> fmt::Debug for RetryContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.attributes.keys().collect();
        keys.sort();
        f.debug_struct("RetryContext")
            .field("name", &self.name)
            .field("attempt_count", &self.attempt_count)
            .field("last_failure", &self.last_failure)
            .field("elapsed", &self.started.elapsed())
            .field("exhausted", &self.exhausted)
            .field("recovered", &self.recovered)
            .field("cancelled", &self.cancelled)
            .field("circuit_open", &self.circuit_open)
            .field("attributes", &keys)
            .field("parent", &self.parent)
            .finish()
    }
}

/// Read-only snapshot of an enclosing episode.
///
/// Nested episodes see their parent through this snapshot; they never own or
/// modify the parent's context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentContext {
    name: Option<Arc<str>>,
    attempt_count: u32,
    parent: Option<Arc<ParentContext>>,
}

impl ParentContext {
    /// The parent episode's label.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The parent's attempt count when the nested episode started.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// The grandparent, if the parent was itself nested.
    pub fn parent(&self) -> Option<&ParentContext> {
        self.parent.as_deref()
    }

    /// Nesting depth: 1 for a top-level parent.
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |p| p.depth())
    }
}
