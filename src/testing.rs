//! Test helpers for code that retries.
//!
//! [`RecordingSleeper`] replaces the timer so tests can assert on backoff
//! delays without waiting for them, and [`ScriptedOperation`] plays back a
//! fixed sequence of outcomes while counting invocations.
//!
//! # Examples
//!
//! ```rust
//! use secondwind::testing::{RecordingSleeper, ScriptedOperation};
//! use secondwind::{FixedBackoff, RetryTemplate};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let sleeper = RecordingSleeper::new();
//! let template = RetryTemplate::<&str>::builder()
//!     .max_attempts(3)
//!     .backoff(FixedBackoff::new(Duration::from_millis(250)))
//!     .sleeper(sleeper.clone())
//!     .build();
//!
//! let op = ScriptedOperation::new(vec![Err("busy"), Err("busy"), Ok(42)]);
//! let result = template.execute(|_ctx| op.call()).await;
//!
//! assert_eq!(result, Ok(42));
//! assert_eq!(op.calls(), 3);
//! assert_eq!(sleeper.delays(), vec![Duration::from_millis(250); 2]);
//! # });
//! ```

use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::sleeper::Sleeper;

/// A [`Sleeper`] that records each requested delay and returns immediately.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    /// Sleeper with an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Sum of the delays requested so far.
    pub fn total(&self) -> Duration {
        self.delays().into_iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
        self.delays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(delay);
        futures::future::ready(()).boxed()
    }
}

/// Plays back a scripted sequence of results.
///
/// Call `n` returns the `n`th scripted result; once the script runs out, the
/// last entry repeats.
///
/// # Panics
///
/// [`new`](Self::new) panics if the script is empty.
#[derive(Debug)]
pub struct ScriptedOperation<T, E> {
    script: Vec<Result<T, E>>,
    position: AtomicU32,
    counter: Option<Arc<AtomicU32>>,
}

impl<T: Clone, E: Clone> ScriptedOperation<T, E> {
    /// Operation that plays back `script`.
    pub fn new(script: Vec<Result<T, E>>) -> Self {
        assert!(!script.is_empty(), "a scripted operation needs at least one result");
        Self {
            script,
            position: AtomicU32::new(0),
            counter: None,
        }
    }

    /// Fail `failures` times with `failure`, then succeed with `value`.
    pub fn failing(failures: usize, failure: E, value: T) -> Self {
        let mut script = vec![Err(failure); failures];
        script.push(Ok(value));
        Self::new(script)
    }

    /// Also count invocations on `counter`, which may be shared between
    /// operations.
    pub fn with_counter(mut self, counter: Arc<AtomicU32>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Invoke the operation.
    pub fn call(&self) -> Ready<Result<T, E>> {
        if let Some(counter) = &self.counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        let n = self.position.fetch_add(1, Ordering::SeqCst) as usize;
        let index = n.min(self.script.len() - 1);
        ready(self.script[index].clone())
    }

    /// Invocations of this operation so far.
    pub fn calls(&self) -> u32 {
        self.position.load(Ordering::SeqCst)
    }
}
