//! Lifecycle observation for retry episodes.
//!
//! Listeners see every episode start, every failed attempt and every episode
//! end. They observe only: an `Err` returned from a callback is logged by the
//! engine and has no effect on the episode's outcome.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::RetryContext;
use crate::error::ListenerError;

/// How an episode ended.
#[derive(Debug)]
pub enum EpisodeOutcome<'a, E> {
    /// An attempt succeeded.
    Succeeded,
    /// The recovery produced the result.
    Recovered,
    /// The episode gave up and returned this failure to the caller.
    Failed(&'a E),
    /// The recovery itself failed with this error.
    RecoveryFailed(&'a E),
}

impl<E> EpisodeOutcome<'_, E> {
    /// True for [`Succeeded`](Self::Succeeded) and [`Recovered`](Self::Recovered).
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Recovered)
    }

    /// The failure handed back to the caller, if any.
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::Failed(e) | Self::RecoveryFailed(e) => Some(*e),
            Self::Succeeded | Self::Recovered => None,
        }
    }
}

/// Observer of retry episodes.
///
/// All callbacks default to doing nothing.
///
/// # Example
///
/// ```rust
/// use secondwind::{ListenerError, RetryContext, RetryListener};
///
/// struct AuditListener;
///
/// impl RetryListener<std::io::Error> for AuditListener {
///     fn on_attempt_failed(
///         &self,
///         ctx: &RetryContext<std::io::Error>,
///         failure: &std::io::Error,
///     ) -> Result<(), ListenerError> {
///         eprintln!("attempt {} failed: {}", ctx.attempt_count(), failure);
///         Ok(())
///     }
/// }
/// ```
pub trait RetryListener<E>: Send + Sync {
    /// Called once, before the first attempt of an episode.
    fn on_episode_start(&self, ctx: &RetryContext<E>) -> Result<(), ListenerError> {
        let _ = ctx;
        Ok(())
    }

    /// Called after each failed attempt, before the retry decision.
    fn on_attempt_failed(&self, ctx: &RetryContext<E>, failure: &E) -> Result<(), ListenerError> {
        let _ = (ctx, failure);
        Ok(())
    }

    /// Called once, when the episode has its final outcome.
    fn on_episode_end(
        &self,
        ctx: &RetryContext<E>,
        outcome: &EpisodeOutcome<'_, E>,
    ) -> Result<(), ListenerError> {
        let _ = (ctx, outcome);
        Ok(())
    }
}

impl<E, L: RetryListener<E> + ?Sized> RetryListener<E> for Arc<L> {
    fn on_episode_start(&self, ctx: &RetryContext<E>) -> Result<(), ListenerError> {
        (**self).on_episode_start(ctx)
    }

    fn on_attempt_failed(&self, ctx: &RetryContext<E>, failure: &E) -> Result<(), ListenerError> {
        (**self).on_attempt_failed(ctx, failure)
    }

    fn on_episode_end(
        &self,
        ctx: &RetryContext<E>,
        outcome: &EpisodeOutcome<'_, E>,
    ) -> Result<(), ListenerError> {
        (**self).on_episode_end(ctx, outcome)
    }
}

/// Logs episode events through `tracing`.
///
/// # Log Levels
///
/// - episode start: DEBUG
/// - failed attempt: WARN
/// - success: INFO after retries, DEBUG on the first attempt
/// - recovery: INFO
/// - failure handed to the caller: ERROR
#[derive(Debug, Clone)]
pub struct TracingListener {
    operation: String,
}

impl TracingListener {
    /// Listener that tags every event with `operation`.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    /// The operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl Default for TracingListener {
    fn default() -> Self {
        Self::new("retry")
    }
}

impl<E: fmt::Display> RetryListener<E> for TracingListener {
    fn on_episode_start(&self, ctx: &RetryContext<E>) -> Result<(), ListenerError> {
        tracing::debug!(
            operation = %self.operation,
            episode = ctx.name().unwrap_or_default(),
            "retry episode started"
        );
        Ok(())
    }

    fn on_attempt_failed(&self, ctx: &RetryContext<E>, failure: &E) -> Result<(), ListenerError> {
        tracing::warn!(
            operation = %self.operation,
            attempt = ctx.attempt_count(),
            error = %failure,
            "attempt failed"
        );
        Ok(())
    }

    fn on_episode_end(
        &self,
        ctx: &RetryContext<E>,
        outcome: &EpisodeOutcome<'_, E>,
    ) -> Result<(), ListenerError> {
        let elapsed_ms = ctx.elapsed().as_millis() as u64;
        match outcome {
            EpisodeOutcome::Succeeded if ctx.attempt_count() > 1 => tracing::info!(
                operation = %self.operation,
                attempts = ctx.attempt_count(),
                elapsed_ms,
                "succeeded after retry"
            ),
            EpisodeOutcome::Succeeded => tracing::debug!(
                operation = %self.operation,
                elapsed_ms,
                "succeeded on first attempt"
            ),
            EpisodeOutcome::Recovered => tracing::info!(
                operation = %self.operation,
                attempts = ctx.attempt_count(),
                elapsed_ms,
                "recovered after retries"
            ),
            EpisodeOutcome::Failed(e) | EpisodeOutcome::RecoveryFailed(e) => tracing::error!(
                operation = %self.operation,
                attempts = ctx.attempt_count(),
                cancelled = ctx.is_cancelled(),
                error = %e,
                "retry episode failed"
            ),
        }
        Ok(())
    }
}

/// Counts episode events. Useful for metrics and tests.
#[derive(Debug, Default)]
pub struct StatsListener {
    started: AtomicU64,
    succeeded: AtomicU64,
    recovered: AtomicU64,
    aborted: AtomicU64,
    failed_attempts: AtomicU64,
}

impl StatsListener {
    /// Listener with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Episodes started.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Episodes that ended with a successful attempt.
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Episodes whose result came from recovery.
    pub fn recovered(&self) -> u64 {
        self.recovered.load(Ordering::SeqCst)
    }

    /// Episodes that handed a failure back to the caller.
    pub fn aborted(&self) -> u64 {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Failed attempts across all episodes.
    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts.load(Ordering::SeqCst)
    }
}

impl<E> RetryListener<E> for StatsListener {
    fn on_episode_start(&self, _ctx: &RetryContext<E>) -> Result<(), ListenerError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_attempt_failed(&self, _ctx: &RetryContext<E>, _failure: &E) -> Result<(), ListenerError> {
        self.failed_attempts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_episode_end(
        &self,
        _ctx: &RetryContext<E>,
        outcome: &EpisodeOutcome<'_, E>,
    ) -> Result<(), ListenerError> {
        let counter = match outcome {
            EpisodeOutcome::Succeeded => &self.succeeded,
            EpisodeOutcome::Recovered => &self.recovered,
            EpisodeOutcome::Failed(_) | EpisodeOutcome::RecoveryFailed(_) => &self.aborted,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_listener_counts() {
        let stats = StatsListener::new();
        let ctx = RetryContext::<String>::new();
        let err = "boom".to_string();

        stats.on_episode_start(&ctx).unwrap();
        stats.on_attempt_failed(&ctx, &err).unwrap();
        stats.on_attempt_failed(&ctx, &err).unwrap();
        stats
            .on_episode_end(&ctx, &EpisodeOutcome::Failed(&err))
            .unwrap();
        stats.on_episode_start(&ctx).unwrap();
        stats
            .on_episode_end(&ctx, &EpisodeOutcome::Recovered)
            .unwrap();

        assert_eq!(stats.started(), 2);
        assert_eq!(stats.failed_attempts(), 2);
        assert_eq!(stats.aborted(), 1);
        assert_eq!(stats.recovered(), 1);
        assert_eq!(stats.succeeded(), 0);
    }

    #[test]
    fn test_outcome_helpers() {
        let err = 7;
        assert!(EpisodeOutcome::<i32>::Succeeded.is_success());
        assert!(EpisodeOutcome::<i32>::Recovered.is_success());
        assert!(!EpisodeOutcome::Failed(&err).is_success());
        assert_eq!(EpisodeOutcome::RecoveryFailed(&err).failure(), Some(&7));
        assert_eq!(EpisodeOutcome::<i32>::Succeeded.failure(), None);
    }

    #[test]
    fn test_tracing_listener_creation() {
        assert_eq!(TracingListener::new("download").operation(), "download");
        assert_eq!(TracingListener::default().operation(), "retry");
    }

    #[test]
    fn test_arc_listener_forwards() {
        let stats = Arc::new(StatsListener::new());
        let ctx = RetryContext::<()>::new();
        RetryListener::<()>::on_episode_start(&stats, &ctx).unwrap();
        assert_eq!(stats.started(), 1);
    }
}
