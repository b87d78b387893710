//! Waiting between attempts.
//!
//! The engine never sleeps directly; it asks a [`Sleeper`] for a future that
//! completes after the delay and races it against its cancellation token.
//! Swapping the sleeper lets tests observe delays without waiting for them.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

/// Produces a future that completes after a delay.
pub trait Sleeper: Send + Sync {
    /// Wait for `delay`.
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()>;
}

impl<S: Sleeper + ?Sized> Sleeper for std::sync::Arc<S> {
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
        (**self).sleep(delay)
    }
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(delay).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_sleeper_waits() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(5)).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
