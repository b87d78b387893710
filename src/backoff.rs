//! Backoff strategies: how long to wait before the next attempt.
//!
//! A [`BackoffStrategy`] is immutable configuration shared by every episode.
//! All per-episode progress lives in a [`BackoffState`] created by
//! [`BackoffStrategy::start`]. Strategies only compute delays; the engine does
//! the waiting.
//!
//! # Strategies
//!
//! - [`NoBackoff`]: retry immediately
//! - [`FixedBackoff`]: the same delay every time
//! - [`UniformRandomBackoff`]: a random delay in `[min, max]`
//! - [`ExponentialBackoff`]: `initial * multiplier^(n-1)`, capped
//! - [`ExponentialRandomBackoff`]: exponential, stretched by a random factor
//!
//! Randomness comes from a generator owned by the episode's state, so
//! independent callers never share one. Seed it to make tests deterministic.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Per-episode backoff progress.
#[derive(Debug, Clone)]
pub struct BackoffState {
    attempt: u32,
    previous: Option<Duration>,
    rng: Option<StdRng>,
}

impl BackoffState {
    /// State whose random source is seeded from the OS on first use.
    pub fn new() -> Self {
        Self {
            attempt: 0,
            previous: None,
            rng: None,
        }
    }

    /// State with a deterministic random source.
    pub fn seeded(seed: u64) -> Self {
        Self {
            attempt: 0,
            previous: None,
            rng: Some(StdRng::seed_from_u64(seed)),
        }
    }

    /// Number of delays computed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The most recently computed delay.
    pub fn previous(&self) -> Option<Duration> {
        self.previous
    }

    fn advance(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    fn record(&mut self, delay: Duration) -> Duration {
        self.previous = Some(delay);
        delay
    }

    fn rng(&mut self) -> &mut StdRng {
        self.rng.get_or_insert_with(StdRng::from_os_rng)
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the delay before each retry.
///
/// # Examples
///
/// ```rust
/// use secondwind::{BackoffStrategy, ExponentialBackoff};
/// use std::time::Duration;
///
/// let backoff = ExponentialBackoff::new(Duration::from_millis(5000), 2.0);
/// let mut state = backoff.start();
///
/// assert_eq!(backoff.next_delay(&mut state), Duration::from_millis(5000));
/// assert_eq!(backoff.next_delay(&mut state), Duration::from_millis(10000));
/// assert_eq!(backoff.next_delay(&mut state), Duration::from_millis(20000));
/// ```
pub trait BackoffStrategy: Send + Sync {
    /// Create the state for a new episode.
    fn start(&self) -> BackoffState {
        BackoffState::new()
    }

    /// Compute the next delay and advance the state.
    fn next_delay(&self, state: &mut BackoffState) -> Duration;
}

impl<B: BackoffStrategy + ?Sized> BackoffStrategy for Box<B> {
    fn start(&self) -> BackoffState {
        (**self).start()
    }

    fn next_delay(&self, state: &mut BackoffState) -> Duration {
        (**self).next_delay(state)
    }
}

impl<B: BackoffStrategy + ?Sized> BackoffStrategy for std::sync::Arc<B> {
    fn start(&self) -> BackoffState {
        (**self).start()
    }

    fn next_delay(&self, state: &mut BackoffState) -> Duration {
        (**self).next_delay(state)
    }
}

/// Retry without waiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoBackoff;

impl BackoffStrategy for NoBackoff {
    fn next_delay(&self, state: &mut BackoffState) -> Duration {
        state.advance();
        state.record(Duration::ZERO)
    }
}

/// Wait the same amount of time before every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    /// Default delay between attempts.
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

    /// Wait `delay` before each retry.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// The configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DELAY)
    }
}

impl BackoffStrategy for FixedBackoff {
    fn next_delay(&self, state: &mut BackoffState) -> Duration {
        state.advance();
        state.record(self.delay)
    }
}

/// Wait a random time drawn uniformly from `[min, max]`.
///
/// If `max <= min` every delay is `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformRandomBackoff {
    min: Duration,
    max: Duration,
    seed: Option<u64>,
}

impl UniformRandomBackoff {
    /// Default lower bound.
    pub const DEFAULT_MIN: Duration = Duration::from_millis(500);
    /// Default upper bound.
    pub const DEFAULT_MAX: Duration = Duration::from_millis(1500);

    /// Draw delays from `[min, max]`.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            seed: None,
        }
    }

    /// Seed each episode's random source with `seed`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Lower bound.
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound.
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for UniformRandomBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN, Self::DEFAULT_MAX)
    }
}

impl BackoffStrategy for UniformRandomBackoff {
    fn start(&self) -> BackoffState {
        seeded_state(self.seed)
    }

    fn next_delay(&self, state: &mut BackoffState) -> Duration {
        state.advance();
        if self.max <= self.min {
            return state.record(self.min);
        }
        let min = self.min.as_nanos() as u64;
        let max = self.max.as_nanos() as u64;
        let nanos = state.rng().random_range(min..=max);
        state.record(Duration::from_nanos(nanos))
    }
}

/// Delays that grow geometrically: `initial * multiplier^(n-1)` for the n-th
/// retry, never exceeding `max_delay`.
///
/// Multipliers below 1.0 are treated as 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl ExponentialBackoff {
    /// Default first delay.
    pub const DEFAULT_INITIAL: Duration = Duration::from_millis(100);
    /// Default growth factor.
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;
    /// Default cap.
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

    /// Start at `initial` and multiply by `multiplier` each retry.
    pub fn new(initial: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            multiplier: sanitize_multiplier(multiplier),
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }

    /// Cap every delay at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// First delay.
    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// Growth factor.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Upper bound on any delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// The uncapped-then-capped delay for the n-th retry (1-indexed).
    fn delay_for(&self, n: u32) -> Duration {
        let exponent = i32::try_from(n.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        scale_capped(self.initial, factor, self.max_delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INITIAL, Self::DEFAULT_MULTIPLIER)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_delay(&self, state: &mut BackoffState) -> Duration {
        let n = state.advance();
        state.record(self.delay_for(n))
    }
}

/// Exponential backoff stretched by a random factor.
///
/// Each delay is the exponential delay multiplied by `1 + r`, where `r` is
/// drawn uniformly from `[0, jitter]`, then capped at `max_delay`. The default
/// jitter is `multiplier - 1`, so a delay lands between the plain exponential
/// value and the next one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialRandomBackoff {
    inner: ExponentialBackoff,
    jitter: f64,
    seed: Option<u64>,
}

impl ExponentialRandomBackoff {
    /// Randomised exponential backoff from `initial` and `multiplier`.
    pub fn new(initial: Duration, multiplier: f64) -> Self {
        Self::from_exponential(ExponentialBackoff::new(initial, multiplier))
    }

    /// Add randomness to an existing exponential configuration.
    pub fn from_exponential(inner: ExponentialBackoff) -> Self {
        Self {
            jitter: inner.multiplier - 1.0,
            inner,
            seed: None,
        }
    }

    /// Cap every delay at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.inner = self.inner.with_max_delay(max_delay);
        self
    }

    /// Override the upper bound of the random stretch factor.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() { jitter.max(0.0) } else { 0.0 };
        self
    }

    /// Seed each episode's random source with `seed`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The underlying deterministic schedule.
    pub fn exponential(&self) -> &ExponentialBackoff {
        &self.inner
    }

    /// Upper bound of the random stretch factor.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }
}

impl Default for ExponentialRandomBackoff {
    fn default() -> Self {
        Self::from_exponential(ExponentialBackoff::default())
    }
}

impl BackoffStrategy for ExponentialRandomBackoff {
    fn start(&self) -> BackoffState {
        seeded_state(self.seed)
    }

    fn next_delay(&self, state: &mut BackoffState) -> Duration {
        let n = state.advance();
        let base = self.inner.delay_for(n);
        let r = if self.jitter > 0.0 {
            state.rng().random_range(0.0..=self.jitter)
        } else {
            0.0
        };
        state.record(scale_capped(base, 1.0 + r, self.inner.max_delay))
    }
}

fn seeded_state(seed: Option<u64>) -> BackoffState {
    match seed {
        Some(seed) => BackoffState::seeded(seed),
        None => BackoffState::new(),
    }
}

fn sanitize_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() {
        multiplier.max(1.0)
    } else {
        1.0
    }
}

/// `base * factor`, saturating at `cap`.
fn scale_capped(base: Duration, factor: f64, cap: Duration) -> Duration {
    let nanos = base.as_nanos() as f64 * factor;
    if !nanos.is_finite() || nanos >= cap.as_nanos() as f64 {
        return cap;
    }
    Duration::from_nanos(nanos.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays<B: BackoffStrategy>(backoff: &B, n: usize) -> Vec<Duration> {
        let mut state = backoff.start();
        (0..n).map(|_| backoff.next_delay(&mut state)).collect()
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_no_backoff_is_zero() {
        assert_eq!(delays(&NoBackoff, 3), vec![Duration::ZERO; 3]);
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = FixedBackoff::new(ms(1000));
        assert_eq!(delays(&backoff, 4), vec![ms(1000); 4]);
        assert_eq!(FixedBackoff::default().delay(), ms(1000));
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        let backoff = ExponentialBackoff::new(ms(5000), 2.0);
        assert_eq!(delays(&backoff, 3), vec![ms(5000), ms(10000), ms(20000)]);
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let backoff = ExponentialBackoff::new(ms(5000), 2.0).with_max_delay(ms(12000));
        assert_eq!(
            delays(&backoff, 4),
            vec![ms(5000), ms(10000), ms(12000), ms(12000)]
        );
    }

    #[test]
    fn test_exponential_backoff_saturates_without_overflow() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), 10.0);
        let mut state = backoff.start();
        for _ in 0..500 {
            assert!(backoff.next_delay(&mut state) <= ExponentialBackoff::DEFAULT_MAX_DELAY);
        }
        assert_eq!(state.attempt(), 500);
    }

    #[test]
    fn test_exponential_multiplier_floor() {
        let backoff = ExponentialBackoff::new(ms(100), 0.5);
        assert_eq!(backoff.multiplier(), 1.0);
        assert_eq!(delays(&backoff, 3), vec![ms(100); 3]);

        assert_eq!(ExponentialBackoff::new(ms(100), f64::NAN).multiplier(), 1.0);
    }

    #[test]
    fn test_uniform_random_within_bounds() {
        let backoff = UniformRandomBackoff::new(ms(20), ms(40));
        for delay in delays(&backoff, 200) {
            assert!(delay >= ms(20) && delay <= ms(40), "{:?}", delay);
        }
    }

    #[test]
    fn test_uniform_random_degenerate_bounds() {
        let backoff = UniformRandomBackoff::new(ms(50), ms(10));
        assert_eq!(delays(&backoff, 3), vec![ms(50); 3]);
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let backoff = UniformRandomBackoff::default().with_seed(7);
        assert_eq!(delays(&backoff, 10), delays(&backoff, 10));

        let backoff = ExponentialRandomBackoff::default().with_seed(7);
        assert_eq!(delays(&backoff, 10), delays(&backoff, 10));
    }

    #[test]
    fn test_exponential_random_between_steps() {
        let backoff = ExponentialRandomBackoff::new(ms(100), 2.0).with_max_delay(ms(100_000));
        let mut state = backoff.start();
        for n in 1..=8u32 {
            let low = ms(100 * 2u64.pow(n - 1));
            let delay = backoff.next_delay(&mut state);
            assert!(delay >= low && delay <= low * 2, "retry {}: {:?}", n, delay);
        }
    }

    #[test]
    fn test_exponential_random_without_jitter_is_exponential() {
        let backoff = ExponentialRandomBackoff::new(ms(100), 3.0).with_jitter(0.0);
        assert_eq!(delays(&backoff, 3), vec![ms(100), ms(300), ms(900)]);
    }

    #[test]
    fn test_state_tracks_previous_delay() {
        let backoff = ExponentialBackoff::new(ms(10), 2.0);
        let mut state = backoff.start();
        assert!(state.previous().is_none());
        backoff.next_delay(&mut state);
        backoff.next_delay(&mut state);
        assert_eq!(state.previous(), Some(ms(20)));
        assert_eq!(state.attempt(), 2);
    }

    #[test]
    fn test_boxed_strategy() {
        let backoff: Box<dyn BackoffStrategy> = Box::new(FixedBackoff::new(ms(5)));
        assert_eq!(delays(&backoff, 2), vec![ms(5); 2]);
    }
}
