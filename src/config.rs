//! Plain-data retry configuration.
//!
//! [`RetryConfig`] describes a template in numbers (attempts, delays in
//! milliseconds, cache size) so it can live in a settings file. With the
//! `serde` feature enabled it derives `Serialize` and `Deserialize`; absent
//! fields take their defaults.
//!
//! # Example
//!
//! ```rust
//! use secondwind::{BackoffConfig, RetryConfig};
//!
//! let config = RetryConfig {
//!     max_attempts: 5,
//!     backoff: BackoffConfig::resolve(2000, 0, 2.0, false),
//!     ..RetryConfig::default()
//! };
//! config.validate().unwrap();
//!
//! let template = config.builder::<std::io::Error>().build();
//! assert_eq!(template.cache_capacity(), 4096);
//! ```

use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::backoff::{
    BackoffStrategy, ExponentialBackoff, ExponentialRandomBackoff, FixedBackoff, NoBackoff,
    UniformRandomBackoff,
};
use crate::error::ConfigError;
use crate::policy::MaxAttemptsPolicy;
use crate::template::RetryTemplateBuilder;

/// Settings for a [`RetryTemplate`](crate::RetryTemplate).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryConfig {
    /// Total invocations per episode, first attempt included.
    pub max_attempts: u32,
    /// Wait between attempts.
    pub backoff: BackoffConfig,
    /// Stateful episodes kept at once.
    pub cache_capacity: usize,
    /// Label attached to every episode.
    pub name: Option<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MaxAttemptsPolicy::<()>::DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffConfig::default(),
            cache_capacity: 4096,
            name: None,
        }
    }
}

impl RetryConfig {
    /// Check the settings without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroMaxAttempts);
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        self.backoff.validate()
    }

    /// A template builder pre-populated from these settings.
    ///
    /// Listeners, a custom sleeper and cancellation can still be added.
    pub fn builder<E: 'static>(&self) -> RetryTemplateBuilder<E> {
        let builder = RetryTemplateBuilder::new()
            .max_attempts(self.max_attempts)
            .shared_backoff(self.backoff.strategy())
            .cache_capacity(self.cache_capacity);
        match &self.name {
            Some(name) => builder.name(name.clone()),
            None => builder,
        }
    }
}

/// Backoff settings, in milliseconds.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum BackoffConfig {
    /// Retry immediately.
    #[default]
    None,
    /// Same delay every time.
    Fixed {
        /// Delay between attempts.
        #[cfg_attr(feature = "serde", serde(default = "defaults::fixed_delay_ms"))]
        delay_ms: u64,
    },
    /// Random delay in `[min_ms, max_ms]`.
    UniformRandom {
        /// Lower bound.
        #[cfg_attr(feature = "serde", serde(default = "defaults::uniform_min_ms"))]
        min_ms: u64,
        /// Upper bound.
        #[cfg_attr(feature = "serde", serde(default = "defaults::uniform_max_ms"))]
        max_ms: u64,
    },
    /// Geometrically growing delay.
    Exponential {
        /// First delay.
        #[cfg_attr(feature = "serde", serde(default = "defaults::initial_ms"))]
        initial_ms: u64,
        /// Growth factor per retry.
        #[cfg_attr(feature = "serde", serde(default = "defaults::multiplier"))]
        multiplier: f64,
        /// Cap on any single delay.
        #[cfg_attr(feature = "serde", serde(default = "defaults::max_ms"))]
        max_ms: u64,
    },
    /// Geometrically growing delay stretched by a random factor.
    ExponentialRandom {
        /// First delay.
        #[cfg_attr(feature = "serde", serde(default = "defaults::initial_ms"))]
        initial_ms: u64,
        /// Growth factor per retry.
        #[cfg_attr(feature = "serde", serde(default = "defaults::multiplier"))]
        multiplier: f64,
        /// Cap on any single delay.
        #[cfg_attr(feature = "serde", serde(default = "defaults::max_ms"))]
        max_ms: u64,
    },
}

impl BackoffConfig {
    /// Pick a backoff from the four knobs of a declarative retry annotation.
    ///
    /// Zero means "not set" for `delay_ms`, `max_delay_ms` and `multiplier`.
    ///
    /// - a positive `multiplier` gives exponential backoff starting at
    ///   `delay_ms` (default 100), randomised when `random` is set, capped at
    ///   `max_delay_ms` when that exceeds `delay_ms` (default 30 s);
    /// - otherwise `max_delay_ms > delay_ms > 0` gives a uniform random delay
    ///   between the two;
    /// - otherwise a fixed `delay_ms` (default 1000).
    ///
    /// ```rust
    /// use secondwind::BackoffConfig;
    ///
    /// assert_eq!(
    ///     BackoffConfig::resolve(500, 2000, 0.0, false),
    ///     BackoffConfig::UniformRandom { min_ms: 500, max_ms: 2000 }
    /// );
    /// assert_eq!(
    ///     BackoffConfig::resolve(0, 0, 0.0, false),
    ///     BackoffConfig::Fixed { delay_ms: 1000 }
    /// );
    /// ```
    pub fn resolve(delay_ms: u64, max_delay_ms: u64, multiplier: f64, random: bool) -> Self {
        if multiplier > 0.0 {
            let initial_ms = if delay_ms > 0 {
                delay_ms
            } else {
                defaults::initial_ms()
            };
            let max_ms = if delay_ms > 0 && max_delay_ms > delay_ms {
                max_delay_ms
            } else {
                defaults::max_ms()
            };
            return if random {
                Self::ExponentialRandom {
                    initial_ms,
                    multiplier,
                    max_ms,
                }
            } else {
                Self::Exponential {
                    initial_ms,
                    multiplier,
                    max_ms,
                }
            };
        }

        if delay_ms > 0 && max_delay_ms > delay_ms {
            return Self::UniformRandom {
                min_ms: delay_ms,
                max_ms: max_delay_ms,
            };
        }

        Self::Fixed {
            delay_ms: if delay_ms > 0 {
                delay_ms
            } else {
                defaults::fixed_delay_ms()
            },
        }
    }

    /// Check bounds and multipliers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Self::None | Self::Fixed { .. } => Ok(()),
            Self::UniformRandom { min_ms, max_ms } => check_bounds(min_ms, max_ms),
            Self::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            }
            | Self::ExponentialRandom {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                if !multiplier.is_finite() || multiplier < 0.0 {
                    return Err(ConfigError::InvalidMultiplier(multiplier));
                }
                check_bounds(initial_ms, max_ms)
            }
        }
    }

    /// The strategy these settings describe.
    pub fn strategy(&self) -> Arc<dyn BackoffStrategy> {
        match *self {
            Self::None => Arc::new(NoBackoff),
            Self::Fixed { delay_ms } => Arc::new(FixedBackoff::new(ms(delay_ms))),
            Self::UniformRandom { min_ms, max_ms } => {
                Arc::new(UniformRandomBackoff::new(ms(min_ms), ms(max_ms)))
            }
            Self::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => Arc::new(
                ExponentialBackoff::new(ms(initial_ms), multiplier).with_max_delay(ms(max_ms)),
            ),
            Self::ExponentialRandom {
                initial_ms,
                multiplier,
                max_ms,
            } => Arc::new(
                ExponentialRandomBackoff::new(ms(initial_ms), multiplier)
                    .with_max_delay(ms(max_ms)),
            ),
        }
    }
}

fn check_bounds(min_ms: u64, max_ms: u64) -> Result<(), ConfigError> {
    if min_ms > max_ms {
        Err(ConfigError::InvertedBounds { min_ms, max_ms })
    } else {
        Ok(())
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

mod defaults {
    use super::*;

    pub(super) fn fixed_delay_ms() -> u64 {
        FixedBackoff::DEFAULT_DELAY.as_millis() as u64
    }

    #[cfg_attr(not(feature = "serde"), allow(dead_code))]
    pub(super) fn uniform_min_ms() -> u64 {
        UniformRandomBackoff::DEFAULT_MIN.as_millis() as u64
    }

    #[cfg_attr(not(feature = "serde"), allow(dead_code))]
    pub(super) fn uniform_max_ms() -> u64 {
        UniformRandomBackoff::DEFAULT_MAX.as_millis() as u64
    }

    pub(super) fn initial_ms() -> u64 {
        ExponentialBackoff::DEFAULT_INITIAL.as_millis() as u64
    }

    #[cfg_attr(not(feature = "serde"), allow(dead_code))]
    pub(super) fn multiplier() -> f64 {
        ExponentialBackoff::DEFAULT_MULTIPLIER
    }

    pub(super) fn max_ms() -> u64 {
        ExponentialBackoff::DEFAULT_MAX_DELAY.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffState;

    #[test]
    fn test_resolve_exponential() {
        assert_eq!(
            BackoffConfig::resolve(2000, 0, 2.0, false),
            BackoffConfig::Exponential {
                initial_ms: 2000,
                multiplier: 2.0,
                max_ms: 30_000,
            }
        );
        assert_eq!(
            BackoffConfig::resolve(0, 5000, 1.5, true),
            BackoffConfig::ExponentialRandom {
                initial_ms: 100,
                multiplier: 1.5,
                max_ms: 30_000,
            }
        );
        assert_eq!(
            BackoffConfig::resolve(200, 5000, 3.0, false),
            BackoffConfig::Exponential {
                initial_ms: 200,
                multiplier: 3.0,
                max_ms: 5000,
            }
        );
    }

    #[test]
    fn test_resolve_fixed_when_max_not_above_delay() {
        assert_eq!(
            BackoffConfig::resolve(3000, 1000, 0.0, false),
            BackoffConfig::Fixed { delay_ms: 3000 }
        );
    }

    #[test]
    fn test_validate() {
        assert_eq!(RetryConfig::default().validate(), Ok(()));

        let zero_cache = RetryConfig {
            cache_capacity: 0,
            ..RetryConfig::default()
        };
        assert_eq!(zero_cache.validate(), Err(ConfigError::ZeroCacheCapacity));

        let inverted = BackoffConfig::UniformRandom {
            min_ms: 900,
            max_ms: 100,
        };
        assert_eq!(
            inverted.validate(),
            Err(ConfigError::InvertedBounds {
                min_ms: 900,
                max_ms: 100
            })
        );

        let negative = BackoffConfig::Exponential {
            initial_ms: 100,
            multiplier: -2.0,
            max_ms: 1000,
        };
        assert_eq!(
            negative.validate(),
            Err(ConfigError::InvalidMultiplier(-2.0))
        );
    }

    #[test]
    fn test_strategy_from_config() {
        let strategy = BackoffConfig::Exponential {
            initial_ms: 100,
            multiplier: 2.0,
            max_ms: 250,
        }
        .strategy();
        let mut state = strategy.start();
        let delays: Vec<_> = (0..3).map(|_| strategy.next_delay(&mut state)).collect();
        assert_eq!(delays, vec![ms(100), ms(200), ms(250)]);

        let none = BackoffConfig::None.strategy();
        assert_eq!(none.next_delay(&mut BackoffState::new()), Duration::ZERO);
    }

    #[test]
    fn test_builder_carries_settings() {
        let config = RetryConfig {
            max_attempts: 7,
            cache_capacity: 16,
            name: Some("billing".to_string()),
            ..RetryConfig::default()
        };
        let template = config.builder::<String>().build();
        assert_eq!(template.name(), Some("billing"));
        assert_eq!(template.cache_capacity(), 16);
    }
}
