//! Error types for configuring the retry engine.
//!
//! The engine itself never wraps the failures of the operations it runs: an
//! exhausted episode hands back the operation's own error value. The types in
//! this module only describe problems with the engine's configuration and with
//! listeners.

use std::fmt;

/// Error returned by a [`RetryListener`](crate::RetryListener) callback.
///
/// Listener errors are logged by the engine and otherwise ignored.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned when a retry configuration is invalid.
///
/// # Examples
///
/// ```rust
/// use secondwind::{ConfigError, RetryConfig};
///
/// let config = RetryConfig {
///     max_attempts: 0,
///     ..RetryConfig::default()
/// };
///
/// assert_eq!(config.validate(), Err(ConfigError::ZeroMaxAttempts));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// `max_attempts` was zero; at least one attempt is always made.
    ZeroMaxAttempts,
    /// The stateful episode cache was given no room.
    ZeroCacheCapacity,
    /// A lower delay bound was larger than its upper bound.
    InvertedBounds {
        /// The configured lower bound in milliseconds.
        min_ms: u64,
        /// The configured upper bound in milliseconds.
        max_ms: u64,
    },
    /// A backoff multiplier was negative, NaN or infinite.
    InvalidMultiplier(f64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroMaxAttempts => write!(f, "max_attempts must be at least 1"),
            Self::ZeroCacheCapacity => write!(f, "cache_capacity must be at least 1"),
            Self::InvertedBounds { min_ms, max_ms } => write!(
                f,
                "delay lower bound {}ms exceeds upper bound {}ms",
                min_ms, max_ms
            ),
            Self::InvalidMultiplier(m) => write!(f, "invalid backoff multiplier: {}", m),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        assert!(ConfigError::ZeroMaxAttempts
            .to_string()
            .contains("max_attempts"));

        let inverted = ConfigError::InvertedBounds {
            min_ms: 500,
            max_ms: 100,
        };
        let display = inverted.to_string();
        assert!(display.contains("500ms"));
        assert!(display.contains("100ms"));

        assert!(ConfigError::InvalidMultiplier(-1.0)
            .to_string()
            .contains("-1"));
    }

    #[test]
    fn test_listener_error_from_str() {
        let err: ListenerError = "listener broke".into();
        assert_eq!(err.to_string(), "listener broke");
    }
}
