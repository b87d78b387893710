//! A flaky user service called through stateless and stateful retry.
//!
//! Run with: cargo run --example user_service

use secondwind::prelude::*;
use secondwind::{BackoffConfig, CircuitBreakerPolicy, RetryConfig};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct BusinessError(String);

impl fmt::Display for BusinessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BusinessError {}

/// Creates users over an RPC link that never works.
#[derive(Default)]
struct UserService {
    calls: AtomicU32,
}

impl UserService {
    async fn create_user(&self, username: &str) -> Result<String, BusinessError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(5)).await;
        if n == 1 {
            Err(BusinessError(format!("first RPC call for {} failed", username)))
        } else {
            Err(BusinessError(format!("RPC call {} failed", n)))
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let service = Arc::new(UserService::default());

    stateless(&service).await;
    stateful(&service).await;
    from_config(&service).await;
    circuit_breaker(&service).await;
}

/// Three attempts with a fixed pause, then a fallback value.
async fn stateless(service: &UserService) {
    let template = RetryTemplate::<BusinessError>::builder()
        .name("create-user")
        .max_attempts(3)
        .backoff(FixedBackoff::new(Duration::from_millis(200)))
        .listener(TracingListener::new("create-user"))
        .build();

    let result = template
        .execute_with_recovery(
            |ctx| {
                tracing::info!(attempt = ctx.attempt_count(), "calling user service");
                service.create_user("zhang-san")
            },
            |ctx| {
                let message = ctx
                    .last_failure()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                tracing::warn!(
                    attempts = ctx.attempt_count(),
                    %message,
                    "giving up on user service"
                );
                async { Ok(String::new()) }
            },
        )
        .await;

    tracing::info!(?result, "stateless episode finished");
}

/// One attempt per call; the caller repeats the call with the same key.
async fn stateful(service: &UserService) {
    let template = RetryTemplate::<BusinessError>::builder()
        .max_attempts(3)
        .listener(TracingListener::new("create-user-tx"))
        .build();
    let state = RetryState::new("MyKey".to_string());

    for call in 1.. {
        let result = template
            .execute_stateful_with_recovery(
                |_ctx| service.create_user("li-si"),
                |ctx| {
                    let attempts = ctx.attempt_count();
                    async move { Ok(format!("recovered after {} attempts", attempts)) }
                },
                &state,
            )
            .await;

        match result {
            Err(e) if template.is_pending(state.key()) => {
                tracing::info!(call, error = %e, "rolled back, retrying transaction");
            }
            other => {
                tracing::info!(call, ?other, "stateful episode finished");
                break;
            }
        }
    }
}

/// The same service under settings that could come from a config file.
async fn from_config(service: &UserService) {
    let config = RetryConfig {
        max_attempts: 3,
        backoff: BackoffConfig::resolve(100, 0, 2.0, false),
        ..RetryConfig::default()
    };
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid retry settings");
        return;
    }

    let template = config
        .builder::<BusinessError>()
        .listener(TracingListener::new("create-user-config"))
        .build();
    let result = template
        .execute(|_ctx| service.create_user("wang-wu"))
        .await;

    tracing::info!(?result, "configured episode finished");
}

/// Once the breaker opens, calls go straight to the fallback.
async fn circuit_breaker(service: &UserService) {
    let breaker = Arc::new(
        CircuitBreakerPolicy::new(MaxAttemptsPolicy::new(2))
            .with_reset_timeout(Duration::from_secs(20)),
    );
    let template = RetryTemplate::<BusinessError>::builder()
        .shared_retry_policy(breaker.clone())
        .listener(TracingListener::new("create-user-breaker"))
        .build();

    for call in 1..=3 {
        let result = template
            .execute_with_recovery(
                |_ctx| service.create_user("zhao-liu"),
                |ctx| {
                    let open = ctx.is_circuit_open();
                    async move { Ok(format!("fallback (circuit open: {})", open)) }
                },
            )
            .await;
        tracing::info!(call, open = breaker.is_open(), ?result, "breaker call finished");
    }
}
