//! Property-based tests for backoff strategies and attempt limits

use proptest::prelude::*;
use secondwind::testing::{RecordingSleeper, ScriptedOperation};
use secondwind::{
    BackoffStrategy, CompositePolicy, ExponentialBackoff, ExponentialRandomBackoff,
    FixedBackoff, MaxAttemptsPolicy, RetryTemplate, UniformRandomBackoff,
};
use std::time::Duration;

fn delays(strategy: &dyn BackoffStrategy, n: usize) -> Vec<Duration> {
    let mut state = strategy.start();
    (0..n).map(|_| strategy.next_delay(&mut state)).collect()
}

proptest! {
    #[test]
    fn prop_exponential_is_monotonic_and_capped(
        initial_ms in 1u64..5_000,
        multiplier in 1.0f64..4.0,
        cap_ms in 1u64..60_000,
    ) {
        let cap = Duration::from_millis(cap_ms);
        let strategy = ExponentialBackoff::new(Duration::from_millis(initial_ms), multiplier)
            .with_max_delay(cap);

        let delays = delays(&strategy, 20);

        for pair in delays.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
        prop_assert!(delays.iter().all(|d| *d <= cap));
    }

    #[test]
    fn prop_uniform_random_stays_in_bounds(
        min_ms in 0u64..10_000,
        spread_ms in 0u64..10_000,
        seed in any::<u64>(),
    ) {
        let min = Duration::from_millis(min_ms);
        let max = Duration::from_millis(min_ms + spread_ms);
        let strategy = UniformRandomBackoff::new(min, max).with_seed(seed);

        for delay in delays(&strategy, 50) {
            prop_assert!(delay >= min && delay <= max);
        }
    }

    #[test]
    fn prop_exponential_random_never_below_plain_schedule(
        initial_ms in 1u64..1_000,
        multiplier in 1.0f64..3.0,
        seed in any::<u64>(),
    ) {
        let random = ExponentialRandomBackoff::new(Duration::from_millis(initial_ms), multiplier)
            .with_seed(seed);
        let cap = random.exponential().max_delay();

        let plain = delays(random.exponential(), 10);
        let stretched = delays(&random, 10);

        for (p, s) in plain.iter().zip(&stretched) {
            prop_assert!(s >= p);
            prop_assert!(*s <= cap);
        }
    }

    #[test]
    fn prop_seeded_strategies_are_reproducible(seed in any::<u64>()) {
        let strategy = ExponentialRandomBackoff::default().with_seed(seed);
        prop_assert_eq!(delays(&strategy, 8), delays(&strategy, 8));
    }

    #[test]
    fn prop_always_failing_runs_exactly_max_attempts(max_attempts in 1u32..20) {
        let sleeper = RecordingSleeper::new();
        let template = RetryTemplate::<&str>::builder()
            .max_attempts(max_attempts)
            .backoff(FixedBackoff::new(Duration::from_millis(5)))
            .sleeper(sleeper.clone())
            .build();
        let op = ScriptedOperation::<(), _>::new(vec![Err("nope")]);

        let result = tokio_test::block_on(template.execute(|_ctx| op.call()));

        prop_assert_eq!(result, Err("nope"));
        prop_assert_eq!(op.calls(), max_attempts);
        prop_assert_eq!(sleeper.delays().len() as u32, max_attempts - 1);
    }

    #[test]
    fn prop_eventual_success_after_k_failures(max_attempts in 1u32..10, failures in 0usize..10) {
        let template = RetryTemplate::<&str>::builder()
            .max_attempts(max_attempts)
            .build();
        let op = ScriptedOperation::failing(failures, "flaky", "ok");

        let result = tokio_test::block_on(template.execute(|_ctx| op.call()));

        if failures < max_attempts as usize {
            prop_assert_eq!(result, Ok("ok"));
            prop_assert_eq!(op.calls() as usize, failures + 1);
        } else {
            prop_assert_eq!(result, Err("flaky"));
            prop_assert_eq!(op.calls(), max_attempts);
        }
    }

    #[test]
    fn prop_composite_limits(a in 1u32..10, b in 1u32..10) {
        let run = |policy: CompositePolicy<&'static str>| {
            let template = RetryTemplate::<&str>::builder().retry_policy(policy).build();
            let op = ScriptedOperation::<(), _>::new(vec![Err("x")]);
            let _ = tokio_test::block_on(template.execute(|_ctx| op.call()));
            op.calls()
        };

        let pessimistic = CompositePolicy::pessimistic()
            .with(MaxAttemptsPolicy::new(a))
            .with(MaxAttemptsPolicy::new(b));
        let optimistic = CompositePolicy::optimistic()
            .with(MaxAttemptsPolicy::new(a))
            .with(MaxAttemptsPolicy::new(b));

        prop_assert_eq!(run(pessimistic), a.min(b));
        prop_assert_eq!(run(optimistic), a.max(b));
    }
}
