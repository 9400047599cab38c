//! Retry and circuit breaking.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use pretty_assertions::assert_eq;
use tokio::sync::Notify;

use sinistre::{
    Error, Result,
    resilience::{CircuitBreaker, CircuitState, ResiliencePolicy, RetryPolicy},
    settings::ResilienceSettings,
};

fn quick_retry() -> RetryPolicy {
    RetryPolicy::exponential(Duration::from_millis(1), 2.0, Duration::from_millis(500))
}

/// Counts calls and fails the first `failures` of them with `error`.
async fn attempt(calls: &AtomicUsize, failures: usize, error: Error) -> Result<&'static str> {
    let call = calls.fetch_add(1, Ordering::SeqCst);
    match call < failures {
        true => Err(error),
        false => Ok("done"),
    }
}

#[tokio::test]
async fn no_policy_runs_once() {
    let calls = AtomicUsize::new(0);
    let outcome = ResiliencePolicy::none()
        .run(|| attempt(&calls, 1, Error::Broker("down".to_owned())))
        .await;
    assert!(matches!(outcome, Err(Error::Broker(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test)]
async fn transient_failures_are_retried() {
    let calls = AtomicUsize::new(0);
    let outcome = ResiliencePolicy::none()
        .with_retry(quick_retry())
        .run(|| attempt(&calls, 3, Error::Store("timeout".to_owned())))
        .await;
    assert_eq!(outcome.expect("fourth attempt succeeds"), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let calls = AtomicUsize::new(0);
    let outcome = ResiliencePolicy::none()
        .with_retry(quick_retry())
        .run(|| attempt(&calls, 5, Error::Serialization("bad json".to_owned())))
        .await;
    assert!(matches!(outcome, Err(Error::Serialization(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retrying_gives_up_after_the_elapsed_budget() {
    let calls = AtomicUsize::new(0);
    let outcome = ResiliencePolicy::none()
        .with_retry(RetryPolicy::exponential(
            Duration::from_millis(5),
            2.0,
            Duration::from_millis(50),
        ))
        .run(|| attempt(&calls, usize::MAX, Error::ReadModel("down".to_owned())))
        .await;
    assert!(matches!(outcome, Err(Error::ReadModel(_))));
    assert!(calls.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn breaker_opens_after_consecutive_failures() {
    let breaker = Arc::new(CircuitBreaker::new("broker", 2, Duration::from_secs(60)));
    let policy = ResiliencePolicy::none().with_circuit_breaker(breaker.clone());
    let calls = AtomicUsize::new(0);

    for _ in 0..2 {
        let outcome = policy
            .run(|| attempt(&calls, usize::MAX, Error::Broker("down".to_owned())))
            .await;
        assert!(matches!(outcome, Err(Error::Broker(_))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let outcome = policy
        .run(|| attempt(&calls, 0, Error::Broker("down".to_owned())))
        .await;
    let err = outcome.expect_err("rejected while open");
    assert!(matches!(err, Error::CircuitOpen(_)));
    assert_eq!(err.kind(), "CIRCUIT_OPEN");
    assert_eq!(calls.load(Ordering::SeqCst), 2, "open breaker skips the call");
}

#[tokio::test]
async fn breaker_half_opens_then_closes_on_success() {
    let breaker = Arc::new(CircuitBreaker::new("store", 1, Duration::from_millis(20)));
    let policy = ResiliencePolicy::none().with_circuit_breaker(breaker.clone());
    let calls = AtomicUsize::new(0);

    let _ = policy
        .run(|| attempt(&calls, 1, Error::Store("down".to_owned())))
        .await;
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let outcome = policy
        .run(|| attempt(&calls, 1, Error::Store("down".to_owned())))
        .await;
    assert_eq!(outcome.expect("trial call succeeds"), "done");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn failed_trial_call_reopens_the_breaker() {
    let breaker = Arc::new(CircuitBreaker::new("store", 3, Duration::from_millis(20)));
    let policy = ResiliencePolicy::none().with_circuit_breaker(breaker.clone());
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let _ = policy
            .run(|| attempt(&calls, usize::MAX, Error::Store("down".to_owned())))
            .await;
    }
    tokio::time::sleep(Duration::from_millis(40)).await;

    let _ = policy
        .run(|| attempt(&calls, usize::MAX, Error::Store("down".to_owned())))
        .await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn half_open_breaker_admits_a_single_trial_call() {
    let breaker = Arc::new(CircuitBreaker::new("broker", 1, Duration::from_millis(20)));
    let policy = ResiliencePolicy::none().with_circuit_breaker(breaker.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    let _ = policy
        .run(|| attempt(&calls, 1, Error::Broker("down".to_owned())))
        .await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let release = Arc::new(Notify::new());
    let trial = {
        let policy = policy.clone();
        let calls = calls.clone();
        let release = release.clone();
        tokio::spawn(async move {
            policy
                .run(|| {
                    let calls = calls.clone();
                    let release = release.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok::<_, Error>("done")
                    }
                })
                .await
        })
    };
    while calls.load(Ordering::SeqCst) < 2 {
        tokio::task::yield_now().await;
    }

    let others: Vec<_> = (0..9)
        .map(|_| {
            let policy = policy.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                policy
                    .run(|| attempt(&calls, 0, Error::Broker("down".to_owned())))
                    .await
            })
        })
        .collect();
    for other in others {
        let err = other.await.expect("join").expect_err("rejected during the trial");
        assert!(matches!(err, Error::CircuitOpen(_)));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2, "only the trial reached the backend");

    release.notify_one();
    assert_eq!(trial.await.expect("join").expect("trial succeeds"), "done");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn permanent_failure_during_the_trial_closes_the_breaker() {
    let breaker = Arc::new(CircuitBreaker::new("store", 1, Duration::from_millis(20)));
    let policy = ResiliencePolicy::none().with_circuit_breaker(breaker.clone());
    let calls = AtomicUsize::new(0);

    let _ = policy
        .run(|| attempt(&calls, 1, Error::Store("down".to_owned())))
        .await;
    tokio::time::sleep(Duration::from_millis(40)).await;

    let outcome = policy
        .run(|| attempt(&calls, usize::MAX, Error::Serialization("bad json".to_owned())))
        .await;
    assert!(matches!(outcome, Err(Error::Serialization(_))));
    assert_eq!(breaker.state(), CircuitState::Closed);

    let outcome = policy
        .run(|| attempt(&calls, 0, Error::Store("down".to_owned())))
        .await;
    assert_eq!(outcome.expect("calls go through again"), "done");
}

#[tokio::test]
async fn abandoned_trial_gives_way_after_another_open_period() {
    let breaker = Arc::new(CircuitBreaker::new("store", 1, Duration::from_millis(20)));
    let policy = ResiliencePolicy::none().with_circuit_breaker(breaker.clone());
    let calls = AtomicUsize::new(0);

    let _ = policy
        .run(|| attempt(&calls, 1, Error::Store("down".to_owned())))
        .await;
    tokio::time::sleep(Duration::from_millis(40)).await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(5),
        policy.run(|| std::future::pending::<Result<&'static str>>()),
    )
    .await;
    assert!(abandoned.is_err(), "the trial never finished");

    let err = policy
        .run(|| attempt(&calls, 0, Error::Store("down".to_owned())))
        .await
        .expect_err("trial still pending");
    assert!(matches!(err, Error::CircuitOpen(_)));

    tokio::time::sleep(Duration::from_millis(40)).await;
    let outcome = policy
        .run(|| attempt(&calls, 0, Error::Store("down".to_owned())))
        .await;
    assert_eq!(outcome.expect("new trial succeeds"), "done");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn permanent_failures_do_not_trip_the_breaker() {
    let breaker = Arc::new(CircuitBreaker::new("store", 1, Duration::from_secs(60)));
    let policy = ResiliencePolicy::none().with_circuit_breaker(breaker.clone());
    let calls = AtomicUsize::new(0);

    let _ = policy
        .run(|| attempt(&calls, 1, Error::Cancelled))
        .await;
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn policy_follows_settings() {
    assert!(
        ResiliencePolicy::from_settings("broker", &ResilienceSettings::default())
            .circuit_breaker()
            .is_none()
    );

    let settings = ResilienceSettings {
        retry_enabled: true,
        breaker_enabled: true,
        breaker_failure_threshold: 3,
        ..ResilienceSettings::default()
    };
    let policy = ResiliencePolicy::from_settings("broker", &settings);
    let breaker = policy.circuit_breaker().expect("breaker enabled");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn default_retry_schedule() {
    assert_eq!(
        RetryPolicy::default(),
        RetryPolicy::exponential(Duration::from_secs(2), 2.0, Duration::from_secs(14))
    );
}
