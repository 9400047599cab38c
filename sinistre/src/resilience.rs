//! Retry and circuit-breaking around infrastructure calls.
//!
//! Nothing in the core retries on its own: a [`ResiliencePolicy`] is opt-in
//! and wraps whichever store or broker call it is given. Only transient
//! errors ([`Error::is_transient`]) are retried or counted by the breaker.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use parking_lot::Mutex;
use tracing::warn;

use crate::{Error, Result, settings::ResilienceSettings};

/// Exponential retry schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    initial_interval: Duration,
    multiplier: f64,
    max_elapsed: Duration,
}

impl RetryPolicy {
    /// Retries after `initial_interval`, multiplying the wait by
    /// `multiplier` each time, until `max_elapsed` has passed.
    pub fn exponential(initial_interval: Duration, multiplier: f64, max_elapsed: Duration) -> Self {
        Self {
            initial_interval,
            multiplier,
            max_elapsed,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_elapsed)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build()
    }
}

impl Default for RetryPolicy {
    /// Three retries: after 2s, 4s and 8s.
    fn default() -> Self {
        Self::exponential(Duration::from_secs(2), 2.0, Duration::from_secs(14))
    }
}

/// Observable state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls go through.
    Closed,
    /// Calls are rejected until the open period ends.
    Open,
    /// The open period ended. One trial call goes through and its outcome
    /// closes or reopens the breaker; other calls are rejected meanwhile.
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Breaker {
    Closed { failures: u32 },
    Open { until: Instant },
    /// A trial call started at `since` and has not reported back.
    Trial { since: Instant },
}

/// Opens after consecutive transient failures and rejects calls while open.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    open_for: Duration,
    state: Mutex<Breaker>,
}

impl CircuitBreaker {
    /// Creates a closed breaker that opens for `open_for` after
    /// `failure_threshold` consecutive transient failures.
    pub fn new(name: impl Into<String>, failure_threshold: u32, open_for: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            open_for,
            state: Mutex::new(Breaker::Closed { failures: 0 }),
        }
    }

    /// Current state. An open breaker whose period has ended reports
    /// half-open.
    pub fn state(&self) -> CircuitState {
        match *self.state.lock() {
            Breaker::Closed { .. } => CircuitState::Closed,
            Breaker::Open { until } if Instant::now() < until => CircuitState::Open,
            Breaker::Open { .. } | Breaker::Trial { .. } => CircuitState::HalfOpen,
        }
    }

    fn rejected(&self) -> Error {
        Error::CircuitOpen(format!(
            "{} rejected the call after repeated failures",
            self.name
        ))
    }

    fn acquire(&self) -> Result<()> {
        let mut state = self.state.lock();
        let now = Instant::now();
        match *state {
            Breaker::Closed { .. } => Ok(()),
            Breaker::Open { until } if now < until => Err(self.rejected()),
            // A trial that never reported back (its caller was dropped) gives
            // way to a new one after another open period.
            Breaker::Trial { since } if now < since + self.open_for => Err(self.rejected()),
            Breaker::Open { .. } | Breaker::Trial { .. } => {
                *state = Breaker::Trial { since: now };
                Ok(())
            }
        }
    }

    fn record<T>(&self, outcome: &Result<T>) {
        let mut state = self.state.lock();
        let trial = matches!(*state, Breaker::Trial { .. });
        match outcome {
            Err(e) if e.is_transient() => {
                let failures = match *state {
                    Breaker::Closed { failures } => failures + 1,
                    Breaker::Open { .. } | Breaker::Trial { .. } => self.failure_threshold,
                };
                if failures >= self.failure_threshold {
                    warn!(breaker = %self.name, open_for = ?self.open_for, "circuit opened");
                    *state = Breaker::Open {
                        until: Instant::now() + self.open_for,
                    };
                } else {
                    *state = Breaker::Closed { failures };
                }
            }
            // The backend answered, even if with a permanent error.
            Ok(_) => *state = Breaker::Closed { failures: 0 },
            Err(_) if trial => *state = Breaker::Closed { failures: 0 },
            Err(_) => {}
        }
    }
}

/// Optional retry and circuit breaking, applied together.
#[derive(Debug, Clone, Default)]
pub struct ResiliencePolicy {
    retry: Option<RetryPolicy>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl ResiliencePolicy {
    /// A policy that runs each call exactly once.
    pub fn none() -> Self {
        Self::default()
    }

    /// Retries transient failures on the given schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Guards calls with a breaker. The breaker may be shared by several
    /// policies.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Builds the policy described by `settings`; `name` labels the breaker.
    pub fn from_settings(name: &str, settings: &ResilienceSettings) -> Self {
        let mut policy = Self::none();
        if settings.retry_enabled {
            policy = policy.with_retry(RetryPolicy::exponential(
                Duration::from_millis(settings.retry_initial_interval_ms),
                settings.retry_multiplier,
                Duration::from_millis(settings.retry_max_elapsed_ms),
            ));
        }
        if settings.breaker_enabled {
            policy = policy.with_circuit_breaker(Arc::new(CircuitBreaker::new(
                name,
                settings.breaker_failure_threshold,
                Duration::from_millis(settings.breaker_open_ms),
            )));
        }
        policy
    }

    /// The breaker guarding this policy, if any.
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Runs `operation` under the policy.
    ///
    /// With a breaker, the whole retry sequence counts as one call.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(breaker) = &self.breaker {
            breaker.acquire()?;
        }

        let outcome = match &self.retry {
            Some(retry) => {
                backoff::future::retry(retry.backoff(), || {
                    let attempt = operation();
                    async move { attempt.await.map_err(classify) }
                })
                .await
            }
            None => operation().await,
        };

        if let Some(breaker) = &self.breaker {
            breaker.record(&outcome);
        }
        outcome
    }
}

fn classify(error: Error) -> backoff::Error<Error> {
    if error.is_transient() {
        warn!(error = %error, "transient failure, retrying");
        backoff::Error::transient(error)
    } else {
        backoff::Error::permanent(error)
    }
}
