// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Resilience primitives (retry policy + circuit breaker).
//!
//! Composition order matters and is fixed by the callers: an outermost
//! total deadline, then the retry loop, with the breaker sitting closest to
//! the network call.

use rand::random;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Exponential backoff policy with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl RetryPolicy {
    /// Policy for the upstream analysis service.
    pub fn upstream() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Policy for the documentation service.
    pub fn docs() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Backoff delay before retrying after `attempt` failures (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let jittered = (base * jitter_factor).max(0.0);
        let clamped = jittered.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before the circuit closes.
    pub success_threshold: u32,
    /// How long the circuit stays open before admitting a trial call.
    pub recovery_window: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_window: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

/// Consecutive-failure circuit breaker.
///
/// Closed: calls pass, a success resets the counter, `failure_threshold`
/// consecutive failures open the circuit. Open: synthetic failure until the
/// recovery window elapses, then half-open. HalfOpen: trial calls pass;
/// `success_threshold` consecutive successes close the circuit, any failure
/// re-opens it.
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    config: CircuitConfig,
    failure_count: AtomicU32,
    success_count: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            config,
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
        }
    }

    /// Run `operation` through the breaker. When the circuit is open the
    /// operation is never invoked.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        let state = self.check_state().await;
        if let CircuitState::Open { until } = state {
            return Err(CircuitError::Open {
                retry_after: until.saturating_duration_since(Instant::now()),
            });
        }

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success().await,
            Err(_) => self.record_failure().await,
        }

        result.map_err(CircuitError::Inner)
    }

    /// Human-readable state label for health reporting.
    pub async fn state_label(&self) -> &'static str {
        match self.check_state().await {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }

    async fn check_state(&self) -> CircuitState {
        let mut state = self.state.write().await;
        if let CircuitState::Open { until } = *state {
            if Instant::now() >= until {
                *state = CircuitState::HalfOpen;
                self.success_count.store(0, Ordering::SeqCst);
            }
        }
        *state
    }

    async fn record_success(&self) {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    *state = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::SeqCst);
                }
            }
            CircuitState::Open { .. } => {}
        }
    }

    async fn record_failure(&self) {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    *state = CircuitState::Open {
                        until: Instant::now() + self.config.recovery_window,
                    };
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open {
                    until: Instant::now() + self.config.recovery_window,
                };
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::Open { .. } => {}
        }
    }
}

#[derive(Debug, Error)]
pub enum CircuitError<E: std::error::Error> {
    #[error("circuit breaker is open")]
    Open { retry_after: Duration },
    #[error(transparent)]
    Inner(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    fn breaker(failures: u32, successes: u32, window: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitConfig {
            failure_threshold: failures,
            success_threshold: successes,
            recovery_window: window,
        })
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), CircuitError<Boom>> {
        cb.call(|| async { Err::<(), _>(Boom) }).await.map(|_| ())
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), CircuitError<Boom>> {
        cb.call(|| async { Ok::<_, Boom>(()) }).await
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let cb = breaker(3, 2, Duration::from_secs(30));
        for _ in 0..3 {
            assert!(matches!(fail(&cb).await, Err(CircuitError::Inner(_))));
        }
        // Fourth call fails fast without invoking the operation.
        let mut invoked = false;
        let result = cb
            .call(|| {
                invoked = true;
                async { Ok::<_, Boom>(()) }
            })
            .await;
        assert!(matches!(result, Err(CircuitError::Open { .. })));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn success_resets_failure_counter() {
        let cb = breaker(3, 2, Duration::from_secs(30));
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        succeed(&cb).await.unwrap();
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        // Still closed: only two consecutive failures since the success.
        assert!(succeed(&cb).await.is_ok());
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let cb = breaker(2, 2, Duration::from_millis(20));
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        assert!(matches!(fail(&cb).await, Err(CircuitError::Open { .. })));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cb.state_label().await, "half-open");

        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state_label().await, "closed");
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = breaker(1, 2, Duration::from_millis(20));
        fail(&cb).await.ok();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cb.state_label().await, "half-open");
        fail(&cb).await.ok();
        assert_eq!(cb.state_label().await, "open");
    }

    #[tokio::test]
    async fn open_error_message_is_the_synthetic_failure() {
        let cb = breaker(1, 1, Duration::from_secs(30));
        fail(&cb).await.ok();
        let err = fail(&cb).await.unwrap_err();
        assert_eq!(err.to_string(), "circuit breaker is open");
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy::upstream();
        let d0 = policy.delay_for_attempt(0);
        let d10 = policy.delay_for_attempt(10);
        assert!(d0 >= Duration::from_millis(80));
        assert!(d0 <= Duration::from_millis(120));
        assert!(d10 <= policy.max_delay);
    }
}
