/*!
 * # Circuit Breaker
 *
 * Guards outbound calls to the payment gateway so a provider outage fails
 * order creation fast instead of holding database transactions open until
 * every request times out.
 */

use crate::errors::ServiceError;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected without calling the service
    Open,
    /// A limited number of trial requests are let through
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait before moving from Open to HalfOpen
    pub timeout: Duration,
    /// Successes needed in HalfOpen to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            state: Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Runs `f` under circuit breaker protection. The lock is never held
    /// across the awaited call.
    pub async fn call<F, Fut, R>(&self, f: F) -> Result<R, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, ServiceError>>,
    {
        if !self.can_execute() {
            warn!(breaker = self.name, "circuit open, rejecting call");
            return Err(ServiceError::CircuitBreakerOpen);
        }

        match f().await {
            Ok(result) => {
                self.on_success();
                Ok(result)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitBreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn can_execute(&self) -> bool {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match state.last_failure_time {
                Some(last_failure) if last_failure.elapsed() >= self.config.timeout => {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    true
                }
                _ => false,
            },
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.last_failure_time = None;
                }
            }
            CircuitState::Closed | CircuitState::Open => {
                state.state = CircuitState::Closed;
                state.failure_count = 0;
            }
        }
    }

    fn on_failure(&self) {
        let mut state = self.lock();

        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                warn!(
                    breaker = self.name,
                    failures = state.failure_count,
                    "circuit opened"
                );
                state.state = CircuitState::Open;
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.success_count = 0;
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn breaker(threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout: Duration::from_millis(timeout_ms),
                success_threshold: 1,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), ServiceError> {
        cb.call(|| async { Err::<(), _>(ServiceError::ExternalServiceError("down".into())) })
            .await
    }

    #[tokio::test]
    async fn stays_closed_on_success() {
        let cb = breaker(3, 100);
        let result = cb.call(|| async { Ok::<_, ServiceError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_and_rejects() {
        let cb = breaker(2, 10_000);

        assert_matches!(fail(&cb).await, Err(ServiceError::ExternalServiceError(_)));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_matches!(fail(&cb).await, Err(ServiceError::ExternalServiceError(_)));
        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb.call(|| async { Ok::<_, ServiceError>(1) }).await;
        assert_matches!(result, Err(ServiceError::CircuitBreakerOpen));
    }

    #[tokio::test]
    async fn half_open_trial_closes_circuit() {
        let cb = breaker(1, 10);
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = cb.call(|| async { Ok::<_, ServiceError>("ok") }).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
