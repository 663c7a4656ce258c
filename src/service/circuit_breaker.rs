use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_FAILURE_THRESHOLD: usize = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    #[error("order service circuit breaker is open")]
    CircuitOpen,
}

/// Shared by every order in a run so a struggling service is given room to
/// recover instead of being hammered by each order's own retries.
///
/// After `failure_threshold` consecutive service-side failures the breaker
/// opens for `cooldown`, then lets a single trial request through.
#[derive(Debug)]
pub struct ServiceCircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: usize,
    cooldown: Duration,
}

impl Default for ServiceCircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl ServiceCircuitBreaker {
    pub fn new(failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            failure_threshold: failure_threshold.max(1),
            cooldown: if cooldown.is_zero() {
                Duration::from_secs(1)
            } else {
                cooldown
            },
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let guard = self.lock();
        CircuitBreakerSnapshot {
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            opened_at: guard.opened_at,
        }
    }

    /// Admits a request, moving Open to HalfOpen once the cooldown elapsed.
    pub fn before_request(&self) -> Result<CircuitState, CircuitBreakerError> {
        let mut state = self.lock();

        if state.state == CircuitState::Open {
            let cooled = state
                .opened_at
                .is_some_and(|opened_at| opened_at.elapsed() >= self.cooldown);
            if !cooled {
                return Err(CircuitBreakerError::CircuitOpen);
            }
            Self::transition(&mut state, CircuitState::HalfOpen);
            state.trial_in_flight = false;
        }

        if state.state == CircuitState::HalfOpen {
            if state.trial_in_flight {
                return Err(CircuitBreakerError::CircuitOpen);
            }
            state.trial_in_flight = true;
        }

        Ok(state.state)
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        state.trial_in_flight = false;
        state.consecutive_failures = 0;
        if state.state == CircuitState::HalfOpen {
            state.opened_at = None;
            Self::transition(&mut state, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.trial_in_flight = false;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let reopen = state.state == CircuitState::HalfOpen
            || (state.state == CircuitState::Closed
                && state.consecutive_failures >= self.failure_threshold);
        if reopen {
            state.opened_at = Some(Instant::now());
            Self::transition(&mut state, CircuitState::Open);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(state: &mut BreakerState, next: CircuitState) {
        if state.state != next {
            tracing::warn!(
                previous = ?state.state,
                next = ?next,
                consecutive_failures = state.consecutive_failures,
                "order service circuit breaker state changed"
            );
            state.state = next;
        }
    }
}
