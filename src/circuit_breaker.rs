//! # Circuit Breaker Module
//!
//! Circuit breaker for calls to the completion service. After repeated
//! failures the breaker opens and calls fail fast until the reset period has
//! passed, giving the upstream service time to recover.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RecoveryConfig;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Circuit breaker for completion-service calls
///
/// # State Machine
///
/// - **Closed**: Normal operation, requests pass through
/// - **Open**: Failure threshold reached, requests fail fast
/// - **Half-Open**: Reset period elapsed, the next request is let through
///
/// # Configuration
///
/// Uses `RecoveryConfig` for:
/// - `circuit_breaker_threshold`: Failures before opening (default: 5)
/// - `circuit_breaker_reset_secs`: Time before attempting reset (default: 60s)
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    threshold: u32,
    reset_after: Duration,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    ///
    /// ```rust
    /// use calorie_bot::config::RecoveryConfig;
    /// use calorie_bot::circuit_breaker::CircuitBreaker;
    ///
    /// let breaker = CircuitBreaker::new(&RecoveryConfig::default());
    /// assert!(!breaker.is_open());
    /// ```
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            threshold: config.circuit_breaker_threshold.max(1),
            reset_after: Duration::from_secs(config.circuit_breaker_reset_secs),
        }
    }

    /// Check if the breaker is open (blocking requests).
    ///
    /// Once the reset period has elapsed the failure count is cleared and the
    /// breaker closes again.
    pub fn is_open(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        if state.consecutive_failures < self.threshold {
            return false;
        }
        match state.last_failure {
            Some(last) if last.elapsed() < self.reset_after => true,
            _ => {
                *state = BreakerState::default();
                false
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.consecutive_failures += 1;
        state.last_failure = Some(Instant::now());
    }

    /// Record a successful call, closing the breaker
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        *state = BreakerState::default();
    }
}
