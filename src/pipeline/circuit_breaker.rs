// src/pipeline/circuit_breaker.rs

//! Circuit Breaker pattern implementation.
//!
//! Stops dispatching new fetches when the upstream keeps failing, so a
//! rate-limit window or an outage is not hammered for the rest of a run.
//!
//! > If **N** consecutive tasks end rate-limited or errored, the breaker
//! > opens and the run winds down as if a graceful stop had been requested.

use crate::models::TaskState;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker. `0` disables it.
    pub max_consecutive_failures: usize,
}

/// Result of feeding one task state to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerResult {
    /// Keep dispatching
    Closed { streak: usize },
    /// Threshold reached on this observation
    Tripped { streak: usize },
}

/// Consecutive-failure circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    streak: usize,
    tripped: bool,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            streak: 0,
            tripped: false,
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Record a task state. Reports `Tripped` exactly once, when the
    /// threshold is first reached.
    pub fn observe(&mut self, state: TaskState) -> CircuitBreakerResult {
        if state.is_failure() {
            self.streak += 1;
        } else {
            self.streak = 0;
        }

        let limit = self.config.max_consecutive_failures;
        if !self.tripped && limit > 0 && self.streak >= limit {
            self.tripped = true;
            log::error!(
                "Circuit breaker: TRIGGERED after {} consecutive failures; no new tasks will be dispatched",
                self.streak
            );
            return CircuitBreakerResult::Tripped {
                streak: self.streak,
            };
        }

        CircuitBreakerResult::Closed {
            streak: self.streak,
        }
    }
}
