//! Circuit breaker around flaky lookups.
//!
//! CLOSED passes calls through. After `failure_threshold` consecutive
//! failures the breaker goes OPEN and rejects calls immediately. Once the
//! cooldown elapses, exactly one trial call is permitted (HALF_OPEN); a
//! success closes the breaker, a failure reopens it.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open")]
    Open,
    #[error(transparent)]
    Inner(E),
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Execute `op` under breaker protection.
    pub fn call<T, E>(&mut self, op: impl FnOnce() -> Result<T, E>) -> Result<T, BreakerError<E>> {
        if self.state == BreakerState::Open {
            if self.cooldown_elapsed() {
                debug!("circuit breaker cooldown elapsed, permitting trial call");
                self.state = BreakerState::HalfOpen;
            } else {
                return Err(BreakerError::Open);
            }
        }

        match op() {
            Ok(value) => {
                if self.state == BreakerState::HalfOpen {
                    debug!("trial call succeeded, closing circuit breaker");
                }
                self.state = BreakerState::Closed;
                self.failure_count = 0;
                Ok(value)
            }
            Err(e) => {
                self.failure_count += 1;
                self.last_failure = Some(Instant::now());

                if self.state == BreakerState::HalfOpen
                    || self.failure_count >= self.failure_threshold
                {
                    if self.state != BreakerState::Open {
                        warn!(
                            failures = self.failure_count,
                            "circuit breaker opened"
                        );
                    }
                    self.state = BreakerState::Open;
                }
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        match self.last_failure {
            Some(at) => at.elapsed() >= self.cooldown,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing() -> Result<(), &'static str> {
        Err("boom")
    }

    #[test]
    fn test_opens_after_threshold_and_rejects_immediately() {
        let mut breaker = CircuitBreaker::new(5, Duration::from_secs(60));

        for _ in 0..5 {
            let r = breaker.call(failing);
            assert!(matches!(r, Err(BreakerError::Inner(_))));
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // 6th call rejected without invoking the wrapped function.
        let mut invoked = false;
        let r = breaker.call(|| -> Result<(), &'static str> {
            invoked = true;
            Ok(())
        });
        assert!(matches!(r, Err(BreakerError::Open)));
        assert!(!invoked);
    }

    #[test]
    fn test_single_trial_after_cooldown_closes_on_success() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_millis(5));

        let _ = breaker.call(failing);
        let _ = breaker.call(failing);
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(10));

        let mut calls = 0;
        let r = breaker.call(|| -> Result<(), &'static str> {
            calls += 1;
            Ok(())
        });
        assert!(r.is_ok());
        assert_eq!(calls, 1);
        assert_eq!(breaker.state(), BreakerState::Closed);

        // Failure counter was reset: one new failure does not reopen.
        let _ = breaker.call(failing);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_failed_trial_reopens() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(50));

        let _ = breaker.call(failing);
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(60));
        let r = breaker.call(failing);
        assert!(matches!(r, Err(BreakerError::Inner(_))));
        assert_eq!(breaker.state(), BreakerState::Open);

        // And back to rejecting without a call.
        let r = breaker.call(|| -> Result<(), &'static str> { unreachable!() });
        assert!(matches!(r, Err(BreakerError::Open)));
    }
}
