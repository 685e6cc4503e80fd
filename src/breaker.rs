//! Circuit breaker (C12) guarding the graph/managed-store backends.
//!
//! Three states: `Closed` (calls pass through), `Open` (calls fail fast
//! until the cooloff elapses), `HalfOpen` (one trial call is allowed through;
//! success closes the breaker, failure reopens it). State transitions are
//! guarded by a `Mutex` rather than atomics since they're multi-field and
//! must be observed together.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooloff: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            cooloff: Duration::from_secs(config.cooloff_secs),
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call should be attempted right now. `Open` within the
    /// cooloff window rejects; past the cooloff it transitions to
    /// `HalfOpen` and allows exactly one trial call through.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            State::Closed => true,
            State::HalfOpen => true,
            State::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooloff {
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.state = State::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
            }
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            State::Open => {}
        }
    }

    pub fn state(&self) -> State {
        self.inner.lock().expect("breaker mutex poisoned").state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, cooloff_secs: u64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            cooloff_secs,
        }
    }

    #[test]
    fn opens_after_consecutive_failures_and_blocks_calls() {
        let breaker = CircuitBreaker::new(&config(3, 60));
        assert!(breaker.allow());
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), State::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), State::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn half_open_trial_success_closes_the_breaker() {
        let breaker = CircuitBreaker::new(&config(1, 0));
        breaker.record_failure();
        assert_eq!(breaker.state(), State::Open);
        assert!(breaker.allow()); // cooloff=0 elapses immediately -> HalfOpen
        assert_eq!(breaker.state(), State::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), State::Closed);
    }

    #[test]
    fn half_open_trial_failure_reopens() {
        let breaker = CircuitBreaker::new(&config(1, 0));
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.state(), State::Open);
    }
}
