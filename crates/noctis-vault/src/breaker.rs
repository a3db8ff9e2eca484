use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Closed → Open after `failure_threshold` consecutive failures; Open →
/// HalfOpen after `cooldown`; HalfOpen admits a single probe whose outcome
/// closes or reopens the circuit.
#[derive(Debug)]
enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

/// Per-endpoint circuit breaker. The only in-process mutable state the
/// vault client carries; everything else lives at the vault or in the DB.
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            state: Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Whether a call may proceed right now. While open, flips to half-open
    /// once the cooldown has elapsed and admits that caller as the probe.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::Closed { .. } => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open { since } => {
                if since.elapsed() >= self.cooldown {
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        *state = BreakerState::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    *state = BreakerState::Open {
                        since: Instant::now(),
                    };
                } else {
                    *state = BreakerState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            // A failed half-open probe reopens for a fresh cooldown.
            BreakerState::HalfOpen => {
                *state = BreakerState::Open {
                    since: Instant::now(),
                };
            }
            BreakerState::Open { .. } => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock().unwrap(), BreakerState::Open { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow());
    }

    #[test]
    fn success_resets_the_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        // Cooldown of zero: the next check admits a probe.
        assert!(breaker.allow());
        // Only one probe until it resolves.
        assert!(!breaker.allow());
        breaker.record_success();
        assert!(breaker.allow());
    }

    #[test]
    fn half_open_probe_reopens_on_failure() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure();
        assert!(!breaker.allow());

        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(breaker.is_open());
    }
}
