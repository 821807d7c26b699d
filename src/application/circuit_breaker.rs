//! Circuit breaker guarding the shared store.
//!
//! Consecutive store failures open the circuit. While it is open the
//! controller does not contact the store at all and applies its
//! `BackendFailurePolicy` straight away. After the recovery timeout a single
//! trial call is let through (half-open); its outcome closes or reopens the circuit.

use crate::application::ports::Clock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// The store is healthy
    Closed = 0,
    /// The store is failing and is not contacted
    Open = 1,
    /// One trial call is allowed to test recovery
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait before probing the store again
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Tracks the health of the shared store.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    last_failure_nanos: AtomicU64,
    trial_in_flight: AtomicBool,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a circuit breaker that reads time from `clock`.
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            last_failure_nanos: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
            config,
            clock,
            epoch,
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// The breaker's configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether the store may be contacted now.
    ///
    /// Moves an open circuit to half-open once the recovery timeout elapsed.
    /// While half-open only the caller holding the trial call is allowed through,
    /// until it records its outcome.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.claim_trial(),
            CircuitState::Open => {
                let elapsed = self.clock.now().saturating_duration_since(self.last_failure());
                if elapsed < self.config.recovery_timeout {
                    return false;
                }

                let half_opened = self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                if half_opened {
                    tracing::info!("Shared store circuit half-open, testing recovery");
                }
                self.state() == CircuitState::HalfOpen && self.claim_trial()
            }
        }
    }

    fn claim_trial(&self) -> bool {
        self.trial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record a successful store interaction.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);
        let recovered = self
            .state
            .compare_exchange(
                CircuitState::HalfOpen as u8,
                CircuitState::Closed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if recovered {
            tracing::info!("Shared store recovered, circuit closed");
        }
    }

    /// Record a failed store interaction.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        let nanos = self
            .clock
            .now()
            .saturating_duration_since(self.epoch)
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX);
        self.last_failure_nanos.store(nanos, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);

        let should_open = match self.state() {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= u64::from(self.config.failure_threshold),
            CircuitState::Open => false,
        };

        if should_open
            && self.state.swap(CircuitState::Open as u8, Ordering::AcqRel)
                != CircuitState::Open as u8
        {
            tracing::info!(
                consecutive_failures = failures,
                recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                "Shared store circuit opened"
            );
        }
    }

    fn last_failure(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.last_failure_nanos.load(Ordering::Acquire))
    }

    /// Number of consecutive failures.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;
    use std::thread;

    fn breaker(threshold: u32, recovery: Duration) -> (CircuitBreaker, MockClock) {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: recovery,
        };
        (CircuitBreaker::new(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_initial_state() {
        let (cb, _) = breaker(5, Duration::from_secs(30));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_failure_threshold() {
        let (cb, _) = breaker(3, Duration::from_secs(1));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.consecutive_failures(), 3);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_successful_trial_closes_circuit() {
        let (cb, clock) = breaker(2, Duration::from_millis(100));
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.allow_request());

        clock.advance(Duration::from_millis(150));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_failed_trial_reopens_circuit() {
        let (cb, clock) = breaker(2, Duration::from_millis(100));
        cb.record_failure();
        cb.record_failure();

        clock.advance(Duration::from_millis(150));
        assert!(cb.allow_request());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_half_open_admits_one_caller() {
        let (cb, clock) = breaker(1, Duration::from_millis(100));
        cb.record_failure();
        clock.advance(Duration::from_millis(150));

        let allowed: Vec<bool> = (0..3).map(|_| cb.allow_request()).collect();
        assert_eq!(allowed, vec![true, false, false]);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert!(cb.allow_request());
        assert!(cb.allow_request());
    }

    #[test]
    fn test_concurrent_half_open_admits_one_caller() {
        let (cb, clock) = breaker(1, Duration::from_millis(100));
        cb.record_failure();
        clock.advance(Duration::from_millis(150));
        let cb = Arc::new(cb);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                thread::spawn(move || cb.allow_request())
            })
            .collect();
        let allowed = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(allowed, 1);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (cb, _) = breaker(5, Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reset() {
        let (cb, _) = breaker(1, Duration::from_secs(30));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_concurrent_failures() {
        let (cb, _) = breaker(5, Duration::from_secs(30));
        let cb = Arc::new(cb);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cb = Arc::clone(&cb);
                thread::spawn(move || cb.record_failure())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cb.consecutive_failures(), 10);
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
