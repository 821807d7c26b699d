//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// Mock clock for testing.
///
/// Both readings start at fixed points and only move when the test advances
/// them, so TTL expiry can be exercised without sleeping.
///
/// # Examples
///
/// ```
/// use dynamic_timeout::infrastructure::mocks::MockClock;
/// use dynamic_timeout::application::ports::Clock;
/// use std::time::Duration;
///
/// let clock = MockClock::new();
/// let start = clock.now();
/// let wall = clock.system_now();
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), start + Duration::from_secs(10));
/// assert_eq!(clock.system_now(), wall + Duration::from_secs(10));
/// ```
///
/// All clones share the same underlying offset, so advancing time in one
/// clone affects all clones.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    wall_start: SystemTime,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a mock clock at the current real time.
    pub fn new() -> Self {
        Self::starting_at(Instant::now(), SystemTime::now())
    }

    /// Create a mock clock starting at the given readings.
    pub fn starting_at(start: Instant, wall_start: SystemTime) -> Self {
        Self {
            start,
            wall_start,
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut offset = self
            .offset
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        *offset += duration;
    }

    fn offset(&self) -> Duration {
        *self
            .offset
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.offset()
    }

    fn system_now(&self) -> SystemTime {
        self.wall_start + self.offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock() {
        let start = Instant::now();
        let wall = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let clock = MockClock::starting_at(start, wall);

        assert_eq!(clock.now(), start);
        assert_eq!(clock.system_now(), wall);

        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now(), start + Duration::from_secs(10));
        assert_eq!(clock.system_now(), wall + Duration::from_secs(10));
    }

    #[test]
    fn test_clones_share_time() {
        let clock = MockClock::new();
        let start = clock.now();
        let clone = clock.clone();

        std::thread::spawn(move || clone.advance(Duration::from_secs(5)))
            .join()
            .unwrap();

        assert_eq!(clock.now(), start + Duration::from_secs(5));
    }
}
