//! Clock adapters for time operations.
//!
//! Provides `SystemClock` for production use. See `MockClock` (in
//! `crate::infrastructure::mocks`) for a controllable test clock, available
//! with the `test-helpers` feature or in test builds.

use crate::application::ports::Clock;
use std::time::{Instant, SystemTime};

/// System clock backed by `Instant::now()` and `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_now(&self) -> SystemTime {
        SystemTime::now()
    }
}
