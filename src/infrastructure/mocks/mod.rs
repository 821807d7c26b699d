//! Mock implementations for testing.
//!
//! Test doubles for infrastructure adapters: a controllable clock, a store
//! that always fails, and a tracing layer that captures log output.

pub mod clock;
#[cfg(test)]
pub mod layer;
pub mod store;

pub use clock::MockClock;
#[cfg(test)]
pub use layer::MockCaptureLayer;
pub use store::FailingStore;
