//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Distributed counters (fleet size and in-flight calls)
//! - Capacity resolution of fractional tiers
//! - Cascading tier selection and the admission controller
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod capacity;
pub mod cascade;
pub mod circuit_breaker;
pub mod config;
pub mod controller;
pub mod counter;
pub mod metrics;
pub mod ports;
pub mod tier_cache;
