//! Domain layer - pure business logic with no external dependencies.
//!
//! This layer contains the core concepts and invariants of timeout admission:
//! - Timeout tiers, their merge rules and normalization
//! - Target naming in the shared store
//! - Outcome reports of controlled calls
//!
//! All types in this layer are pure and easily testable.

pub mod report;
pub mod target;
pub mod tier;
