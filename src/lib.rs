//! # dynamic-timeout
//!
//! Adaptive per-request timeouts with fleet-wide, tiered concurrency admission.
//!
//! A controller wraps an outbound call and picks its timeout from a ranked set
//! of tiers. Each tier pairs a timeout with a limit on how many calls may run
//! under it at once across every cooperating process. The most generous tier
//! is tried first; under contention calls fall back to stricter tiers, and when
//! every tier is saturated the call is refused immediately instead of queuing.
//!
//! ## Quick Start
//!
//! ```rust
//! use dynamic_timeout::{AdmissionController, MemoryStore, PendingRequest, SystemClock, TierConfig};
//! use http::{Method, StatusCode, Uri};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new(Arc::new(SystemClock::new())));
//!
//! let controller = AdmissionController::builder()
//!     .with_name("inventory")
//!     .with_tiers(vec![
//!         TierConfig::limited(5.0, 2),   // two slow calls at a time
//!         TierConfig::limited(1.0, 10),  // ten more with a tighter budget
//!         TierConfig::unlimited(0.25),   // everybody else fails fast
//!     ])
//!     .with_store(store)
//!     .with_callback(|report| {
//!         if report.is_throttled() {
//!             eprintln!("refused with {} calls in flight", report.request_count());
//!         }
//!     })
//!     .build()
//!     .unwrap();
//!
//! let mut request = PendingRequest::new(Method::GET, Uri::from_static("https://inventory.internal/items"));
//! let status = controller
//!     .execute(&mut request, |_req| Ok::<_, std::io::Error>(StatusCode::OK))
//!     .unwrap();
//! assert_eq!(status, StatusCode::OK);
//! ```
//!
//! ## Tiers
//!
//! - **Static limits**: `TierConfig::limited(timeout, limit)`
//! - **Capacity fractions**: `TierConfig::with_capacity(timeout, fraction)` scales
//!   the limit with the estimated fleet size times threads per process
//! - **Unlimited**: `TierConfig::unlimited(timeout)` admits every call without
//!   touching the store
//!
//! Tiers with the same timeout are merged and invalid entries are dropped.
//! Tier lists can come from a supplier that is re-read on every call.
//!
//! ## Shared stores
//!
//! - `MemoryStore` coordinates the threads of one process
//! - `RedisStore` (feature `redis-storage`) coordinates a fleet
//!
//! Both implement the `CounterStore` and `AdmissionBackend` ports, so custom
//! stores can be plugged in.
//!
//! ## Failure handling
//!
//! Store failures trip a circuit breaker. With the default
//! `BackendFailurePolicy::FailOpen` calls then run without a timeout override;
//! `BackendFailurePolicy::FailClosed` refuses them instead. Slots and counter
//! memberships are released on every exit path, including panics and dropped
//! futures, and anything a crashed process leaves behind expires with its TTL.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    report::{OutcomeReport, ReportedError},
    target::{base_url, TargetNamespace},
    tier::{QuotaTier, ResolvedTier, TierConfig},
};

pub use application::{
    capacity::{CapacityStrategy, ProcessIdentity},
    cascade::{AdmissionPermit, CascadeOutcome, TierCascade},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    config::{BackendFailurePolicy, ControllerSettings, Resolvable, DEFAULT_KEY_PREFIX},
    controller::{AdmissionController, AdmissionError, AdmissionRefused},
    counter::{DistributedCounter, Membership},
    metrics::{Metrics, MetricsSnapshot},
    ports::{
        AdmissionBackend, AdmissionToken, Clock, CounterStore, HostRequest, HostResponse,
        MemberCount, OperationError, StoreError,
    },
};

pub use infrastructure::{
    builder::{AdmissionControllerBuilder, BuildError},
    clock::SystemClock,
    memory_store::MemoryStore,
    request::{PendingRequest, RequestTimeouts},
};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::RedisStore;
