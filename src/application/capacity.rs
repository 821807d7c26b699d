//! Capacity-based quota resolution.
//!
//! Tiers may express their quota as a fraction of the fleet's total call
//! capacity. The fleet size is estimated by having every process register
//! itself in a shared `DistributedCounter`; registrations that stop being
//! refreshed age out with the counter's TTL.

use crate::application::config::Resolvable;
use crate::application::counter::DistributedCounter;
use crate::application::ports::{Clock, CounterStore, StoreError};
use crate::domain::target::TargetNamespace;
use crate::domain::tier::{QuotaTier, ResolvedTier};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Minimum TTL of a process registration.
pub const MIN_REGISTRATION_TTL: Duration = Duration::from_secs(60);

/// Stable identity of this process within the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessIdentity(String);

impl ProcessIdentity {
    /// Use an explicit identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `<hostname>:<pid>` of the running process.
    pub fn current() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self(format!("{}:{}", host, std::process::id()))
    }

    /// The identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves capacity fractions into absolute limits.
#[derive(Debug, Clone)]
pub struct CapacityStrategy {
    identity: ProcessIdentity,
    threads_per_process: Resolvable<usize>,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl CapacityStrategy {
    /// Create a strategy that registers `identity` in `store`.
    pub fn new(
        identity: ProcessIdentity,
        threads_per_process: Resolvable<usize>,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            threads_per_process,
            store,
            clock,
        }
    }

    /// This process's identity.
    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    /// Register this process and return the estimated number of live
    /// processes (at least 1).
    pub fn register(
        &self,
        namespace: &TargetNamespace,
        tiers: &[QuotaTier],
    ) -> Result<u64, StoreError> {
        let largest = tiers
            .iter()
            .map(QuotaTier::timeout)
            .max()
            .unwrap_or_default();
        let counter = DistributedCounter::new(
            namespace.processes_key(),
            largest.max(MIN_REGISTRATION_TTL),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
        );

        counter.track(Some(self.identity.as_str()))?;
        Ok((counter.value()? as u64).max(1))
    }

    /// Threads per process, re-evaluated on every call and floored at 1.
    pub fn threads_per_process(&self) -> u64 {
        (self.threads_per_process.resolve() as u64).max(1)
    }

    /// Resolve `tiers` for the fleet, keeping their order.
    pub fn compute(
        &self,
        namespace: &TargetNamespace,
        tiers: &[QuotaTier],
    ) -> Result<Vec<ResolvedTier>, StoreError> {
        let processes = self.register(namespace, tiers)?;
        let total_capacity = processes.saturating_mul(self.threads_per_process());

        tracing::trace!(
            target_name = namespace.name(),
            processes,
            total_capacity,
            "Resolving tier capacity"
        );

        Ok(resolve_tiers(tiers, total_capacity))
    }
}

/// Resolve every tier against a known total capacity.
pub fn resolve_tiers(tiers: &[QuotaTier], total_capacity: u64) -> Vec<ResolvedTier> {
    tiers
        .iter()
        .map(|tier| resolve_tier(tier, total_capacity))
        .collect()
}

/// Resolve a single tier.
///
/// Unlimited tiers stay unlimited. A capacity fraction yields
/// `ceil(fraction * total_capacity)`, floored by the static limit.
pub fn resolve_tier(tier: &QuotaTier, total_capacity: u64) -> ResolvedTier {
    let limit = if tier.is_unlimited() {
        -1
    } else {
        match tier.capacity() {
            Some(fraction) => {
                let effective = (fraction * total_capacity as f64).ceil();
                let effective = if effective >= i64::MAX as f64 {
                    i64::MAX
                } else {
                    effective.max(0.0) as i64
                };
                tier.limit().max(effective)
            }
            None => tier.limit(),
        }
    };

    ResolvedTier {
        timeout: tier.timeout(),
        limit,
    }
}
