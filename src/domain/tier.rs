//! Timeout tiers and their normalization rules.
//!
//! A tier pairs a timeout with a concurrency quota. The quota is either a
//! static `limit`, a `capacity` fraction of the estimated fleet capacity, or
//! both (the larger resolved value wins). Raw configuration is normalized into
//! a sorted list with exactly one tier per distinct timeout.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A raw tier entry as it appears in configuration.
///
/// Entries are cheap to clone and compare so that the controller can detect
/// configuration changes by value.
///
/// # Example
/// ```
/// use dynamic_timeout::TierConfig;
///
/// let tiers: Vec<TierConfig> = serde_json::from_str(
///     r#"[{"timeout": 0.3, "limit": 1}, {"timeout": 0.2, "capacity": 0.5}]"#,
/// ).unwrap();
/// assert_eq!(tiers[0], TierConfig::limited(0.3, 1));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Timeout in seconds
    pub timeout: f64,
    /// Static concurrency limit; negative means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Fraction of fleet capacity; negative or >= 1.0 means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
}

impl TierConfig {
    /// A tier with a static concurrency limit.
    pub fn limited(timeout: f64, limit: i64) -> Self {
        Self {
            timeout,
            limit: Some(limit),
            capacity: None,
        }
    }

    /// A tier whose limit is a fraction of the estimated fleet capacity.
    pub fn with_capacity(timeout: f64, capacity: f64) -> Self {
        Self {
            timeout,
            limit: None,
            capacity: Some(capacity),
        }
    }

    /// A tier that is always selected once the cascade reaches it.
    pub fn unlimited(timeout: f64) -> Self {
        Self::limited(timeout, -1)
    }

    /// Add a static floor to a capacity-based tier.
    pub fn and_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A normalized timeout tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaTier {
    timeout: Duration,
    limit: i64,
    capacity: Option<f64>,
}

impl QuotaTier {
    /// Create a tier. The timeout is kept at millisecond resolution.
    ///
    /// Unlimited quotas are stored as `-1`, and non-finite capacities are
    /// dropped, so equal quotas compare equal.
    pub fn new(timeout: Duration, limit: i64, capacity: Option<f64>) -> Self {
        Self {
            timeout: Duration::from_millis(timeout.as_millis().min(u64::MAX as u128) as u64),
            limit: canonical_limit(limit),
            capacity: canonical_capacity(capacity),
        }
    }

    /// Convert a raw entry. Non-finite or negative timeouts become zero and
    /// are therefore invalid.
    pub fn from_config(config: &TierConfig) -> Self {
        let millis = (config.timeout * 1000.0).round();
        let timeout = if millis.is_finite() && millis > 0.0 {
            Duration::from_millis(millis as u64)
        } else {
            Duration::ZERO
        };

        Self {
            timeout,
            limit: canonical_limit(config.limit.unwrap_or(0)),
            capacity: canonical_capacity(config.capacity),
        }
    }

    /// The timeout applied to calls admitted into this tier.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The static limit (negative means unlimited).
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// The capacity fraction, if any.
    pub fn capacity(&self) -> Option<f64> {
        self.capacity
    }

    /// True if the tier never refuses a call.
    pub fn is_unlimited(&self) -> bool {
        self.limit < 0 || self.capacity.is_some_and(capacity_is_unlimited)
    }

    /// A tier needs a positive timeout and some quota.
    pub fn is_valid(&self) -> bool {
        !self.timeout.is_zero() && !(self.limit == 0 && self.capacity.unwrap_or(0.0) == 0.0)
    }

    /// Combine two tiers. Unlimited quotas absorb limited ones, limited quotas
    /// add up, and the larger timeout is kept.
    pub fn merge(&self, other: &QuotaTier) -> QuotaTier {
        let limit = if self.limit < 0 || other.limit < 0 {
            UNLIMITED
        } else {
            self.limit.saturating_add(other.limit)
        };

        let capacity = match (self.capacity, other.capacity) {
            (Some(a), Some(b)) if capacity_is_unlimited(a) || capacity_is_unlimited(b) => {
                Some(UNLIMITED as f64)
            }
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };

        QuotaTier {
            timeout: self.timeout.max(other.timeout),
            limit,
            capacity: canonical_capacity(capacity),
        }
    }

    /// Normalize raw entries into valid, merged tiers sorted by timeout.
    ///
    /// Invalid entries are dropped.
    pub fn normalize(entries: &[TierConfig]) -> Vec<QuotaTier> {
        let mut by_timeout: BTreeMap<Duration, QuotaTier> = BTreeMap::new();

        for tier in entries.iter().map(QuotaTier::from_config) {
            if !tier.is_valid() {
                continue;
            }
            by_timeout
                .entry(tier.timeout)
                .and_modify(|merged| *merged = merged.merge(&tier))
                .or_insert(tier);
        }

        by_timeout.into_values().collect()
    }
}

const UNLIMITED: i64 = -1;

fn capacity_is_unlimited(capacity: f64) -> bool {
    capacity < 0.0 || capacity >= 1.0
}

fn canonical_limit(limit: i64) -> i64 {
    if limit < 0 {
        UNLIMITED
    } else {
        limit
    }
}

fn canonical_capacity(capacity: Option<f64>) -> Option<f64> {
    match capacity {
        Some(fraction) if !fraction.is_finite() => None,
        Some(fraction) if capacity_is_unlimited(fraction) => Some(UNLIMITED as f64),
        other => other,
    }
}

/// A tier whose quota has been resolved to an absolute limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedTier {
    /// Timeout applied to admitted calls
    pub timeout: Duration,
    /// Absolute concurrency limit; negative means unlimited
    pub limit: i64,
}

impl ResolvedTier {
    /// True if the tier admits without consulting the backend.
    pub fn is_unlimited(&self) -> bool {
        self.limit < 0
    }
}
