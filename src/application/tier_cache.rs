//! Cache of normalized tiers keyed by the raw configuration value.
//!
//! Tier suppliers are called on every request, but normalization only runs
//! when the supplied entries differ from the last ones seen. Lookups share a
//! read lock; only a rebuild takes the write lock.

use crate::application::metrics::Metrics;
use crate::domain::tier::{QuotaTier, TierConfig};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
struct CachedTiers {
    raw: Vec<TierConfig>,
    tiers: Arc<[QuotaTier]>,
}

/// Memoizes `QuotaTier::normalize` for the latest raw configuration.
#[derive(Debug)]
pub struct TierCache {
    slot: RwLock<Option<CachedTiers>>,
    metrics: Metrics,
}

impl TierCache {
    /// Create an empty cache that counts rebuilds in `metrics`.
    pub fn new(metrics: Metrics) -> Self {
        Self {
            slot: RwLock::new(None),
            metrics,
        }
    }

    /// Normalized tiers for `raw`, rebuilding only when `raw` changed.
    pub fn get(&self, raw: &[TierConfig]) -> Arc<[QuotaTier]> {
        {
            let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = slot.as_ref().filter(|cached| cached.raw == raw) {
                return Arc::clone(&cached.tiers);
            }
        }

        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have rebuilt while we waited for the write lock
        if let Some(cached) = slot.as_ref().filter(|cached| cached.raw == raw) {
            return Arc::clone(&cached.tiers);
        }

        let raw = raw.to_vec();
        let tiers: Arc<[QuotaTier]> = QuotaTier::normalize(&raw).into();
        *slot = Some(CachedTiers {
            raw,
            tiers: Arc::clone(&tiers),
        });
        self.metrics.record_tier_rebuild();
        tracing::debug!(tiers = tiers.len(), "Rebuilt normalized tier cache");

        tiers
    }
}
