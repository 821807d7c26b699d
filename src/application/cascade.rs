//! Cascading tier selection.
//!
//! Tiers are tried from the most generous timeout down to the strictest. The
//! first tier that admits the call wins; a tier without a limit always admits.
//! Refusals are never retried, so a fully saturated cascade is reported to
//! the caller immediately.

use crate::application::ports::{AdmissionBackend, AdmissionToken, StoreError};
use crate::domain::target::TargetNamespace;
use crate::domain::tier::ResolvedTier;
use std::sync::Arc;
use std::time::Duration;

/// Result of walking the tiers.
#[derive(Debug)]
pub enum CascadeOutcome {
    /// A tier admitted the call
    Selected {
        /// Timeout of the selected tier
        timeout: Duration,
        /// Slot to give back after the call; `None` for unlimited tiers
        permit: Option<AdmissionPermit>,
    },
    /// Every tier refused the call
    Saturated {
        /// Sum of the limits of every refusing tier
        rejected_capacity: u64,
    },
}

/// Walks resolved tiers against an admission backend.
#[derive(Debug, Clone)]
pub struct TierCascade {
    backend: Arc<dyn AdmissionBackend>,
}

impl TierCascade {
    /// Create a cascade over `backend`.
    pub fn new(backend: Arc<dyn AdmissionBackend>) -> Self {
        Self { backend }
    }

    /// Select a tier for one call.
    ///
    /// `tiers` must be sorted ascending by timeout. A store failure aborts the
    /// walk; slots taken before the failure cannot exist because the walk
    /// stops at the first admission.
    pub fn select(
        &self,
        namespace: &TargetNamespace,
        tiers: &[ResolvedTier],
    ) -> Result<CascadeOutcome, StoreError> {
        let mut rejected_capacity: u64 = 0;

        for tier in tiers.iter().rev() {
            if tier.is_unlimited() {
                return Ok(CascadeOutcome::Selected {
                    timeout: tier.timeout,
                    permit: None,
                });
            }

            let capacity = tier.limit as u64;
            let key = namespace.section_key(tier.timeout);
            match self.backend.try_enter(&key, capacity, tier.timeout)? {
                Some(token) => {
                    return Ok(CascadeOutcome::Selected {
                        timeout: tier.timeout,
                        permit: Some(AdmissionPermit::new(Arc::clone(&self.backend), token)),
                    });
                }
                None => {
                    tracing::trace!(key = %key, capacity, "Tier saturated, falling back");
                    rejected_capacity = rejected_capacity.saturating_add(capacity);
                }
            }
        }

        Ok(CascadeOutcome::Saturated { rejected_capacity })
    }
}

/// An admitted slot. Exits the section when dropped.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct AdmissionPermit {
    backend: Arc<dyn AdmissionBackend>,
    token: Option<AdmissionToken>,
}

impl AdmissionPermit {
    fn new(backend: Arc<dyn AdmissionBackend>, token: AdmissionToken) -> Self {
        Self {
            backend,
            token: Some(token),
        }
    }

    /// The backend token.
    pub fn token(&self) -> Option<&AdmissionToken> {
        self.token.as_ref()
    }

    /// Exit now and report any store failure.
    pub fn release(mut self) -> Result<(), StoreError> {
        match self.token.take() {
            Some(token) => self.backend.exit(&token),
            None => Ok(()),
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.backend.exit(&token) {
                tracing::warn!(
                    error = %e,
                    key = %token.key(),
                    "Failed to release admission slot; it will expire with its TTL"
                );
            }
        }
    }
}
