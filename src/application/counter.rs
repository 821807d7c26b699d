//! Distributed, crash-tolerant membership counter.
//!
//! A counter is a named set of members, each stamped with the time it was last
//! tracked. Only members tracked within the TTL count towards `value()`, so a
//! holder that crashes without releasing simply ages out. Stale members are
//! pruned lazily whenever a read notices them.

use crate::application::ports::{Clock, CounterStore, StoreError};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// TTL used when a counter is created with a zero TTL.
pub const DEFAULT_COUNTER_TTL: Duration = Duration::from_secs(60);

/// Generate a random member id.
pub(crate) fn new_member_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// TTL-bounded membership set stored in a shared `CounterStore`.
///
/// # Example
/// ```
/// use dynamic_timeout::{DistributedCounter, MemoryStore, SystemClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(SystemClock::new());
/// let store = Arc::new(MemoryStore::new(clock.clone()));
/// let counter = DistributedCounter::new("jobs", Duration::from_secs(30), store, clock);
///
/// let id = counter.track(None).unwrap();
/// assert_eq!(counter.value().unwrap(), 1);
/// counter.release(&id).unwrap();
/// assert_eq!(counter.value().unwrap(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct DistributedCounter {
    key: String,
    ttl: Duration,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl DistributedCounter {
    /// Create a counter stored under `key`.
    ///
    /// A zero `ttl` falls back to `DEFAULT_COUNTER_TTL`.
    pub fn new(
        key: impl Into<String>,
        ttl: Duration,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            key: key.into(),
            ttl: if ttl.is_zero() { DEFAULT_COUNTER_TTL } else { ttl },
            store,
            clock,
        }
    }

    /// Store key of the counter.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Time after which an unreleased member stops counting.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn cutoff(&self, now: SystemTime) -> SystemTime {
        now.checked_sub(self.ttl).unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Number of members tracked within the TTL.
    ///
    /// Prunes stale members when any are found.
    pub fn value(&self) -> Result<usize, StoreError> {
        let cutoff = self.cutoff(self.clock.system_now());
        let count = self.store.count_members(&self.key, cutoff)?;

        if count.active != count.total {
            self.store.prune_members(&self.key, cutoff)?;
        }

        Ok(count.active)
    }

    /// Insert or refresh a member and return its id.
    ///
    /// A fresh random id is generated when `id` is `None`.
    pub fn track(&self, id: Option<&str>) -> Result<String, StoreError> {
        let id = id.map(str::to_string).unwrap_or_else(new_member_id);
        self.store
            .add_member(&self.key, &id, self.clock.system_now(), self.ttl)?;
        Ok(id)
    }

    /// Remove a member immediately.
    pub fn release(&self, id: &str) -> Result<(), StoreError> {
        self.store.remove_member(&self.key, id)
    }

    /// Track a fresh member that is released when the returned guard drops.
    pub fn enter(&self) -> Result<Membership, StoreError> {
        let id = self.track(None)?;
        Ok(Membership {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            id,
            released: false,
        })
    }

    /// Run `block` while tracked as a member.
    ///
    /// The membership is released however `block` exits, including by
    /// panicking. The block's result is returned unchanged; only a failure to
    /// track is reported as an error.
    pub fn execute<T>(&self, block: impl FnOnce() -> T) -> Result<T, StoreError> {
        let membership = self.enter()?;
        let result = block();
        drop(membership);
        Ok(result)
    }
}

/// Guard for one tracked member. Releases the member on drop.
#[derive(Debug)]
#[must_use = "the member is released as soon as the guard is dropped"]
pub struct Membership {
    store: Arc<dyn CounterStore>,
    key: String,
    id: String,
    released: bool,
}

impl Membership {
    /// The tracked member id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Release now and report any store failure.
    pub fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        self.store.remove_member(&self.key, &self.id)
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.remove_member(&self.key, &self.id) {
            tracing::warn!(
                error = %e,
                key = %self.key,
                "Failed to release counter membership; it will expire with its TTL"
            );
        }
    }
}
