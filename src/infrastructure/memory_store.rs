//! In-process shared store.
//!
//! `MemoryStore` implements both shared-store capabilities on top of a
//! `DashMap`. Every key is guarded by its shard lock, which gives the per-key
//! atomicity the ports require. It coordinates the threads of a single
//! process; use `RedisStore` to coordinate a fleet.

use crate::application::counter::new_member_id;
use crate::application::ports::{
    AdmissionBackend, AdmissionToken, Clock, CounterStore, MemberCount, StoreError,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Debug, Default)]
struct MemberSet {
    members: HashMap<String, SystemTime>,
    expires_at: Option<SystemTime>,
}

impl MemberSet {
    /// Drop the whole set once its key-level expiry has passed.
    fn expire(&mut self, now: SystemTime) {
        if self.expires_at.is_some_and(|at| at <= now) {
            self.members.clear();
            self.expires_at = None;
        }
    }

    fn touch(&mut self, now: SystemTime, ttl: Duration) {
        self.expires_at = Some(now + ttl);
    }
}

/// Thread-safe in-memory store backed by DashMap.
#[derive(Debug)]
pub struct MemoryStore {
    sets: DashMap<String, MemberSet>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store that reads time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sets: DashMap::new(),
            clock,
        }
    }

    /// Number of live members under `key`, stale ones included.
    pub fn member_count(&self, key: &str) -> usize {
        let now = self.clock.system_now();
        self.sets
            .get_mut(key)
            .map(|mut set| {
                set.expire(now);
                set.members.len()
            })
            .unwrap_or(0)
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Check if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Remove every key.
    pub fn clear(&self) {
        self.sets.clear();
    }

    fn remove_if_empty(&self, key: &str) {
        self.sets.remove_if(key, |_, set| set.members.is_empty());
    }
}

impl CounterStore for MemoryStore {
    fn add_member(
        &self,
        key: &str,
        member: &str,
        at: SystemTime,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = self.clock.system_now();
        let mut set = self.sets.entry(key.to_string()).or_default();
        set.expire(now);
        set.members.insert(member.to_string(), at);
        set.touch(at, ttl);
        Ok(())
    }

    fn count_members(&self, key: &str, cutoff: SystemTime) -> Result<MemberCount, StoreError> {
        let now = self.clock.system_now();
        let count = match self.sets.get_mut(key) {
            Some(mut set) => {
                set.expire(now);
                MemberCount {
                    active: set.members.values().filter(|at| **at >= cutoff).count(),
                    total: set.members.len(),
                }
            }
            None => MemberCount::default(),
        };
        Ok(count)
    }

    fn prune_members(&self, key: &str, cutoff: SystemTime) -> Result<(), StoreError> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.members.retain(|_, at| *at >= cutoff);
        }
        self.remove_if_empty(key);
        Ok(())
    }

    fn remove_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.members.remove(member);
        }
        self.remove_if_empty(key);
        Ok(())
    }
}

impl AdmissionBackend for MemoryStore {
    fn try_enter(
        &self,
        key: &str,
        capacity: u64,
        ttl: Duration,
    ) -> Result<Option<AdmissionToken>, StoreError> {
        let now = self.clock.system_now();
        let cutoff = now.checked_sub(ttl).unwrap_or(SystemTime::UNIX_EPOCH);

        let mut set = self.sets.entry(key.to_string()).or_default();
        set.expire(now);
        set.members.retain(|_, at| *at > cutoff);

        if set.members.len() as u64 >= capacity {
            return Ok(None);
        }

        let member = new_member_id();
        set.members.insert(member.clone(), now);
        set.touch(now, ttl);
        Ok(Some(AdmissionToken::new(key, member)))
    }

    fn exit(&self, token: &AdmissionToken) -> Result<(), StoreError> {
        self.remove_member(token.key(), token.member())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;
    use std::thread;

    fn store() -> (MemoryStore, MockClock) {
        let clock = MockClock::new();
        (MemoryStore::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_count_splits_active_and_stale() {
        let (store, clock) = store();
        let t0 = clock.system_now();
        let ttl = Duration::from_secs(10);

        store.add_member("k", "a", t0, ttl).unwrap();
        clock.advance(Duration::from_secs(5));
        store
            .add_member("k", "b", clock.system_now(), ttl)
            .unwrap();

        let count = store
            .count_members("k", t0 + Duration::from_secs(1))
            .unwrap();
        assert_eq!(count, MemberCount { active: 1, total: 2 });

        store
            .prune_members("k", t0 + Duration::from_secs(1))
            .unwrap();
        assert_eq!(store.member_count("k"), 1);
    }

    #[test]
    fn test_key_expires_as_a_whole() {
        let (store, clock) = store();
        store
            .add_member("k", "a", clock.system_now(), Duration::from_secs(1))
            .unwrap();
        assert_eq!(store.member_count("k"), 1);

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.member_count("k"), 0);
    }

    #[test]
    fn test_remove_member_drops_empty_key() {
        let (store, clock) = store();
        store
            .add_member("k", "a", clock.system_now(), Duration::from_secs(1))
            .unwrap();
        store.remove_member("k", "a").unwrap();
        assert!(store.is_empty());

        // Removing from a missing key is not an error
        store.remove_member("missing", "a").unwrap();
    }

    #[test]
    fn test_admission_respects_capacity() {
        let (store, _) = store();
        let ttl = Duration::from_secs(1);

        let first = store.try_enter("section", 2, ttl).unwrap();
        let second = store.try_enter("section", 2, ttl).unwrap();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(store.try_enter("section", 2, ttl).unwrap().is_none());

        store.exit(&first.unwrap()).unwrap();
        assert!(store.try_enter("section", 2, ttl).unwrap().is_some());
    }

    #[test]
    fn test_zero_capacity_refuses() {
        let (store, _) = store();
        assert!(store
            .try_enter("section", 0, Duration::from_secs(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_abandoned_slots_expire() {
        let (store, clock) = store();
        let ttl = Duration::from_millis(300);

        let _abandoned = store.try_enter("section", 1, ttl).unwrap().unwrap();
        assert!(store.try_enter("section", 1, ttl).unwrap().is_none());

        clock.advance(Duration::from_millis(301));
        assert!(store.try_enter("section", 1, ttl).unwrap().is_some());
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_capacity() {
        let clock = Arc::new(MockClock::new());
        let store = Arc::new(MemoryStore::new(clock));
        let mut handles = vec![];

        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                store
                    .try_enter("section", 5, Duration::from_secs(10))
                    .unwrap()
                    .is_some()
            }));
        }

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 5);
        assert_eq!(store.member_count("section"), 5);
    }
}
