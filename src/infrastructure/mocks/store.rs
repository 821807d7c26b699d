//! Store double that fails every command.

use crate::application::ports::{
    AdmissionBackend, AdmissionToken, CounterStore, MemberCount, StoreError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

/// A shared store that is permanently unreachable.
///
/// Counts how often it was contacted so tests can assert that an open circuit
/// breaker keeps callers away from it.
#[derive(Debug, Default)]
pub struct FailingStore {
    calls: AtomicUsize,
}

impl FailingStore {
    /// Create a failing store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands attempted against the store.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Connection("connection refused".to_string()))
    }
}

impl CounterStore for FailingStore {
    fn add_member(&self, _: &str, _: &str, _: SystemTime, _: Duration) -> Result<(), StoreError> {
        self.fail()
    }

    fn count_members(&self, _: &str, _: SystemTime) -> Result<MemberCount, StoreError> {
        self.fail()
    }

    fn prune_members(&self, _: &str, _: SystemTime) -> Result<(), StoreError> {
        self.fail()
    }

    fn remove_member(&self, _: &str, _: &str) -> Result<(), StoreError> {
        self.fail()
    }
}

impl AdmissionBackend for FailingStore {
    fn try_enter(&self, _: &str, _: u64, _: Duration) -> Result<Option<AdmissionToken>, StoreError> {
        self.fail()
    }

    fn exit(&self, _: &AdmissionToken) -> Result<(), StoreError> {
        self.fail()
    }
}
