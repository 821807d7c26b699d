//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports: the shared store
//! capabilities (`MemoryStore`, `RedisStore`), the clock (`SystemClock`,
//! `MockClock`) and the host request pipeline (`PendingRequest`,
//! `http::Request`).

use http::{Method, StatusCode, Uri};
use std::fmt::{self, Debug};
use std::time::{Duration, Instant, SystemTime};

/// Port for obtaining current time.
///
/// Two readings are needed: a monotonic instant for measuring call durations
/// and a wall-clock time for timestamps that are compared across processes.
pub trait Clock: Send + Sync + Debug {
    /// Monotonic reading used for durations.
    fn now(&self) -> Instant;

    /// Wall-clock reading used for shared-store timestamps.
    fn system_now(&self) -> SystemTime;
}

/// Error raised by a shared-store adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached
    Connection(String),
    /// The store rejected or failed a command
    Command(String),
    /// No runtime was available to drive the store client
    Runtime(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Connection(msg) => write!(f, "store connection failed: {}", msg),
            StoreError::Command(msg) => write!(f, "store command failed: {}", msg),
            StoreError::Runtime(msg) => write!(f, "store runtime unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Member counts of a counter key at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemberCount {
    /// Members inserted at or after the cutoff
    pub active: usize,
    /// All members, including stale ones
    pub total: usize,
}

/// Port for the shared membership store behind `DistributedCounter`.
///
/// Each key holds a set of `(member, inserted_at)` pairs. Implementations must
/// make `add_member` (insert plus key expiry refresh) and `count_members`
/// (active plus total count) atomic per key.
pub trait CounterStore: Send + Sync + Debug {
    /// Insert or refresh `member` with timestamp `at`, and push the expiry of
    /// the whole key out to `at + ttl`.
    fn add_member(&self, key: &str, member: &str, at: SystemTime, ttl: Duration)
        -> Result<(), StoreError>;

    /// Count members inserted at or after `cutoff` together with the total.
    fn count_members(&self, key: &str, cutoff: SystemTime) -> Result<MemberCount, StoreError>;

    /// Remove members inserted before `cutoff`.
    fn prune_members(&self, key: &str, cutoff: SystemTime) -> Result<(), StoreError>;

    /// Remove one member.
    fn remove_member(&self, key: &str, member: &str) -> Result<(), StoreError>;
}

/// Proof of admission into one section, returned by `AdmissionBackend::try_enter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdmissionToken {
    key: String,
    member: String,
}

impl AdmissionToken {
    /// Create a token for `member` of section `key`.
    pub fn new(key: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            member: member.into(),
        }
    }

    /// Section key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Member id inside the section.
    pub fn member(&self) -> &str {
        &self.member
    }
}

/// Port for the bounded-concurrency admission primitive.
///
/// `try_enter` must be atomic per key across every process sharing the
/// backend. Entries older than `ttl` are presumed abandoned and do not count
/// against `capacity`.
pub trait AdmissionBackend: Send + Sync + Debug {
    /// Try to take one of `capacity` slots of section `key`.
    ///
    /// Returns `Ok(None)` when the section is full. Never waits.
    fn try_enter(
        &self,
        key: &str,
        capacity: u64,
        ttl: Duration,
    ) -> Result<Option<AdmissionToken>, StoreError>;

    /// Give a slot back.
    fn exit(&self, token: &AdmissionToken) -> Result<(), StoreError>;
}

/// Port for the outbound request the controller wraps.
pub trait HostRequest {
    /// HTTP method.
    fn method(&self) -> &Method;

    /// Target URI.
    fn uri(&self) -> &Uri;

    /// Apply the timeout chosen by the controller. Implementations set the
    /// overall timeout and clear any finer-grained connect/read/write
    /// timeouts.
    fn apply_timeout(&mut self, timeout: Duration);
}

/// Port for the response of a wrapped call.
pub trait HostResponse {
    /// Response status, if the call produced one.
    fn status(&self) -> Option<StatusCode>;
}

impl HostResponse for StatusCode {
    fn status(&self) -> Option<StatusCode> {
        Some(*self)
    }
}

impl<B> HostResponse for http::Response<B> {
    fn status(&self) -> Option<StatusCode> {
        Some(http::Response::status(self))
    }
}

/// Classification of a wrapped call's own errors.
///
/// The controller passes these errors through unchanged; it only needs to know
/// whether one represents the call's deadline expiring.
pub trait OperationError: fmt::Display {
    /// True if the error is the operation's own timeout.
    fn is_timeout(&self) -> bool {
        false
    }
}

impl OperationError for std::io::Error {
    fn is_timeout(&self) -> bool {
        self.kind() == std::io::ErrorKind::TimedOut
    }
}

#[cfg(feature = "async")]
impl OperationError for tokio::time::error::Elapsed {
    fn is_timeout(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_timeout_classification() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline");
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(timed_out.is_timeout());
        assert!(!refused.is_timeout());
    }

    #[test]
    fn test_response_status() {
        let response = http::Response::builder()
            .status(StatusCode::ACCEPTED)
            .body(())
            .unwrap();
        assert_eq!(HostResponse::status(&response), Some(StatusCode::ACCEPTED));
        assert_eq!(StatusCode::NOT_FOUND.status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Connection("refused".to_string());
        assert_eq!(err.to_string(), "store connection failed: refused");
    }
}
