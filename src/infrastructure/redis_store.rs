//! Redis-backed shared store.
//!
//! Lets every process of a fleet share admission slots and counters.
//!
//! ## Data model
//!
//! Every counter and every admission section is a sorted set:
//! - Members: random member ids (or the process identity for fleet counters)
//! - Scores: wall-clock milliseconds of the last insert or refresh
//! - Key expiry: pushed out on every insert, so idle keys disappear
//!
//! Admission runs as a Lua script, which makes the prune, capacity check and
//! insert atomic per key across all clients.
//!
//! ## Runtime
//!
//! The ports are synchronous while the client is async. Calls made from a
//! multi-threaded tokio runtime use `block_in_place`; calls made outside any
//! runtime drive the future on a temporary current-thread runtime. A
//! current-thread runtime cannot block, so calls from one fail with
//! `StoreError::Runtime` and are handled by the controller's failure policy.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dynamic_timeout::{AdmissionController, RedisStore, TierConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let controller = AdmissionController::builder()
//!         .with_tiers(vec![TierConfig::limited(2.0, 10), TierConfig::unlimited(0.5)])
//!         .with_store(Arc::new(store))
//!         .build()
//!         .unwrap();
//! }
//! ```

use crate::application::counter::new_member_id;
use crate::application::ports::{
    AdmissionBackend, AdmissionToken, Clock, CounterStore, MemberCount, StoreError,
};
use crate::infrastructure::clock::SystemClock;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::{Handle, RuntimeFlavor};

const TRY_ENTER_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - ttl))
if redis.call('ZCARD', key) >= capacity then
    return 0
end
redis.call('ZADD', key, now, ARGV[4])
redis.call('PEXPIRE', key, ttl)
return 1
"#;

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

/// Milliseconds since the Unix epoch, used as sorted-set score.
fn score(at: SystemTime) -> i64 {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn ttl_millis(ttl: Duration) -> i64 {
    (ttl.as_millis() as i64).max(1)
}

/// Redis implementation of `CounterStore` and `AdmissionBackend`.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    try_enter: Script,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis using the system clock.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_clock(url, Arc::new(SystemClock::new())).await
    }

    /// Connect to Redis with a custom clock for admission timestamps.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_clock(url: &str, clock: Arc<dyn Clock>) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            try_enter: Script::new(TRY_ENTER_SCRIPT),
            clock,
        })
    }

    /// Run an async Redis operation from synchronous code.
    fn block_on<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(operation)).map_err(StoreError::from)
            }
            Ok(_) => Err(StoreError::Runtime(
                "blocking Redis calls need a multi-threaded tokio runtime".to_string(),
            )),
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| StoreError::Runtime(e.to_string()))?;
                runtime.block_on(operation).map_err(StoreError::from)
            }
        }
    }

    /// Delete `key` entirely.
    pub async fn delete(&self, key: &str) -> Result<(), RedisError> {
        let mut conn = self.connection.clone();
        let () = conn.del(key).await?;
        Ok(())
    }
}

impl CounterStore for RedisStore {
    fn add_member(
        &self,
        key: &str,
        member: &str,
        at: SystemTime,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.block_on(async move {
            let () = redis::pipe()
                .atomic()
                .zadd(key, member, score(at))
                .ignore()
                .pexpire(key, ttl_millis(ttl))
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
    }

    fn count_members(&self, key: &str, cutoff: SystemTime) -> Result<MemberCount, StoreError> {
        let mut conn = self.connection.clone();
        let (active, total): (usize, usize) = self.block_on(async move {
            redis::pipe()
                .atomic()
                .zcount(key, score(cutoff), "+inf")
                .zcard(key)
                .query_async(&mut conn)
                .await
        })?;
        Ok(MemberCount { active, total })
    }

    fn prune_members(&self, key: &str, cutoff: SystemTime) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let max = format!("({}", score(cutoff));
        self.block_on(async move {
            let _removed: usize = conn.zrembyscore(key, "-inf", max).await?;
            Ok(())
        })
    }

    fn remove_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.block_on(async move {
            let _removed: usize = conn.zrem(key, member).await?;
            Ok(())
        })
    }
}

impl AdmissionBackend for RedisStore {
    fn try_enter(
        &self,
        key: &str,
        capacity: u64,
        ttl: Duration,
    ) -> Result<Option<AdmissionToken>, StoreError> {
        if capacity == 0 {
            return Ok(None);
        }

        let member = new_member_id();
        let now = score(self.clock.system_now());
        let mut conn = self.connection.clone();
        let admitted: i64 = self.block_on(async {
            self.try_enter
                .key(key)
                .arg(capacity)
                .arg(now)
                .arg(ttl_millis(ttl))
                .arg(&member)
                .invoke_async(&mut conn)
                .await
        })?;

        Ok((admitted == 1).then(|| AdmissionToken::new(key, member)))
    }

    fn exit(&self, token: &AdmissionToken) -> Result<(), StoreError> {
        self.remove_member(token.key(), token.member())
    }
}
