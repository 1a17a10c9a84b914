//! Cache Traits
//!
//! The two seams of the cache layer:
//!
//! - `CacheCodec`: how values become bytes at the cache boundary
//! - `RemoteBackend`: the key-value primitives the L2 level needs from a
//!   networked store (GET / SET with expiry / DEL / EXISTS / TTL / SCAN+DEL)
//!
//! # Example: Custom Remote Backend
//!
//! ```rust,ignore
//! use arcade_cache::{RemoteBackend, RemoteTtl, async_trait};
//! use arcade_cache::error::Result;
//! use std::time::Duration;
//!
//! struct MyKvStore {
//!     // Your client
//! }
//!
//! #[async_trait]
//! impl RemoteBackend for MyKvStore {
//!     async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> { todo!() }
//!     async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> { todo!() }
//!     async fn delete(&self, key: &str) -> Result<bool> { todo!() }
//!     async fn exists(&self, key: &str) -> Result<bool> { todo!() }
//!     async fn ttl(&self, key: &str) -> Result<RemoteTtl> { todo!() }
//!     async fn delete_pattern(&self, pattern: &str) -> Result<u64> { todo!() }
//!     async fn ping(&self) -> Result<()> { todo!() }
//! }
//! ```

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;

use crate::error::Result;

/// Trait for cache value serialization/deserialization
///
/// Values are encoded once at the cache boundary and the same bytes are stored
/// in both levels.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + Debug` to support concurrent access across async tasks
/// and provide debugging capabilities.
pub trait CacheCodec: Send + Sync + Debug + 'static {
    /// Serialize a value to bytes
    ///
    /// # Errors
    ///
    /// Returns an error when the value cannot be represented in this encoding.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> AnyResult<Vec<u8>>;

    /// Deserialize bytes to a value
    ///
    /// # Errors
    ///
    /// Returns an error when the bytes are not a valid encoding of `T`.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> AnyResult<T>;

    /// Get the name of the codec
    ///
    /// This is used for logging and debugging purposes.
    fn name(&self) -> &'static str;

    /// Whether `bytes` decode as some value in this encoding, whatever its type
    ///
    /// Separates corrupt entries from entries read as the wrong type.
    fn is_well_formed(&self, bytes: &[u8]) -> bool {
        self.deserialize::<serde::de::IgnoredAny>(bytes).is_ok()
    }
}

/// Remaining lifetime of a remote key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTtl {
    /// Key does not exist (or the store could not be asked)
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Key expires after the given duration
    Expires(Duration),
}

impl RemoteTtl {
    /// Remaining duration when the key has one
    #[must_use]
    pub fn remaining(self) -> Option<Duration> {
        match self {
            Self::Expires(d) => Some(d),
            Self::Missing | Self::Persistent => None,
        }
    }

    /// Decode a Redis `PTTL` reply (-2 = missing, -1 = no expiry)
    #[must_use]
    pub fn from_pttl_millis(pttl: i64) -> Self {
        match pttl {
            -2 => Self::Missing,
            ms if ms < 0 => Self::Persistent,
            ms => Self::Expires(Duration::from_millis(ms.unsigned_abs())),
        }
    }
}

/// Downstream key-value store used as the L2 level
///
/// Keys arrive already namespaced. Implementations report transport problems
/// as errors; the remote cache client is what converts them into misses and
/// no-ops, so backends should not swallow failures themselves.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to support concurrent access across async tasks.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Fetch the raw value for `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Fetch the raw value and its remaining TTL
    ///
    /// The default issues `get` then `ttl`; backends able to pipeline both
    /// should override it.
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Vec<u8>, RemoteTtl)>> {
        let Some(value) = self.get(key).await? else {
            return Ok(None);
        };
        let ttl = self.ttl(key).await?;
        Ok(Some((value, ttl)))
    }

    /// Store `value`, expiring after `ttl` when given
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Delete `key`, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Whether `key` exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remaining lifetime of `key`
    async fn ttl(&self, key: &str) -> Result<RemoteTtl>;

    /// Delete every key matching a glob pattern, returning the count removed
    async fn delete_pattern(&self, pattern: &str) -> Result<u64>;

    /// Cheap liveness check
    async fn ping(&self) -> Result<()>;

    /// Get the name of this backend
    ///
    /// This is used for logging and debugging purposes.
    fn name(&self) -> &'static str {
        "unknown"
    }
}
