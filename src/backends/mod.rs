//! Remote Backend Implementations
//!
//! # Available Backends
//!
//! - **Redis** - shared networked store, the production L2 (feature: `redis`)
//! - **Memory** - `DashMap`-backed in-process store for single-node runs and tests
//!
//! # Usage
//!
//! ```rust,no_run
//! use arcade_cache::backends::MemoryBackend;
//! use arcade_cache::{EvictionPolicy, LocalCache, RemoteCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let remote = RemoteCache::new("arcade", Duration::from_secs(2), Duration::from_secs(1800));
//! remote.attach(Arc::new(MemoryBackend::new()));
//! let local = LocalCache::new(1000, EvictionPolicy::Lru);
//! ```

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis_backend;

pub use memory::MemoryBackend;

#[cfg(feature = "redis")]
pub use redis_backend::RedisBackend;
