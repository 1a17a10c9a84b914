//! Cache Configuration
//!
//! Loads cache settings from environment variables with sensible defaults.
//! `CacheConfig` also derives `Deserialize` so it can be embedded in a larger
//! application settings file.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::{CacheError, Result};

/// Replacement policy applied by the local cache when it is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the least recently accessed entry
    #[default]
    Lru,
    /// Evict the oldest inserted entry
    Fifo,
    /// Evict an already-expired entry first, otherwise the oldest inserted one
    Ttl,
}

impl FromStr for EvictionPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "fifo" => Ok(Self::Fifo),
            "ttl" => Ok(Self::Ttl),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown eviction policy `{other}` (expected lru, fifo or ttl)"
            ))),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lru => "lru",
            Self::Fifo => "fifo",
            Self::Ttl => "ttl",
        })
    }
}

/// Cache layer configuration
///
/// # Environment Variables
/// - `CACHE_LOCAL_MAX_SIZE` - L1 entry capacity (default: 1000)
/// - `CACHE_LOCAL_POLICY` - `lru`, `fifo` or `ttl` (default: `lru`)
/// - `REDIS_URL` - remote store URL (default: `redis://127.0.0.1:6379`)
/// - `CACHE_NAMESPACE` - prefix for every remote key (default: `arcade`)
/// - `CACHE_REMOTE_MAX_CONNECTIONS` - pooled remote connections (default: 10)
/// - `CACHE_REMOTE_SOCKET_TIMEOUT_MS` - connect/read/write bound (default: 2000)
/// - `CACHE_DEFAULT_REMOTE_TTL_SECONDS` - L2 TTL when none is given (default: 1800)
/// - `CACHE_DEFAULT_LOCAL_TTL_SECONDS` - L1 TTL cap (default: 300)
/// - `CACHE_SWEEP_INTERVAL_SECONDS` - expired-entry sweep period, 0 disables (default: 60)
/// - `CACHE_INVALIDATION_CHANNEL` - Pub/Sub channel for cross-instance L1 invalidation (unset: off)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub local_max_size: usize,
    pub local_policy: EvictionPolicy,
    pub remote_url: String,
    pub remote_namespace: String,
    pub remote_max_connections: usize,
    pub remote_socket_timeout_ms: u64,
    pub default_remote_ttl_secs: u64,
    pub default_local_ttl_secs: u64,
    pub local_sweep_interval_secs: u64,
    pub invalidation_channel: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_max_size: 1000,
            local_policy: EvictionPolicy::Lru,
            remote_url: "redis://127.0.0.1:6379".to_string(),
            remote_namespace: "arcade".to_string(),
            remote_max_connections: 10,
            remote_socket_timeout_ms: 2000,
            default_remote_ttl_secs: 1800,
            default_local_ttl_secs: 300,
            local_sweep_interval_secs: 60,
            invalidation_channel: None,
        }
    }
}

impl CacheConfig {
    /// Build a configuration from environment variables
    ///
    /// Unparsable values are logged and replaced by their default.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            local_max_size: env_parse("CACHE_LOCAL_MAX_SIZE", defaults.local_max_size),
            local_policy: env_parse("CACHE_LOCAL_POLICY", defaults.local_policy),
            remote_url: env::var("REDIS_URL").unwrap_or(defaults.remote_url),
            remote_namespace: env::var("CACHE_NAMESPACE").unwrap_or(defaults.remote_namespace),
            remote_max_connections: env_parse(
                "CACHE_REMOTE_MAX_CONNECTIONS",
                defaults.remote_max_connections,
            ),
            remote_socket_timeout_ms: env_parse(
                "CACHE_REMOTE_SOCKET_TIMEOUT_MS",
                defaults.remote_socket_timeout_ms,
            ),
            default_remote_ttl_secs: env_parse(
                "CACHE_DEFAULT_REMOTE_TTL_SECONDS",
                defaults.default_remote_ttl_secs,
            ),
            default_local_ttl_secs: env_parse(
                "CACHE_DEFAULT_LOCAL_TTL_SECONDS",
                defaults.default_local_ttl_secs,
            ),
            local_sweep_interval_secs: env_parse(
                "CACHE_SWEEP_INTERVAL_SECONDS",
                defaults.local_sweep_interval_secs,
            ),
            invalidation_channel: env::var("CACHE_INVALIDATION_CHANNEL")
                .ok()
                .filter(|c| !c.trim().is_empty()),
        }
    }

    /// Reject values the cache layer cannot operate with
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] describing the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.local_max_size == 0 {
            return Err(CacheError::InvalidConfig(
                "local_max_size must be at least 1".to_string(),
            ));
        }
        if self.remote_max_connections == 0 {
            return Err(CacheError::InvalidConfig(
                "remote_max_connections must be at least 1".to_string(),
            ));
        }
        if self.remote_socket_timeout_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "remote_socket_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.default_remote_ttl_secs == 0 || self.default_local_ttl_secs == 0 {
            return Err(CacheError::InvalidConfig(
                "default TTLs must be greater than zero".to_string(),
            ));
        }
        if self
            .remote_namespace
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '*' | '?' | '[' | ']' | '\\'))
        {
            return Err(CacheError::InvalidConfig(format!(
                "remote_namespace `{}` must not contain whitespace or glob characters",
                self.remote_namespace
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_socket_timeout_ms)
    }

    #[must_use]
    pub fn default_remote_ttl(&self) -> Duration {
        Duration::from_secs(self.default_remote_ttl_secs)
    }

    /// Upper bound on every L1 TTL, including back-fills
    #[must_use]
    pub fn local_ttl_cap(&self) -> Duration {
        Duration::from_secs(self.default_local_ttl_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.local_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.local_sweep_interval_secs))
    }
}

fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr + fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, default = %default, "Ignoring unparsable cache setting");
            default
        }),
        Err(_) => default,
    }
}
