//! Cache Error Types
//!
//! Only [`CacheError::InvalidPattern`] and [`CacheError::InvalidConfig`] are ever
//! returned to callers of the public cache surface. Every other variant is
//! produced inside the remote client, logged, counted, and converted to a
//! miss or no-op result before it can reach business code.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the cache layer
#[derive(Debug, Error)]
pub enum CacheError {
    /// Remote store unreachable or connection never established
    #[error("remote cache unavailable")]
    Unavailable,

    /// Remote call exceeded the configured socket timeout
    #[error("remote cache operation `{op}` timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    /// Value could not be encoded or decoded
    #[error("cache value serialization failed: {0}")]
    Serialization(String),

    /// Malformed invalidation pattern (programming error at the call site)
    #[error("invalid cache key pattern `{pattern}`: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },

    /// Rejected configuration value
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// Transport error reported by a non-Redis backend
    #[error("remote cache backend error: {0}")]
    Backend(String),

    /// Transport error reported by Redis
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl CacheError {
    pub(crate) fn invalid_pattern(pattern: &str, reason: &'static str) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        }
    }

    /// Short label used as a structured logging field
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Serialization(_) => "serialization",
            Self::InvalidPattern { .. } => "invalid_pattern",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Backend(_) => "backend",
            #[cfg(feature = "redis")]
            Self::Redis(_) => "redis",
        }
    }
}

/// Convenience result alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
