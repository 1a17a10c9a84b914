//! Redis Remote Backend
//!
//! The production L2 store. Holds a small pool of `ConnectionManager`s
//! (each multiplexed, each reconnecting on its own) and hands them out
//! round-robin so a slow reply on one socket does not serialise every caller.

use async_trait::async_trait;
use redis::Client;
use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{CacheError, Result};
use crate::traits::{RemoteBackend, RemoteTtl};

/// Keys fetched per `SCAN` round trip
const SCAN_BATCH: usize = 500;

/// Redis store with a round-robin pool of `ConnectionManager`s
pub struct RedisBackend {
    pool: Vec<ConnectionManager>,
    next: AtomicUsize,
}

impl RedisBackend {
    /// Open `max_connections` managed connections to `redis_url`
    ///
    /// Each connection is verified with `PING`, and connecting is bounded by
    /// `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Redis`] if the URL is invalid or the server
    /// refuses the connection, [`CacheError::Timeout`] if it does not answer in
    /// time.
    pub async fn connect(
        redis_url: &str,
        max_connections: usize,
        connect_timeout: Duration,
    ) -> Result<Self> {
        info!(redis_url = %redis_url, max_connections, "Initializing Redis backend with ConnectionManager pool");

        let client = Client::open(redis_url)?;
        let size = max_connections.max(1);
        let mut pool = Vec::with_capacity(size);

        for _ in 0..size {
            let mut conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client.clone()))
                .await
                .map_err(|_| CacheError::Timeout {
                    op: "connect",
                    timeout: connect_timeout,
                })??;

            let ping: redis::RedisResult<String> =
                tokio::time::timeout(connect_timeout, redis::cmd("PING").query_async(&mut conn))
                    .await
                    .map_err(|_| CacheError::Timeout {
                        op: "ping",
                        timeout: connect_timeout,
                    })?;
            ping?;

            pool.push(conn);
        }

        info!(redis_url = %redis_url, connections = pool.len(), "Redis backend connected");

        Ok(Self {
            pool,
            next: AtomicUsize::new(0),
        })
    }

    fn conn(&self) -> Result<ConnectionManager> {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len().max(1);
        self.pool.get(slot).cloned().ok_or(CacheError::Unavailable)
    }

    /// Keys matching a glob pattern, gathered with cursor-based `SCAN`
    ///
    /// # Errors
    ///
    /// Returns an error if a Redis command fails.
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, count = keys.len(), "[Redis] Scanned keys matching pattern");
        Ok(keys)
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("connections", &self.pool.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn()?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Vec<u8>, RemoteTtl)>> {
        let mut conn = self.conn()?;
        let (value, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        Ok(value.map(|bytes| (bytes, RemoteTtl::from_pttl_millis(pttl))))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(millis);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        debug!(key = %key, ttl = ?ttl, "[Redis] Stored key");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let count: u64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn ttl(&self, key: &str) -> Result<RemoteTtl> {
        let mut conn = self.conn()?;
        let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(RemoteTtl::from_pttl_millis(pttl))
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let keys = self.scan_keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let mut removed = 0u64;
        for chunk in keys.chunks(SCAN_BATCH) {
            let count: u64 = redis::cmd("DEL").arg(chunk).query_async(&mut conn).await?;
            removed += count;
        }

        debug!(pattern = %pattern, removed, "[Redis] Removed keys matching pattern");
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Redis"
    }
}
