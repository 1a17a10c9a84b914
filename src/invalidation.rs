//! Cache Invalidation
//!
//! Two concerns live here:
//!
//! - the write-side contract: after a database transaction commits, the
//!   write path hands a [`WriteEvent`] to [`CacheInvalidator::after_commit`],
//!   which deletes the affected keys and key families. Invalidation failures
//!   are logged, never returned, so a cache problem cannot fail a write.
//! - cross-instance L1 invalidation: every instance has its own L1, so
//!   deletes and pattern invalidations are broadcast to peers, which apply
//!   them to their L1 only (L2 is shared and already correct).

#[cfg(feature = "redis")]
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::keys;
use crate::orchestrator::CacheOrchestrator;
use crate::traits::CacheCodec;

/// What a peer should drop from its L1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvalidationAction {
    /// Remove a single key
    Remove { key: String },
    /// Remove keys matching a pattern (L1 substring rule)
    RemovePattern { pattern: String },
    /// Remove everything
    Clear,
}

/// Invalidation broadcast between cache instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Instance id of the publisher; receivers skip their own messages
    pub origin: String,
    pub action: InvalidationAction,
}

impl InvalidationMessage {
    pub fn new(origin: impl Into<String>, action: InvalidationAction) -> Self {
        Self {
            origin: origin.into(),
            action,
        }
    }

    /// Serialize to JSON for transmission
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("Failed to serialize invalidation message")
    }

    /// Deserialize from JSON
    ///
    /// # Errors
    ///
    /// Returns an error for payloads that are not invalidation messages.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize invalidation message")
    }
}

/// Transport that delivers invalidation messages to peer instances
#[async_trait]
pub trait InvalidationBroadcaster: Send + Sync {
    async fn publish(&self, message: &InvalidationMessage) -> Result<()>;

    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Counters for received invalidation messages
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvalidationStats {
    pub messages_received: u64,
    pub entries_removed: u64,
    pub processing_errors: u64,
}

/// Thread-safe statistics for invalidation operations
#[derive(Debug, Default)]
pub struct AtomicInvalidationStats {
    pub messages_received: AtomicU64,
    pub entries_removed: AtomicU64,
    pub processing_errors: AtomicU64,
}

impl AtomicInvalidationStats {
    pub fn snapshot(&self) -> InvalidationStats {
        InvalidationStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
        }
    }
}

/// In-process broadcaster over a `tokio::sync::broadcast` channel
///
/// Connects several orchestrators living in one process (and stands in for
/// Pub/Sub in tests).
#[derive(Debug, Clone)]
pub struct LocalBroadcaster {
    sender: broadcast::Sender<InvalidationMessage>,
}

impl LocalBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationMessage> {
        self.sender.subscribe()
    }
}

impl Default for LocalBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl InvalidationBroadcaster for LocalBroadcaster {
    async fn publish(&self, message: &InvalidationMessage) -> Result<()> {
        // No receivers is not a failure: there are simply no peers yet
        let receivers = self.sender.send(message.clone()).unwrap_or(0);
        debug!(receivers, action = ?message.action, "Published invalidation in-process");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Apply messages from a [`LocalBroadcaster`] to `orchestrator`'s L1
///
/// A lagging receiver has missed invalidations, so it clears L1 rather than
/// risk serving stale entries. The task ends when the broadcaster is dropped.
pub fn spawn_local_listener<C: CacheCodec>(
    orchestrator: Arc<CacheOrchestrator<C>>,
    mut receiver: broadcast::Receiver<InvalidationMessage>,
    stats: Arc<AtomicInvalidationStats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    stats.messages_received.fetch_add(1, Ordering::Relaxed);
                    let removed = orchestrator.apply_peer_invalidation(&message);
                    stats
                        .entries_removed
                        .fetch_add(removed as u64, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    stats.processing_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(missed, "Invalidation listener lagged, clearing local cache");
                    orchestrator.local().clear();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Invalidation channel closed, listener stopping");
                    break;
                }
            }
        }
    })
}

/// Publishes invalidation messages over Redis Pub/Sub
#[cfg(feature = "redis")]
pub struct RedisInvalidationPublisher {
    connection: redis::aio::ConnectionManager,
    channel: String,
}

#[cfg(feature = "redis")]
impl RedisInvalidationPublisher {
    /// Open a dedicated publishing connection
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Redis`](crate::CacheError::Redis) if the connection cannot be established.
    pub async fn connect(redis_url: &str, channel: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = redis::aio::ConnectionManager::new(client).await?;
        let channel = channel.into();
        info!(channel = %channel, "Invalidation publisher connected");

        Ok(Self {
            connection,
            channel,
        })
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl InvalidationBroadcaster for RedisInvalidationPublisher {
    async fn publish(&self, message: &InvalidationMessage) -> Result<()> {
        let json = message
            .to_json()
            .map_err(|e| crate::error::CacheError::Serialization(e.to_string()))?;

        let mut conn = self.connection.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(json)
            .query_async(&mut conn)
            .await?;

        debug!(channel = %self.channel, receivers, "Published invalidation");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Handle for subscribing to invalidation messages over Redis Pub/Sub
///
/// Spawns a background task that listens on the channel and passes each
/// message to a handler, resubscribing after connection loss.
#[cfg(feature = "redis")]
pub struct InvalidationSubscriber {
    client: redis::Client,
    channel: String,
    stats: Arc<AtomicInvalidationStats>,
    shutdown_tx: broadcast::Sender<()>,
}

#[cfg(feature = "redis")]
impl InvalidationSubscriber {
    /// Delay before resubscribing after a failure
    const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

    /// Create a new subscriber
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis URL is invalid.
    pub fn new(redis_url: &str, channel: impl Into<String>) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)
            .context("Failed to create Redis client for subscriber")?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            client,
            channel: channel.into(),
            stats: Arc::new(AtomicInvalidationStats::default()),
            shutdown_tx,
        })
    }

    #[must_use]
    pub fn stats(&self) -> InvalidationStats {
        self.stats.snapshot()
    }

    /// Start the subscriber background task
    ///
    /// `handler` returns the number of entries it removed.
    pub fn start<F>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn(InvalidationMessage) -> usize + Send + Sync + 'static,
    {
        let client = self.client.clone();
        let channel = self.channel.clone();
        let stats = Arc::clone(&self.stats);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                match Self::run_subscriber_loop(&client, &channel, &handler, &stats, &mut shutdown_rx)
                    .await
                {
                    Ok(()) => {
                        info!(channel = %channel, "Invalidation subscriber shutting down");
                        break;
                    }
                    Err(e) => {
                        error!(channel = %channel, error = %e, "Invalidation subscriber failed, reconnecting");
                        stats.processing_errors.fetch_add(1, Ordering::Relaxed);

                        tokio::select! {
                            () = tokio::time::sleep(Self::RECONNECT_DELAY) => {}
                            _ = shutdown_rx.recv() => {
                                info!(channel = %channel, "Invalidation subscriber shutting down");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }

    async fn run_subscriber_loop<F>(
        client: &redis::Client,
        channel: &str,
        handler: &F,
        stats: &AtomicInvalidationStats,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> anyhow::Result<()>
    where
        F: Fn(InvalidationMessage) -> usize,
    {
        use futures_util::StreamExt;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .context("Failed to get pubsub connection")?;
        pubsub
            .subscribe(channel)
            .await
            .context("Failed to subscribe to channel")?;
        info!(channel = %channel, "Subscribed to invalidation channel");

        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        anyhow::bail!("Pub/Sub message stream ended");
                    };

                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(error = %e, "Failed to read invalidation payload");
                            stats.processing_errors.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                    };

                    match InvalidationMessage::from_json(&payload) {
                        Ok(message) => {
                            stats.messages_received.fetch_add(1, Ordering::Relaxed);
                            let removed = handler(message);
                            stats.entries_removed.fetch_add(removed as u64, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!(error = %e, "Ignoring malformed invalidation message");
                            stats.processing_errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    return Ok(());
                }
            }
        }
    }

    /// Signal the subscriber to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// A committed write that affects cached entities
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteEvent {
    ApplicationUpdated { app_code: String },
    ApplicationDeleted { app_code: String },
    OperatorAuthorized { operator_id: String, app_code: String },
    AuthorizationRevoked { operator_id: String, app_code: String },
    OperatorUpdated { operator_id: String },
    SiteUpdated { site_id: String },
}

impl WriteEvent {
    /// Single keys to delete
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        match self {
            Self::ApplicationUpdated { app_code } | Self::ApplicationDeleted { app_code } => {
                vec![keys::app(app_code), keys::app_list()]
            }
            Self::OperatorAuthorized {
                operator_id,
                app_code,
            }
            | Self::AuthorizationRevoked {
                operator_id,
                app_code,
            } => vec![keys::authorization(operator_id, app_code)],
            Self::OperatorUpdated { operator_id } => vec![keys::operator(operator_id)],
            Self::SiteUpdated { site_id } => vec![keys::site(site_id)],
        }
    }

    /// Key families to invalidate by pattern
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        match self {
            Self::ApplicationUpdated { app_code } | Self::ApplicationDeleted { app_code } => {
                vec![keys::app_authorizations_pattern(app_code)]
            }
            Self::OperatorAuthorized { operator_id, .. }
            | Self::AuthorizationRevoked { operator_id, .. }
            | Self::OperatorUpdated { operator_id } => {
                vec![keys::operator_authorizations_pattern(operator_id)]
            }
            Self::SiteUpdated { site_id } => vec![keys::site_family_pattern(site_id)],
        }
    }
}

/// Commit-then-invalidate hook for write paths
///
/// ```rust,ignore
/// let txn_result = repo.update_application(&app).await?; // commit first
/// invalidator
///     .after_commit(&WriteEvent::ApplicationUpdated { app_code: app.code.clone() })
///     .await;
/// Ok(txn_result)
/// ```
pub struct CacheInvalidator<C: CacheCodec = crate::codecs::JsonCodec> {
    orchestrator: Arc<CacheOrchestrator<C>>,
}

impl<C: CacheCodec> Clone for CacheInvalidator<C> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }
}

impl<C: CacheCodec> CacheInvalidator<C> {
    #[must_use]
    pub fn new(orchestrator: Arc<CacheOrchestrator<C>>) -> Self {
        Self { orchestrator }
    }

    /// Invalidate everything `event` affects
    ///
    /// Call only after the transaction has committed. Never fails; problems
    /// are logged and the staleness they leave is bounded by the TTLs.
    pub async fn after_commit(&self, event: &WriteEvent) {
        for key in event.keys() {
            self.orchestrator.delete(&key).await;
        }

        for pattern in event.patterns() {
            if let Err(e) = self.orchestrator.invalidate_pattern(&pattern).await {
                error!(pattern = %pattern, event = ?event, error = %e, "Cache invalidation rejected after commit");
            }
        }

        debug!(event = ?event, "Cache invalidated after commit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_json_shape() -> anyhow::Result<()> {
        let msg = InvalidationMessage::new(
            "instance-a",
            InvalidationAction::RemovePattern {
                pattern: "auth:op1:*".into(),
            },
        );
        let json = msg.to_json()?;
        assert_eq!(
            json,
            r#"{"origin":"instance-a","action":{"type":"remove_pattern","pattern":"auth:op1:*"}}"#
        );
        assert_eq!(InvalidationMessage::from_json(&json)?, msg);

        let clear = InvalidationMessage::new("b", InvalidationAction::Clear);
        assert_eq!(InvalidationMessage::from_json(&clear.to_json()?)?, clear);
        Ok(())
    }

    #[test]
    fn test_malformed_message_rejected() {
        assert!(InvalidationMessage::from_json(r#"{"origin":"a","action":{"type":"explode"}}"#).is_err());
    }

    #[test]
    fn test_write_event_targets() {
        let event = WriteEvent::AuthorizationRevoked {
            operator_id: "op1".into(),
            app_code: "appA".into(),
        };
        assert_eq!(event.keys(), vec!["auth:op1:appA".to_string()]);
        assert_eq!(event.patterns(), vec!["auth:op1:*".to_string()]);

        let event = WriteEvent::ApplicationUpdated {
            app_code: "beat-saber".into(),
        };
        assert_eq!(
            event.keys(),
            vec!["app:beat-saber".to_string(), "apps:all".to_string()]
        );
    }

    #[tokio::test]
    async fn test_local_broadcaster_without_peers() {
        let bus = LocalBroadcaster::new(4);
        let msg = InvalidationMessage::new("a", InvalidationAction::Clear);
        assert!(bus.publish(&msg).await.is_ok());

        let mut rx = bus.subscribe();
        assert!(bus.publish(&msg).await.is_ok());
        assert_eq!(rx.recv().await.ok(), Some(msg));
    }
}
