//! Typed Caches
//!
//! A thin wrapper binding one entity family to its key prefix, value type and
//! TTL tier, so a key can only ever be read back as the type it was written
//! with.
//!
//! ```rust,no_run
//! # use arcade_cache::{CacheStrategy, TypedCache};
//! # use serde::{Deserialize, Serialize};
//! # async fn example(cache: arcade_cache::CacheSystem) -> anyhow::Result<()> {
//! #[derive(Serialize, Deserialize)]
//! struct Application {
//!     code: String,
//!     title: String,
//! }
//!
//! let apps: TypedCache<Application> =
//!     cache.typed("app", CacheStrategy::MediumTerm);
//! let app = apps
//!     .get_or_load("beat-saber", || async {
//!         Ok(Application { code: "beat-saber".into(), title: "Beat Saber".into() })
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::codecs::JsonCodec;
use crate::error::Result;
use crate::orchestrator::{CacheOrchestrator, CacheStrategy, InvalidationReport};
use crate::pattern::escape;
use crate::traits::CacheCodec;

/// Cache view for one entity family (`{prefix}:{id}` keys of type `T`)
pub struct TypedCache<T, C: CacheCodec = JsonCodec> {
    orchestrator: Arc<CacheOrchestrator<C>>,
    prefix: String,
    strategy: CacheStrategy,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C: CacheCodec> Clone for TypedCache<T, C> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            prefix: self.prefix.clone(),
            strategy: self.strategy,
            _marker: PhantomData,
        }
    }
}

impl<T, C> TypedCache<T, C>
where
    T: Serialize + DeserializeOwned + Send + Sync,
    C: CacheCodec,
{
    #[must_use]
    pub fn new(
        orchestrator: Arc<CacheOrchestrator<C>>,
        prefix: impl Into<String>,
        strategy: CacheStrategy,
    ) -> Self {
        Self {
            orchestrator,
            prefix: prefix.into(),
            strategy,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn key(&self, id: &str) -> String {
        format!("{}:{id}", self.prefix)
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.orchestrator.get(&self.key(id)).await
    }

    pub async fn set(&self, id: &str, value: &T) -> bool {
        self.orchestrator
            .set_with_strategy(&self.key(id), value, self.strategy)
            .await
    }

    pub async fn invalidate(&self, id: &str) -> bool {
        self.orchestrator.delete(&self.key(id)).await
    }

    /// Invalidate every entry of this family
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPattern`](crate::CacheError::InvalidPattern)
    /// only if the prefix itself cannot form a pattern (e.g. it is empty).
    pub async fn invalidate_all(&self) -> Result<InvalidationReport> {
        let pattern = format!("{}:*", escape(&self.prefix));
        self.orchestrator.invalidate_pattern(&pattern).await
    }

    /// Cached value for `id`, or the loader's result (then cached)
    ///
    /// # Errors
    ///
    /// Returns the loader's error.
    pub async fn get_or_load<F, Fut>(&self, id: &str, loader: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        self.orchestrator
            .get_or_compute(&self.key(id), self.strategy, loader)
            .await
    }
}
