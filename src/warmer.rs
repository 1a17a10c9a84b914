//! Cache Warmer
//!
//! Runs named producers ahead of demand and stores their results under
//! `warm:{name}`. Producers run concurrently under a semaphore; one failing
//! or panicking producer never stops the others.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::codecs::JsonCodec;
use crate::keys;
use crate::orchestrator::{CacheOrchestrator, SetOptions};
use crate::traits::CacheCodec;

/// TTL of warmed entries
pub const WARM_TTL: Duration = Duration::from_secs(3600);

/// Zero-argument async producer; `Ok(None)` means "nothing to cache"
pub type Producer<T> =
    Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<Option<T>>> + Send>;

/// Box an async closure as a [`Producer`]
pub fn producer<T, F, Fut>(f: F) -> Producer<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// Outcome of one warm run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    /// Stored in both levels
    pub warmed: usize,
    /// Producer returned nothing
    pub skipped: usize,
    /// Producer failed or panicked, or the value could not be fully stored
    pub failed: usize,
}

impl WarmReport {
    fn merge(&mut self, other: Self) {
        self.warmed += other.warmed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

enum Outcome {
    Warmed,
    Skipped,
    Failed,
}

/// Proactive cache population
pub struct CacheWarmer<C: CacheCodec = JsonCodec> {
    orchestrator: Arc<CacheOrchestrator<C>>,
    ttl: Duration,
    tasks: Mutex<Vec<ScheduledRun>>,
}

/// A background run and the signal that stops it
struct ScheduledRun {
    handle: JoinHandle<WarmReport>,
    cancel: watch::Sender<bool>,
}

impl<C: CacheCodec> CacheWarmer<C> {
    #[must_use]
    pub fn new(orchestrator: Arc<CacheOrchestrator<C>>) -> Self {
        Self {
            orchestrator,
            ttl: WARM_TTL,
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Run every producer (at most `max_concurrent` at once) and wait for all
    pub async fn warm<T>(&self, producers: HashMap<String, Producer<T>>, max_concurrent: usize) -> WarmReport
    where
        T: Serialize + Send + Sync + 'static,
    {
        let (_cancel, cancelled) = watch::channel(false);
        Self::run(Arc::clone(&self.orchestrator), producers, max_concurrent, self.ttl, cancelled).await
    }

    /// Schedule a warm run without waiting for it
    ///
    /// The run is tracked so [`cancel_all`](Self::cancel_all) can stop it.
    pub fn warm_async<T>(&self, producers: HashMap<String, Producer<T>>, max_concurrent: usize)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(Self::run(
            Arc::clone(&self.orchestrator),
            producers,
            max_concurrent,
            self.ttl,
            cancelled,
        ));

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.handle.is_finished());
        tasks.push(ScheduledRun { handle, cancel });
    }

    /// Scheduled runs that have not finished yet
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|task| !task.handle.is_finished())
            .count()
    }

    /// Wait for every scheduled run and sum their reports
    pub async fn wait_all(&self) -> WarmReport {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut report = WarmReport::default();

        for task in tasks {
            match task.handle.await {
                Ok(run) => report.merge(run),
                Err(e) => warn!(error = %e, "Warm run did not complete"),
            }
        }
        report
    }

    /// Cancel every scheduled run and wait until each has stopped
    ///
    /// A cancelled run stops its producers and waits for them, so nothing
    /// is stored once this returns. Returns how many were still running.
    pub async fn cancel_all(&self) -> usize {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut cancelled = 0;

        for task in &tasks {
            if !task.handle.is_finished() {
                cancelled += 1;
            }
            // Fails only when the run already finished
            let _ = task.cancel.send(true);
        }
        for task in tasks {
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Warm run did not stop cleanly");
            }
        }

        if cancelled > 0 {
            info!(cancelled, "Cancelled warm runs");
        }
        cancelled
    }

    async fn run<T>(
        orchestrator: Arc<CacheOrchestrator<C>>,
        producers: HashMap<String, Producer<T>>,
        max_concurrent: usize,
        ttl: Duration,
        mut cancelled: watch::Receiver<bool>,
    ) -> WarmReport
    where
        T: Serialize + Send + Sync + 'static,
    {
        let total = producers.len();
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut running = JoinSet::new();

        for (name, produce) in producers {
            let semaphore = Arc::clone(&semaphore);
            let orchestrator = Arc::clone(&orchestrator);
            let cancelled = cancelled.clone();

            running.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Outcome::Failed;
                };

                let produced = produce().await;
                let stopped = *cancelled.borrow();
                match produced {
                    // A producer that outlived its cancellation stores nothing
                    Ok(Some(_)) if stopped => Outcome::Skipped,
                    Ok(Some(value)) => {
                        let key = keys::warm(&name);
                        if orchestrator.set(&key, &value, SetOptions::with_ttl(ttl)).await {
                            debug!(key = %key, "Warmed cache entry");
                            Outcome::Warmed
                        } else {
                            warn!(key = %key, "Warmed value was not fully stored");
                            Outcome::Failed
                        }
                    }
                    Ok(None) => Outcome::Skipped,
                    Err(e) => {
                        warn!(producer = %name, error = %e, "Cache warm producer failed");
                        Outcome::Failed
                    }
                }
            });
        }

        let mut report = WarmReport::default();
        let mut signal_open = true;
        loop {
            tokio::select! {
                changed = cancelled.changed(), if signal_open => {
                    if changed.is_err() {
                        signal_open = false;
                        continue;
                    }
                    let stop = *cancelled.borrow();
                    if stop {
                        let outstanding = running.len();
                        // Aborts every producer and waits for each to stop
                        running.shutdown().await;
                        info!(outstanding, "Cache warm run cancelled");
                        return report;
                    }
                }
                joined = running.join_next() => {
                    let Some(result) = joined else { break };
                    match result {
                        Ok(Outcome::Warmed) => report.warmed += 1,
                        Ok(Outcome::Skipped) => report.skipped += 1,
                        Ok(Outcome::Failed) => report.failed += 1,
                        Err(e) => {
                            warn!(error = %e, "Cache warm producer panicked");
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        info!(total, warmed = report.warmed, skipped = report.skipped, failed = report.failed, "Cache warm run finished");
        report
    }
}

impl<C: CacheCodec> std::fmt::Debug for CacheWarmer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWarmer")
            .field("ttl", &self.ttl)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
