//! Basic Usage Example
//!
//! Demonstrates set/get through both levels, a typed cache, a post-commit
//! invalidation and a warm run. Works with or without a Redis server: when
//! `REDIS_URL` is unreachable the system runs on L1 alone.
//!
//! Run with: RUST_LOG=arcade_cache=debug cargo run --example basic_usage

use arcade_cache::{CacheStrategy, CacheSystemBuilder, TypedCache, WriteEvent, keys, producer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Application {
    code: String,
    title: String,
    max_players: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    arcade_cache::init_tracing("info");
    println!("=== Arcade Cache: Basic Usage ===\n");

    // 1. Build from REDIS_URL / CACHE_* variables
    let cache = CacheSystemBuilder::from_env().build().await?;

    if cache.health_check().await {
        println!("Cache system is healthy\n");
    }

    // 2. Untyped set / get
    let site = serde_json::json!({"id": 12, "name": "Downtown", "stations": 8});
    cache.set(&keys::site(12), &site, Some(Duration::from_secs(600))).await;
    if let Some(cached) = cache.get::<serde_json::Value>(&keys::site(12)).await {
        println!("Site from cache: {cached}");
    }

    // 3. Typed cache with a TTL tier
    let apps: TypedCache<Application> = cache.typed("app", CacheStrategy::MediumTerm);
    let app = apps
        .get_or_load("beat-saber", || async {
            println!("Loading beat-saber from the database...");
            Ok(Application {
                code: "beat-saber".to_string(),
                title: "Beat Saber".to_string(),
                max_players: 1,
            })
        })
        .await?;
    println!("Application: {app:?}");

    // 4. A committed write invalidates what it touched
    cache
        .invalidator()
        .after_commit(&WriteEvent::ApplicationUpdated {
            app_code: app.code.clone(),
        })
        .await;
    println!("After update, cached: {:?}\n", apps.get("beat-saber").await.map(|a| a.title));

    // 5. Warm the popular lists ahead of demand
    let mut producers = HashMap::new();
    producers.insert(
        "popular-apps".to_string(),
        producer(|| async { Ok(Some(vec!["beat-saber", "pistol-whip"])) }),
    );
    let report = cache.warmer().warm(producers, 4).await;
    println!("Warm run: {report:?}\n");

    // 6. Statistics
    let stats = cache.get_stats();
    println!("=== Cache Statistics ===");
    println!("Total requests: {}", stats.global.total_requests);
    println!("L1 hits: {}", stats.global.l1_hits);
    println!("L2 hits: {}", stats.global.l2_hits);
    println!("Misses: {}", stats.global.misses);
    println!("Hit rate: {:.2}%", stats.global.hit_rate * 100.0);
    println!("Back-fills (L2->L1): {}", stats.global.backfills);
    println!("Remote connected: {}", stats.remote.connected);

    cache.shutdown().await;
    Ok(())
}
