//! NewsForge Enrichment Worker
//!
//! Standalone queue consumer:
//! 1. Restores the enrichment queue from the cache tier
//! 2. Pulls jobs under the rate limiter and concurrency cap
//! 3. Generates commentary via the AI key pool
//! 4. Persists enriched articles to the store and cache

use newsforge_enricher::{create_provider, EnrichmentWorker, QueueConsumer};
use newsforge_common::{
    balancer::{KeyPool, QuotaPolicy},
    cache::{spawn_health_task, ShardPool, TieredCache},
    config::AppConfig,
    db::connect_store,
    queue::EnrichmentQueue,
    VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting NewsForge Enrichment Worker v{}", VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    newsforge_common::metrics::register_metrics();

    // Cache shard pool + health loop
    let pool = Arc::new(ShardPool::connect(&config.cache).await);
    let health_task = spawn_health_task(
        Arc::clone(&pool),
        Duration::from_secs(config.cache.health_interval_secs),
    );
    let cache = Arc::new(TieredCache::new(pool));

    // Document store
    info!("Connecting to document store...");
    let store = connect_store(&config.store).await;

    // AI credential pool + provider
    let ai_pool = Arc::new(KeyPool::new(
        "ai",
        QuotaPolicy::ai(),
        config.ai.keys.clone(),
        config.ai.daily_token_limit,
    ));
    let provider = create_provider(&config.ai);
    info!(model = provider.model_name(), credentials = ai_pool.len(), "Provider initialized");

    let worker = Arc::new(EnrichmentWorker::new(
        Arc::clone(&cache),
        Arc::clone(&store),
        ai_pool,
        provider,
    ));

    // Queue: restore persisted backlog, then consume
    let queue = Arc::new(EnrichmentQueue::new(
        Arc::clone(&cache),
        Arc::clone(&store),
        config.queue.clone(),
    ));
    let restored = queue.restore().await.unwrap_or_else(|e| {
        error!(error = %e, "Queue restore failed; starting empty");
        0
    });
    info!(restored, "Enrichment worker ready, starting consumer...");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let consumer = QueueConsumer::new(Arc::clone(&queue), worker).start(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Teardown order: stop submissions, drain workers, close adapters
    queue.close();
    let _ = shutdown_tx.send(true);
    consumer.wait().await;
    health_task.abort();

    info!("Enrichment worker shutting down");
    Ok(())
}
