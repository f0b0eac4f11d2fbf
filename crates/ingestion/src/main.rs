//! NewsForge Ingestion Service
//!
//! The full pipeline in one process:
//! 1. Section rotation scheduler driving the article fetcher
//! 2. Inline enrichment through the AI key pool
//! 3. Queue consumer for ad-hoc and backlog enrichment
//! 4. Cache shard health loop and threshold gate

use newsforge_common::{
    balancer::{KeyPool, QuotaPolicy},
    cache::{spawn_health_task, ShardPool, TieredCache},
    config::AppConfig,
    db::connect_store,
    models::Section,
    queue::EnrichmentQueue,
    VERSION,
};
use newsforge_enricher::{create_provider, EnrichmentWorker, QueueConsumer};
use newsforge_ingestion::sources::{HeadlineFeedSource, SourceRouter, TopStoriesSource};
use newsforge_ingestion::{ArticleFetcher, CachePublisher, SectionRotation, ThresholdGate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};

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

    info!("Starting NewsForge Ingestion Service v{}", VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    newsforge_common::metrics::register_metrics();

    // Cache shard pool + health loop
    let pool = Arc::new(ShardPool::connect(&config.cache).await);
    info!(shards = pool.shard_count(), "cache shard pool ready");
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
    info!(
        model = provider.model_name(),
        credentials = ai_pool.len(),
        "Provider initialized"
    );

    let worker = Arc::new(EnrichmentWorker::new(
        Arc::clone(&cache),
        Arc::clone(&store),
        ai_pool,
        provider,
    ));

    // Publisher credential pools + source adapters
    let publisher_timeout = Duration::from_secs(config.publishers.timeout_secs);
    let top_stories_pool = Arc::new(KeyPool::new(
        "publisher-a",
        QuotaPolicy::publisher(),
        config.publishers.a_keys.clone(),
        config.publishers.a_daily_limit,
    ));
    let headline_feed_pool = Arc::new(KeyPool::new(
        "publisher-b",
        QuotaPolicy::publisher(),
        config.publishers.b_keys.clone(),
        config.publishers.b_daily_limit,
    ));
    let router = SourceRouter::with_default_routing(
        Arc::new(TopStoriesSource::new(
            config.publishers.a_base_url.clone(),
            top_stories_pool,
            publisher_timeout,
        )),
        Arc::new(HeadlineFeedSource::new(
            config.publishers.b_base_url.clone(),
            headline_feed_pool,
            publisher_timeout,
        )),
    );

    // Threshold gate + cache publisher + fetcher
    let sections = Section::ALL.to_vec();
    let gate = Arc::new(ThresholdGate::new(
        Arc::clone(&store),
        sections.clone(),
        config.scheduler.section_threshold,
    ));
    if let Err(e) = gate.check_threshold().await {
        warn!(error = %e, "initial threshold check failed");
    }

    let cache_publisher = Arc::new(CachePublisher::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        config.cache.max_section_cache,
    ));

    let fetcher = Arc::new(ArticleFetcher::new(
        router,
        Arc::clone(&store),
        Arc::clone(&cache),
        Arc::clone(&worker),
        Arc::clone(&gate),
        cache_publisher,
        config.item_pacing(),
        config.queue.max_attempts,
    ));

    // Queue + consumer for the asynchronous enrichment path
    let queue = Arc::new(EnrichmentQueue::new(
        Arc::clone(&cache),
        Arc::clone(&store),
        config.queue.clone(),
    ));
    if let Err(e) = queue.restore().await {
        warn!(error = %e, "queue restore failed; starting empty");
    }
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let consumer = QueueConsumer::new(Arc::clone(&queue), Arc::clone(&worker)).start(shutdown_rx);

    // Scheduler: optional boot backfill pass, then periodic rotation
    let rotation = Arc::new(SectionRotation::new(
        sections,
        fetcher,
        Arc::clone(&gate),
        config.rotation_period(),
        config.scheduler.max_per_tick,
    ));
    if config.scheduler.backfill_on_boot {
        rotation.run_backfill_once().await;
    }
    Arc::clone(&rotation).start();
    info!("pipeline running");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Teardown order: workers -> queue -> scheduler -> adapters
    queue.close();
    let _ = shutdown_tx.send(true);
    consumer.wait().await;
    rotation.stop();
    health_task.abort();

    info!("Ingestion service shutting down");
    Ok(())
}
