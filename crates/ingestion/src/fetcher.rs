//! Article fetcher
//!
//! Pulls a batch for one section through the routed publisher
//! adapter, dedupes against the store by URL, enriches each new item
//! inline (not through the queue), and persists the complete article.
//! Cache publication is withheld until the threshold gate opens; the
//! closed-to-open transition publishes the accumulated backlog.

use crate::publisher::CachePublisher;
use crate::sources::SourceRouter;
use crate::threshold::ThresholdGate;
use chrono::Utc;
use metrics::counter;
use newsforge_common::cache::TieredCache;
use newsforge_common::db::ArticleStore;
use newsforge_common::errors::{AppError, Result};
use newsforge_common::models::Section;
use newsforge_enricher::EnrichmentWorker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub struct ArticleFetcher {
    router: SourceRouter,
    store: Arc<dyn ArticleStore>,
    cache: Arc<TieredCache>,
    worker: Arc<EnrichmentWorker>,
    gate: Arc<ThresholdGate>,
    publisher: Arc<CachePublisher>,
    /// Courtesy pause between items within one batch
    item_pacing: Duration,
    enrich_attempts: u32,
    enrich_backoff: Duration,
}

impl ArticleFetcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: SourceRouter,
        store: Arc<dyn ArticleStore>,
        cache: Arc<TieredCache>,
        worker: Arc<EnrichmentWorker>,
        gate: Arc<ThresholdGate>,
        publisher: Arc<CachePublisher>,
        item_pacing: Duration,
        enrich_attempts: u32,
    ) -> Self {
        Self {
            router,
            store,
            cache,
            worker,
            gate,
            publisher,
            item_pacing,
            enrich_attempts,
            enrich_backoff: Duration::from_secs(5),
        }
    }

    /// Fetch, dedupe, and enrich up to `max_to_process` new articles
    /// for a section. Returns the number enriched and persisted.
    #[instrument(skip(self), fields(section = %section))]
    pub async fn fetch_section(&self, section: Section, max_to_process: usize) -> Result<usize> {
        let source = self
            .router
            .source_for(section)
            .ok_or_else(|| AppError::Configuration {
                message: format!("no source routed for section '{}'", section),
            })?;

        let batch = source.fetch_section(section).await?;
        counter!("newsforge_articles_fetched_total").increment(batch.len() as u64);
        debug!(source = source.name(), fetched = batch.len(), "batch pulled");

        let mut processed = 0usize;
        let mut published_ids: Vec<String> = Vec::new();

        for article in batch {
            if processed >= max_to_process {
                break;
            }

            // Dedupe by URL; a stored-and-enriched article is done
            match self.store.find_by_url(&article.url).await {
                Ok(Some(existing)) if existing.is_complete() => {
                    counter!("newsforge_articles_skipped_total").increment(1);
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(url = %article.url, error = %e, "dedup lookup failed; skipping item");
                    continue;
                }
            }

            // Inline enrichment, synchronous per item. The snapshot
            // write is cache admission, so it follows the gate.
            let admit_snapshot = self.gate.is_open();
            let outcome = self
                .worker
                .enrich_with_retries(
                    &article,
                    self.enrich_attempts,
                    self.enrich_backoff,
                    admit_snapshot,
                )
                .await?;

            let enriched =
                article
                    .clone()
                    .with_commentary(outcome.commentary, outcome.source, Utc::now());

            if enriched.is_ephemeral() {
                debug!(article_id = %enriched.id, "ephemeral article; cached but not persisted or listed");
                processed += 1;
            } else {
                match self.store.upsert_by_url(&enriched).await {
                    Ok(()) => {
                        processed += 1;
                        if self.gate.is_open() {
                            published_ids.push(enriched.id.clone());
                        }
                    }
                    Err(e) => {
                        warn!(article_id = %enriched.id, error = %e, "store upsert failed; not counting item");
                    }
                }
            }

            tokio::time::sleep(self.item_pacing).await;
        }

        // Drop stale per-section view caches built by the read layer
        let view_pattern = format!("section:{}:view:*", section.as_str());
        if let Err(e) = self.cache.invalidate(&[view_pattern.as_str()]).await {
            warn!(error = %e, "section view invalidation failed");
        }

        // Refresh the gate with this batch counted; opening it
        // publishes the whole backlog, otherwise list what this batch
        // admitted
        match self.gate.check_threshold().await {
            Ok((status, became_open)) => {
                if became_open {
                    self.publisher.publish_all(&Section::ALL).await;
                } else if status.all_met && !published_ids.is_empty() {
                    let max = self.publisher.max_section_cache();
                    if let Err(e) = self
                        .cache
                        .manage_section_fifo(section, &published_ids, max)
                        .await
                    {
                        warn!(error = %e, "section FIFO update failed");
                    }
                }
            }
            Err(e) => warn!(error = %e, "threshold check failed after batch"),
        }

        if processed > 0 {
            info!(section = %section, processed, "section batch enriched");
        }
        Ok(processed)
    }
}
