//! Enrichment worker
//!
//! For each article: cache-first commentary lookup, AI generation
//! through the key-pool balancer on miss, snapshot cache write, store
//! persistence, and the deterministic fallback once retries are spent.
//!
//! A store failure after a successful generation is logged, not
//! raised: the commentary lives in the cache and the next pass
//! back-fills the store.

use crate::prompt::{build_commentary_prompt, fallback_commentary};
use crate::provider::CommentaryProvider;
use chrono::Utc;
use metrics::{counter, histogram};
use newsforge_common::balancer::{Dispatched, KeyPool};
use newsforge_common::cache::{TieredCache, TtlClass};
use newsforge_common::db::ArticleStore;
use newsforge_common::errors::Result;
use newsforge_common::metrics::Timer;
use newsforge_common::models::{Article, ArticleSnapshot, CommentarySource};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// TTL for the worker's `article:{id}` snapshot writes
pub const ARTICLE_SNAPSHOT_TTL_SECS: u64 = 1_800;

/// Result of enriching one article
#[derive(Debug, Clone)]
pub struct EnrichOutcome {
    pub commentary: String,
    pub source: CommentarySource,
}

pub struct EnrichmentWorker {
    cache: Arc<TieredCache>,
    store: Arc<dyn ArticleStore>,
    ai_pool: Arc<KeyPool>,
    provider: Arc<dyn CommentaryProvider>,
}

impl EnrichmentWorker {
    pub fn new(
        cache: Arc<TieredCache>,
        store: Arc<dyn ArticleStore>,
        ai_pool: Arc<KeyPool>,
        provider: Arc<dyn CommentaryProvider>,
    ) -> Self {
        Self {
            cache,
            store,
            ai_pool,
            provider,
        }
    }

    /// Commentary for an article: cached when present, generated and
    /// cached under the commentary TTL otherwise
    pub async fn generate_commentary(&self, article: &Article) -> Result<String> {
        let key = newsforge_common::commentary_key(&article.id);
        let prompt = build_commentary_prompt(&article.title, &article.abstract_text, article.section);
        let pool = Arc::clone(&self.ai_pool);
        let provider = Arc::clone(&self.provider);

        self.cache
            .get_or_set(
                &key,
                move || async move {
                    let timer = Timer::start();
                    let prompt = prompt;
                    let text = pool
                        .dispatch(|cred| {
                            let provider = Arc::clone(&provider);
                            let prompt = prompt.clone();
                            async move {
                                let completion = provider.complete(&cred, &prompt).await?;
                                counter!("newsforge_generation_tokens_total")
                                    .increment(completion.tokens_used);
                                Ok(Dispatched {
                                    value: completion.text,
                                    units: completion.tokens_used,
                                })
                            }
                        })
                        .await?;
                    histogram!("newsforge_generation_duration_seconds")
                        .record(timer.elapsed_secs());
                    Ok(text.trim().to_string())
                },
                TtlClass::Commentary,
            )
            .await
    }

    /// One enrichment attempt on the queue path: the snapshot write is
    /// unconditional here. Rate-limit and exhaustion errors bubble so
    /// the queue's backoff handles them; the fallback path is the
    /// caller's decision once attempts are spent.
    pub async fn enrich(&self, article: &Article) -> Result<EnrichOutcome> {
        self.enrich_with_admission(article, true).await
    }

    /// One enrichment attempt. `admit_snapshot` is the cache-admission
    /// decision: the fetcher passes the threshold gate's state so a
    /// closed gate withholds the `article:{id}` write, while the
    /// commentary itself is always cached.
    #[instrument(skip(self, article), fields(article_id = %article.id))]
    pub async fn enrich_with_admission(
        &self,
        article: &Article,
        admit_snapshot: bool,
    ) -> Result<EnrichOutcome> {
        let commentary = self.generate_commentary(article).await?;
        let now = Utc::now();

        let enriched = article
            .clone()
            .with_commentary(commentary.clone(), CommentarySource::Ai, now);

        if admit_snapshot {
            self.cache_snapshot(&enriched, CommentarySource::Ai).await;
        }
        self.persist_commentary(&enriched, &commentary, CommentarySource::Ai)
            .await;

        counter!("newsforge_articles_enriched_total").increment(1);
        Ok(EnrichOutcome {
            commentary,
            source: CommentarySource::Ai,
        })
    }

    /// Deterministic fallback on the queue path; snapshot admission is
    /// unconditional
    pub async fn write_fallback(&self, article: &Article) -> Result<EnrichOutcome> {
        self.write_fallback_with_admission(article, true).await
    }

    /// Deterministic fallback once generation has permanently failed;
    /// the article still comes out complete. `admit_snapshot` follows
    /// the same cache-admission decision as enrichment.
    #[instrument(skip(self, article), fields(article_id = %article.id))]
    pub async fn write_fallback_with_admission(
        &self,
        article: &Article,
        admit_snapshot: bool,
    ) -> Result<EnrichOutcome> {
        let commentary = fallback_commentary(&article.title, article.section);
        let now = Utc::now();

        let key = newsforge_common::commentary_key(&article.id);
        if let Err(e) = self
            .cache
            .set_json(&key, &commentary, TtlClass::Commentary.secs())
            .await
        {
            warn!(error = %e, "failed to cache fallback commentary");
        }

        let enriched = article
            .clone()
            .with_commentary(commentary.clone(), CommentarySource::Fallback, now);

        if admit_snapshot {
            self.cache_snapshot(&enriched, CommentarySource::Fallback).await;
        }

        if !article.is_ephemeral() {
            // The row may not exist yet on the queue path; upsert the
            // whole article so it comes out complete either way
            if let Err(e) = self.store.upsert_by_url(&enriched).await {
                warn!(error = %e, "failed to persist fallback commentary");
            }
        }

        counter!("newsforge_fallback_commentary_total").increment(1);
        info!("article completed with fallback commentary");
        Ok(EnrichOutcome {
            commentary,
            source: CommentarySource::Fallback,
        })
    }

    /// Inline retry loop used by the fetcher: bounded attempts with
    /// exponential backoff, then the fallback. `admit_snapshot`
    /// carries the threshold gate's state at the call site.
    pub async fn enrich_with_retries(
        &self,
        article: &Article,
        max_attempts: u32,
        base_delay: Duration,
        admit_snapshot: bool,
    ) -> Result<EnrichOutcome> {
        for attempt in 1..=max_attempts {
            match self.enrich_with_admission(article, admit_snapshot).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt >= max_attempts => {
                    warn!(attempts = attempt, error = %e, "enrichment attempts spent; writing fallback");
                    return self.write_fallback_with_admission(article, admit_snapshot).await;
                }
                Err(e) if e.is_retryable_enrichment() => {
                    let pause = base_delay * 2u32.pow(attempt - 1);
                    debug!(attempt, error = %e, ?pause, "enrichment attempt failed; backing off");
                    tokio::time::sleep(pause).await;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "non-retryable enrichment failure; writing fallback");
                    return self.write_fallback_with_admission(article, admit_snapshot).await;
                }
            }
        }
        // Only reachable with max_attempts == 0
        self.write_fallback_with_admission(article, admit_snapshot).await
    }

    async fn cache_snapshot(&self, enriched: &Article, source: CommentarySource) {
        let snapshot = ArticleSnapshot::new(enriched.clone(), source, Utc::now());
        let key = newsforge_common::article_key(&enriched.id);
        if let Err(e) = self
            .cache
            .set_json(&key, &snapshot, ARTICLE_SNAPSHOT_TTL_SECS)
            .await
        {
            warn!(error = %e, "failed to cache article snapshot");
        }
    }

    async fn persist_commentary(&self, enriched: &Article, commentary: &str, source: CommentarySource) {
        if enriched.is_ephemeral() {
            debug!("ephemeral article; skipping store write");
            return;
        }
        match self
            .store
            .upsert_commentary(
                &enriched.id,
                commentary,
                source,
                enriched.commentary_generated_at.unwrap_or_else(Utc::now),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("article not in store yet; fetcher upsert will carry the commentary");
            }
            Err(e) => {
                // Not a job failure: the commentary is in cache
                warn!(error = %e, "store persistence failed; commentary remains cached");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockCommentaryProvider;
    use newsforge_common::balancer::{KeyPool, QuotaPolicy};
    use newsforge_common::cache::ShardPool;
    use newsforge_common::db::MemoryArticleStore;
    use newsforge_common::errors::AppError;
    use newsforge_common::models::Section;
    use std::collections::BTreeSet;

    fn article(id: &str) -> Article {
        Article {
            id: id.into(),
            title: format!("Title {}", id),
            abstract_text: "Abstract".into(),
            url: format!("https://example.com/{}", id),
            published_date: None,
            byline: None,
            image_url: None,
            source: "top-stories".into(),
            section: Section::World,
            keywords: BTreeSet::new(),
            ai_commentary: None,
            commentary_generated_at: None,
            commentary_source: None,
        }
    }

    fn worker_with(
        provider: Arc<dyn CommentaryProvider>,
        daily_limit: u64,
    ) -> (EnrichmentWorker, Arc<TieredCache>, Arc<MemoryArticleStore>) {
        let cache = Arc::new(TieredCache::new(Arc::new(ShardPool::memory_only())));
        let store = Arc::new(MemoryArticleStore::new());
        let pool = Arc::new(KeyPool::new(
            "ai",
            QuotaPolicy::ai(),
            vec!["key-1".into(), "key-2".into()],
            daily_limit,
        ));
        let worker = EnrichmentWorker::new(
            Arc::clone(&cache),
            store.clone() as Arc<dyn ArticleStore>,
            pool,
            provider,
        );
        (worker, cache, store)
    }

    #[tokio::test]
    async fn enrich_writes_snapshot_and_store() {
        let (worker, cache, store) = worker_with(Arc::new(MockCommentaryProvider::new()), 100_000);
        let a = article("a1");
        store.upsert_by_url(&a).await.unwrap();

        let out = worker.enrich(&a).await.unwrap();
        assert_eq!(out.source, CommentarySource::Ai);
        assert!(out.commentary.contains("Key Points"));

        // Snapshot cached with the worker TTL
        let snap = cache
            .get_json::<ArticleSnapshot>(&newsforge_common::article_key("a1"))
            .await
            .unwrap()
            .unwrap();
        assert!(snap.article.is_complete());

        // Store carries the commentary
        let stored = store.find_by_id("a1").await.unwrap().unwrap();
        assert!(stored.is_complete());
        assert_eq!(stored.commentary_source, Some(CommentarySource::Ai));
    }

    #[tokio::test]
    async fn second_enrich_hits_cache_without_spending_tokens() {
        let (worker, _, store) = worker_with(Arc::new(MockCommentaryProvider::new()), 100_000);
        let a = article("a2");
        store.upsert_by_url(&a).await.unwrap();

        let first = worker.enrich(&a).await.unwrap();
        let second = worker.enrich(&a).await.unwrap();
        assert_eq!(first.commentary, second.commentary);
    }

    #[tokio::test]
    async fn ephemeral_articles_skip_store() {
        let (worker, cache, store) = worker_with(Arc::new(MockCommentaryProvider::new()), 100_000);
        let a = article("temp-123");

        worker.enrich(&a).await.unwrap();
        assert!(store.is_empty());
        assert!(cache
            .exists(&newsforge_common::article_key("temp-123"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn credential_exhaustion_falls_back_after_retries() {
        // Two credentials with 1,000-token limits; each mock call
        // consumes 600 tokens, so after two generations the pool is
        // spent and the next article exhausts all credentials
        let (worker, _, store) = worker_with(
            Arc::new(MockCommentaryProvider::with_token_cost(600)),
            1_000,
        );

        for i in 0..2 {
            let a = article(&format!("ok{}", i));
            store.upsert_by_url(&a).await.unwrap();
            let out = worker.enrich(&a).await.unwrap();
            assert_eq!(out.source, CommentarySource::Ai);
        }

        let a = article("spent");
        store.upsert_by_url(&a).await.unwrap();
        let err = worker.enrich(&a).await.unwrap_err();
        assert!(matches!(err, AppError::ExhaustedAllCredentials { .. }));

        let out = worker
            .enrich_with_retries(&a, 3, Duration::from_millis(1), true)
            .await
            .unwrap();
        assert_eq!(out.source, CommentarySource::Fallback);

        let stored = store.find_by_id("spent").await.unwrap().unwrap();
        assert!(stored.is_complete());
        assert_eq!(stored.commentary_source, Some(CommentarySource::Fallback));
    }

    #[tokio::test]
    async fn fallback_commentary_is_cached_for_future_lookups() {
        let (worker, cache, _) = worker_with(
            Arc::new(MockCommentaryProvider::with_token_cost(600)),
            100,
        );
        // Limit too small for any call; goes straight through retries
        let a = article("nf");
        let out = worker
            .enrich_with_retries(&a, 2, Duration::from_millis(1), true)
            .await
            .unwrap();
        assert_eq!(out.source, CommentarySource::Fallback);

        let cached: String = cache
            .get_json(&newsforge_common::commentary_key("nf"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached, out.commentary);
    }

    #[tokio::test]
    async fn closed_gate_withholds_snapshot_but_caches_commentary() {
        let (worker, cache, store) = worker_with(Arc::new(MockCommentaryProvider::new()), 100_000);
        let a = article("ungated");
        store.upsert_by_url(&a).await.unwrap();

        let out = worker
            .enrich_with_retries(&a, 3, Duration::from_millis(1), false)
            .await
            .unwrap();
        assert_eq!(out.source, CommentarySource::Ai);

        // Commentary is always cached; the article snapshot is cache
        // admission and stays out until the gate opens
        assert!(cache
            .exists(&newsforge_common::commentary_key("ungated"))
            .await
            .unwrap());
        assert!(!cache
            .exists(&newsforge_common::article_key("ungated"))
            .await
            .unwrap());

        // The store write is never gated
        assert!(store.find_by_id("ungated").await.unwrap().unwrap().is_complete());
    }

    #[tokio::test]
    async fn closed_gate_withholds_fallback_snapshot_too() {
        let (worker, cache, store) = worker_with(
            Arc::new(MockCommentaryProvider::with_token_cost(600)),
            100,
        );
        let a = article("ungated-fb");
        store.upsert_by_url(&a).await.unwrap();

        let out = worker
            .enrich_with_retries(&a, 2, Duration::from_millis(1), false)
            .await
            .unwrap();
        assert_eq!(out.source, CommentarySource::Fallback);
        assert!(!cache
            .exists(&newsforge_common::article_key("ungated-fb"))
            .await
            .unwrap());
        assert!(store
            .find_by_id("ungated-fb")
            .await
            .unwrap()
            .unwrap()
            .is_complete());
    }
}
