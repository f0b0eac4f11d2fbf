//! Cache batch publisher
//!
//! When the threshold gate opens, the articles enriched while it was
//! closed exist only in the store. This publisher pushes each
//! section's recent enriched articles into the cache tier: snapshot
//! keys plus the section FIFO lists.

use chrono::Utc;
use newsforge_common::cache::TieredCache;
use newsforge_common::db::ArticleStore;
use newsforge_common::errors::Result;
use newsforge_common::models::{ArticleSnapshot, CommentarySource, Section};
use newsforge_enricher::worker::ARTICLE_SNAPSHOT_TTL_SECS;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct CachePublisher {
    store: Arc<dyn ArticleStore>,
    cache: Arc<TieredCache>,
    max_section_cache: usize,
}

impl CachePublisher {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        cache: Arc<TieredCache>,
        max_section_cache: usize,
    ) -> Self {
        Self {
            store,
            cache,
            max_section_cache,
        }
    }

    pub fn max_section_cache(&self) -> usize {
        self.max_section_cache
    }

    /// Publish one section's enriched backlog: snapshot keys plus the
    /// FIFO list, oldest first so list order matches arrival order
    #[instrument(skip(self), fields(section = %section))]
    pub async fn publish_section(&self, section: Section) -> Result<usize> {
        let mut articles = self
            .store
            .list_enriched_by_section(section, self.max_section_cache)
            .await?;
        articles.reverse(); // oldest first

        let mut ids = Vec::with_capacity(articles.len());
        for article in &articles {
            if article.is_ephemeral() {
                continue;
            }
            let source = article
                .commentary_source
                .unwrap_or(CommentarySource::Ai);
            let snapshot = ArticleSnapshot::new(article.clone(), source, Utc::now());
            let key = newsforge_common::article_key(&article.id);
            if let Err(e) = self
                .cache
                .set_json(&key, &snapshot, ARTICLE_SNAPSHOT_TTL_SECS)
                .await
            {
                warn!(article_id = %article.id, error = %e, "snapshot publish failed");
                continue;
            }
            ids.push(article.id.clone());
        }

        if !ids.is_empty() {
            self.cache
                .manage_section_fifo(section, &ids, self.max_section_cache)
                .await?;
        }
        Ok(ids.len())
    }

    /// Publish every section's backlog; used on the closed-to-open
    /// gate transition
    pub async fn publish_all(&self, sections: &[Section]) -> usize {
        let mut published = 0;
        for &section in sections {
            match self.publish_section(section).await {
                Ok(n) => published += n,
                Err(e) => warn!(section = %section, error = %e, "section publish failed"),
            }
        }
        info!(published, "enriched backlog published to cache");
        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use newsforge_common::cache::ShardPool;
    use newsforge_common::db::MemoryArticleStore;
    use newsforge_common::models::Article;
    use std::collections::BTreeSet;

    fn enriched(id: &str, section: Section, age_hours: i64) -> Article {
        Article {
            id: id.into(),
            title: format!("Title {}", id),
            abstract_text: "A".into(),
            url: format!("https://example.com/{}", id),
            published_date: Some(Utc::now() - ChronoDuration::hours(age_hours)),
            byline: None,
            image_url: None,
            source: "s".into(),
            section,
            keywords: BTreeSet::new(),
            ai_commentary: Some("Key Points: ...".into()),
            commentary_generated_at: Some(Utc::now()),
            commentary_source: Some(CommentarySource::Ai),
        }
    }

    #[tokio::test]
    async fn publishes_backlog_in_arrival_order() {
        let store = Arc::new(MemoryArticleStore::new());
        let cache = Arc::new(TieredCache::new(Arc::new(ShardPool::memory_only())));

        store
            .upsert_by_url(&enriched("old", Section::World, 10))
            .await
            .unwrap();
        store
            .upsert_by_url(&enriched("new", Section::World, 1))
            .await
            .unwrap();

        let publisher = CachePublisher::new(
            store as Arc<dyn ArticleStore>,
            Arc::clone(&cache),
            20,
        );
        let n = publisher.publish_section(Section::World).await.unwrap();
        assert_eq!(n, 2);

        // Newest first on the read side
        let ids = cache.get_section_articles(Section::World, 20).await.unwrap();
        assert_eq!(ids, vec!["new".to_string(), "old".to_string()]);

        for id in ["old", "new"] {
            assert!(cache
                .exists(&newsforge_common::article_key(id))
                .await
                .unwrap());
        }
    }

    #[tokio::test]
    async fn ephemeral_ids_never_enter_the_list() {
        let store = Arc::new(MemoryArticleStore::new());
        let cache = Arc::new(TieredCache::new(Arc::new(ShardPool::memory_only())));
        store
            .upsert_by_url(&enriched("temp-x", Section::Health, 1))
            .await
            .unwrap();

        let publisher =
            CachePublisher::new(store as Arc<dyn ArticleStore>, Arc::clone(&cache), 20);
        let n = publisher.publish_section(Section::Health).await.unwrap();
        assert_eq!(n, 0);
        assert!(cache
            .get_section_articles(Section::Health, 20)
            .await
            .unwrap()
            .is_empty());
    }
}
