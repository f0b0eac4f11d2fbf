//! Article store implementations
//!
//! `SqlArticleStore` is the production path. It mirrors every write
//! into an in-memory stub so reads can degrade when the store drops
//! mid-flight; writes always surface their failures.
//! `MemoryArticleStore` stands alone in tests and store-less deploys.

use crate::config::StoreConfig;
use crate::db::entity::{ActiveModel, Column, Entity, Model};
use crate::errors::{AppError, Result};
use crate::models::{Article, CommentarySource, Section};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, Statement,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Store seam: the fetcher, worker, queue, and threshold gate all go
/// through this interface so tests can swap the backing
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Atomic insert-or-merge keyed on `url`
    async fn upsert_by_url(&self, article: &Article) -> Result<()>;

    /// Attach commentary to an existing row; returns false when the
    /// article is not in the store
    async fn upsert_commentary(
        &self,
        article_id: &str,
        commentary: &str,
        source: CommentarySource,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn find_by_url(&self, url: &str) -> Result<Option<Article>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Article>>;

    /// Count articles in a section, optionally only enriched ones
    async fn count_by_section(&self, section: Section, enriched_only: bool) -> Result<u64>;

    /// Enriched-article counts per section in one aggregate pass
    async fn enriched_counts_by_section(&self) -> Result<HashMap<Section, u64>>;

    /// Most recent enriched articles in a section, newest first
    async fn list_enriched_by_section(&self, section: Section, limit: usize)
        -> Result<Vec<Article>>;

    async fn ping(&self) -> Result<()>;
}

// ---------------------------------------------------------------------
// In-memory stub
// ---------------------------------------------------------------------

/// In-memory store used by tests, store-less deploys, and as the
/// degraded-read mirror inside the SQL store
#[derive(Default)]
pub struct MemoryArticleStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    by_url: HashMap<String, Article>,
    id_to_url: HashMap<String, String>,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("store lock").by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn upsert_by_url(&self, article: &Article) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock");
        if let Some(existing) = inner.by_url.get(&article.url) {
            let old_id = existing.id.clone();
            if old_id != article.id {
                inner.id_to_url.remove(&old_id);
            }
        }
        inner
            .id_to_url
            .insert(article.id.clone(), article.url.clone());
        inner.by_url.insert(article.url.clone(), article.clone());
        Ok(())
    }

    async fn upsert_commentary(
        &self,
        article_id: &str,
        commentary: &str,
        source: CommentarySource,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().expect("store lock");
        let Some(url) = inner.id_to_url.get(article_id).cloned() else {
            return Ok(false);
        };
        if let Some(article) = inner.by_url.get_mut(&url) {
            article.ai_commentary = Some(commentary.to_string());
            article.commentary_generated_at = Some(at);
            article.commentary_source = Some(source);
            return Ok(true);
        }
        Ok(false)
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<Article>> {
        Ok(self
            .inner
            .lock()
            .expect("store lock")
            .by_url
            .get(url)
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Article>> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .id_to_url
            .get(id)
            .and_then(|url| inner.by_url.get(url))
            .cloned())
    }

    async fn count_by_section(&self, section: Section, enriched_only: bool) -> Result<u64> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .by_url
            .values()
            .filter(|a| a.section == section && (!enriched_only || a.is_complete()))
            .count() as u64)
    }

    async fn enriched_counts_by_section(&self) -> Result<HashMap<Section, u64>> {
        let inner = self.inner.lock().expect("store lock");
        let mut counts = HashMap::new();
        for article in inner.by_url.values() {
            if article.is_complete() {
                *counts.entry(article.section).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn list_enriched_by_section(
        &self,
        section: Section,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let inner = self.inner.lock().expect("store lock");
        let mut matches: Vec<Article> = inner
            .by_url
            .values()
            .filter(|a| a.section == section && a.is_complete())
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.published_date.cmp(&a.published_date));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// SQL store
// ---------------------------------------------------------------------

/// SeaORM-backed store with a write-through in-memory mirror for
/// degraded reads
pub struct SqlArticleStore {
    conn: DatabaseConnection,
    mirror: MemoryArticleStore,
}

impl SqlArticleStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self {
            conn,
            mirror: MemoryArticleStore::new(),
        }
    }

    fn to_active_model(article: &Article, now: DateTime<Utc>) -> ActiveModel {
        ActiveModel {
            id: Set(article.id.clone()),
            url: Set(article.url.clone()),
            title: Set(article.title.clone()),
            abstract_text: Set(article.abstract_text.clone()),
            published_date: Set(article.published_date.map(Into::into)),
            byline: Set(article.byline.clone()),
            image_url: Set(article.image_url.clone()),
            source: Set(article.source.clone()),
            section: Set(article.section.as_str().to_string()),
            keywords: Set(serde_json::json!(article.keywords)),
            ai_commentary: Set(article.ai_commentary.clone()),
            commentary_generated_at: Set(article.commentary_generated_at.map(Into::into)),
            commentary_source: Set(article
                .commentary_source
                .map(|s| s.as_str().to_string())),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
    }
}

#[async_trait]
impl ArticleStore for SqlArticleStore {
    async fn upsert_by_url(&self, article: &Article) -> Result<()> {
        let now = Utc::now();
        let model = Self::to_active_model(article, now);

        Entity::insert(model)
            .on_conflict(
                OnConflict::column(Column::Url)
                    .update_columns([
                        Column::Id,
                        Column::Title,
                        Column::AbstractText,
                        Column::PublishedDate,
                        Column::Byline,
                        Column::ImageUrl,
                        Column::Source,
                        Column::Section,
                        Column::Keywords,
                        Column::AiCommentary,
                        Column::CommentaryGeneratedAt,
                        Column::CommentarySource,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        // Best-effort mirror for degraded reads
        let _ = self.mirror.upsert_by_url(article).await;
        Ok(())
    }

    async fn upsert_commentary(
        &self,
        article_id: &str,
        commentary: &str,
        source: CommentarySource,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let res = Entity::update_many()
            .col_expr(Column::AiCommentary, Expr::value(commentary))
            .col_expr(
                Column::CommentaryGeneratedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(at)),
            )
            .col_expr(Column::CommentarySource, Expr::value(source.as_str()))
            .col_expr(
                Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(Column::Id.eq(article_id))
            .exec(&self.conn)
            .await?;

        let _ = self
            .mirror
            .upsert_commentary(article_id, commentary, source, at)
            .await;
        Ok(res.rows_affected > 0)
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<Article>> {
        let found = Entity::find()
            .filter(Column::Url.eq(url))
            .one(&self.conn)
            .await;

        match found {
            Ok(Some(model)) => Ok(Some(model.into_article()?)),
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(error = %e, "store read failed; serving from in-memory mirror");
                self.mirror.find_by_url(url).await
            }
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Article>> {
        let found = Entity::find_by_id(id).one(&self.conn).await;
        match found {
            Ok(Some(model)) => Ok(Some(model.into_article()?)),
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(error = %e, "store read failed; serving from in-memory mirror");
                self.mirror.find_by_id(id).await
            }
        }
    }

    async fn count_by_section(&self, section: Section, enriched_only: bool) -> Result<u64> {
        let mut query = Entity::find().filter(Column::Section.eq(section.as_str()));
        if enriched_only {
            query = query
                .filter(Column::AiCommentary.is_not_null())
                .filter(Column::AiCommentary.ne(""));
        }
        match query.count(&self.conn).await {
            Ok(n) => Ok(n),
            Err(e) => {
                warn!(error = %e, "store count failed; serving from in-memory mirror");
                self.mirror.count_by_section(section, enriched_only).await
            }
        }
    }

    async fn enriched_counts_by_section(&self) -> Result<HashMap<Section, u64>> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT section, COUNT(*) AS cnt FROM articles \
             WHERE ai_commentary IS NOT NULL AND ai_commentary <> '' \
             GROUP BY section",
        );

        let rows = match self.conn.query_all(stmt).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "store aggregate failed; serving from in-memory mirror");
                return self.mirror.enriched_counts_by_section().await;
            }
        };

        let mut counts = HashMap::new();
        for row in rows {
            let section: String = row.try_get("", "section")?;
            let cnt: i64 = row.try_get("", "cnt")?;
            if let Ok(section) = section.parse::<Section>() {
                counts.insert(section, cnt.max(0) as u64);
            }
        }
        Ok(counts)
    }

    async fn list_enriched_by_section(
        &self,
        section: Section,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let found = Entity::find()
            .filter(Column::Section.eq(section.as_str()))
            .filter(Column::AiCommentary.is_not_null())
            .filter(Column::AiCommentary.ne(""))
            .order_by_desc(Column::PublishedDate)
            .limit(limit as u64)
            .all(&self.conn)
            .await;

        match found {
            Ok(models) => models.into_iter().map(Model::into_article).collect(),
            Err(e) => {
                warn!(error = %e, "store list failed; serving from in-memory mirror");
                self.mirror.list_enriched_by_section(section, limit).await
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::StoreDown {
                message: format!("store ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// Build the store for the configured URI. An empty URI or a store
/// that stays unreachable through the reconnect budget degrades to the
/// in-memory stub so the pipeline can still run.
pub async fn connect_store(config: &StoreConfig) -> Arc<dyn ArticleStore> {
    if config.uri.is_empty() {
        info!("STORE_URI not set; using in-memory article store");
        return Arc::new(MemoryArticleStore::new());
    }

    match crate::db::connect_with_backoff(config).await {
        Ok(conn) => Arc::new(SqlArticleStore::new(conn)),
        Err(e) => {
            warn!(error = %e, "document store unreachable; degrading to in-memory store");
            Arc::new(MemoryArticleStore::new())
        }
    }
}
