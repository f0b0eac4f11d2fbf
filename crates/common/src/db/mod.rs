//! Document store layer
//!
//! Provides:
//! - The article entity model
//! - A serverless-friendly connection policy (single pooled
//!   connection, short connect deadline, bounded reconnect backoff)
//! - The `ArticleStore` seam with SQL and in-memory implementations

pub mod entity;
mod store;

pub use store::{connect_store, ArticleStore, MemoryArticleStore, SqlArticleStore};

use crate::config::StoreConfig;
use crate::errors::{AppError, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::{info, warn};

const SCHEMA_SQL: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS articles (
        id TEXT PRIMARY KEY,
        url TEXT NOT NULL,
        title TEXT NOT NULL,
        abstract_text TEXT NOT NULL,
        published_date TIMESTAMPTZ,
        byline TEXT,
        image_url TEXT,
        source TEXT NOT NULL,
        section TEXT NOT NULL,
        keywords JSONB NOT NULL DEFAULT '[]'::jsonb,
        ai_commentary TEXT,
        commentary_generated_at TIMESTAMPTZ,
        commentary_source TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_articles_url ON articles (url)",
    "CREATE INDEX IF NOT EXISTS idx_articles_section_published ON articles (section, published_date DESC)",
    "CREATE INDEX IF NOT EXISTS idx_articles_enriched_section ON articles ((ai_commentary IS NOT NULL AND ai_commentary <> ''), section)",
];

/// Connect with the serverless-friendly policy, retrying with
/// exponential backoff up to the configured attempt cap
pub async fn connect_with_backoff(config: &StoreConfig) -> Result<DatabaseConnection> {
    let mut opts = ConnectOptions::new(&config.uri);
    opts.max_connections(config.max_connections)
        .min_connections(0)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .sqlx_logging(false);

    let mut policy = ExponentialBackoff {
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        match Database::connect(opts.clone()).await {
            Ok(conn) => {
                ensure_schema(&conn).await?;
                info!(attempt, "document store connected");
                return Ok(conn);
            }
            Err(e) if attempt < config.reconnect_attempts => {
                let pause = policy.next_backoff().unwrap_or(Duration::from_secs(1));
                warn!(attempt, error = %e, ?pause, "store connect failed; backing off");
                tokio::time::sleep(pause).await;
            }
            Err(e) => {
                return Err(AppError::StoreDown {
                    message: format!("connect failed after {} attempts: {}", attempt, e),
                });
            }
        }
    }
}

/// Create the articles table and its indexes when missing
pub async fn ensure_schema(conn: &DatabaseConnection) -> Result<()> {
    for stmt in SCHEMA_SQL {
        conn.execute_unprepared(stmt).await?;
    }
    Ok(())
}
