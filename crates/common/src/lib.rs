//! NewsForge Common Library
//!
//! Shared code for the NewsForge enrichment pipeline services including:
//! - Canonical article model and section enumeration
//! - Document store adapter (SeaORM + in-memory stub)
//! - Cache shard pool and tiered cache facade
//! - Key-pool load balancers with daily quotas
//! - Enrichment job queue
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod balancer;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod queue;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use models::{Article, CommentarySource, Section};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cache key for a commentary string
pub fn commentary_key(article_id: &str) -> String {
    format!("commentary:{}", article_id)
}

/// Cache key for a full enriched article snapshot
pub fn article_key(article_id: &str) -> String {
    format!("article:{}", article_id)
}

/// Cache key for a section's FIFO article list
pub fn section_list_key(section: Section) -> String {
    format!("section:{}:articles", section.as_str())
}

/// Prefix used by ephemeral article ids that must never reach the store
pub const EPHEMERAL_ID_PREFIX: &str = "temp-";
