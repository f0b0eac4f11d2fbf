//! Tiered cache facade
//!
//! Wraps the shard pool with application-level TTL classes, pattern
//! invalidation, FIFO section lists, and the top-N hot-list pattern.
//! Values are stored as JSON and decoded on a best-effort basis: an
//! undecodable cached value is treated as a miss, never as an error.

pub mod memory;
pub mod pool;
pub mod redis_shard;
pub mod shard;

pub use memory::MemoryShard;
pub use pool::{spawn_health_task, ShardPool, ShardStats};
pub use shard::ShardConn;

use crate::errors::Result;
use crate::models::Section;
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Application TTL classes (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// AI commentary strings
    Commentary,
    /// Read-through article snapshots
    Article,
    /// Raw upstream batch responses
    Upstream,
    Short,
    Long,
}

impl TtlClass {
    pub fn secs(&self) -> u64 {
        match self {
            TtlClass::Commentary => 86_400,
            TtlClass::Article => 300,
            TtlClass::Upstream => 1_800,
            TtlClass::Short => 60,
            TtlClass::Long => 604_800,
        }
    }
}

/// Result of a FIFO maintenance pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FifoOutcome {
    pub added: usize,
    pub removed: Vec<String>,
}

/// Tiered cache over the shard pool
pub struct TieredCache {
    pool: Arc<ShardPool>,
    /// Per-key locks giving `get_or_set` single-flight semantics
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TieredCache {
    pub fn new(pool: Arc<ShardPool>) -> Self {
        Self {
            pool,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> Arc<ShardPool> {
        Arc::clone(&self.pool)
    }

    /// Fetch a JSON-decoded value; decode failures count as a miss
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.pool.get(key).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(v) => {
                    counter!("newsforge_cache_hits_total").increment(1);
                    Ok(Some(v))
                }
                Err(e) => {
                    debug!(key, error = %e, "cached value undecodable; treating as miss");
                    counter!("newsforge_cache_misses_total").increment(1);
                    Ok(None)
                }
            },
            None => {
                counter!("newsforge_cache_misses_total").increment(1);
                Ok(None)
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.pool.setex(key, &raw, ttl_secs).await
    }

    pub async fn setex<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        self.set_json(key, value, ttl_secs).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.pool.exists(key).await
    }

    pub async fn del(&self, keys: &[String]) -> Result<u64> {
        self.pool.del(keys).await
    }

    /// Return the cached value or invoke `fetch`, store its result
    /// under the class TTL, and return it.
    ///
    /// Concurrent callers for the same absent key are single-flighted:
    /// `fetch` runs once and the waiters read the stored result. A
    /// `fetch` error propagates untouched; a cache-layer store error
    /// never masks a successful fetch.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, fetch: F, class: TtlClass) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get_json::<T>(key).await? {
            return Ok(cached);
        }

        let key_lock = {
            let mut inflight = self.inflight.lock().expect("inflight lock");
            Arc::clone(
                inflight
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let _guard = key_lock.lock().await;

        // Another caller may have populated the key while we waited
        if let Some(cached) = self.get_json::<T>(key).await? {
            return Ok(cached);
        }

        let value = match fetch().await {
            Ok(v) => v,
            Err(e) => {
                self.inflight.lock().expect("inflight lock").remove(key);
                return Err(e);
            }
        };

        if let Err(e) = self.set_json(key, &value, class.secs()).await {
            warn!(key, error = %e, "failed to cache fetched value; continuing without cache");
        }

        self.inflight.lock().expect("inflight lock").remove(key);
        Ok(value)
    }

    /// Delete keys matching each glob; reports how many went away
    pub async fn invalidate(&self, patterns: &[&str]) -> Result<u64> {
        let mut removed = 0;
        for pattern in patterns {
            let keys = self.pool.keys(pattern).await?;
            if !keys.is_empty() {
                removed += self.pool.del(&keys).await?;
            }
        }
        debug!(?patterns, removed, "cache invalidation");
        Ok(removed)
    }

    /// Left-push ids onto a hot list and trim it to `max_len`.
    /// Used for the homepage top-N rotation.
    pub async fn push_to_list(&self, list_key: &str, ids: &[String], max_len: usize) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.pool.lpush(list_key, ids).await?;
        self.pool.ltrim(list_key, 0, max_len as i64 - 1).await?;
        Ok(())
    }

    /// Right-push new ids onto a section's FIFO list; when the list
    /// exceeds `max_articles`, trim the oldest entries and delete
    /// their companion `article:{id}` keys in lock-step.
    pub async fn manage_section_fifo(
        &self,
        section: Section,
        new_ids: &[String],
        max_articles: usize,
    ) -> Result<FifoOutcome> {
        if new_ids.is_empty() {
            return Ok(FifoOutcome::default());
        }

        let list_key = crate::section_list_key(section);
        self.pool.rpush(&list_key, new_ids).await?;
        let len = self.pool.llen(&list_key).await?;

        let mut removed = Vec::new();
        if len > max_articles as u64 {
            let excess = (len - max_articles as u64) as i64;
            removed = self.pool.lrange(&list_key, 0, excess - 1).await?;
            self.pool.ltrim(&list_key, excess, -1).await?;

            let companion_keys: Vec<String> =
                removed.iter().map(|id| crate::article_key(id)).collect();
            self.pool.del(&companion_keys).await?;
        }

        Ok(FifoOutcome {
            added: new_ids.len(),
            removed,
        })
    }

    /// Read the last `count` section list entries, newest first
    pub async fn get_section_articles(&self, section: Section, count: usize) -> Result<Vec<String>> {
        let list_key = crate::section_list_key(section);
        let mut tail = self
            .pool
            .lrange(&list_key, -(count as i64), -1)
            .await?;
        tail.reverse();
        Ok(tail)
    }
}
