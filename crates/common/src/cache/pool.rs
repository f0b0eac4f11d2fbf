//! Cache shard pool
//!
//! Presents one KV+list interface over M remote shards plus the
//! in-process fallback map. Keyed operations hash onto the currently
//! eligible shard set; global operations scatter-gather; operations
//! without a key pick the least-loaded shard. Per-shard daily command
//! quotas follow the same UTC-midnight reset rule as credentials.

use crate::cache::memory::MemoryShard;
use crate::cache::redis_shard::RedisShard;
use crate::cache::shard::ShardConn;
use crate::config::CacheConfig;
use crate::errors::{AppError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use metrics::{counter, gauge};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct ShardMeta {
    endpoint: String,
    healthy: bool,
    /// Daily quota exhausted; revived at the next UTC midnight
    dead: bool,
    daily_requests: u64,
    errors: u64,
    latency_ms: Option<f64>,
    last_check: Option<DateTime<Utc>>,
    day: NaiveDate,
}

#[derive(Clone)]
struct ShardEndpoint {
    url: String,
    token: Option<String>,
    timeout: Duration,
}

struct Shard {
    meta: Mutex<ShardMeta>,
    /// Present for remote shards; lets the health task reconnect ones
    /// that were down at startup
    endpoint: Option<ShardEndpoint>,
    conn: tokio::sync::RwLock<Option<Arc<dyn ShardConn>>>,
}

/// Per-shard snapshot for the observability surface
#[derive(Debug, Clone, Serialize)]
pub struct ShardStats {
    pub id: usize,
    pub endpoint: String,
    pub healthy: bool,
    pub dead: bool,
    pub daily_requests: u64,
    pub errors: u64,
    pub latency_ms: Option<f64>,
    pub last_check: Option<DateTime<Utc>>,
}

pub struct ShardPool {
    shards: Vec<Shard>,
    fallback: Arc<MemoryShard>,
    daily_quota: u64,
}

impl ShardPool {
    /// In-process map only; used when CACHE_DISABLED is set and in tests
    pub fn memory_only() -> Self {
        Self {
            shards: Vec::new(),
            fallback: Arc::new(MemoryShard::new()),
            daily_quota: u64::MAX,
        }
    }

    /// Wrap pre-built shard connections; the seam tests use to swap in
    /// memory shards
    pub fn from_conns(conns: Vec<Arc<dyn ShardConn>>, daily_quota: u64) -> Self {
        let shards = conns
            .into_iter()
            .enumerate()
            .map(|(idx, conn)| Shard {
                meta: Mutex::new(ShardMeta {
                    endpoint: format!("conn-{}", idx + 1),
                    healthy: true,
                    dead: false,
                    daily_requests: 0,
                    errors: 0,
                    latency_ms: None,
                    last_check: None,
                    day: Utc::now().date_naive(),
                }),
                endpoint: None,
                conn: tokio::sync::RwLock::new(Some(conn)),
            })
            .collect();
        Self {
            shards,
            fallback: Arc::new(MemoryShard::new()),
            daily_quota,
        }
    }

    /// Connect every configured shard, pinging each to record startup
    /// latency. Shards that fail to connect start out unhealthy and
    /// are retried by the periodic health task.
    pub async fn connect(config: &CacheConfig) -> Self {
        if config.disabled || config.shards.is_empty() {
            info!("remote cache disabled; using in-process map only");
            return Self::memory_only();
        }

        let timeout = Duration::from_secs(config.command_timeout_secs);
        let mut shards = Vec::with_capacity(config.shards.len());

        for (idx, shard_cfg) in config.shards.iter().enumerate() {
            let meta = |healthy: bool, latency: Option<f64>| ShardMeta {
                endpoint: shard_cfg.url.clone(),
                healthy,
                dead: false,
                daily_requests: 0,
                errors: 0,
                latency_ms: latency,
                last_check: Some(Utc::now()),
                day: Utc::now().date_naive(),
            };

            let endpoint = ShardEndpoint {
                url: shard_cfg.url.clone(),
                token: shard_cfg.token.clone(),
                timeout,
            };

            match RedisShard::connect(&shard_cfg.url, shard_cfg.token.as_deref(), timeout).await {
                Ok(shard) => {
                    let latency = match shard.ping().await {
                        Ok(d) => Some(d.as_secs_f64() * 1_000.0),
                        Err(_) => None,
                    };
                    info!(shard = idx + 1, endpoint = %shard_cfg.url, ?latency, "cache shard connected");
                    shards.push(Shard {
                        meta: Mutex::new(meta(true, latency)),
                        endpoint: Some(endpoint),
                        conn: tokio::sync::RwLock::new(Some(Arc::new(shard) as Arc<dyn ShardConn>)),
                    });
                }
                Err(e) => {
                    warn!(shard = idx + 1, endpoint = %shard_cfg.url, error = %e, "cache shard unavailable at startup");
                    shards.push(Shard {
                        meta: Mutex::new(meta(false, None)),
                        endpoint: Some(endpoint),
                        conn: tokio::sync::RwLock::new(None),
                    });
                }
            }
        }

        Self {
            shards,
            fallback: Arc::new(MemoryShard::new()),
            daily_quota: config.shard_daily_quota,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn fallback(&self) -> Arc<MemoryShard> {
        Arc::clone(&self.fallback)
    }

    async fn conn_of(&self, idx: usize) -> Option<Arc<dyn ShardConn>> {
        self.shards.get(idx)?.conn.read().await.clone()
    }

    /// Shards currently usable for routing
    fn eligible_indices(&self) -> Vec<usize> {
        let today = Utc::now().date_naive();
        self.shards
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                let mut meta = s.meta.lock().expect("shard meta lock");
                reset_meta_if_rolled(&mut meta, today);
                meta.healthy && !meta.dead && meta.daily_requests < self.daily_quota
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    fn record_success(&self, idx: usize) {
        if let Some(shard) = self.shards.get(idx) {
            let mut meta = shard.meta.lock().expect("shard meta lock");
            meta.daily_requests += 1;
            if meta.daily_requests >= self.daily_quota {
                meta.dead = true;
                counter!("newsforge_shard_dead_total").increment(1);
                warn!(shard = idx + 1, "shard daily quota reached; dead until UTC midnight");
            }
        }
    }

    fn record_error(&self, idx: usize, err: &AppError) {
        if let Some(shard) = self.shards.get(idx) {
            let mut meta = shard.meta.lock().expect("shard meta lock");
            meta.errors += 1;
            meta.healthy = false;
            if is_quota_error(err) {
                meta.dead = true;
                counter!("newsforge_shard_dead_total").increment(1);
                warn!(shard = idx + 1, error = %err, "shard reported quota exhaustion; dead until UTC midnight");
            } else {
                debug!(shard = idx + 1, error = %err, "shard command failed");
            }
        }
    }

    /// Run a keyed operation on the shard the key hashes to, rerouting
    /// across the remaining eligible shards on failure and finally
    /// degrading to the in-process map.
    pub async fn run_keyed<T>(
        &self,
        key: &str,
        op: impl Fn(Arc<dyn ShardConn>) -> BoxFuture<'static, Result<T>>,
    ) -> Result<T> {
        let mut excluded: Vec<usize> = Vec::new();

        loop {
            let eligible: Vec<usize> = self
                .eligible_indices()
                .into_iter()
                .filter(|idx| !excluded.contains(idx))
                .collect();

            let Some(idx) = route_key(key, &eligible) else {
                break;
            };

            let Some(conn) = self.conn_of(idx).await else {
                excluded.push(idx);
                continue;
            };

            match op(conn).await {
                Ok(v) => {
                    self.record_success(idx);
                    return Ok(v);
                }
                Err(e) => {
                    self.record_error(idx, &e);
                    excluded.push(idx);
                }
            }
        }

        counter!("newsforge_cache_fallback_total").increment(1);
        op(self.fallback.clone() as Arc<dyn ShardConn>).await
    }

    /// Run an operation with no key on the least-loaded eligible shard
    pub async fn run_even<T>(
        &self,
        op: impl Fn(Arc<dyn ShardConn>) -> BoxFuture<'static, Result<T>>,
    ) -> Result<T> {
        let eligible = self.eligible_indices();
        let least = eligible.into_iter().min_by_key(|&idx| {
            self.shards[idx]
                .meta
                .lock()
                .expect("shard meta lock")
                .daily_requests
        });

        if let Some(idx) = least {
            if let Some(conn) = self.conn_of(idx).await {
                match op(conn).await {
                    Ok(v) => {
                        self.record_success(idx);
                        return Ok(v);
                    }
                    Err(e) => self.record_error(idx, &e),
                }
            }
        }

        counter!("newsforge_cache_fallback_total").increment(1);
        op(self.fallback.clone() as Arc<dyn ShardConn>).await
    }

    /// Scatter an operation to every eligible shard plus the fallback
    /// map, collecting per-target results (failures are skipped)
    pub async fn run_scatter<T>(
        &self,
        op: impl Fn(Arc<dyn ShardConn>) -> BoxFuture<'static, Result<T>>,
    ) -> Vec<T> {
        let mut out = Vec::new();
        for idx in self.eligible_indices() {
            let Some(conn) = self.conn_of(idx).await else {
                continue;
            };
            match op(conn).await {
                Ok(v) => {
                    self.record_success(idx);
                    out.push(v);
                }
                Err(e) => self.record_error(idx, &e),
            }
        }
        if let Ok(v) = op(self.fallback.clone() as Arc<dyn ShardConn>).await {
            out.push(v);
        }
        out
    }

    // ------------------------------------------------------------------
    // Command surface
    // ------------------------------------------------------------------

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let k = key.to_string();
        self.run_keyed(key, move |conn| {
            let k = k.clone();
            Box::pin(async move { conn.get(&k).await })
        })
        .await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let (k, v) = (key.to_string(), value.to_string());
        self.run_keyed(key, move |conn| {
            let (k, v) = (k.clone(), v.clone());
            Box::pin(async move { conn.set(&k, &v).await })
        })
        .await
    }

    pub async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let (k, v) = (key.to_string(), value.to_string());
        self.run_keyed(key, move |conn| {
            let (k, v) = (k.clone(), v.clone());
            Box::pin(async move { conn.setex(&k, &v, ttl_secs).await })
        })
        .await
    }

    /// Delete each key on the shard it routes to; returns total removed
    pub async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            let k = key.clone();
            removed += self
                .run_keyed(key, move |conn| {
                    let k = k.clone();
                    Box::pin(async move { conn.del(std::slice::from_ref(&k)).await })
                })
                .await?;
        }
        Ok(removed)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let k = key.to_string();
        self.run_keyed(key, move |conn| {
            let k = k.clone();
            Box::pin(async move { conn.exists(&k).await })
        })
        .await
    }

    pub async fn ttl(&self, key: &str) -> Result<i64> {
        let k = key.to_string();
        self.run_keyed(key, move |conn| {
            let k = k.clone();
            Box::pin(async move { conn.ttl(&k).await })
        })
        .await
    }

    pub async fn incr(&self, key: &str) -> Result<i64> {
        let k = key.to_string();
        self.run_keyed(key, move |conn| {
            let k = k.clone();
            Box::pin(async move { conn.incr(&k).await })
        })
        .await
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let k = key.to_string();
        self.run_keyed(key, move |conn| {
            let k = k.clone();
            Box::pin(async move { conn.expire(&k, ttl_secs).await })
        })
        .await
    }

    /// Scatter-gather KEYS across all shards and the fallback map
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let p = pattern.to_string();
        let collected = self
            .run_scatter(move |conn| {
                let p = p.clone();
                Box::pin(async move { conn.keys(&p).await })
            })
            .await;
        let mut all: Vec<String> = collected.into_iter().flatten().collect();
        all.sort();
        all.dedup();
        Ok(all)
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let (k, f) = (key.to_string(), field.to_string());
        self.run_keyed(key, move |conn| {
            let (k, f) = (k.clone(), f.clone());
            Box::pin(async move { conn.hget(&k, &f).await })
        })
        .await
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let (k, f, v) = (key.to_string(), field.to_string(), value.to_string());
        self.run_keyed(key, move |conn| {
            let (k, f, v) = (k.clone(), f.clone(), v.clone());
            Box::pin(async move { conn.hset(&k, &f, &v).await })
        })
        .await
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let k = key.to_string();
        self.run_keyed(key, move |conn| {
            let k = k.clone();
            Box::pin(async move { conn.hgetall(&k).await })
        })
        .await
    }

    pub async fn lpush(&self, key: &str, values: &[String]) -> Result<u64> {
        let (k, vs) = (key.to_string(), values.to_vec());
        self.run_keyed(key, move |conn| {
            let (k, vs) = (k.clone(), vs.clone());
            Box::pin(async move { conn.lpush(&k, &vs).await })
        })
        .await
    }

    pub async fn rpush(&self, key: &str, values: &[String]) -> Result<u64> {
        let (k, vs) = (key.to_string(), values.to_vec());
        self.run_keyed(key, move |conn| {
            let (k, vs) = (k.clone(), vs.clone());
            Box::pin(async move { conn.rpush(&k, &vs).await })
        })
        .await
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let k = key.to_string();
        self.run_keyed(key, move |conn| {
            let k = k.clone();
            Box::pin(async move { conn.lrange(&k, start, stop).await })
        })
        .await
    }

    pub async fn llen(&self, key: &str) -> Result<u64> {
        let k = key.to_string();
        self.run_keyed(key, move |conn| {
            let k = k.clone();
            Box::pin(async move { conn.llen(&k).await })
        })
        .await
    }

    pub async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let k = key.to_string();
        self.run_keyed(key, move |conn| {
            let k = k.clone();
            Box::pin(async move { conn.ltrim(&k, start, stop).await })
        })
        .await
    }

    /// Sum of key counts across all shards and the fallback map
    pub async fn dbsize(&self) -> Result<u64> {
        let sizes = self
            .run_scatter(|conn| Box::pin(async move { conn.dbsize().await }))
            .await;
        Ok(sizes.into_iter().sum())
    }

    pub async fn flushdb(&self) -> Result<()> {
        self.run_scatter(|conn| Box::pin(async move { conn.flushdb().await }))
            .await;
        Ok(())
    }

    pub async fn info(&self) -> Result<String> {
        self.run_even(|conn| Box::pin(async move { conn.info().await }))
            .await
    }

    pub async fn ping(&self) -> Result<Duration> {
        self.run_even(|conn| Box::pin(async move { conn.ping().await }))
            .await
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    /// Re-ping every shard, reviving those whose quota day has rolled,
    /// and sweep the fallback map
    pub async fn check_health(&self) {
        let today = Utc::now().date_naive();
        let mut healthy_count = 0u64;

        for (idx, shard) in self.shards.iter().enumerate() {
            // Reconnect shards that were unreachable at startup
            if shard.conn.read().await.is_none() {
                if let Some(ep) = &shard.endpoint {
                    match RedisShard::connect(&ep.url, ep.token.as_deref(), ep.timeout).await {
                        Ok(conn) => {
                            info!(shard = idx + 1, endpoint = %ep.url, "cache shard reconnected");
                            *shard.conn.write().await = Some(Arc::new(conn) as Arc<dyn ShardConn>);
                        }
                        Err(e) => {
                            debug!(shard = idx + 1, error = %e, "shard reconnect failed");
                        }
                    }
                }
            }

            let ping = match self.conn_of(idx).await {
                Some(conn) => conn.ping().await,
                None => Err(AppError::CacheShardDown {
                    shard: idx + 1,
                    message: "not connected".to_string(),
                }),
            };

            let mut meta = shard.meta.lock().expect("shard meta lock");
            reset_meta_if_rolled(&mut meta, today);
            meta.last_check = Some(Utc::now());
            match ping {
                Ok(latency) => {
                    meta.healthy = true;
                    meta.latency_ms = Some(latency.as_secs_f64() * 1_000.0);
                    if !meta.dead {
                        healthy_count += 1;
                    }
                }
                Err(e) => {
                    meta.healthy = false;
                    debug!(shard = idx + 1, error = %e, "shard health ping failed");
                }
            }
        }

        gauge!("newsforge_shards_healthy").set(healthy_count as f64);
        let swept = self.fallback.sweep();
        if swept > 0 {
            debug!(swept, "fallback map entries expired");
        }
    }

    /// Per-shard health, latency, daily requests
    pub fn stats(&self) -> Vec<ShardStats> {
        self.shards
            .iter()
            .enumerate()
            .map(|(idx, s)| {
                let meta = s.meta.lock().expect("shard meta lock");
                ShardStats {
                    id: idx + 1,
                    endpoint: meta.endpoint.clone(),
                    healthy: meta.healthy,
                    dead: meta.dead,
                    daily_requests: meta.daily_requests,
                    errors: meta.errors,
                    latency_ms: meta.latency_ms,
                    last_check: meta.last_check,
                }
            })
            .collect()
    }
}

/// Spawn the 5-minute health loop
pub fn spawn_health_task(pool: Arc<ShardPool>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            pool.check_health().await;
        }
    })
}

fn reset_meta_if_rolled(meta: &mut ShardMeta, today: NaiveDate) {
    if meta.day != today {
        meta.daily_requests = 0;
        meta.dead = false;
        meta.errors = 0;
        meta.day = today;
    }
}

/// Stable hash of the key over the eligible shard set. The same key
/// under the same shard set always lands on the same shard.
fn route_key(key: &str, eligible: &[usize]) -> Option<usize> {
    if eligible.is_empty() {
        return None;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let slot = (hasher.finish() % eligible.len() as u64) as usize;
    Some(eligible[slot])
}

fn is_quota_error(err: &AppError) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("limit exceeded") || msg.contains("quota")
}
