//! Cache shard command surface
//!
//! One trait implemented by the remote (redis) shard and the
//! in-process fallback map, so the pool can route to either.

use crate::errors::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// KV + list + hash command set supported by every shard
#[async_trait]
pub trait ShardConn: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    async fn del(&self, keys: &[String]) -> Result<u64>;
    async fn exists(&self, key: &str) -> Result<bool>;
    /// Remaining TTL in seconds; -1 without expiry, -2 when missing
    async fn ttl(&self, key: &str) -> Result<i64>;
    async fn incr(&self, key: &str) -> Result<i64>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64>;
    async fn rpush(&self, key: &str, values: &[String]) -> Result<u64>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;
    async fn llen(&self, key: &str) -> Result<u64>;
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()>;
    async fn dbsize(&self) -> Result<u64>;
    async fn flushdb(&self) -> Result<()>;
    async fn info(&self) -> Result<String>;
    /// Round-trip latency probe
    async fn ping(&self) -> Result<Duration>;
}

/// Glob matcher covering the `*` and `?` wildcards used by cache key
/// patterns (the subset the invalidation paths rely on)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    // Iterative backtracking over the last `*`
    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star, mut mark) = (None::<usize>, 0usize);

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Normalize a redis-style (start, stop) range against a list length.
/// Returns an inclusive index pair, or None for an empty slice.
pub fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let n = len as i64;
    let s = if start < 0 { (n + start).max(0) } else { start.min(n - 1) };
    let e = if stop < 0 { n + stop } else { stop.min(n - 1) };
    if s > e || e < 0 {
        return None;
    }
    Some((s as usize, e as usize))
}
