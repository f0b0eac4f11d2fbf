//! In-process fallback map
//!
//! Implements the full shard command surface over a mutex-guarded map
//! with lazy per-key expiry: entries are checked on access and swept
//! periodically by the pool's health task. No per-entry timers.

use crate::cache::shard::{glob_match, normalize_range, ShardConn};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Lazy-expiry in-process shard
#[derive(Default)]
pub struct MemoryShard {
    map: Mutex<HashMap<String, Entry>>,
}

impl MemoryShard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired entries; called by the periodic health task
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut map = self.map.lock().expect("memory shard lock");
        let before = map.len();
        map.retain(|_, e| !e.expired(now));
        before - map.len()
    }

    fn with_live<T>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>) -> T) -> T {
        let now = Instant::now();
        let mut map = self.map.lock().expect("memory shard lock");
        if map.get(key).map(|e| e.expired(now)).unwrap_or(false) {
            map.remove(key);
        }
        f(map.get_mut(key))
    }

    fn insert(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let mut map = self.map.lock().expect("memory shard lock");
        map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
    }

    fn wrong_type(key: &str) -> AppError {
        AppError::Cache {
            message: format!("wrong value type for key '{}'", key),
        }
    }
}

#[async_trait]
impl ShardConn for MemoryShard {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_live(key, |e| match e {
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(None),
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.insert(key, Value::Str(value.to_string()), None);
        Ok(())
    }

    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.insert(
            key,
            Value::Str(value.to_string()),
            Some(Duration::from_secs(ttl_secs)),
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut map = self.map.lock().expect("memory shard lock");
        let mut removed = 0;
        for key in keys {
            if map.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.with_live(key, |e| Ok(e.is_some()))
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.with_live(key, |e| match e {
            Some(entry) => match entry.expires_at {
                Some(at) => Ok(at.saturating_duration_since(Instant::now()).as_secs() as i64),
                None => Ok(-1),
            },
            None => Ok(-2),
        })
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let existing = self.with_live(key, |e| match e {
            Some(Entry { value: Value::Str(s), .. }) => {
                let n: i64 = s.parse().map_err(|_| Self::wrong_type(key))?;
                *s = (n + 1).to_string();
                Ok(Some(n + 1))
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(None),
        })?;
        match existing {
            Some(n) => Ok(n),
            None => {
                self.insert(key, Value::Str("1".to_string()), None);
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.with_live(key, |e| match e {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let map = self.map.lock().expect("memory shard lock");
        Ok(map
            .iter()
            .filter(|(k, e)| !e.expired(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.with_live(key, |e| match e {
            Some(Entry { value: Value::Hash(h), .. }) => Ok(h.get(field).cloned()),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(None),
        })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let updated = self.with_live(key, |e| match e {
            Some(Entry { value: Value::Hash(h), .. }) => {
                h.insert(field.to_string(), value.to_string());
                Ok(true)
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(false),
        })?;
        if !updated {
            let mut h = HashMap::new();
            h.insert(field.to_string(), value.to_string());
            self.insert(key, Value::Hash(h), None);
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.with_live(key, |e| match e {
            Some(Entry { value: Value::Hash(h), .. }) => Ok(h.clone()),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(HashMap::new()),
        })
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64> {
        let len = self.with_live(key, |e| match e {
            Some(Entry { value: Value::List(l), .. }) => {
                for v in values {
                    l.push_front(v.clone());
                }
                Ok(Some(l.len() as u64))
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(None),
        })?;
        match len {
            Some(n) => Ok(n),
            None => {
                let mut l = VecDeque::new();
                for v in values {
                    l.push_front(v.clone());
                }
                let n = l.len() as u64;
                self.insert(key, Value::List(l), None);
                Ok(n)
            }
        }
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<u64> {
        let len = self.with_live(key, |e| match e {
            Some(Entry { value: Value::List(l), .. }) => {
                for v in values {
                    l.push_back(v.clone());
                }
                Ok(Some(l.len() as u64))
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(None),
        })?;
        match len {
            Some(n) => Ok(n),
            None => {
                let l: VecDeque<String> = values.iter().cloned().collect();
                let n = l.len() as u64;
                self.insert(key, Value::List(l), None);
                Ok(n)
            }
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.with_live(key, |e| match e {
            Some(Entry { value: Value::List(l), .. }) => {
                match normalize_range(l.len(), start, stop) {
                    Some((s, e_idx)) => Ok(l.iter().skip(s).take(e_idx - s + 1).cloned().collect()),
                    None => Ok(Vec::new()),
                }
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(Vec::new()),
        })
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        self.with_live(key, |e| match e {
            Some(Entry { value: Value::List(l), .. }) => Ok(l.len() as u64),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(0),
        })
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.with_live(key, |e| match e {
            Some(Entry { value: Value::List(l), .. }) => {
                match normalize_range(l.len(), start, stop) {
                    Some((s, e_idx)) => {
                        let kept: VecDeque<String> =
                            l.iter().skip(s).take(e_idx - s + 1).cloned().collect();
                        *l = kept;
                    }
                    None => l.clear(),
                }
                Ok(())
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(()),
        })
    }

    async fn dbsize(&self) -> Result<u64> {
        let now = Instant::now();
        let map = self.map.lock().expect("memory shard lock");
        Ok(map.values().filter(|e| !e.expired(now)).count() as u64)
    }

    async fn flushdb(&self) -> Result<()> {
        self.map.lock().expect("memory shard lock").clear();
        Ok(())
    }

    async fn info(&self) -> Result<String> {
        let size = self.dbsize().await?;
        Ok(format!("# memory\nkeys:{}\n", size))
    }

    async fn ping(&self) -> Result<Duration> {
        Ok(Duration::from_micros(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn setex_get_round_trip() {
        let m = MemoryShard::new();
        m.setex("k", "v", 60).await.unwrap();
        assert_eq!(m.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(m.exists("k").await.unwrap());
        assert!(m.ttl("k").await.unwrap() >= 58);
    }

    #[tokio::test]
    async fn expired_entry_is_gone_on_read() {
        let m = MemoryShard::new();
        m.setex("k", "v", 0).await.unwrap();
        assert_eq!(m.get("k").await.unwrap(), None);
        assert_eq!(m.ttl("k").await.unwrap(), -2);
    }

    #[tokio::test]
    async fn sweep_drops_expired_only() {
        let m = MemoryShard::new();
        m.setex("gone", "v", 0).await.unwrap();
        m.set("stays", "v").await.unwrap();
        let dropped = m.sweep();
        assert_eq!(dropped, 1);
        assert!(m.exists("stays").await.unwrap());
    }

    #[tokio::test]
    async fn list_push_trim_range() {
        let m = MemoryShard::new();
        m.rpush("l", &["a".into(), "b".into(), "c".into(), "d".into()])
            .await
            .unwrap();
        assert_eq!(m.llen("l").await.unwrap(), 4);
        assert_eq!(
            m.lrange("l", -2, -1).await.unwrap(),
            vec!["c".to_string(), "d".to_string()]
        );
        m.ltrim("l", 1, -1).await.unwrap();
        assert_eq!(
            m.lrange("l", 0, -1).await.unwrap(),
            vec!["b".to_string(), "c".to_string(), "d".to_string()]
        );
    }

    #[tokio::test]
    async fn lpush_orders_newest_first() {
        let m = MemoryShard::new();
        m.lpush("l", &["a".into()]).await.unwrap();
        m.lpush("l", &["b".into()]).await.unwrap();
        assert_eq!(
            m.lrange("l", 0, -1).await.unwrap(),
            vec!["b".to_string(), "a".to_string()]
        );
    }

    #[tokio::test]
    async fn hash_ops() {
        let m = MemoryShard::new();
        m.hset("h", "f1", "v1").await.unwrap();
        m.hset("h", "f2", "v2").await.unwrap();
        assert_eq!(m.hget("h", "f1").await.unwrap().as_deref(), Some("v1"));
        assert_eq!(m.hgetall("h").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn incr_starts_at_one() {
        let m = MemoryShard::new();
        assert_eq!(m.incr("n").await.unwrap(), 1);
        assert_eq!(m.incr("n").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn keys_filters_by_glob() {
        let m = MemoryShard::new();
        m.set("section:tech:articles", "x").await.unwrap();
        m.set("section:world:articles", "x").await.unwrap();
        m.set("article:1", "x").await.unwrap();
        let mut ks = m.keys("section:*").await.unwrap();
        ks.sort();
        assert_eq!(
            ks,
            vec![
                "section:tech:articles".to_string(),
                "section:world:articles".to_string()
            ]
        );
    }
}
