//! Remote cache shard over the redis protocol
//!
//! One multiplexed async connection per shard. Every command carries
//! the pool's deadline so a hung shard degrades instead of wedging a
//! worker.

use crate::cache::shard::ShardConn;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub struct RedisShard {
    connection: RwLock<MultiplexedConnection>,
    timeout: Duration,
}

impl RedisShard {
    /// Connect to a shard endpoint. A token, when present, is spliced
    /// into the URL as the password.
    pub async fn connect(url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let url = match token {
            Some(token) if !url.contains('@') => {
                url.replacen("redis://", &format!("redis://:{}@", token), 1)
            }
            _ => url.to_string(),
        };

        let client = Client::open(url.as_str()).map_err(|e| AppError::Cache {
            message: format!("failed to create redis client: {}", e),
        })?;

        let connection = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| AppError::Cache {
                message: "redis connect timed out".to_string(),
            })?
            .map_err(|e| AppError::Cache {
                message: format!("failed to connect to redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            timeout,
        })
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.map_err(AppError::from),
            Err(_) => Err(AppError::Cache {
                message: "redis command timed out".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ShardConn for RedisShard {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.write().await;
        self.timed(conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection.write().await;
        self.timed(conn.set(key, value)).await
    }

    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection.write().await;
        self.timed(conn.set_ex(key, value, ttl_secs)).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.write().await;
        self.timed(conn.del(keys.to_vec())).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.write().await;
        self.timed(conn.exists(key)).await
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection.write().await;
        self.timed(conn.ttl(key)).await
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection.write().await;
        self.timed(conn.incr(key, 1i64)).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.connection.write().await;
        self.timed(conn.expire(key, ttl_secs as i64)).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.write().await;
        self.timed(conn.keys(pattern)).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.connection.write().await;
        self.timed(conn.hget(key, field)).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.connection.write().await;
        self.timed(conn.hset(key, field, value)).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.connection.write().await;
        self.timed(conn.hgetall(key)).await
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64> {
        let mut conn = self.connection.write().await;
        self.timed(conn.lpush(key, values.to_vec())).await
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<u64> {
        let mut conn = self.connection.write().await;
        self.timed(conn.rpush(key, values.to_vec())).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.connection.write().await;
        self.timed(conn.lrange(key, start as isize, stop as isize)).await
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection.write().await;
        self.timed(conn.llen(key)).await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let mut conn = self.connection.write().await;
        self.timed(conn.ltrim(key, start as isize, stop as isize)).await
    }

    async fn dbsize(&self) -> Result<u64> {
        let mut conn = self.connection.write().await;
        self.timed(redis::cmd("DBSIZE").query_async(&mut *conn)).await
    }

    async fn flushdb(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        self.timed(redis::cmd("FLUSHDB").query_async(&mut *conn)).await
    }

    async fn info(&self) -> Result<String> {
        let mut conn = self.connection.write().await;
        self.timed(redis::cmd("INFO").query_async(&mut *conn)).await
    }

    async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        let mut conn = self.connection.write().await;
        let _: String = self
            .timed(redis::cmd("PING").query_async(&mut *conn))
            .await?;
        Ok(started.elapsed())
    }
}
