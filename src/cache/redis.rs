//! Redis backend for the shared cache.

use super::provider::CacheProvider;
use crate::error::{DistributionError, Result};

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

fn redis_error(op: &str) -> impl FnOnce(redis::RedisError) -> DistributionError + '_ {
    move |e| DistributionError::cache(format!("Redis {op} failed: {e}"))
}

fn millis(ttl: Duration) -> u64 {
    ttl.as_millis().clamp(1, u64::MAX as u128) as u64
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis cache at {}", redis_url);

        let client = redis::Client::open(redis_url).map_err(|e| {
            DistributionError::cache(format!("Failed to create Redis client: {e}"))
        })?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| DistributionError::cache(format!("Failed to connect to Redis: {e}")))?;

        info!("Successfully connected to Redis cache");

        Ok(Self { conn })
    }

    async fn query<T: redis::FromRedisValue>(&self, op: &str, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.conn.clone();
        cmd.query_async::<T>(&mut conn).await.map_err(redis_error(op))
    }
}

#[async_trait]
impl CacheProvider for RedisCache {
    async fn set(&self, key: &str, value: String) -> Result<()> {
        debug!("Cache SET: {}", key);
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(redis_error("SET"))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(redis_error("GET"))
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        self.query("EXISTS", redis::cmd("EXISTS").arg(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.query::<i64>("PEXPIRE", redis::cmd("PEXPIRE").arg(key).arg(millis(ttl)))
            .await
            .map(|_| ())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        debug!("Cache DELETE: {}", key);
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(redis_error("DEL"))
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        debug!("Cache DELETE {} keys", keys.len());
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys.to_vec()).await.map_err(redis_error("DEL"))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.keys::<_, Vec<String>>(pattern)
            .await
            .map_err(redis_error("KEYS"))
    }

    async fn increment_and_get(&self, key: &str, delta: i64) -> Result<i64> {
        self.query("INCRBY", redis::cmd("INCRBY").arg(key).arg(delta))
            .await
    }

    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let reply: Option<String> = self
            .query(
                "SET NX",
                redis::cmd("SET")
                    .arg(key)
                    .arg(1)
                    .arg("NX")
                    .arg("PX")
                    .arg(millis(ttl)),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn set_hash(&self, key: &str, field: &str, value: String) -> Result<()> {
        self.query::<i64>("HSET", redis::cmd("HSET").arg(key).arg(field).arg(value))
            .await
            .map(|_| ())
    }

    async fn get_hash(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.query("HGET", redis::cmd("HGET").arg(key).arg(field))
            .await
    }

    async fn delete_hash(&self, key: &str, field: &str) -> Result<()> {
        self.query::<i64>("HDEL", redis::cmd("HDEL").arg(key).arg(field))
            .await
            .map(|_| ())
    }

    async fn get_map(&self, key: &str) -> Result<HashMap<String, String>> {
        self.query("HGETALL", redis::cmd("HGETALL").arg(key)).await
    }

    async fn get_map_keys(&self, key: &str) -> Result<Vec<String>> {
        self.query("HKEYS", redis::cmd("HKEYS").arg(key)).await
    }

    async fn get_map_values(&self, key: &str) -> Result<Vec<String>> {
        self.query("HVALS", redis::cmd("HVALS").arg(key)).await
    }

    async fn add_to_set(&self, key: &str, member: String) -> Result<()> {
        self.query::<i64>("SADD", redis::cmd("SADD").arg(key).arg(member))
            .await
            .map(|_| ())
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<()> {
        self.query::<i64>("SREM", redis::cmd("SREM").arg(key).arg(member))
            .await
            .map(|_| ())
    }

    async fn has_in_set(&self, key: &str, member: &str) -> Result<bool> {
        self.query("SISMEMBER", redis::cmd("SISMEMBER").arg(key).arg(member))
            .await
    }

    async fn get_set_size(&self, key: &str) -> Result<usize> {
        self.query("SCARD", redis::cmd("SCARD").arg(key)).await
    }

    async fn get_set(&self, key: &str) -> Result<Vec<String>> {
        self.query("SMEMBERS", redis::cmd("SMEMBERS").arg(key))
            .await
    }

    async fn add_to_list(&self, key: &str, value: String) -> Result<()> {
        self.query::<i64>("RPUSH", redis::cmd("RPUSH").arg(key).arg(value))
            .await
            .map(|_| ())
    }

    async fn add_all_to_list(&self, key: &str, values: Vec<String>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.query::<i64>("RPUSH", redis::cmd("RPUSH").arg(key).arg(values))
            .await
            .map(|_| ())
    }

    async fn pop_from_list(&self, key: &str) -> Result<Option<String>> {
        self.query("LPOP", redis::cmd("LPOP").arg(key)).await
    }

    async fn get_list(&self, key: &str) -> Result<Vec<String>> {
        self.sublist(key, 0, -1).await
    }

    async fn get_list_size(&self, key: &str) -> Result<usize> {
        self.query("LLEN", redis::cmd("LLEN").arg(key)).await
    }

    async fn sublist(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>> {
        self.query("LRANGE", redis::cmd("LRANGE").arg(key).arg(start).arg(end))
            .await
    }
}
