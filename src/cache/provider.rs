use crate::error::Result;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Operations the coordination layer needs from a shared key/value store.
///
/// Values are opaque strings; encoding is the job of [`Cache`]. Backends must make `lock`
/// atomic: it succeeds only when the key is absent or expired.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn has_key(&self, key: &str) -> Result<bool>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn delete(&self, keys: &[String]) -> Result<()>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
    async fn increment_and_get(&self, key: &str, delta: i64) -> Result<i64>;

    /// Takes `key` for `ttl` if nobody holds it. Returns whether the caller now holds it.
    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn set_hash(&self, key: &str, field: &str, value: String) -> Result<()>;
    async fn get_hash(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn delete_hash(&self, key: &str, field: &str) -> Result<()>;
    async fn get_map(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn get_map_keys(&self, key: &str) -> Result<Vec<String>>;
    async fn get_map_values(&self, key: &str) -> Result<Vec<String>>;

    async fn add_to_set(&self, key: &str, member: String) -> Result<()>;
    async fn remove_from_set(&self, key: &str, member: &str) -> Result<()>;
    async fn has_in_set(&self, key: &str, member: &str) -> Result<bool>;
    async fn get_set_size(&self, key: &str) -> Result<usize>;
    async fn get_set(&self, key: &str) -> Result<Vec<String>>;

    async fn add_to_list(&self, key: &str, value: String) -> Result<()>;
    async fn add_all_to_list(&self, key: &str, values: Vec<String>) -> Result<()>;
    async fn pop_from_list(&self, key: &str) -> Result<Option<String>>;
    async fn get_list(&self, key: &str) -> Result<Vec<String>>;
    async fn get_list_size(&self, key: &str) -> Result<usize>;
    /// Inclusive range, negative indexes count from the tail (Redis `LRANGE` semantics).
    async fn sublist(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>>;
}

/// Typed, cloneable handle over an injected [`CacheProvider`].
///
/// Values are stored as JSON so any machine can decode what another wrote.
#[derive(Clone)]
pub struct Cache {
    provider: Arc<dyn CacheProvider>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("provider", &"dyn CacheProvider")
            .finish()
    }
}

impl Cache {
    pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn CacheProvider> {
        &self.provider
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.provider.set(key, json).await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.provider.get(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn has_key(&self, key: &str) -> Result<bool> {
        self.provider.has_key(key).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.provider.expire(key, ttl).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.provider.remove(key).await
    }

    pub async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.provider.delete(keys).await
    }

    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.provider.keys(pattern).await
    }

    pub async fn increment_and_get(&self, key: &str, delta: i64) -> Result<i64> {
        self.provider.increment_and_get(key, delta).await
    }

    pub async fn lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.provider.lock(key, ttl).await
    }

    pub async fn set_hash<T: Serialize + ?Sized>(
        &self,
        key: &str,
        field: &str,
        value: &T,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.provider.set_hash(key, field, json).await
    }

    pub async fn get_hash<T: DeserializeOwned>(&self, key: &str, field: &str) -> Result<Option<T>> {
        match self.provider.get_hash(key, field).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_hash(&self, key: &str, field: &str) -> Result<()> {
        self.provider.delete_hash(key, field).await
    }

    pub async fn get_map<T: DeserializeOwned>(&self, key: &str) -> Result<HashMap<String, T>> {
        self.provider
            .get_map(key)
            .await?
            .into_iter()
            .map(|(field, json)| -> Result<(String, T)> {
                Ok((field, serde_json::from_str(&json)?))
            })
            .collect()
    }

    pub async fn get_map_keys(&self, key: &str) -> Result<Vec<String>> {
        self.provider.get_map_keys(key).await
    }

    pub async fn get_map_values<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        self.provider
            .get_map_values(key)
            .await?
            .iter()
            .map(|json| -> Result<T> { Ok(serde_json::from_str(json)?) })
            .collect()
    }

    /// Set members are stored in their display form (ordinals become `"17"`).
    pub async fn add_to_set<T: ToString + ?Sized>(&self, key: &str, member: &T) -> Result<()> {
        self.provider.add_to_set(key, member.to_string()).await
    }

    pub async fn remove_from_set<T: ToString + ?Sized>(&self, key: &str, member: &T) -> Result<()> {
        self.provider
            .remove_from_set(key, &member.to_string())
            .await
    }

    pub async fn has_in_set<T: ToString + ?Sized>(&self, key: &str, member: &T) -> Result<bool> {
        self.provider.has_in_set(key, &member.to_string()).await
    }

    pub async fn get_set_size(&self, key: &str) -> Result<usize> {
        self.provider.get_set_size(key).await
    }

    pub async fn get_set(&self, key: &str) -> Result<Vec<String>> {
        self.provider.get_set(key).await
    }

    pub async fn add_to_list<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.provider.add_to_list(key, json).await
    }

    pub async fn add_all_to_list<T: Serialize>(&self, key: &str, values: &[T]) -> Result<()> {
        let encoded = values
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if encoded.is_empty() {
            return Ok(());
        }
        self.provider.add_all_to_list(key, encoded).await
    }

    pub async fn pop_from_list<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.provider.pop_from_list(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn get_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        decode_all(self.provider.get_list(key).await?)
    }

    pub async fn get_list_size(&self, key: &str) -> Result<usize> {
        self.provider.get_list_size(key).await
    }

    pub async fn sublist<T: DeserializeOwned>(
        &self,
        key: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<T>> {
        decode_all(self.provider.sublist(key, start, end).await?)
    }
}

fn decode_all<T: DeserializeOwned>(raw: Vec<String>) -> Result<Vec<T>> {
    raw.iter()
        .map(|json| -> Result<T> { Ok(serde_json::from_str(json)?) })
        .collect()
}
