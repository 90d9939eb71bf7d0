//! In-process cache backend.
//!
//! Mirrors the Redis data model closely enough for the coordination protocols: typed entries
//! (string, hash, set, list), per-key TTL, atomic `SET NX`-style locking. Expiry is lazy and
//! measured on `tokio::time::Instant` so tests can drive it with a paused clock.

use super::provider::CacheProvider;
use crate::error::{DistributionError, Result};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(VecDeque<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::List(_) => "list",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Hash(map) => map.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::List(list) => list.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys, mostly useful in tests.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a clone of the live value under `key`, purging it if it has expired.
    fn read(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        None
    }

    /// Applies `op` to the value under `key`, creating it with `init` when missing or expired.
    /// Collections left empty by `op` are removed, like Redis does.
    fn update<R>(
        &self,
        key: &str,
        init: fn() -> Value,
        op: impl FnOnce(&mut Value) -> Result<R>,
    ) -> Result<R> {
        let now = Instant::now();
        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Entry::new(init()));
        if slot.is_expired(now) {
            *slot = Entry::new(init());
        }
        let result = op(&mut slot.value)?;
        let empty = slot.value.is_empty();
        drop(slot);
        if empty {
            self.entries.remove_if(key, |_, entry| entry.value.is_empty());
        }
        Ok(result)
    }
}

fn wrong_type(key: &str, expected: &str, found: &Value) -> DistributionError {
    DistributionError::cache(format!(
        "WRONGTYPE key {key} holds a {} value, expected {expected}",
        found.kind()
    ))
}

fn decode_i64(key: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| DistributionError::cache(format!("value at {key} is not an integer")))
}

/// Redis-style glob matching supporting `*` and `?`.
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();
    let (mut p, mut c) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, c));
                p += 1;
            }
            Some('?') => {
                p += 1;
                c += 1;
            }
            Some(&ch) if ch == candidate[c] => {
                p += 1;
                c += 1;
            }
            _ => match backtrack {
                Some((star_p, star_c)) => {
                    p = star_p + 1;
                    c = star_c + 1;
                    backtrack = Some((star_p, star_c + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&ch| ch == '*')
}

fn list_range(len: usize, start: isize, end: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if len == 0 || start > end || start >= len {
        return None;
    }
    Some((start as usize, end as usize))
}

#[async_trait]
impl CacheProvider for MemoryCache {
    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), Entry::new(Value::Str(value)));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.read(key) {
            Some(Value::Str(value)) => Ok(Some(value)),
            Some(other) => Err(wrong_type(key, "string", &other)),
            None => Ok(None),
        }
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key)
            && !entry.is_expired(now)
        {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now) && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn increment_and_get(&self, key: &str, delta: i64) -> Result<i64> {
        self.update(
            key,
            || Value::Str("0".to_string()),
            |value| match value {
                Value::Str(raw) => {
                    let next = decode_i64(key, raw)? + delta;
                    *raw = next.to_string();
                    Ok(next)
                }
                other => Err(wrong_type(key, "string", other)),
            },
        )
    }

    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let fresh = Entry {
            value: Value::Str("1".to_string()),
            expires_at: Some(now + ttl),
        };
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut held) => {
                if held.get().is_expired(now) {
                    held.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            MapEntry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn set_hash(&self, key: &str, field: &str, value: String) -> Result<()> {
        self.update(
            key,
            || Value::Hash(HashMap::new()),
            |current| match current {
                Value::Hash(map) => {
                    map.insert(field.to_string(), value);
                    Ok(())
                }
                other => Err(wrong_type(key, "hash", other)),
            },
        )
    }

    async fn get_hash(&self, key: &str, field: &str) -> Result<Option<String>> {
        match self.read(key) {
            Some(Value::Hash(map)) => Ok(map.get(field).cloned()),
            Some(other) => Err(wrong_type(key, "hash", &other)),
            None => Ok(None),
        }
    }

    async fn delete_hash(&self, key: &str, field: &str) -> Result<()> {
        if self.read(key).is_none() {
            return Ok(());
        }
        self.update(
            key,
            || Value::Hash(HashMap::new()),
            |current| match current {
                Value::Hash(map) => {
                    map.remove(field);
                    Ok(())
                }
                other => Err(wrong_type(key, "hash", other)),
            },
        )
    }

    async fn get_map(&self, key: &str) -> Result<HashMap<String, String>> {
        match self.read(key) {
            Some(Value::Hash(map)) => Ok(map),
            Some(other) => Err(wrong_type(key, "hash", &other)),
            None => Ok(HashMap::new()),
        }
    }

    async fn get_map_keys(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.get_map(key).await?.into_keys().collect())
    }

    async fn get_map_values(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.get_map(key).await?.into_values().collect())
    }

    async fn add_to_set(&self, key: &str, member: String) -> Result<()> {
        self.update(
            key,
            || Value::Set(HashSet::new()),
            |current| match current {
                Value::Set(set) => {
                    set.insert(member);
                    Ok(())
                }
                other => Err(wrong_type(key, "set", other)),
            },
        )
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<()> {
        if self.read(key).is_none() {
            return Ok(());
        }
        self.update(
            key,
            || Value::Set(HashSet::new()),
            |current| match current {
                Value::Set(set) => {
                    set.remove(member);
                    Ok(())
                }
                other => Err(wrong_type(key, "set", other)),
            },
        )
    }

    async fn has_in_set(&self, key: &str, member: &str) -> Result<bool> {
        match self.read(key) {
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(other) => Err(wrong_type(key, "set", &other)),
            None => Ok(false),
        }
    }

    async fn get_set_size(&self, key: &str) -> Result<usize> {
        Ok(self.get_set(key).await?.len())
    }

    async fn get_set(&self, key: &str) -> Result<Vec<String>> {
        match self.read(key) {
            Some(Value::Set(set)) => Ok(set.into_iter().collect()),
            Some(other) => Err(wrong_type(key, "set", &other)),
            None => Ok(Vec::new()),
        }
    }

    async fn add_to_list(&self, key: &str, value: String) -> Result<()> {
        self.add_all_to_list(key, vec![value]).await
    }

    async fn add_all_to_list(&self, key: &str, values: Vec<String>) -> Result<()> {
        self.update(
            key,
            || Value::List(VecDeque::new()),
            |current| match current {
                Value::List(list) => {
                    list.extend(values);
                    Ok(())
                }
                other => Err(wrong_type(key, "list", other)),
            },
        )
    }

    async fn pop_from_list(&self, key: &str) -> Result<Option<String>> {
        if self.read(key).is_none() {
            return Ok(None);
        }
        self.update(
            key,
            || Value::List(VecDeque::new()),
            |current| match current {
                Value::List(list) => Ok(list.pop_front()),
                other => Err(wrong_type(key, "list", other)),
            },
        )
    }

    async fn get_list(&self, key: &str) -> Result<Vec<String>> {
        self.sublist(key, 0, -1).await
    }

    async fn get_list_size(&self, key: &str) -> Result<usize> {
        match self.read(key) {
            Some(Value::List(list)) => Ok(list.len()),
            Some(other) => Err(wrong_type(key, "list", &other)),
            None => Ok(0),
        }
    }

    async fn sublist(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>> {
        match self.read(key) {
            Some(Value::List(list)) => Ok(match list_range(list.len(), start, end) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => Vec::new(),
            }),
            Some(other) => Err(wrong_type(key, "list", &other)),
            None => Ok(Vec::new()),
        }
    }
}
