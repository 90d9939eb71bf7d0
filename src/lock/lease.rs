//! Lease acquisition and renewal.

use crate::cache::Cache;
use crate::error::{DistributionError, Result};

use std::time::Duration;
use tokio::task::JoinHandle;

/// Lease length when the caller does not pick one.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// Pause between failed acquisition attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(300);

/// Fixed renewal tick used by the poll loops on their 60 s lease.
pub const POLL_RENEW_PERIOD: Duration = Duration::from_secs(50);

/// Hands out TTL-bounded locks from the shared cache.
#[derive(Debug, Clone)]
pub struct LeaseManager {
    cache: Cache,
    retry_interval: Duration,
}

impl LeaseManager {
    pub fn new(cache: Cache) -> Self {
        Self {
            cache,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Acquires `lock_key`, retrying every 300 ms.
    ///
    /// `max_retries` counts retries after the first attempt; `None` retries forever.
    /// Returns `Ok(None)` when the budget runs out. On success the lease renews itself
    /// every `ttl / 2` until the guard is released.
    pub async fn acquire(
        &self,
        lock_key: &str,
        ttl: Option<Duration>,
        max_retries: Option<u32>,
    ) -> Result<Option<LeaseGuard>> {
        validate(lock_key, ttl)?;
        let ttl = ttl.unwrap_or(DEFAULT_LOCK_TTL);

        tracing::debug!(
            "Acquiring lock {} (ttl {:?}, retries {:?})",
            lock_key,
            ttl,
            max_retries
        );

        let mut attempts: u32 = 0;
        loop {
            if self.cache.lock(lock_key, ttl).await? {
                return Ok(Some(self.spawn_guard(lock_key, ttl, ttl / 2)));
            }
            if let Some(max) = max_retries
                && attempts >= max
            {
                tracing::debug!("Gave up on lock {} after {} attempts", lock_key, attempts + 1);
                return Ok(None);
            }
            attempts = attempts.saturating_add(1);
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Single attempt with an explicit renewal period. Used by the poll loops.
    pub async fn try_acquire_with(
        &self,
        lock_key: &str,
        ttl: Duration,
        renew_every: Duration,
    ) -> Result<Option<LeaseGuard>> {
        validate(lock_key, Some(ttl))?;
        if self.cache.lock(lock_key, ttl).await? {
            Ok(Some(self.spawn_guard(lock_key, ttl, renew_every)))
        } else {
            Ok(None)
        }
    }

    fn spawn_guard(&self, lock_key: &str, ttl: Duration, renew_every: Duration) -> LeaseGuard {
        let renewal = if renew_every.is_zero() {
            None
        } else {
            Some(spawn_renewal(
                self.cache.clone(),
                lock_key.to_string(),
                ttl,
                renew_every,
            ))
        };
        tracing::trace!("Lock {} acquired", lock_key);
        LeaseGuard {
            cache: self.cache.clone(),
            key: lock_key.to_string(),
            renewal,
            released: false,
        }
    }
}

fn validate(lock_key: &str, ttl: Option<Duration>) -> Result<()> {
    if lock_key.is_empty() {
        return Err(DistributionError::config("lock key must not be empty"));
    }
    if ttl.is_some_and(|ttl| ttl.is_zero()) {
        return Err(DistributionError::config(format!(
            "lock ttl must be positive for {lock_key}"
        )));
    }
    Ok(())
}

/// Re-extends the lease every `period` until aborted.
fn spawn_renewal(cache: Cache, key: String, ttl: Duration, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            interval.tick().await;
            match cache.expire(&key, ttl).await {
                Ok(()) => tracing::trace!("Renewed lease on {}", key),
                Err(e) => tracing::warn!("Failed to renew lease on {}: {}", key, e),
            }
        }
    })
}

/// A held lock. Dropping it without [`LeaseGuard::release`] still stops renewal and
/// deletes the key in the background.
#[derive(Debug)]
pub struct LeaseGuard {
    cache: Cache,
    key: String,
    renewal: Option<JoinHandle<()>>,
    released: bool,
}

impl LeaseGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) -> Result<()> {
        self.stop_renewal();
        self.released = true;
        tracing::trace!("Releasing lock {}", self.key);
        self.cache.remove(&self.key).await
    }

    fn stop_renewal(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.stop_renewal();
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Lock {} dropped outside a runtime; it will expire on its own", self.key);
            return;
        };
        let cache = self.cache.clone();
        let key = std::mem::take(&mut self.key);
        handle.spawn(async move {
            if let Err(e) = cache.remove(&key).await {
                tracing::warn!("Failed to release dropped lock {}: {}", key, e);
            }
        });
    }
}
