//! Coordination protocols layered on leases.
//!
//! All three take a lock key and rely on the lease for mutual exclusion across machines.
//! None of them holds the lease while sleeping.

use super::lease::{DEFAULT_LOCK_TTL, LeaseGuard, LeaseManager, POLL_RENEW_PERIOD};
use crate::error::Result;

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct Coordinator {
    lease: LeaseManager,
}

impl Coordinator {
    pub fn new(lease: LeaseManager) -> Self {
        Self { lease }
    }

    pub fn lease(&self) -> &LeaseManager {
        &self.lease
    }

    /// Runs `f` while holding `lock_key`.
    ///
    /// Returns `Ok(None)` when the lock could not be taken within the retry budget.
    /// The lease is released before an error from `f` is propagated.
    pub async fn with_lock<R, F, Fut>(
        &self,
        lock_key: &str,
        ttl: Option<Duration>,
        max_retries: Option<u32>,
        f: F,
    ) -> Result<Option<R>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let Some(guard) = self.lease.acquire(lock_key, ttl, max_retries).await? else {
            return Ok(None);
        };
        let outcome = f().await;
        release(guard).await;
        let value = outcome?;
        tracing::debug!("Locked section on {} completed", lock_key);
        Ok(Some(value))
    }

    /// Same as [`Coordinator::with_lock`] on a background task.
    pub fn spawn_with_lock<R, F, Fut>(
        &self,
        lock_key: impl Into<String>,
        ttl: Option<Duration>,
        max_retries: Option<u32>,
        f: F,
    ) -> JoinHandle<Result<Option<R>>>
    where
        R: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let coordinator = self.clone();
        let lock_key = lock_key.into();
        tokio::spawn(async move { coordinator.with_lock(&lock_key, ttl, max_retries, f).await })
    }

    /// Shared-read, single-writer poll loop.
    ///
    /// Every machine reads through `query`. When the value is missing, whoever wins the lock
    /// checks again and runs `compute` to publish it. Losers sleep `period`. Returns only once
    /// `query` yields a value.
    pub async fn until_computed<R, Q, QFut, C, CFut>(
        &self,
        lock_key: &str,
        period: Duration,
        query: Q,
        compute: C,
    ) -> Result<R>
    where
        Q: Fn() -> QFut,
        QFut: Future<Output = Result<Option<R>>>,
        C: Fn() -> CFut,
        CFut: Future<Output = Result<()>>,
    {
        tracing::debug!("Polling {} until computed (period {:?})", lock_key, period);
        loop {
            if let Some(value) = query().await? {
                return Ok(value);
            }

            let Some(guard) = self
                .lease
                .try_acquire_with(lock_key, DEFAULT_LOCK_TTL, POLL_RENEW_PERIOD)
                .await?
            else {
                tokio::time::sleep(period).await;
                continue;
            };

            // Someone may have published while we waited for the lock.
            let outcome = match query().await {
                Ok(None) => {
                    tracing::debug!("Computing shared value under {}", lock_key);
                    compute().await.map(|()| None)
                }
                other => other,
            };
            release(guard).await;

            if let Some(value) = outcome? {
                return Ok(value);
            }
        }
    }

    /// Dispatch loop.
    ///
    /// While `is_done` is false, the lock holder picks the next unit with `compute_next`
    /// and then runs it locally with `execute_next`, outside the lock. Losing the lock sleeps
    /// `period` and tries again. A `None` unit ends the loop.
    pub async fn until_done<T, D, DFut, N, NFut, E, EFut>(
        &self,
        lock_key: &str,
        period: Duration,
        is_done: D,
        compute_next: N,
        execute_next: E,
    ) -> Result<()>
    where
        D: Fn() -> DFut,
        DFut: Future<Output = Result<bool>>,
        N: Fn() -> NFut,
        NFut: Future<Output = Result<Option<T>>>,
        E: Fn(T) -> EFut,
        EFut: Future<Output = Result<()>>,
    {
        tracing::debug!("Dispatch loop on {} started", lock_key);
        while !is_done().await? {
            let Some(guard) = self
                .lease
                .try_acquire_with(lock_key, DEFAULT_LOCK_TTL, POLL_RENEW_PERIOD)
                .await?
            else {
                tokio::time::sleep(period).await;
                continue;
            };

            let next = compute_next().await;
            release(guard).await;

            match next? {
                Some(unit) => execute_next(unit).await?,
                None => {
                    tracing::debug!("No more work under {}", lock_key);
                    break;
                }
            }
        }
        tracing::debug!("Dispatch loop on {} finished", lock_key);
        Ok(())
    }
}

async fn release(guard: LeaseGuard) {
    let key = guard.key().to_string();
    if let Err(e) = guard.release().await {
        tracing::warn!("Failed to release lock {}: {}", key, e);
    }
}
