//! Heartbeat producer, liveness consumer and read-only job projections.

use super::types::{MachineId, MachineRecord};
use crate::cache::Cache;
use crate::error::{DistributionError, Result};
use crate::executor::types::{BatchRecord, Keyable, now_ms};
use crate::keys::TaskKeys;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub const DEFAULT_HEARTBEAT_RATE: Duration = Duration::from_secs(3);

/// A machine is dead once its last heartbeat is older than this many rates.
const STALE_AFTER_RATES: u64 = 2;

pub struct ExecutorWatcher {
    cache: Cache,
    keys: TaskKeys,
    machine: MachineId,
    rate_ms: AtomicU64,
    /// Running heartbeat task. Guarded so concurrent restarts cannot leak a timer.
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutorWatcher {
    pub fn new(cache: Cache, keys: TaskKeys, machine: MachineId) -> Self {
        Self {
            cache,
            keys,
            machine,
            rate_ms: AtomicU64::new(DEFAULT_HEARTBEAT_RATE.as_millis() as u64),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn machine(&self) -> &MachineId {
        &self.machine
    }

    pub fn keys(&self) -> &TaskKeys {
        &self.keys
    }

    pub fn heartbeat_rate(&self) -> Duration {
        Duration::from_millis(self.rate_ms.load(Ordering::Relaxed))
    }

    /// Starts beating at the current rate, replacing a running heartbeat if any.
    pub async fn start(&self) {
        let mut heartbeat = self.heartbeat.lock().await;
        if let Some(running) = heartbeat.take() {
            running.abort();
        }
        *heartbeat = Some(self.spawn_heartbeat());
        tracing::info!(
            "Heartbeat started for {} every {:?}",
            self.machine,
            self.heartbeat_rate()
        );
    }

    pub async fn shutdown(&self) {
        if let Some(running) = self.heartbeat.lock().await.take() {
            running.abort();
            tracing::info!("Heartbeat stopped for {}", self.machine);
        }
    }

    pub async fn is_beating(&self) -> bool {
        self.heartbeat.lock().await.is_some()
    }

    /// Changes the heartbeat period and (re)starts the heartbeat with it.
    pub async fn set_heartbeat_rate(&self, rate: Duration) -> Result<()> {
        let rate_ms = rate.as_millis() as u64;
        if rate_ms == 0 {
            return Err(DistributionError::config(
                "heartbeat rate must be at least one millisecond",
            ));
        }
        self.rate_ms.store(rate_ms, Ordering::Relaxed);
        self.start().await;
        Ok(())
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let map_key = self.keys.machine_info_map();
        let machine = self.machine.clone();
        let rate = self.heartbeat_rate();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(rate);
            loop {
                interval.tick().await;
                let record = MachineRecord::new(machine.clone(), now_ms());
                match cache.set_hash(&map_key, machine.as_str(), &record).await {
                    Ok(()) => tracing::trace!("Heartbeat from {}", machine),
                    Err(e) => tracing::warn!("Heartbeat from {} failed: {}", machine, e),
                }
            }
        })
    }

    // ============================================================
    // LIVENESS
    // ============================================================

    /// Machines whose heartbeat is fresh. Stale records are deleted on the way.
    pub async fn active_machines(&self) -> Result<Vec<MachineRecord>> {
        let map_key = self.keys.machine_info_map();
        let threshold = self.rate_ms.load(Ordering::Relaxed) * STALE_AFTER_RATES;
        let now = now_ms();

        let mut active = Vec::new();
        for record in self.cache.get_map_values::<MachineRecord>(&map_key).await? {
            let elapsed = now.saturating_sub(record.last_heartbeat_time);
            if elapsed > threshold {
                tracing::warn!(
                    "Machine {} missed heartbeats for {} ms, removing it",
                    record.machine_no,
                    elapsed
                );
                self.cache
                    .delete_hash(&map_key, record.machine_no.as_str())
                    .await?;
                continue;
            }
            active.push(record);
        }
        Ok(active)
    }

    pub async fn is_active(&self, machine: &MachineId) -> Result<bool> {
        Ok(self
            .active_machines()
            .await?
            .iter()
            .any(|record| &record.machine_no == machine))
    }

    // ============================================================
    // JOB PROJECTIONS
    // ============================================================

    /// Item count published for the job, 0 until computed.
    pub async fn select_data_total(&self, job: &(impl Keyable + ?Sized)) -> Result<u64> {
        Ok(self
            .cache
            .get::<u64>(&self.keys.data_total(job))
            .await?
            .unwrap_or(0))
    }

    /// Batch count published for the job, 0 until computed.
    pub async fn select_task_total(&self, job: &(impl Keyable + ?Sized)) -> Result<u64> {
        Ok(self
            .cache
            .get::<u64>(&self.keys.task_total(job))
            .await?
            .unwrap_or(0))
    }

    /// Every batch record of the job ordered by batch number.
    ///
    /// Unfinished batches report live progress read from their index sets.
    pub async fn select_task_list(&self, job: &(impl Keyable + ?Sized)) -> Result<Vec<BatchRecord>> {
        let mut records: Vec<BatchRecord> = self
            .cache
            .get_map_values(&self.keys.task_info_map(job))
            .await?;

        for record in records.iter_mut().filter(|record| !record.is_finished()) {
            record.finish = self
                .cache
                .get_set_size(&self.keys.normal_index_set(job, record.task_no))
                .await? as u64;
            record.error_total = self
                .cache
                .get_set_size(&self.keys.error_index_set(job, record.task_no))
                .await? as u64;
        }

        records.sort_by_key(|record| record.task_no);
        Ok(records)
    }

    /// True once every batch has a record and every record is finished.
    pub async fn is_all_task_done(&self, job: &(impl Keyable + ?Sized)) -> Result<bool> {
        let records: Vec<BatchRecord> = self
            .cache
            .get_map_values(&self.keys.task_info_map(job))
            .await?;
        if records.is_empty() {
            return Ok(false);
        }
        if self.select_task_total(job).await? > records.len() as u64 {
            return Ok(false);
        }
        Ok(records.iter().all(BatchRecord::is_finished))
    }
}

impl Drop for ExecutorWatcher {
    fn drop(&mut self) {
        if let Some(running) = self.heartbeat.get_mut().take() {
            running.abort();
        }
    }
}
