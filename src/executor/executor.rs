//! Batch Execution Engine
//!
//! Drives one job to completion together with every other machine running it.
//!
//! ## Responsibilities
//! - **Dispatch**: Under the job lock, decides the next batch number: the first one, the one
//!   after the cursor, or an unfinished batch whose owner stopped heartbeating.
//! - **Execution**: Runs the chosen batch locally on the worker pool, recording every item
//!   ordinal in a success or error set so a rerun only touches what is left.
//! - **Finalization**: Snapshots the set sizes into the batch record and drops the sets.

use super::pool::{DEFAULT_WORKER_COUNT, WorkerPool};
use super::types::*;
use super::work::Work;
use crate::cache::Cache;
use crate::error::{DistributionError, Result};
use crate::keys::TaskKeys;
use crate::lock::lease::DEFAULT_RETRY_INTERVAL;
use crate::lock::{Coordinator, LeaseManager};
use crate::membership::types::MachineId;
use crate::membership::watcher::ExecutorWatcher;

use dashmap::DashSet;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Tunables for one executor.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub worker_count: usize,
    /// Sleep after losing the job lock in the dispatch and total-computation loops.
    pub dispatch_period: Duration,
    /// Sleep between cluster-wide completion checks in `execute_until_all_done`.
    pub wait_period: Duration,
    pub lock_retry_interval: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            dispatch_period: Duration::from_secs(1),
            wait_period: Duration::from_secs(1),
            lock_retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

pub struct DistributionExecutor {
    cache: Cache,
    keys: TaskKeys,
    coordinator: Coordinator,
    watcher: Arc<ExecutorWatcher>,
    pool: WorkerPool,
    /// Job keys currently executing in this process.
    running: DashSet<String>,
    settings: ExecutorSettings,
}

impl DistributionExecutor {
    pub fn new(cache: Cache, watcher: Arc<ExecutorWatcher>) -> Self {
        Self::with_settings(cache, watcher, ExecutorSettings::default())
    }

    pub fn with_settings(cache: Cache, watcher: Arc<ExecutorWatcher>, settings: ExecutorSettings) -> Self {
        let lease = LeaseManager::new(cache.clone()).with_retry_interval(settings.lock_retry_interval);
        Self {
            keys: watcher.keys().clone(),
            coordinator: Coordinator::new(lease),
            pool: WorkerPool::new(settings.worker_count),
            running: DashSet::new(),
            cache,
            watcher,
            settings,
        }
    }

    pub fn machine(&self) -> &MachineId {
        self.watcher.machine()
    }

    pub fn watcher(&self) -> &Arc<ExecutorWatcher> {
        &self.watcher
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Takes part in the job until no batch is left for this machine to pick up.
    ///
    /// Returning does not mean the job is done: other machines may still be finishing their
    /// batches. Use [`DistributionExecutor::execute_until_all_done`] to wait for them.
    pub async fn execute<W: Work>(&self, work: &Arc<W>, param: &W::Param) -> Result<()> {
        if param.page_size() == 0 {
            return Err(DistributionError::config(format!(
                "page size of job {} must be positive",
                param.key()
            )));
        }
        let _run = RunGuard::register(&self.running, param.key())?;
        tracing::info!("Machine {} joins job {}", self.machine(), param.key());

        self.cache.remove(&self.keys.stop_flag(param)).await?;

        self.coordinator
            .until_done(
                &self.keys.job_lock(param),
                self.settings.dispatch_period,
                || self.is_completed(&**work, param),
                || self.calculate_task_no(&**work, param),
                |task_no| self.run_batch(work, param, task_no),
            )
            .await?;

        tracing::info!("Machine {} leaves job {}", self.machine(), param.key());
        Ok(())
    }

    /// [`DistributionExecutor::execute`], then blocks until every batch in the cluster is
    /// finished or the job is stopped.
    pub async fn execute_until_all_done<W: Work>(&self, work: &Arc<W>, param: &W::Param) -> Result<()> {
        self.execute(work, param).await?;
        self.wait_until_all_done(param).await
    }

    /// Asks every machine to stop picking up batches for `job`. In-flight items still finish.
    pub async fn stop(&self, job: &(impl Keyable + ?Sized)) -> Result<()> {
        tracing::info!("Stop requested for job {}", job.key());
        self.cache.set(&self.keys.stop_flag(job), &true).await
    }

    pub async fn is_stopped(&self, job: &(impl Keyable + ?Sized)) -> Result<bool> {
        Ok(self
            .cache
            .get::<bool>(&self.keys.stop_flag(job))
            .await?
            .unwrap_or(false))
    }

    async fn wait_until_all_done(&self, job: &(impl Keyable + ?Sized)) -> Result<()> {
        let lock_key = self.keys.job_lock(job);
        loop {
            let done = self
                .coordinator
                .with_lock(&lock_key, None, None, || self.is_settled(job))
                .await?;
            if done == Some(true) {
                tracing::info!("Job {} settled across the cluster", job.key());
                return Ok(());
            }
            tokio::time::sleep(self.settings.wait_period).await;
        }
    }

    /// Stopped, or no batch record is still being handled.
    async fn is_settled(&self, job: &(impl Keyable + ?Sized)) -> Result<bool> {
        if self.is_stopped(job).await? {
            return Ok(true);
        }
        let records: Vec<BatchRecord> = self
            .cache
            .get_map_values(&self.keys.task_info_map(job))
            .await?;
        Ok(records.iter().all(BatchRecord::is_finished))
    }

    // ============================================================
    // DISPATCH
    // ============================================================

    async fn is_completed<W: Work>(&self, work: &W, param: &W::Param) -> Result<bool> {
        if self.is_stopped(param).await? {
            tracing::info!("Job {} is stopped", param.key());
            return Ok(true);
        }

        let task_total = self.select_task_total(work, param).await?;
        if task_total > 0 {
            let task_no: Option<u64> = self.cache.get(&self.keys.task_no(param)).await?;
            if task_no.is_none_or(|task_no| task_no < task_total) {
                return Ok(false);
            }
        }

        let done = self.watcher.is_all_task_done(param).await?;
        tracing::debug!("Job {} completed: {}", param.key(), done);
        Ok(done)
    }

    /// Batch count for the job, computed by exactly one machine.
    async fn select_task_total<W: Work>(&self, work: &W, param: &W::Param) -> Result<u64> {
        let task_total_key = self.keys.task_total(param);
        self.coordinator
            .until_computed(
                &self.keys.total_lock(param),
                self.settings.dispatch_period,
                || self.cache.get::<u64>(&task_total_key),
                || self.compute_totals(work, param),
            )
            .await
    }

    async fn compute_totals<W: Work>(&self, work: &W, param: &W::Param) -> Result<()> {
        let data_total = work
            .select_data_total(param)
            .await
            .map_err(DistributionError::Work)?;
        let batches = task_total(data_total, param.page_size());

        self.cache.set(&self.keys.data_total(param), &data_total).await?;
        self.cache.set(&self.keys.task_total(param), &batches).await?;
        tracing::info!(
            "Job {} has {} items in {} batches",
            param.key(),
            data_total,
            batches
        );
        Ok(())
    }

    /// Picks the next batch. Runs under the job lock.
    ///
    /// The chosen batch is claimed for this machine before the lock is released, so no other
    /// machine can pick the same abandoned batch.
    async fn calculate_task_no<W: Work>(&self, work: &W, param: &W::Param) -> Result<Option<u64>> {
        let task_no_key = self.keys.task_no(param);
        let task_total = self.select_task_total(work, param).await?;
        let current: Option<u64> = self.cache.get(&task_no_key).await?;

        let next = match current {
            None if task_total > 0 => {
                self.cache.set(&task_no_key, &1u64).await?;
                Some(1)
            }
            None => None,
            Some(task_no) if task_no < task_total => {
                self.cache.set(&task_no_key, &(task_no + 1)).await?;
                Some(task_no + 1)
            }
            Some(_) => self.find_abandoned(param).await?,
        };

        if let Some(task_no) = next {
            self.claim(param, task_no).await?;
        }
        tracing::info!("Next batch of job {}: {:?}", param.key(), next);
        Ok(next)
    }

    /// First unfinished batch whose owner is no longer heartbeating.
    async fn find_abandoned(&self, job: &(impl Keyable + ?Sized)) -> Result<Option<u64>> {
        let active: HashSet<MachineId> = self
            .watcher
            .active_machines()
            .await?
            .into_iter()
            .map(|record| record.machine_no)
            .collect();

        let abandoned = self
            .watcher
            .select_task_list(job)
            .await?
            .into_iter()
            .find(|record| !record.is_finished() && !active.contains(&record.machine_no));

        if let Some(record) = &abandoned {
            tracing::warn!(
                "Reclaiming batch {} of job {} from dead machine {}",
                record.task_no,
                job.key(),
                record.machine_no
            );
        }
        Ok(abandoned.map(|record| record.task_no))
    }

    async fn claim(&self, job: &(impl Keyable + ?Sized), task_no: u64) -> Result<BatchRecord> {
        let record = BatchRecord::handling(task_no, self.machine().clone());
        self.save_record(job, &record).await?;
        Ok(record)
    }

    async fn save_record(&self, job: &(impl Keyable + ?Sized), record: &BatchRecord) -> Result<()> {
        self.cache
            .set_hash(
                &self.keys.task_info_map(job),
                &record.task_no.to_string(),
                record,
            )
            .await
    }

    // ============================================================
    // BATCH EXECUTION
    // ============================================================

    async fn run_batch<W: Work>(&self, work: &Arc<W>, param: &W::Param, task_no: u64) -> Result<()> {
        let mut batch_param = param.clone();
        batch_param.set_page_num(task_no);
        let record = self.execute_batch(work, &batch_param).await?;
        tracing::info!("Job {}: {}", param.key(), record);
        Ok(())
    }

    /// Runs every pending item of the batch selected by `param.page_num()` and finalizes it.
    pub(crate) async fn execute_batch<W: Work>(&self, work: &Arc<W>, param: &W::Param) -> Result<BatchRecord> {
        let task_no = param.page_num();
        let mut record = self.claim(param, task_no).await?;
        let sets = BatchSets {
            cache: self.cache.clone(),
            normal: self.keys.normal_index_set(param, task_no),
            error: self.keys.error_index_set(param, task_no),
        };

        let data = work
            .select_data_list(param)
            .await
            .map_err(DistributionError::Work)?;
        let resumed = self.cache.has_key(&sets.normal).await?;

        record.total = data.len() as u64;
        self.save_record(param, &record).await?;
        tracing::debug!(
            "Batch {} of job {}: {} items{}",
            task_no,
            param.key(),
            record.total,
            if resumed { " (resumed)" } else { "" }
        );

        let mut tasks = JoinSet::new();
        for (index, datum) in data.into_iter().enumerate() {
            let ordinal = index as u64 + 1;
            if resumed && self.cache.has_in_set(&sets.normal, &ordinal).await? {
                continue;
            }
            self.pool.spawn(
                &mut tasks,
                handle_item(work.clone(), param.clone(), datum, ordinal, sets.clone()),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Job {}: {:#}", param.key(), e),
                Err(e) => tracing::error!("Job {}: item task aborted: {}", param.key(), e),
            }
        }

        record.finish = self.cache.get_set_size(&sets.normal).await? as u64;
        record.error_total = self.cache.get_set_size(&sets.error).await? as u64;
        record.status = BatchStatus::Finished;
        record.finish_time = Some(now_ms());
        self.save_record(param, &record).await?;
        self.cache
            .delete(&[sets.normal.clone(), sets.error.clone()])
            .await?;

        Ok(record)
    }
}

/// Cache coordinates of one batch's progress sets.
#[derive(Clone)]
struct BatchSets {
    cache: Cache,
    normal: String,
    error: String,
}

/// Runs one item and records its outcome. A panic counts as a failure.
async fn handle_item<W: Work>(
    work: Arc<W>,
    param: W::Param,
    datum: W::Datum,
    ordinal: u64,
    sets: BatchSets,
) -> anyhow::Result<()> {
    let outcome = AssertUnwindSafe(work.handle_datum(&param, datum))
        .catch_unwind()
        .await;

    let failure = match outcome {
        Ok(Ok(())) => {
            sets.cache.add_to_set(&sets.normal, &ordinal).await?;
            // A retried item that failed before is now a success.
            sets.cache.remove_from_set(&sets.error, &ordinal).await?;
            return Ok(());
        }
        Ok(Err(e)) => e,
        Err(panic) => anyhow::anyhow!("handler panicked: {}", panic_message(&*panic)),
    };

    sets.cache.add_to_set(&sets.error, &ordinal).await?;
    Err(failure.context(format!(
        "item {} of batch {} failed",
        ordinal,
        param.page_num()
    )))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Keeps a job key registered while a run is in progress.
struct RunGuard<'a> {
    running: &'a DashSet<String>,
    key: String,
}

impl<'a> RunGuard<'a> {
    fn register(running: &'a DashSet<String>, key: String) -> Result<Self> {
        if !running.insert(key.clone()) {
            return Err(DistributionError::DuplicateRun(key));
        }
        Ok(Self { running, key })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.key);
    }
}
