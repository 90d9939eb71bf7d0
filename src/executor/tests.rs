//! Executor Module Tests
//!
//! Single-machine runs of the batch engine against the in-memory cache.
//!
//! ## Test Scopes
//! - **Worker Pool**: concurrency bound.
//! - **Engine**: full runs, validation, the in-process duplicate guard.
//! - **Progress**: failure and panic accounting, resuming a partly done batch.
//! - **Failover & Stop**: reclaiming batches of dead machines, cooperative stop.

#[cfg(test)]
mod tests {
    use crate::cache::{Cache, MemoryCache};
    use crate::error::DistributionError;
    use crate::executor::types::{BatchRecord, BatchStatus, JobSpec, Pageable, now_ms};
    use crate::executor::{DistributionExecutor, ExecutorSettings, Work, WorkerPool};
    use crate::keys::TaskKeys;
    use crate::membership::{ExecutorWatcher, MachineId, MachineRecord};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::task::JoinSet;

    /// Items are the numbers `1..=total`, so an item equals its ordinal within the job.
    #[derive(Default)]
    struct ListWork {
        items: Vec<u64>,
        failing: HashSet<u64>,
        panicking: HashSet<u64>,
        delay: Duration,
        handled: Mutex<Vec<u64>>,
        /// Raises this stop flag while handling.
        stop_flag: Option<(Cache, String)>,
    }

    impl ListWork {
        fn new(total: u64) -> Self {
            Self {
                items: (1..=total).collect(),
                ..Default::default()
            }
        }

        fn handled(&self) -> Vec<u64> {
            let mut handled = self.handled.lock().unwrap().clone();
            handled.sort_unstable();
            handled
        }
    }

    #[async_trait]
    impl Work for ListWork {
        type Param = JobSpec;
        type Datum = u64;

        async fn select_data_total(&self, _param: &JobSpec) -> anyhow::Result<u64> {
            Ok(self.items.len() as u64)
        }

        async fn select_data_list(&self, param: &JobSpec) -> anyhow::Result<Vec<u64>> {
            let start = ((param.page_num() - 1) * param.page_size()) as usize;
            Ok(self
                .items
                .iter()
                .skip(start)
                .take(param.page_size() as usize)
                .copied()
                .collect())
        }

        async fn handle_datum(&self, _param: &JobSpec, datum: u64) -> anyhow::Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.handled.lock().unwrap().push(datum);
            if let Some((cache, key)) = &self.stop_flag {
                cache.set(key, &true).await?;
            }
            if self.panicking.contains(&datum) {
                panic!("handler blew up on {datum}");
            }
            if self.failing.contains(&datum) {
                anyhow::bail!("rejected item {datum}");
            }
            Ok(())
        }
    }

    fn cache() -> Cache {
        Cache::new(Arc::new(MemoryCache::new()))
    }

    fn settings() -> ExecutorSettings {
        ExecutorSettings {
            worker_count: 8,
            dispatch_period: Duration::from_millis(10),
            wait_period: Duration::from_millis(10),
            lock_retry_interval: Duration::from_millis(10),
        }
    }

    async fn machine(cache: &Cache, name: &str) -> DistributionExecutor {
        let watcher = Arc::new(ExecutorWatcher::new(
            cache.clone(),
            TaskKeys::default(),
            MachineId::from(name),
        ));
        watcher.start().await;
        // Let the first heartbeat land.
        tokio::time::sleep(Duration::from_millis(10)).await;
        DistributionExecutor::with_settings(cache.clone(), watcher, settings())
    }

    async fn records(cache: &Cache, job: &JobSpec) -> Vec<BatchRecord> {
        let mut records: Vec<BatchRecord> = cache
            .get_map_values(&TaskKeys::default().task_info_map(job))
            .await
            .unwrap();
        records.sort_by_key(|record| record.task_no);
        records
    }

    // ============================================================
    // TEST 1: WorkerPool - Concurrency bound
    // ============================================================

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for _ in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            pool.spawn(&mut tasks, async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle(), 2);
        assert_eq!(WorkerPool::new(0).size(), 1);
    }

    // ============================================================
    // TEST 2: Engine - Full runs and validation
    // ============================================================

    #[tokio::test]
    async fn test_execute_runs_every_batch() {
        let cache = cache();
        let executor = machine(&cache, "machine001").await;
        let work = Arc::new(ListWork::new(250));
        let job = JobSpec::new("settlement", 100);

        executor.execute_until_all_done(&work, &job).await.unwrap();

        assert_eq!(work.handled(), (1..=250).collect::<Vec<_>>());

        let records = records(&cache, &job).await;
        let totals: Vec<u64> = records.iter().map(|record| record.total).collect();
        assert_eq!(totals, vec![100, 100, 50]);
        for record in &records {
            assert_eq!(record.status, BatchStatus::Finished);
            assert_eq!(record.finish + record.error_total, record.total);
            assert_eq!(record.machine_no.as_str(), "machine001");
            assert!(record.finish_time.is_some());
        }

        let keys = TaskKeys::default();
        assert!(executor.watcher().is_all_task_done(&job).await.unwrap());
        assert_eq!(executor.watcher().select_data_total(&job).await.unwrap(), 250);
        assert_eq!(executor.watcher().select_task_total(&job).await.unwrap(), 3);
        assert!(!cache.has_key(&keys.normal_index_set(&job, 1)).await.unwrap());
        assert!(!cache.has_key(&keys.job_lock(&job)).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_job_finishes_without_batches() {
        let cache = cache();
        let executor = machine(&cache, "machine001").await;
        let work = Arc::new(ListWork::new(0));
        let job = JobSpec::new("empty", 100);

        executor.execute_until_all_done(&work, &job).await.unwrap();

        assert!(records(&cache, &job).await.is_empty());
        assert_eq!(executor.watcher().select_task_total(&job).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_page_size_is_rejected() {
        let cache = cache();
        let executor = machine(&cache, "machine001").await;
        let work = Arc::new(ListWork::new(10));

        let result = executor.execute(&work, &JobSpec::new("settlement", 0)).await;

        assert!(matches!(result, Err(DistributionError::Config(_))));
    }

    #[tokio::test]
    async fn test_duplicate_run_in_same_process_is_rejected() {
        let cache = cache();
        let executor = machine(&cache, "machine001").await;
        let work = Arc::new(ListWork {
            delay: Duration::from_millis(50),
            ..ListWork::new(5)
        });
        let job = JobSpec::new("settlement", 5);

        let (first, second) = tokio::join!(executor.execute(&work, &job), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            executor.execute(&work, &job).await
        });

        assert!(first.is_ok());
        assert!(matches!(second, Err(DistributionError::DuplicateRun(key)) if key == "settlement"));

        // The guard is gone once the first run returns.
        executor.execute(&work, &job).await.unwrap();
        assert_eq!(work.handled().len(), 5);
    }

    // ============================================================
    // TEST 3: Progress - Failures and resume
    // ============================================================

    #[tokio::test]
    async fn test_failed_and_panicked_items_are_counted() {
        let cache = cache();
        let executor = machine(&cache, "machine001").await;
        let work = Arc::new(ListWork {
            failing: HashSet::from([3, 7]),
            panicking: HashSet::from([9]),
            ..ListWork::new(10)
        });
        let job = JobSpec::new("settlement", 5);

        executor.execute_until_all_done(&work, &job).await.unwrap();

        let records = records(&cache, &job).await;
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].finish, records[0].error_total), (4, 1));
        assert_eq!((records[1].finish, records[1].error_total), (3, 2));
        assert_eq!(work.handled().len(), 10);
    }

    #[tokio::test]
    async fn test_resumed_batch_skips_succeeded_items() {
        let cache = cache();
        let executor = machine(&cache, "machine001").await;
        let keys = TaskKeys::default();
        let work = Arc::new(ListWork::new(10));
        let mut job = JobSpec::new("settlement", 10);
        job.set_page_num(1);

        // A previous run got through three items and failed the fifth.
        for ordinal in 1..=3u64 {
            cache
                .add_to_set(&keys.normal_index_set(&job, 1), &ordinal)
                .await
                .unwrap();
        }
        cache
            .add_to_set(&keys.error_index_set(&job, 1), &5u64)
            .await
            .unwrap();

        let record = executor.execute_batch(&work, &job).await.unwrap();

        assert_eq!(work.handled(), (4..=10).collect::<Vec<_>>());
        assert_eq!(record.total, 10);
        assert_eq!(record.finish, 10);
        assert_eq!(record.error_total, 0);
        assert!(record.is_finished());
        assert!(!cache.has_key(&keys.error_index_set(&job, 1)).await.unwrap());
    }

    // ============================================================
    // TEST 4: Failover & Stop
    // ============================================================

    async fn seed_last_batch_in_flight(cache: &Cache, job: &JobSpec, owner: &str) {
        let keys = TaskKeys::default();
        let map_key = keys.task_info_map(job);

        cache.set(&keys.data_total(job), &10u64).await.unwrap();
        cache.set(&keys.task_total(job), &2u64).await.unwrap();
        cache.set(&keys.task_no(job), &2u64).await.unwrap();

        let mut first = BatchRecord::handling(1, MachineId::from(owner));
        first.total = 5;
        first.finish = 5;
        first.status = BatchStatus::Finished;
        first.finish_time = Some(now_ms());
        cache.set_hash(&map_key, "1", &first).await.unwrap();

        let second = BatchRecord::handling(2, MachineId::from(owner));
        cache.set_hash(&map_key, "2", &second).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_of_dead_machine_is_reclaimed() {
        let cache = cache();
        let job = JobSpec::new("settlement", 5);
        seed_last_batch_in_flight(&cache, &job, "machine-dead").await;

        let executor = machine(&cache, "machine001").await;
        let work = Arc::new(ListWork::new(10));

        executor.execute_until_all_done(&work, &job).await.unwrap();

        assert_eq!(work.handled(), (6..=10).collect::<Vec<_>>());
        let records = records(&cache, &job).await;
        assert_eq!(records[1].machine_no.as_str(), "machine001");
        assert_eq!(records[1].status, BatchStatus::Finished);
        assert_eq!(records[1].finish, 5);
    }

    #[tokio::test]
    async fn test_batch_of_live_machine_is_left_alone() {
        let cache = cache();
        let job = JobSpec::new("settlement", 5);
        seed_last_batch_in_flight(&cache, &job, "machine002").await;
        let heartbeat = MachineRecord::new(MachineId::from("machine002"), now_ms());
        cache
            .set_hash(&TaskKeys::default().machine_info_map(), "machine002", &heartbeat)
            .await
            .unwrap();

        let executor = machine(&cache, "machine001").await;
        let work = Arc::new(ListWork::new(10));

        executor.execute(&work, &job).await.unwrap();

        assert!(work.handled().is_empty());
        let records = records(&cache, &job).await;
        assert_eq!(records[1].machine_no.as_str(), "machine002");
        assert_eq!(records[1].status, BatchStatus::Handling);
    }

    #[tokio::test]
    async fn test_stop_prevents_new_batches() {
        let cache = cache();
        let executor = machine(&cache, "machine001").await;
        let job = JobSpec::new("settlement", 5);
        let work = Arc::new(ListWork {
            stop_flag: Some((cache.clone(), TaskKeys::default().stop_flag(&job))),
            ..ListWork::new(20)
        });

        executor.execute_until_all_done(&work, &job).await.unwrap();

        assert_eq!(work.handled(), (1..=5).collect::<Vec<_>>());
        assert_eq!(records(&cache, &job).await.len(), 1);
        assert!(executor.is_stopped(&job).await.unwrap());
    }

    #[tokio::test]
    async fn test_execute_clears_previous_stop() {
        let cache = cache();
        let executor = machine(&cache, "machine001").await;
        let work = Arc::new(ListWork::new(6));
        let job = JobSpec::new("settlement", 5);

        executor.stop(&job).await.unwrap();
        assert!(executor.is_stopped(&job).await.unwrap());

        executor.execute_until_all_done(&work, &job).await.unwrap();

        assert!(!executor.is_stopped(&job).await.unwrap());
        assert_eq!(work.handled().len(), 6);
    }
}
