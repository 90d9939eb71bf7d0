//! Monitor Module Tests
//!
//! Handlers are called directly with their extractors, no server involved.

#[cfg(test)]
mod tests {
    use crate::cache::{Cache, MemoryCache};
    use crate::executor::DistributionExecutor;
    use crate::executor::types::{BatchRecord, BatchStatus, JobKey};
    use crate::keys::TaskKeys;
    use crate::membership::{ExecutorWatcher, MachineId};
    use crate::monitor::handlers::*;
    use axum::{Extension, extract::Path, http::StatusCode};
    use std::sync::Arc;
    use std::time::Duration;

    async fn seeded() -> (Cache, Arc<ExecutorWatcher>) {
        let cache = Cache::new(Arc::new(MemoryCache::new()));
        let keys = TaskKeys::default();
        let job = JobKey("settlement".to_string());
        let map_key = keys.task_info_map(&job);

        cache.set(&keys.data_total(&job), &150u64).await.unwrap();
        cache.set(&keys.task_total(&job), &2u64).await.unwrap();

        let mut done = BatchRecord::handling(1, MachineId::from("machine001"));
        done.total = 100;
        done.finish = 98;
        done.error_total = 2;
        done.status = BatchStatus::Finished;
        cache.set_hash(&map_key, "1", &done).await.unwrap();

        let mut running = BatchRecord::handling(2, MachineId::from("machine001"));
        running.total = 50;
        cache.set_hash(&map_key, "2", &running).await.unwrap();
        for ordinal in 1..=10u64 {
            cache
                .add_to_set(&keys.normal_index_set(&job, 2), &ordinal)
                .await
                .unwrap();
        }

        let watcher = Arc::new(ExecutorWatcher::new(
            cache.clone(),
            keys,
            MachineId::from("machine001"),
        ));
        (cache, watcher)
    }

    // ============================================================
    // TEST 1: Job views
    // ============================================================

    #[tokio::test]
    async fn test_get_tasks_lists_batches_in_order() {
        let (_cache, watcher) = seeded().await;

        let (status, body) =
            handle_get_tasks(Extension(watcher), Path("settlement".to_string()))
                .await
                .unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.0.job, "settlement");
        assert_eq!(body.0.tasks.len(), 2);
        assert_eq!(body.0.tasks[1].finish, 10);
    }

    #[tokio::test]
    async fn test_get_progress_rolls_up_batches() {
        let (_cache, watcher) = seeded().await;

        let (status, body) =
            handle_get_progress(Extension(watcher), Path("settlement".to_string()))
                .await
                .unwrap();

        assert_eq!(status, StatusCode::OK);
        let progress = body.0;
        assert_eq!(progress.data_total, 150);
        assert_eq!(progress.task_total, 2);
        assert_eq!(progress.tasks_started, 2);
        assert_eq!(progress.tasks_finished, 1);
        assert_eq!(progress.finish, 108);
        assert_eq!(progress.error_total, 2);
        assert!(!progress.all_done);
    }

    // ============================================================
    // TEST 2: Machines and stop
    // ============================================================

    #[tokio::test]
    async fn test_get_machines_lists_heartbeating_machines() {
        let (_cache, watcher) = seeded().await;
        watcher.start().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (status, body) = handle_get_machines(Extension(watcher.clone()))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.0.machines.len(), 1);
        assert_eq!(body.0.machines[0].machine_no.as_str(), "machine001");
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_job_sets_flag() {
        let (cache, watcher) = seeded().await;
        let executor = Arc::new(DistributionExecutor::new(cache, watcher));

        let (status, body) =
            handle_stop_job(Extension(executor.clone()), Path("settlement".to_string()))
                .await
                .unwrap();

        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body.0.stopped);
        assert!(
            executor
                .is_stopped(&JobKey("settlement".to_string()))
                .await
                .unwrap()
        );
    }
}
