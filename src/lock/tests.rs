//! Lock Module Tests
//!
//! Leases and coordination protocols against the in-memory cache. Time is paused in most
//! tests so TTLs and renewal ticks advance deterministically.

#[cfg(test)]
mod tests {
    use crate::cache::{Cache, MemoryCache};
    use crate::error::DistributionError;
    use crate::lock::{Coordinator, LeaseManager};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn cache() -> Cache {
        Cache::new(Arc::new(MemoryCache::new()))
    }

    fn coordinator(cache: &Cache) -> Coordinator {
        Coordinator::new(
            LeaseManager::new(cache.clone()).with_retry_interval(Duration::from_millis(10)),
        )
    }

    // ============================================================
    // LEASE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_acquire_rejects_invalid_input() {
        let lease = LeaseManager::new(cache());

        let empty = lease.acquire("", None, Some(0)).await;
        assert!(matches!(empty, Err(DistributionError::Config(_))));

        let zero_ttl = lease.acquire("lock:job", Some(Duration::ZERO), None).await;
        assert!(matches!(zero_ttl, Err(DistributionError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_gives_up_after_retry_budget() {
        let cache = cache();
        let lease = LeaseManager::new(cache.clone()).with_retry_interval(Duration::from_millis(10));

        assert!(cache.lock("lock:job", Duration::from_secs(60)).await.unwrap());

        let started = tokio::time::Instant::now();
        let outcome = lease
            .acquire("lock:job", Some(Duration::from_secs(60)), Some(2))
            .await
            .unwrap();

        assert!(outcome.is_none());
        // One initial attempt plus two retries, sleeping between them.
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_expired_lease() {
        let cache = cache();
        let lease = LeaseManager::new(cache.clone()).with_retry_interval(Duration::from_millis(100));

        // A crashed holder: nobody renews this lock.
        assert!(cache.lock("lock:job", Duration::from_secs(1)).await.unwrap());

        let guard = lease
            .acquire("lock:job", Some(Duration::from_secs(60)), None)
            .await
            .unwrap();

        assert!(guard.is_some());
        guard.unwrap().release().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_holder_keeps_lease_past_ttl() {
        let cache = cache();
        let lease = LeaseManager::new(cache.clone());

        let guard = lease
            .acquire("lock:job", Some(Duration::from_secs(2)), Some(0))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_secs(7)).await;

        assert!(cache.has_key("lock:job").await.unwrap());
        assert!(!cache.lock("lock:job", Duration::from_secs(2)).await.unwrap());

        guard.release().await.unwrap();
        assert!(!cache.has_key("lock:job").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_guard_releases_lock() {
        let cache = cache();
        let lease = LeaseManager::new(cache.clone());

        let guard = lease
            .acquire("lock:job", None, Some(0))
            .await
            .unwrap()
            .unwrap();
        drop(guard);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!cache.has_key("lock:job").await.unwrap());
    }

    // ============================================================
    // WITH_LOCK TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_with_lock_sections_never_overlap() {
        let cache = cache();
        let coordinator = coordinator(&cache);
        let inside = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let inside = inside.clone();
            let runs = runs.clone();
            handles.push(coordinator.spawn_with_lock("lock:shared", None, None, move || async move {
                assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                tokio::time::sleep(Duration::from_millis(50)).await;
                inside.store(false, Ordering::SeqCst);
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Some(()));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_with_lock_reports_not_run_when_contended() {
        let cache = cache();
        let coordinator = coordinator(&cache);
        assert!(cache.lock("lock:busy", Duration::from_secs(60)).await.unwrap());

        let outcome = coordinator
            .with_lock("lock:busy", None, Some(1), || async { Ok(7) })
            .await
            .unwrap();

        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let cache = cache();
        let coordinator = coordinator(&cache);

        let outcome: Result<Option<()>, _> = coordinator
            .with_lock("lock:failing", None, Some(0), || async {
                Err(DistributionError::cache("backend went away"))
            })
            .await;

        assert!(matches!(outcome, Err(DistributionError::Cache(_))));
        assert!(!cache.has_key("lock:failing").await.unwrap());
    }

    // ============================================================
    // UNTIL_COMPUTED TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_until_computed_runs_compute_once() {
        let cache = cache();
        let computes = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let coordinator = coordinator(&cache);
            let computes = computes.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .until_computed(
                        "lock:total",
                        Duration::from_millis(100),
                        || cache.get::<u64>("total"),
                        || {
                            let cache = cache.clone();
                            let computes = computes.clone();
                            async move {
                                computes.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(250)).await;
                                cache.set("total", &42u64).await
                            }
                        },
                    )
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(computes.load(Ordering::SeqCst), 1);
        assert!(!cache.has_key("lock:total").await.unwrap());
    }

    #[tokio::test]
    async fn test_until_computed_skips_compute_when_present() {
        let cache = cache();
        let coordinator = coordinator(&cache);
        cache.set("total", &9u64).await.unwrap();

        let value = coordinator
            .until_computed(
                "lock:total",
                Duration::from_millis(10),
                || cache.get::<u64>("total"),
                || async { Err(DistributionError::config("compute must not run")) },
            )
            .await
            .unwrap();

        assert_eq!(value, 9);
    }

    // ============================================================
    // UNTIL_DONE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_until_done_executes_each_unit_until_exhausted() {
        let cache = cache();
        let coordinator = coordinator(&cache);
        let executed = Mutex::new(Vec::new());

        coordinator
            .until_done(
                "lock:dispatch",
                Duration::from_millis(10),
                || async { Ok(false) },
                || async {
                    cache
                        .increment_and_get("cursor", 1)
                        .await
                        .map(|next| (next <= 3).then_some(next))
                },
                |unit| {
                    executed.lock().unwrap().push(unit);
                    async { Ok(()) }
                },
            )
            .await
            .unwrap();

        assert_eq!(*executed.lock().unwrap(), vec![1, 2, 3]);
        assert!(!cache.has_key("lock:dispatch").await.unwrap());
    }

    #[tokio::test]
    async fn test_until_done_stops_when_done() {
        let cache = cache();
        let coordinator = coordinator(&cache);

        coordinator
            .until_done(
                "lock:dispatch",
                Duration::from_millis(10),
                || async { Ok(true) },
                || async { Err::<Option<u64>, _>(DistributionError::config("nothing to compute")) },
                |_unit| async { Err(DistributionError::config("nothing to execute")) },
            )
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_done_waits_out_contention() {
        let cache = cache();
        let coordinator = coordinator(&cache);
        let holder = coordinator
            .lease()
            .acquire("lock:dispatch", None, Some(0))
            .await
            .unwrap()
            .unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            holder.release().await.unwrap();
        });

        let started = tokio::time::Instant::now();
        let executed = AtomicUsize::new(0);
        coordinator
            .until_done(
                "lock:dispatch",
                Duration::from_secs(1),
                || async { Ok(executed.load(Ordering::SeqCst) >= 1) },
                || async { Ok(Some(1u64)) },
                |_unit| {
                    executed.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
            )
            .await
            .unwrap();

        assert_eq!(executed.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
