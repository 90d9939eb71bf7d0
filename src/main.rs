use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use distributed_batch::cache::{Cache, MemoryCache, RedisCache};
use distributed_batch::config::Settings;
use distributed_batch::executor::{DistributionExecutor, JobSpec, Pageable, Work};
use distributed_batch::keys::TaskKeys;
use distributed_batch::membership::{ExecutorWatcher, MachineId};
use distributed_batch::monitor;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "distributed-batch")]
struct Args {
    /// Job key shared by every machine taking part.
    #[arg(long, env = "DISTRIBUTION_JOB", default_value = "demo-settlement")]
    job: String,

    /// Number of synthetic items in the job.
    #[arg(long, env = "DISTRIBUTION_ITEMS", default_value_t = 1000)]
    items: u64,

    #[arg(long, env = "DISTRIBUTION_PAGE_SIZE", default_value_t = 100)]
    page_size: u64,

    /// Probability that an item handler fails.
    #[arg(long, env = "DISTRIBUTION_FAILURE_RATE", default_value_t = 0.01)]
    failure_rate: f64,

    /// Use a process-local cache instead of Redis (single machine only).
    #[arg(long)]
    in_memory: bool,

    #[arg(long)]
    redis_url: Option<String>,

    #[arg(long)]
    monitor_addr: Option<SocketAddr>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    heartbeat_ms: Option<u64>,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(redis_url) = &self.redis_url {
            settings.redis_url = redis_url.clone();
        }
        if let Some(monitor_addr) = self.monitor_addr {
            settings.monitor_addr = monitor_addr;
        }
        if let Some(workers) = self.workers {
            settings.worker_count = workers;
        }
        if let Some(heartbeat_ms) = self.heartbeat_ms {
            settings.heartbeat_rate = Duration::from_millis(heartbeat_ms);
        }
    }
}

/// Items are the numbers `1..=items`. Handling one sleeps a little and sometimes fails.
struct SyntheticWork {
    items: u64,
    failure_rate: f64,
}

#[async_trait]
impl Work for SyntheticWork {
    type Param = JobSpec;
    type Datum = u64;

    async fn select_data_total(&self, _param: &JobSpec) -> Result<u64> {
        Ok(self.items)
    }

    async fn select_data_list(&self, param: &JobSpec) -> Result<Vec<u64>> {
        let first = (param.page_num() - 1) * param.page_size() + 1;
        let last = (param.page_num() * param.page_size()).min(self.items);
        Ok((first..=last).collect())
    }

    async fn handle_datum(&self, _param: &JobSpec, datum: u64) -> Result<()> {
        let (delay, fails) = {
            let mut rng = rand::rng();
            (rng.random_range(5..50), rng.random_bool(self.failure_rate))
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if fails {
            anyhow::bail!("synthetic failure on item {datum}");
        }
        tracing::trace!("Handled item {}", datum);
        Ok(())
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("DISTRIBUTION_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();

    let args = Args::parse();
    let mut settings = Settings::from_env()?;
    args.apply(&mut settings);
    if !(0.0..=1.0).contains(&args.failure_rate) {
        anyhow::bail!("--failure-rate must be within 0..=1");
    }

    // 1. Shared cache:
    let cache = if args.in_memory {
        tracing::warn!("Using an in-memory cache; other processes cannot join this run");
        Cache::new(Arc::new(MemoryCache::new()))
    } else {
        tracing::info!("Connecting to {}", settings.redis_url);
        Cache::new(Arc::new(RedisCache::connect(&settings.redis_url).await?))
    };

    // 2. Identity and heartbeat:
    let machine = MachineId::register(&cache).await?;
    let watcher = Arc::new(ExecutorWatcher::new(
        cache.clone(),
        TaskKeys::new(settings.key_prefix.clone()),
        machine,
    ));
    watcher.set_heartbeat_rate(settings.heartbeat_rate).await?;

    // 3. Engine:
    let executor = Arc::new(DistributionExecutor::with_settings(
        cache.clone(),
        watcher.clone(),
        settings.executor_settings(),
    ));

    // 4. Monitoring HTTP server:
    let app = monitor::router(watcher.clone(), executor.clone());
    let listener = tokio::net::TcpListener::bind(settings.monitor_addr).await?;
    tracing::info!("Monitor listening on {}", settings.monitor_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Monitor server failed: {}", e);
        }
    });

    // 5. Run the job:
    let work = Arc::new(SyntheticWork {
        items: args.items,
        failure_rate: args.failure_rate,
    });
    let job = JobSpec::new(args.job, args.page_size);

    tokio::select! {
        result = executor.execute_until_all_done(&work, &job) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; unfinished batches of this machine will be reclaimed by others");
            watcher.shutdown().await;
            return Ok(());
        }
    }

    for task in watcher.select_task_list(&job).await? {
        tracing::info!("{}", task);
    }
    tracing::info!(
        "Job {} done: {} items in {} batches",
        job.key,
        watcher.select_data_total(&job).await?,
        watcher.select_task_total(&job).await?
    );

    watcher.shutdown().await;
    Ok(())
}
