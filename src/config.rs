//! Configuration loading from environment variables.
//!
//! Uses the following environment variables:
//! - `DISTRIBUTION_REDIS_URL`: Shared cache connection string (default: redis://127.0.0.1:6379)
//! - `DISTRIBUTION_KEY_PREFIX`: Namespace for every job key (default: reconciliation:)
//! - `DISTRIBUTION_HEARTBEAT_RATE_MS`: Heartbeat period (default: 3000)
//! - `DISTRIBUTION_WORKER_COUNT`: Concurrent item handlers per machine (default: 40)
//! - `DISTRIBUTION_DISPATCH_PERIOD_MS`: Sleep after losing the job lock (default: 1000)
//! - `DISTRIBUTION_WAIT_PERIOD_MS`: Sleep between cluster completion checks (default: 1000)
//! - `DISTRIBUTION_MONITOR_ADDR`: Monitoring HTTP bind address (default: 0.0.0.0:8090)

use crate::executor::ExecutorSettings;
use crate::executor::pool::DEFAULT_WORKER_COUNT;
use crate::keys::DEFAULT_PREFIX;
use crate::lock::lease::DEFAULT_RETRY_INTERVAL;
use crate::membership::watcher::DEFAULT_HEARTBEAT_RATE;

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_MONITOR_ADDR: &str = "0.0.0.0:8090";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub redis_url: String,
    pub key_prefix: String,
    pub heartbeat_rate: Duration,
    pub worker_count: usize,
    pub dispatch_period: Duration,
    pub wait_period: Duration,
    pub monitor_addr: SocketAddr,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: DEFAULT_PREFIX.to_string(),
            heartbeat_rate: DEFAULT_HEARTBEAT_RATE,
            worker_count: DEFAULT_WORKER_COUNT,
            dispatch_period: Duration::from_secs(1),
            wait_period: Duration::from_secs(1),
            monitor_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from any variable source. Unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| -> Result<Duration> {
            Ok(parse::<u64>(&lookup, name)?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };

        let settings = Self {
            redis_url: lookup("DISTRIBUTION_REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: lookup("DISTRIBUTION_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            heartbeat_rate: millis("DISTRIBUTION_HEARTBEAT_RATE_MS", defaults.heartbeat_rate)?,
            worker_count: parse(&lookup, "DISTRIBUTION_WORKER_COUNT")?
                .unwrap_or(defaults.worker_count),
            dispatch_period: millis("DISTRIBUTION_DISPATCH_PERIOD_MS", defaults.dispatch_period)?,
            wait_period: millis("DISTRIBUTION_WAIT_PERIOD_MS", defaults.wait_period)?,
            monitor_addr: parse(&lookup, "DISTRIBUTION_MONITOR_ADDR")?
                .unwrap_or(defaults.monitor_addr),
        };

        if settings.heartbeat_rate.is_zero() {
            anyhow::bail!("DISTRIBUTION_HEARTBEAT_RATE_MS must be positive");
        }
        if settings.worker_count == 0 {
            anyhow::bail!("DISTRIBUTION_WORKER_COUNT must be positive");
        }
        Ok(settings)
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            worker_count: self.worker_count,
            dispatch_period: self.dispatch_period,
            wait_period: self.wait_period,
            lock_retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("invalid value for {name}: {raw}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.monitor_addr.to_string(), DEFAULT_MONITOR_ADDR);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let settings = Settings::from_lookup(lookup(&[
            ("DISTRIBUTION_KEY_PREFIX", "billing:"),
            ("DISTRIBUTION_HEARTBEAT_RATE_MS", "500"),
            ("DISTRIBUTION_WORKER_COUNT", "8"),
            ("DISTRIBUTION_MONITOR_ADDR", "127.0.0.1:9000"),
        ]))
        .unwrap();

        assert_eq!(settings.key_prefix, "billing:");
        assert_eq!(settings.heartbeat_rate, Duration::from_millis(500));
        assert_eq!(settings.executor_settings().worker_count, 8);
        assert_eq!(settings.monitor_addr.port(), 9000);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Settings::from_lookup(lookup(&[("DISTRIBUTION_WORKER_COUNT", "many")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("DISTRIBUTION_WORKER_COUNT", "0")])).is_err());
        assert!(
            Settings::from_lookup(lookup(&[("DISTRIBUTION_HEARTBEAT_RATE_MS", "0")])).is_err()
        );
    }
}
