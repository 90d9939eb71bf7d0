//! Distributed Batch Execution Library
//!
//! Lets several independent processes ("machines") drive one large paginated job to completion,
//! sharing nothing but a remote key/value cache. Progress and liveness live entirely in that
//! cache, so a crashed machine's batch is picked up by another one and a rerun resumes where
//! the last one stopped.
//!
//! ## Architecture Modules
//! The system is composed of loosely coupled layers, leaves first:
//!
//! - **`cache`**: The storage contract (`CacheProvider`), a typed facade, and the in-memory and
//!   Redis backends.
//! - **`keys`**: Deterministic cache key naming shared by every machine.
//! - **`lock`**: TTL leases with background renewal, plus the three coordination protocols
//!   built on them (locked section, compute-once poll loop, dispatch loop).
//! - **`membership`**: Machine identity and the heartbeat-based liveness watcher.
//! - **`executor`**: The batch engine that ties the above together for one job.
//! - **`monitor`**: Read-only HTTP views over job progress and cluster membership.
//! - **`config`**: Environment-driven settings for the binary.

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod keys;
pub mod lock;
pub mod membership;
pub mod monitor;

pub use error::{DistributionError, Result};
