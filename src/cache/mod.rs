//! Shared Cache Module
//!
//! The cache is the only channel machines share. Everything the cluster knows about a job
//! (totals, batch cursor, progress sets, batch records, heartbeats, locks) lives here.
//!
//! ## Layers
//! - **`provider`**: The `CacheProvider` contract (string values, key/value, hash, set, list, lock)
//!   and the typed `Cache` facade that the rest of the crate talks to.
//! - **`memory`**: A process-local backend. Several engines sharing one instance behave like a cluster.
//! - **`redis`**: The networked backend used in production.

pub mod memory;
pub mod provider;
pub mod redis;

pub use memory::MemoryCache;
pub use provider::{Cache, CacheProvider};
pub use redis::RedisCache;
