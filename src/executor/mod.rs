//! Distributed Batch Executor Module
//!
//! Runs a paginated job cooperatively across every machine that shares the cache.
//!
//! ## Architecture Overview
//! The executor follows a **Pull-based** model coordinated through the cache:
//! 1. **Totals**: The first machine to find the batch count missing computes it from
//!    `Work::select_data_total` and publishes it. Everyone else reads it.
//! 2. **Dispatch**: Machines take turns holding the job lock to advance the shared batch
//!    cursor. Once the cursor is past the last batch, unfinished batches owned by dead
//!    machines are handed out again.
//! 3. **Execution**: The winner runs its batch locally, on a bounded worker pool, outside the lock.
//! 4. **Progress**: Each item ordinal lands in a success or error set, so a retried batch only
//!    runs what has not succeeded yet (at-least-once semantics).
//!
//! ## Submodules
//! - **`types`**: Job descriptor capabilities, batch records and helpers.
//! - **`work`**: The `Work` trait the business logic implements.
//! - **`pool`**: Local bounded worker pool.
//! - **`executor`**: `DistributionExecutor`, the dispatch and batch lifecycle.

pub mod executor;
pub mod pool;
pub mod types;
pub mod work;

pub use executor::{DistributionExecutor, ExecutorSettings};
pub use pool::WorkerPool;
pub use types::{BatchRecord, BatchStatus, JobDescriptor, JobKey, JobSpec, Keyable, Pageable};
pub use work::Work;

#[cfg(test)]
mod tests;
