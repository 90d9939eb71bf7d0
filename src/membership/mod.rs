//! Membership & Liveness Module
//!
//! Tracks which machines are alive using heartbeats written into the shared cache. There is
//! no direct traffic between machines: each one upserts its own record, and any reader that
//! finds a record older than twice the heartbeat rate deletes it and treats the machine as dead.
//!
//! The dispatch loop asks this module whether the owner of an unfinished batch is still
//! alive before reclaiming that batch.
//!
//! ## Submodules
//! - **`types`**: `MachineId` (allocated from a shared counter) and the heartbeat `MachineRecord`.
//! - **`watcher`**: `ExecutorWatcher`, the heartbeat task plus read-only job progress projections.

pub mod types;
pub mod watcher;

pub use types::{MachineId, MachineRecord};
pub use watcher::ExecutorWatcher;
