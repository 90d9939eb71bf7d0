//! Distributed Lock Module
//!
//! Leases on top of the cache's `lock` primitive, and the coordination protocols built on them.
//!
//! ## Mechanics
//! 1. **Acquire**: `SET NX` with a TTL, retried every 300 ms within a budget.
//! 2. **Renew**: While held, a background task re-extends the TTL every half lease, so a live
//!    holder never loses the lock mid-task.
//! 3. **Release**: Renewal is aborted and the key deleted, whether the protected work
//!    succeeded or failed. A crashed holder's lock simply expires.
//!
//! There is no fencing token: a holder stalled past its TTL can still write after a new
//! holder took over.
//!
//! ## Submodules
//! - **`lease`**: `LeaseManager` and the scoped `LeaseGuard`.
//! - **`coordination`**: single-writer compute, the poll loop and the dispatch loop.

pub mod coordination;
pub mod lease;

pub use coordination::Coordinator;
pub use lease::{LeaseGuard, LeaseManager};

#[cfg(test)]
mod tests;
