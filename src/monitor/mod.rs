//! Monitoring Module
//!
//! HTTP views over what the cache knows about jobs and machines. Any machine can serve them,
//! since every answer is read from the shared cache.
//!
//! ## Routes
//! - `GET /jobs/{key}/tasks`: batch records, with live counts for unfinished batches.
//! - `GET /jobs/{key}/progress`: job-level totals.
//! - `GET /machines`: machines with a fresh heartbeat.
//! - `POST /jobs/{key}/stop`: cooperative stop for every machine running the job.

pub mod handlers;
pub mod protocol;

use crate::executor::DistributionExecutor;
use crate::membership::watcher::ExecutorWatcher;

use axum::{
    Extension, Router,
    routing::{get, post},
};
use std::sync::Arc;

pub fn router(watcher: Arc<ExecutorWatcher>, executor: Arc<DistributionExecutor>) -> Router {
    Router::new()
        .route("/jobs/{key}/tasks", get(handlers::handle_get_tasks))
        .route("/jobs/{key}/progress", get(handlers::handle_get_progress))
        .route("/machines", get(handlers::handle_get_machines))
        .route("/jobs/{key}/stop", post(handlers::handle_stop_job))
        .layer(Extension(watcher))
        .layer(Extension(executor))
}

#[cfg(test)]
mod tests;
