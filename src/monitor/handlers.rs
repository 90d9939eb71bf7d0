use super::protocol::*;
use crate::error::DistributionError;
use crate::executor::DistributionExecutor;
use crate::executor::types::JobKey;
use crate::membership::watcher::ExecutorWatcher;

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;

type ApiResult<T> = Result<(StatusCode, Json<T>), (StatusCode, Json<ErrorResponse>)>;

fn internal_error(context: &str, e: DistributionError) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!("{}: {}", context, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

pub async fn handle_get_tasks(
    Extension(watcher): Extension<Arc<ExecutorWatcher>>,
    Path(key): Path<String>,
) -> ApiResult<TaskListResponse> {
    let job = JobKey(key);
    let tasks = watcher
        .select_task_list(&job)
        .await
        .map_err(|e| internal_error("Failed to list tasks", e))?;

    tracing::debug!("Task list query: {} -> {} batches", job.0, tasks.len());
    Ok((StatusCode::OK, Json(TaskListResponse { job: job.0, tasks })))
}

pub async fn handle_get_progress(
    Extension(watcher): Extension<Arc<ExecutorWatcher>>,
    Path(key): Path<String>,
) -> ApiResult<JobProgressResponse> {
    let job = JobKey(key);
    let progress = async {
        let tasks = watcher.select_task_list(&job).await?;
        let all_done = watcher.is_all_task_done(&job).await?;
        Ok::<_, DistributionError>(JobProgressResponse {
            job: job.0.clone(),
            data_total: watcher.select_data_total(&job).await?,
            task_total: watcher.select_task_total(&job).await?,
            tasks_started: tasks.len() as u64,
            tasks_finished: tasks.iter().filter(|task| task.is_finished()).count() as u64,
            finish: tasks.iter().map(|task| task.finish).sum(),
            error_total: tasks.iter().map(|task| task.error_total).sum(),
            all_done,
        })
    }
    .await
    .map_err(|e| internal_error("Failed to compute progress", e))?;

    Ok((StatusCode::OK, Json(progress)))
}

pub async fn handle_get_machines(
    Extension(watcher): Extension<Arc<ExecutorWatcher>>,
) -> ApiResult<MachinesResponse> {
    let machines = watcher
        .active_machines()
        .await
        .map_err(|e| internal_error("Failed to list machines", e))?;

    Ok((StatusCode::OK, Json(MachinesResponse { machines })))
}

pub async fn handle_stop_job(
    Extension(executor): Extension<Arc<DistributionExecutor>>,
    Path(key): Path<String>,
) -> ApiResult<StopResponse> {
    let job = JobKey(key);
    executor
        .stop(&job)
        .await
        .map_err(|e| internal_error("Failed to stop job", e))?;

    tracing::info!("Job {} stopped over HTTP", job.0);
    Ok((
        StatusCode::ACCEPTED,
        Json(StopResponse {
            job: job.0,
            stopped: true,
        }),
    ))
}
