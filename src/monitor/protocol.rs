use crate::executor::types::BatchRecord;
use crate::membership::types::MachineRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub job: String,
    pub tasks: Vec<BatchRecord>,
}

/// Job-level rollup of the batch records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobProgressResponse {
    pub job: String,
    pub data_total: u64,
    pub task_total: u64,
    pub tasks_started: u64,
    pub tasks_finished: u64,
    /// Items that succeeded so far, including in-flight batches.
    pub finish: u64,
    pub error_total: u64,
    pub all_done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachinesResponse {
    pub machines: Vec<MachineRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub job: String,
    pub stopped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
