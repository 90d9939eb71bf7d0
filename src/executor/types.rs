use crate::membership::types::MachineId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Something that can be turned into a stable cache key.
///
/// Two processes describing the same job must produce the same key.
pub trait Keyable {
    fn key(&self) -> String;
}

/// Pagination state carried by a job. The engine moves `page_num` as batches are dispatched.
pub trait Pageable {
    fn page_num(&self) -> u64;
    fn set_page_num(&mut self, page_num: u64);
    fn page_size(&self) -> u64;
}

/// Everything the engine needs from a job parameter.
pub trait JobDescriptor: Keyable + Pageable + Clone + Send + Sync + 'static {}

impl<T> JobDescriptor for T where T: Keyable + Pageable + Clone + Send + Sync + 'static {}

/// A plain job descriptor: a key plus a page size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSpec {
    pub key: String,
    pub page_num: u64,
    pub page_size: u64,
}

impl JobSpec {
    pub fn new(key: impl Into<String>, page_size: u64) -> Self {
        Self {
            key: key.into(),
            page_num: 0,
            page_size,
        }
    }
}

impl Keyable for JobSpec {
    fn key(&self) -> String {
        self.key.clone()
    }
}

impl Pageable for JobSpec {
    fn page_num(&self) -> u64 {
        self.page_num
    }

    fn set_page_num(&mut self, page_num: u64) {
        self.page_num = page_num;
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }
}

/// A bare job key, for read-only queries that never paginate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey(pub String);

impl Keyable for JobKey {
    fn key(&self) -> String {
        self.0.clone()
    }
}

impl Keyable for str {
    fn key(&self) -> String {
        self.to_string()
    }
}

/// Lifecycle of one batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Claimed by a machine and possibly in flight.
    Handling,
    /// Every item was attempted and the counts are final.
    Finished,
}

/// Audit and liveness record for one `(job, batch)`, stored in the job's task-info hash.
///
/// Only the owning machine writes it. It is never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchRecord {
    pub task_no: u64,
    pub machine_no: MachineId,
    /// Items in the batch.
    pub total: u64,
    /// Items that succeeded.
    pub finish: u64,
    pub error_total: u64,
    pub status: BatchStatus,
    /// Milliseconds since the Unix epoch.
    pub start_time: u64,
    pub finish_time: Option<u64>,
}

impl BatchRecord {
    pub fn handling(task_no: u64, machine_no: MachineId) -> Self {
        Self {
            task_no,
            machine_no,
            total: 0,
            finish: 0,
            error_total: 0,
            status: BatchStatus::Handling,
            start_time: now_ms(),
            finish_time: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == BatchStatus::Finished
    }
}

impl fmt::Display for BatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {} [{:?}] on {}: {}/{} done, {} failed",
            self.task_no, self.status, self.machine_no, self.finish, self.total, self.error_total
        )
    }
}

/// Number of batches needed for `data_total` items at `page_size` per batch.
pub fn task_total(data_total: u64, page_size: u64) -> u64 {
    data_total.div_ceil(page_size)
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
