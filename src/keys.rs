//! Cache key naming.
//!
//! Every machine derives the same coordinates from the job key and batch number, so no
//! registry is needed. The layout must stay byte-compatible with other implementations
//! sharing the cache: `<prefix><category><job-key>[:<batch>]`.

use crate::executor::types::Keyable;

pub const DEFAULT_PREFIX: &str = "reconciliation:";

/// Counter used to hand out machine numbers. Not namespaced by the prefix.
pub const MACHINE_NO: &str = "payment:reconciliation:machine:no";

const SEPARATOR: &str = ":";
const LOCK_PREFIX: &str = "lock:";
const DATA_TOTAL: &str = "data:total:";
const TASK_TOTAL: &str = "task:total:";
const TASK_NO: &str = "task:no:";
const STOP_FLAG: &str = "stop:flag:";
const NORMAL_INDEX_SET: &str = "set:normal:index:";
const ERROR_INDEX_SET: &str = "set:error:index:";
const TASK_INFO_MAP: &str = "map:task:info:";
const MACHINE_INFO_MAP: &str = "map:machine:info:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskKeys {
    prefix: String,
}

impl Default for TaskKeys {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl TaskKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn job(&self, category: &str, job: &(impl Keyable + ?Sized)) -> String {
        format!("{}{}{}", self.prefix, category, job.key())
    }

    pub fn data_total(&self, job: &(impl Keyable + ?Sized)) -> String {
        self.job(DATA_TOTAL, job)
    }

    pub fn task_total(&self, job: &(impl Keyable + ?Sized)) -> String {
        self.job(TASK_TOTAL, job)
    }

    pub fn task_no(&self, job: &(impl Keyable + ?Sized)) -> String {
        self.job(TASK_NO, job)
    }

    pub fn stop_flag(&self, job: &(impl Keyable + ?Sized)) -> String {
        self.job(STOP_FLAG, job)
    }

    /// Ordinals that completed successfully in batch `task_no`.
    pub fn normal_index_set(&self, job: &(impl Keyable + ?Sized), task_no: u64) -> String {
        format!("{}{SEPARATOR}{task_no}", self.job(NORMAL_INDEX_SET, job))
    }

    /// Ordinals whose handler failed in batch `task_no`.
    pub fn error_index_set(&self, job: &(impl Keyable + ?Sized), task_no: u64) -> String {
        format!("{}{SEPARATOR}{task_no}", self.job(ERROR_INDEX_SET, job))
    }

    pub fn task_info_map(&self, job: &(impl Keyable + ?Sized)) -> String {
        self.job(TASK_INFO_MAP, job)
    }

    pub fn machine_info_map(&self) -> String {
        format!("{}{MACHINE_INFO_MAP}", self.prefix)
    }

    /// `<prefix>lock:` followed by the present components joined with `:`.
    ///
    /// A missing component contributes nothing, but a separator is still written after every
    /// present component that is not last, so `[a, None]` yields `a:`.
    pub fn lock_key(&self, components: &[Option<&str>]) -> String {
        let mut key = format!("{}{LOCK_PREFIX}", self.prefix);
        let last = components.len().saturating_sub(1);
        for (i, component) in components.iter().enumerate() {
            if let Some(component) = component {
                key.push_str(component);
                if i < last {
                    key.push_str(SEPARATOR);
                }
            }
        }
        key
    }

    /// Lock serializing batch-number decisions for one job.
    pub fn job_lock(&self, job: &(impl Keyable + ?Sized)) -> String {
        self.lock_key(&[Some(job.key().as_str())])
    }

    /// Lock guarding the one-time data/task total computation for one job.
    pub fn total_lock(&self, job: &(impl Keyable + ?Sized)) -> String {
        self.lock_key(&[Some(job.key().as_str()), Some("total")])
    }
}
