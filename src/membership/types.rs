use crate::cache::Cache;
use crate::error::Result;
use crate::keys::MACHINE_NO;

use serde::{Deserialize, Serialize};
use std::fmt;

const MACHINE_PREFIX: &str = "machine00";

/// Cluster-unique identity of one running process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MachineId(pub String);

impl MachineId {
    /// Draws the next machine number from the shared counter.
    ///
    /// Call once per process and keep the result; every call allocates a new number.
    pub async fn register(cache: &Cache) -> Result<Self> {
        let number = cache.increment_and_get(MACHINE_NO, 1).await?;
        let id = Self(format!("{MACHINE_PREFIX}{number}"));
        tracing::info!("Application unique key generated: {}", id);
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MachineId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Heartbeat entry in the shared machine registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineRecord {
    pub machine_no: MachineId,
    /// Milliseconds since the Unix epoch.
    pub last_heartbeat_time: u64,
}

impl MachineRecord {
    pub fn new(machine_no: MachineId, last_heartbeat_time: u64) -> Self {
        Self {
            machine_no,
            last_heartbeat_time,
        }
    }
}
