use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::domain::time_serde;

/// One resource usage sample of the supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResourceUsage {
    #[serde(with = "time_serde")]
    pub timestamp: SystemTime,
    /// Resident set size in bytes.
    pub rss_bytes: u64,
    /// User CPU time in clock ticks.
    pub cpu_user_ticks: u64,
    /// System CPU time in clock ticks.
    pub cpu_system_ticks: u64,
}
