use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::SystemTime};

use crate::{TaskId, domain::time_serde};

/// Progress notification published on the driver's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub alloc_id: String,
    pub task_name: String,
    #[serde(with = "time_serde")]
    pub timestamp: SystemTime,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}
