use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::SystemTime};

use crate::{ExitResult, TaskId, TaskState, domain::time_serde};

/// Read-only projection of a task handle, returned by `inspect_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Task identifier.
    pub id: TaskId,
    /// Task name.
    pub name: String,
    /// Current lifecycle state.
    pub state: TaskState,
    /// When the supervisor was launched.
    #[serde(with = "time_serde")]
    pub started_at: SystemTime,
    /// When the supervisor exited (terminal states only).
    #[serde(
        default,
        with = "time_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<SystemTime>,
    /// Final exit result (terminal states only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_result: Option<ExitResult>,
    /// Driver specific facts: machine name, leader PID, interfaces.
    #[serde(default)]
    pub driver_attributes: BTreeMap<String, String>,
}
