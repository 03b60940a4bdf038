use serde::{Deserialize, Serialize};

/// Lifecycle state of a task handle.
///
/// `Running -> (Stopping) -> Exited`. A task is registered once its
/// supervisor runs; a destroyed task is simply removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    /// Supervisor process is running.
    Running,
    /// Graceful shutdown was requested.
    Stopping,
    /// Supervisor process exited; the exit result is final.
    Exited,
}

impl TaskState {
    /// Returns `true` if the task will not transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Exited)
    }

    /// Returns `true` while the supervisor process may still be alive.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Running | TaskState::Stopping)
    }
}
