use serde::{Deserialize, Serialize};

use crate::ExitResult;

/// Output of a command executed inside a running container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecTaskResult {
    /// Combined stdout and stderr of the command.
    pub stdout: Vec<u8>,
    pub exit_result: ExitResult,
}
