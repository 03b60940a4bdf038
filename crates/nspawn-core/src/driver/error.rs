use nspawn_exec::ExecError;
use nspawn_model::{HandleError, TaskId};
use thiserror::Error;

use crate::{
    config::ConfigError, image::ImageError, machine::MachineError, netfilter::NetfilterError,
};

#[derive(Debug, Error)]
pub enum DriverError {
    /// The task never existed or was already destroyed.
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    #[error("task with ID {0:?} already started")]
    TaskExists(TaskId),
    #[error("cannot destroy running task {0}")]
    TaskRunning(TaskId),
    #[error("cmd must have at least one value")]
    EmptyCommand,
    #[error("failed to validate task config: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Machine(#[from] MachineError),
    #[error(transparent)]
    Netfilter(#[from] NetfilterError),
    #[error("executor: {0}")]
    Exec(#[from] ExecError),
    #[error("systemd-nspawn failed to start task")]
    SupervisorFailed,
    #[error("invalid task handle: {0}")]
    Handle(#[from] HandleError),
    #[error("failed to read environment of process {pid}: {source}")]
    Environ {
        pid: u32,
        #[source]
        source: procfs::ProcError,
    },
    #[error("driver is shutting down")]
    Shutdown,
}

impl DriverError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::TaskNotFound(_))
    }
}
