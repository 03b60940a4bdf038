use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("missing program")]
    MissingProgram,
    #[error("session has no launched process")]
    NotLaunched,
    #[error("session already launched a process")]
    AlreadyLaunched,
    #[error("process {0} is not running")]
    NotRunning(u32),
    #[error("failed to deliver signal: {0}")]
    Signal(String),
    #[error("deadline exceeded")]
    Timeout,
    #[error("io error: {0}")]
    Io(String),
    #[error("cancelled")]
    Cancelled,
}

pub type ExecResult<T> = Result<T, ExecError>;

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

impl From<nix::errno::Errno> for ExecError {
    fn from(e: nix::errno::Errno) -> Self {
        ExecError::Signal(e.to_string())
    }
}
