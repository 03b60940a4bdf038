use thiserror::Error;

/// Failures talking to the machine and import managers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MachineError {
    #[error("failed to connect to the system bus: {0}")]
    Connect(String),
    #[error("bus call {method} failed: {message}")]
    Call {
        method: &'static str,
        message: String,
    },
    #[error("missing or mistyped property {0}")]
    Property(&'static str),
    #[error("timed out while getting {0}")]
    Timeout(&'static str),
    #[error("machine has no network interfaces assigned")]
    NoInterfaces,
    #[error("no network interface with index {0}")]
    Interface(i32),
    #[error("bus worker failed: {0}")]
    Worker(String),
}
