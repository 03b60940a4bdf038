//! The execution facility seen by the driver.
//!
//! A [`SessionFactory`] hands out [`ExecSession`]s; one session owns exactly one
//! supervised process for its whole life, can be persisted through its
//! [`ReattachConfig`] and resumed by a later driver process.

use std::{path::PathBuf, sync::Arc, time::SystemTime};

use async_trait::async_trait;
use nix::sys::signal::Signal;
use nspawn_model::{ReattachConfig, TaskResourceUsage};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;

pub type SessionRef = Arc<dyn ExecSession>;

/// Process to launch inside a session.
#[derive(Clone, Debug, Default)]
pub struct ExecCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// File receiving the process' stdout (appended).
    pub stdout_path: PathBuf,
    /// File receiving the process' stderr (appended).
    pub stderr_path: PathBuf,
}

/// Snapshot of the supervised process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessState {
    pub pid: u32,
    /// Exit code; `-1` when the status could not be observed.
    pub exit_code: i32,
    /// Terminating signal number, `0` if the process exited normally.
    pub signal: i32,
    pub time: SystemTime,
}

/// Output of a one-shot exec.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub exit_code: i32,
}

/// Byte streams bridged to an interactive exec.
pub struct ExecStream {
    pub stdin: Box<dyn AsyncRead + Send + Unpin>,
    pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
    pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
}

#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    /// Create a fresh session with no process.
    fn create(&self) -> SessionRef;

    /// Resume a session persisted by an earlier driver process.
    async fn reattach(&self, cfg: &ReattachConfig) -> Result<SessionRef, ExecError>;
}

#[async_trait]
pub trait ExecSession: Send + Sync + 'static {
    /// Start the supervised process.
    async fn launch(&self, cmd: ExecCommand) -> Result<ProcessState, ExecError>;

    /// Block until the supervised process exits.
    async fn wait(&self) -> Result<ProcessState, ExecError>;

    /// Deliver `signal` (SIGTERM if `None`), give the process `grace` to exit,
    /// then kill it.
    async fn shutdown(&self, signal: Option<Signal>, grace: Duration) -> Result<(), ExecError>;

    async fn signal(&self, signal: Signal) -> Result<(), ExecError>;

    /// Run a helper command to completion, killing it at `deadline`.
    async fn exec(
        &self,
        deadline: Instant,
        program: &str,
        args: &[String],
    ) -> Result<ExecOutput, ExecError>;

    /// Run a helper command with its stdio bridged to `stream`; returns the exit code.
    async fn exec_streaming(
        &self,
        command: &[String],
        tty: bool,
        stream: ExecStream,
    ) -> Result<i32, ExecError>;

    /// Periodic resource samples until the process exits or `cancel` fires.
    fn stats(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<TaskResourceUsage>;

    /// Descriptor needed to resume this session, once a process is launched.
    fn reattach_config(&self) -> Option<ReattachConfig>;

    /// Exit state of the process if it already terminated.
    fn exit_state(&self) -> Option<ProcessState>;

    fn exited(&self) -> bool {
        self.exit_state().is_some()
    }

    /// Forcefully terminate the session's process.
    async fn kill(&self);
}
