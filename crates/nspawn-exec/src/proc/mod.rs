//! Local execution facility: sessions backed by `tokio::process` children of
//! the driver itself.
//!
//! A launched process is reaped by a background task that publishes its exit
//! state on a watch channel. A reattached process is no longer our child, so
//! its exit is detected by polling and its status is reported as unknown.

use std::{
    os::unix::process::ExitStatusExt,
    path::Path,
    process::Stdio,
    sync::{Arc, OnceLock},
    time::SystemTime,
};

use async_trait::async_trait;
use nix::sys::signal::Signal;
use nspawn_model::{ReattachConfig, TaskResourceUsage};
use tokio::{
    sync::{mpsc, watch},
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    error::ExecError,
    session::{
        ExecCommand, ExecOutput, ExecSession, ExecStream, ProcessState, SessionFactory, SessionRef,
    },
    stats::spawn_sampler,
    util::{cmd_program, is_alive, send_signal},
};

const REATTACH_POLL: Duration = Duration::from_millis(500);

/// Hands out [`LocalSession`]s.
#[derive(Debug, Default, Clone)]
pub struct LocalSessionFactory;

impl LocalSessionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionFactory for LocalSessionFactory {
    fn create(&self) -> SessionRef {
        Arc::new(LocalSession::new())
    }

    async fn reattach(&self, cfg: &ReattachConfig) -> Result<SessionRef, ExecError> {
        if !is_alive(cfg.pid) {
            return Err(ExecError::NotRunning(cfg.pid));
        }
        debug!(target: "nspawn.exec.proc", pid = cfg.pid, "reattached to process");
        Ok(Arc::new(LocalSession::reattached(cfg.pid)))
    }
}

/// One supervised process.
pub struct LocalSession {
    pid: OnceLock<u32>,
    exit: Arc<watch::Sender<Option<ProcessState>>>,
}

impl LocalSession {
    pub fn new() -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            pid: OnceLock::new(),
            exit: Arc::new(exit),
        }
    }

    fn reattached(pid: u32) -> Self {
        let session = Self::new();
        let _ = session.pid.set(pid);

        let exit = Arc::clone(&session.exit);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(REATTACH_POLL).await;
                if !is_alive(pid) {
                    debug!(target: "nspawn.exec.proc", pid, "reattached process is gone");
                    exit.send_replace(Some(ProcessState {
                        pid,
                        exit_code: -1,
                        signal: 0,
                        time: SystemTime::now(),
                    }));
                    break;
                }
            }
        });
        session
    }

    fn pid(&self) -> Result<u32, ExecError> {
        self.pid.get().copied().ok_or(ExecError::NotLaunched)
    }
}

impl Default for LocalSession {
    fn default() -> Self {
        Self::new()
    }
}

async fn open_log(path: &Path) -> Result<Stdio, ExecError> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(Stdio::from(file.into_std().await))
}

#[async_trait]
impl ExecSession for LocalSession {
    async fn launch(&self, cmd: ExecCommand) -> Result<ProcessState, ExecError> {
        if self.pid.get().is_some() {
            return Err(ExecError::AlreadyLaunched);
        }
        if cmd.program.is_empty() {
            return Err(ExecError::MissingProgram);
        }

        let mut command = cmd_program(&cmd.program, &cmd.args);
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }
        for (k, v) in &cmd.env {
            command.env(k, v);
        }
        command
            .stdin(Stdio::null())
            .stdout(open_log(&cmd.stdout_path).await?)
            .stderr(open_log(&cmd.stderr_path).await?);

        trace!(target: "nspawn.exec.proc", program = %cmd.program, args = ?cmd.args, "spawn");
        let mut child = command
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", cmd.program)))?;
        let pid = child
            .id()
            .ok_or_else(|| ExecError::Spawn("process exited before its pid was read".into()))?;
        self.pid.set(pid).map_err(|_| ExecError::AlreadyLaunched)?;

        let exit = Arc::clone(&self.exit);
        tokio::spawn(async move {
            let state = match child.wait().await {
                Ok(status) => {
                    let signal = status.signal().unwrap_or(0);
                    ProcessState {
                        pid,
                        exit_code: status.code().unwrap_or(128 + signal),
                        signal,
                        time: SystemTime::now(),
                    }
                }
                Err(e) => {
                    warn!(target: "nspawn.exec.proc", pid, error = %e, "waiting on child failed");
                    ProcessState {
                        pid,
                        exit_code: -1,
                        signal: 0,
                        time: SystemTime::now(),
                    }
                }
            };
            debug!(target: "nspawn.exec.proc", pid, code = state.exit_code, signal = state.signal, "process exited");
            exit.send_replace(Some(state));
        });

        Ok(ProcessState {
            pid,
            exit_code: 0,
            signal: 0,
            time: SystemTime::now(),
        })
    }

    async fn wait(&self) -> Result<ProcessState, ExecError> {
        self.pid()?;
        let mut rx = self.exit.subscribe();
        let state = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ExecError::Cancelled)?;
        (*state).ok_or(ExecError::NotLaunched)
    }

    async fn shutdown(&self, signal: Option<Signal>, grace: Duration) -> Result<(), ExecError> {
        let pid = self.pid()?;
        if self.exited() {
            return Ok(());
        }
        if grace.is_zero() && signal.is_none() {
            self.kill().await;
            return Ok(());
        }

        let signal = signal.unwrap_or(Signal::SIGTERM);
        debug!(target: "nspawn.exec.proc", pid, %signal, ?grace, "shutting down");
        send_signal(pid, signal)?;

        if tokio::time::timeout(grace, self.wait()).await.is_err() {
            warn!(target: "nspawn.exec.proc", pid, "grace period exceeded; killing process");
            self.kill().await;
        }
        Ok(())
    }

    async fn signal(&self, signal: Signal) -> Result<(), ExecError> {
        let pid = self.pid()?;
        if self.exited() {
            return Err(ExecError::NotRunning(pid));
        }
        send_signal(pid, signal)?;
        Ok(())
    }

    async fn exec(
        &self,
        deadline: Instant,
        program: &str,
        args: &[String],
    ) -> Result<ExecOutput, ExecError> {
        if program.is_empty() {
            return Err(ExecError::MissingProgram);
        }
        let mut cmd = cmd_program(program, args);
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        let output = tokio::time::timeout_at(deadline, cmd.output())
            .await
            .map_err(|_| ExecError::Timeout)?
            .map_err(|e| ExecError::Spawn(format!("{program}: {e}")))?;

        let mut stdout = output.stdout;
        stdout.extend_from_slice(&output.stderr);
        Ok(ExecOutput {
            stdout,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn exec_streaming(
        &self,
        command: &[String],
        tty: bool,
        stream: ExecStream,
    ) -> Result<i32, ExecError> {
        let (program, args) = command.split_first().ok_or(ExecError::MissingProgram)?;
        if tty {
            debug!(target: "nspawn.exec.proc", "tty requested; streaming without a pseudo terminal");
        }

        let mut child = cmd_program(program, args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{program}: {e}")))?;

        let missing = || ExecError::Io("child stdio was not captured".into());
        let mut child_stdin = child.stdin.take().ok_or_else(missing)?;
        let mut child_stdout = child.stdout.take().ok_or_else(missing)?;
        let mut child_stderr = child.stderr.take().ok_or_else(missing)?;

        let ExecStream {
            stdin: mut input,
            stdout: mut out,
            stderr: mut err,
        } = stream;

        // Caller input may never end; the feeder is dropped once the child exits.
        let feeder = tokio::spawn(async move {
            let _ = tokio::io::copy(&mut input, &mut child_stdin).await;
        });

        let (o, e) = tokio::join!(
            tokio::io::copy(&mut child_stdout, &mut out),
            tokio::io::copy(&mut child_stderr, &mut err),
        );
        o?;
        e?;

        let status = child.wait().await?;
        feeder.abort();
        Ok(status.code().unwrap_or(-1))
    }

    fn stats(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<TaskResourceUsage> {
        match self.pid.get() {
            Some(pid) => spawn_sampler(*pid, interval, cancel),
            None => mpsc::channel(1).1,
        }
    }

    fn reattach_config(&self) -> Option<ReattachConfig> {
        self.pid.get().map(|pid| ReattachConfig { pid: *pid })
    }

    fn exit_state(&self) -> Option<ProcessState> {
        *self.exit.borrow()
    }

    async fn kill(&self) {
        let Some(pid) = self.pid.get().copied() else {
            return;
        };
        if self.exited() {
            return;
        }
        if let Err(e) = send_signal(pid, Signal::SIGKILL) {
            debug!(target: "nspawn.exec.proc", pid, error = %e, "kill failed");
        }
    }
}
