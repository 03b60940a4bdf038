use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
    time::{Duration, SystemTime},
};

use nspawn_exec::SessionRef;
use nspawn_model::{ExitResult, OomEvent, TaskConfig, TaskState, TaskStatus};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{machine::MachineProps, oom::OomListener};

struct Progress {
    state: TaskState,
    completed_at: Option<SystemTime>,
    exit: Option<ExitResult>,
}

/// A live task: its machine, its execution session and its lifecycle.
pub(crate) struct TaskHandle {
    pub(crate) config: TaskConfig,
    pub(crate) machine: MachineProps,
    /// Host-side interface names of the machine.
    pub(crate) interfaces: Vec<String>,
    pub(crate) session: SessionRef,
    pub(crate) started_at: SystemTime,
    progress: Mutex<Progress>,
    exit_tx: watch::Sender<Option<ExitResult>>,
}

impl TaskHandle {
    pub(crate) fn new(
        config: TaskConfig,
        machine: MachineProps,
        interfaces: Vec<String>,
        session: SessionRef,
        started_at: SystemTime,
    ) -> Self {
        Self {
            config,
            machine,
            interfaces,
            session,
            started_at,
            progress: Mutex::new(Progress {
                state: TaskState::Running,
                completed_at: None,
                exit: None,
            }),
            exit_tx: watch::channel(None).0,
        }
    }

    fn progress(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> TaskState {
        self.progress().state
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// Network isolation is managed by the orchestrator, not by this driver.
    pub(crate) fn externally_isolated(&self) -> bool {
        self.config.network_isolation.is_some()
    }

    pub(crate) fn mark_stopping(&self) {
        let mut p = self.progress();
        if p.state == TaskState::Running {
            p.state = TaskState::Stopping;
        }
    }

    fn complete(&self, result: ExitResult) {
        {
            let mut p = self.progress();
            p.state = TaskState::Exited;
            p.completed_at = Some(SystemTime::now());
            p.exit = Some(result.clone());
        }
        self.exit_tx.send_replace(Some(result));
    }

    /// Resolves with the merged exit result once the wait loop published it.
    pub(crate) async fn exited(&self) -> ExitResult {
        let mut rx = self.exit_tx.subscribe();
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                // the handle owns the sender; unreachable while `self` lives
                return ExitResult::failed("exit result channel closed");
            }
        }
    }

    pub(crate) fn status(&self) -> TaskStatus {
        let p = self.progress();
        let mut attrs = BTreeMap::new();
        attrs.insert("machine".to_string(), self.machine.name.clone());
        attrs.insert("leader".to_string(), self.machine.leader.to_string());
        if !self.interfaces.is_empty() {
            attrs.insert("interfaces".to_string(), self.interfaces.join(","));
        }

        TaskStatus {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            state: p.state,
            started_at: self.started_at,
            completed_at: p.completed_at,
            exit_result: p.exit.clone(),
            driver_attributes: attrs,
        }
    }
}

/// Drive a task to completion: wait for the process, give a correlated OOM
/// kill `grace` to show up, deregister and publish the merged result.
///
/// Returns without publishing when `cancel` fires first.
pub(crate) async fn run_wait(
    handle: std::sync::Arc<TaskHandle>,
    oom_rx: oneshot::Receiver<OomEvent>,
    oom: OomListener,
    grace: Duration,
    cancel: CancellationToken,
) {
    let waited = tokio::select! {
        _ = cancel.cancelled() => return,
        res = handle.session.wait() => res,
    };

    let mut result = match waited {
        Ok(ps) => ExitResult::new(ps.exit_code, ps.signal),
        Err(e) => ExitResult::failed(format!("executor: error waiting on process: {e}")),
    };

    // kernel log lines may lag behind the exit notification
    let oom_event = tokio::select! {
        _ = cancel.cancelled() => return,
        res = tokio::time::timeout(grace, oom_rx) => res.ok().and_then(Result::ok),
    };
    if let Some(event) = oom_event {
        warn!(task_id = %handle.config.id, machine = %handle.machine.name, task = %event.task, pid = event.pid, "task was OOM killed");
        result = result.into_oom();
    }

    oom.deregister(&handle.machine.name).await;

    info!(task_id = %handle.config.id, exit_code = result.exit_code, signal = result.signal, oom = result.oom_killed, "task exited");
    handle.complete(result);
    debug!(task_id = %handle.config.id, "wait loop finished");
}
