//! Task state machine: start, recover, wait, stop and destroy containers.

mod error;
mod exec;
mod fingerprint;
mod handle;
mod plugin;
mod start;

pub use error::DriverError;
pub use plugin::{TASK_HANDLE_VERSION, capabilities, config_schema, plugin_info, task_config_schema};

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, SystemTime},
};

use nspawn_exec::{SessionFactory, Signal, parse_signal};
use nspawn_model::{
    DriverHandle, ExitResult, TaskConfig, TaskEvent, TaskId, TaskResourceUsage, TaskStatus,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::{
    DriverConfig, DriverSettings,
    image::{BuildTool, ImageDownloader, ImageResolver},
    machine::{MachineBus, MachineClient},
    netfilter::{Firewall, configure_forwarding},
    oom::OomListener,
    state::TaskStore,
};

use handle::TaskHandle;

const EVENT_BUFFER: usize = 128;

/// Long-lived host clients the driver is composed of.
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionFactory>,
    pub build_tool: Arc<dyn BuildTool>,
    pub bus: Arc<dyn MachineBus>,
    pub firewall: Arc<dyn Firewall>,
    pub oom: OomListener,
}

/// The container driver.
///
/// Cheap to clone; all clones share the task registry, the event stream and
/// the shutdown token.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<Inner>,
}

struct Inner {
    settings: DriverSettings,
    config: RwLock<DriverConfig>,
    tasks: TaskStore<TaskHandle>,
    sessions: Arc<dyn SessionFactory>,
    resolver: ImageResolver,
    downloader: ImageDownloader,
    machines: MachineClient,
    firewall: Arc<dyn Firewall>,
    oom: OomListener,
    events: broadcast::Sender<TaskEvent>,
    cancel: CancellationToken,
}

impl Driver {
    pub fn new(settings: DriverSettings, config: DriverConfig, collab: Collaborators) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let inner = Inner {
            resolver: ImageResolver::new(collab.build_tool),
            downloader: ImageDownloader::new(Arc::clone(&collab.bus), settings.transfer_poll),
            machines: MachineClient::new(collab.bus, settings.introspection_backoff),
            settings,
            config: RwLock::new(config),
            tasks: TaskStore::new(),
            sessions: collab.sessions,
            firewall: collab.firewall,
            oom: collab.oom,
            events,
            cancel: CancellationToken::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.inner.settings
    }

    pub fn config(&self) -> DriverConfig {
        *self.inner.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_config(&self, config: DriverConfig) {
        debug!(?config, "driver config updated");
        *self.inner.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Stop background loops (wait loops, fingerprinting). Running containers
    /// are left alone.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    fn handle(&self, id: &TaskId) -> Result<Arc<TaskHandle>, DriverError> {
        self.inner
            .tasks
            .get(id)
            .ok_or_else(|| DriverError::TaskNotFound(id.clone()))
    }

    pub(crate) fn emit(&self, cfg: &TaskConfig, message: &str, annotations: BTreeMap<String, String>, err: Option<String>) {
        let event = TaskEvent {
            task_id: cfg.id.clone(),
            alloc_id: cfg.alloc_id.clone(),
            task_name: cfg.name.clone(),
            timestamp: SystemTime::now(),
            message: message.to_string(),
            annotations,
            err,
        };
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /// Stream of task events emitted from now on.
    pub fn task_events(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Resume tracking a task started by an earlier driver process.
    #[instrument(level = "debug", skip_all, fields(task_id = %handle.config.id))]
    pub async fn recover_task(&self, handle: &DriverHandle) -> Result<(), DriverError> {
        let id = &handle.config.id;
        if self.inner.tasks.contains(id) {
            return Ok(());
        }
        handle.ensure_version(TASK_HANDLE_VERSION)?;
        let state: nspawn_model::PersistedTaskState = handle.driver_state()?;

        let session = self.inner.sessions.reattach(&state.reattach).await?;
        let props = self
            .inner
            .machines
            .describe(&state.machine_name, self.inner.settings.machine_properties_timeout)
            .await
            .inspect_err(|e| error!(error = %e, "failed to get machine information"))?;

        let interfaces = self.interface_names(&props);
        let oom_rx = self.inner.oom.register(&props.name).await;

        let task = Arc::new(TaskHandle::new(
            handle.config.clone(),
            props,
            interfaces,
            session,
            state.started_at,
        ));
        if self.inner.tasks.insert_new(id.clone(), Arc::clone(&task)).is_err() {
            // recovered concurrently
            return Ok(());
        }
        self.spawn_wait(task, oom_rx);
        debug!(machine = %state.machine_name, "task recovered");
        Ok(())
    }

    fn interface_names(&self, props: &crate::machine::MachineProps) -> Vec<String> {
        if props.network_interfaces.is_empty() {
            return Vec::new();
        }
        crate::machine::interface_names(&props.network_interfaces).unwrap_or_else(|e| {
            error!(machine = %props.name, error = %e, "failed to get machine network interfaces");
            Vec::new()
        })
    }

    fn spawn_wait(&self, task: Arc<TaskHandle>, oom_rx: tokio::sync::oneshot::Receiver<nspawn_model::OomEvent>) {
        tokio::spawn(handle::run_wait(
            task,
            oom_rx,
            self.inner.oom.clone(),
            self.inner.settings.oom_grace,
            self.inner.cancel.child_token(),
        ));
    }

    /// Exit result of the task, merged with a correlated OOM kill.
    ///
    /// Every caller observes the same result.
    pub async fn wait_task(&self, id: &TaskId) -> Result<ExitResult, DriverError> {
        let task = self.handle(id)?;
        tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(DriverError::Shutdown),
            result = task.exited() => Ok(result),
        }
    }

    /// Remove forwarding rules, then ask the supervisor to shut down with
    /// `signal` and `timeout` of grace.
    #[instrument(level = "debug", skip(self))]
    pub async fn stop_task(&self, id: &TaskId, timeout: Duration, signal: &str) -> Result<(), DriverError> {
        let task = self.handle(id)?;

        let host_managed = task.interfaces.first().is_some_and(|i| i.starts_with("vz-"));
        if !task.externally_isolated() && !task.interfaces.is_empty() && !host_managed {
            if let Err(e) = configure_forwarding(self.inner.firewall.as_ref(), true, &task.interfaces).await {
                error!(error = %e, "failed to remove forwarding rules");
            }
        }

        task.mark_stopping();
        let sig = (!signal.is_empty()).then(|| self.lookup_signal(id, signal));
        if let Err(e) = task.session.shutdown(sig, timeout).await {
            if task.session.exited() {
                return Ok(());
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop a task. A running task is only destroyed with `force`, which kills it.
    #[instrument(level = "debug", skip(self))]
    pub async fn destroy_task(&self, id: &TaskId, force: bool) -> Result<(), DriverError> {
        let task = self.handle(id)?;
        if task.is_running() && !task.session.exited() && !force {
            return Err(DriverError::TaskRunning(id.clone()));
        }
        if !task.session.exited() {
            task.session.kill().await;
        }
        self.inner.tasks.remove(id);
        Ok(())
    }

    pub fn inspect_task(&self, id: &TaskId) -> Result<TaskStatus, DriverError> {
        Ok(self.handle(id)?.status())
    }

    /// Resource samples every `interval` until the task exits or `cancel` fires.
    pub fn task_stats(
        &self,
        id: &TaskId,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<TaskResourceUsage>, DriverError> {
        let task = self.handle(id)?;
        Ok(task.session.stats(interval, cancel))
    }

    pub async fn signal_task(&self, id: &TaskId, signal: &str) -> Result<(), DriverError> {
        let task = self.handle(id)?;
        let sig = self.lookup_signal(id, signal);
        task.session.signal(sig).await?;
        Ok(())
    }

    fn lookup_signal(&self, id: &TaskId, name: &str) -> Signal {
        parse_signal(name).unwrap_or_else(|| {
            warn!(task_id = %id, signal = name, "unknown signal to send to task, using SIGINT instead");
            Signal::SIGINT
        })
    }
}
