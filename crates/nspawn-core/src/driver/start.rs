use std::{collections::BTreeMap, path::Path, sync::Arc, time::SystemTime};

use nspawn_exec::{ExecCommand, SessionRef};
use nspawn_model::{DriverHandle, DriverNetwork, PersistedTaskState, TaskConfig};
use tracing::{debug, error, info, instrument};

use crate::{
    config::{BuildOptions, ContainerConfig},
    driver::{Driver, DriverError, TASK_HANDLE_VERSION, handle::TaskHandle},
    image::resolve_image_path,
    machine::MachineProps,
    netfilter::configure_forwarding,
};

impl Driver {
    /// Build, launch and register a container for `cfg`.
    ///
    /// Any failure after the supervisor was spawned shuts it down before the
    /// error is returned.
    #[instrument(level = "info", skip_all, fields(task_id = %cfg.id, name = %cfg.name))]
    pub async fn start_task(&self, cfg: &TaskConfig) -> Result<(DriverHandle, DriverNetwork), DriverError> {
        if self.inner.tasks.contains(&cfg.id) {
            return Err(DriverError::TaskExists(cfg.id.clone()));
        }

        let mut container = self.container_config(cfg).await?;
        let args = container.args();
        debug!(machine = %container.machine, ?args, "starting nspawn task");

        // registered before launch so a kill logged during introspection is kept
        let oom_rx = self.inner.oom.register(&container.machine).await;

        let session = self.inner.sessions.create();
        let launched = session
            .launch(ExecCommand {
                program: self.inner.settings.supervisor_binary.clone(),
                args,
                env: Vec::new(),
                cwd: None,
                stdout_path: cfg.stdout_path.clone(),
                stderr_path: cfg.stderr_path.clone(),
            })
            .await;
        if let Err(e) = launched {
            self.inner.oom.deregister(&container.machine).await;
            return Err(e.into());
        }

        let (props, ip) = match self.introspect(cfg, &container.machine).await {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "failed to get machine information");
                let err = match session.exit_state() {
                    Some(ps) if ps.exit_code != 0 => {
                        self.report_supervisor_failure(cfg).await;
                        DriverError::SupervisorFailed
                    }
                    _ => e,
                };
                self.unwind(&container.machine, &[], &session).await;
                return Err(err);
            }
        };
        debug!(name = %props.name, leader = props.leader, "gathered information about new machine");

        let interfaces = self.interface_names(&props);
        let mut forwarded: &[String] = &[];
        if cfg.network_isolation.is_none() && !props.network_interfaces.is_empty() {
            match configure_forwarding(self.inner.firewall.as_ref(), false, &interfaces).await {
                Ok(()) => forwarded = &interfaces,
                Err(e) => error!(error = %e, "failed to set up forwarding rules"),
            }
        }

        let started_at = SystemTime::now();
        let mut handle = DriverHandle::new(TASK_HANDLE_VERSION, cfg.clone());
        let persisted = session.reattach_config().map(|reattach| PersistedTaskState {
            reattach,
            machine_name: container.machine.clone(),
            started_at,
        });
        let stored = match persisted {
            Some(state) => handle.set_driver_state(&state).map_err(DriverError::from),
            None => Err(DriverError::Exec(nspawn_exec::ExecError::NotLaunched)),
        };
        if let Err(e) = stored {
            error!(error = %e, "failed to start task, error setting driver state");
            self.unwind(&container.machine, forwarded, &session).await;
            return Err(e);
        }

        let task = Arc::new(TaskHandle::new(
            cfg.clone(),
            props,
            interfaces.clone(),
            session,
            started_at,
        ));
        if let Err(task) = self.inner.tasks.insert_new(cfg.id.clone(), Arc::clone(&task)) {
            self.unwind(&container.machine, forwarded, &task.session).await;
            return Err(DriverError::TaskExists(cfg.id.clone()));
        }
        self.spawn_wait(task, oom_rx);

        let network = DriverNetwork {
            port_map: std::mem::take(&mut container.port_map),
            ip,
            auto_advertise: false,
        };
        info!(machine = %container.machine, ip = %network.ip, "task started");
        Ok((handle, network))
    }

    /// Everything up to the argument vector: validation, builds, downloads
    /// and image lookup.
    async fn container_config(&self, cfg: &TaskConfig) -> Result<ContainerConfig, DriverError> {
        let opts = BuildOptions {
            volumes: self.config().volumes,
            name_prefix_len: self.inner.settings.name_prefix_len,
        };
        let mut container = ContainerConfig::build(cfg, &opts)?;

        if let Some(flake) = &container.nixos {
            let annotations = BTreeMap::from([("nixos".to_string(), flake.clone())]);
            self.emit(cfg, "Building NixOS", annotations, None);
        } else if !container.packages.is_empty() {
            let annotations = BTreeMap::from([("packages".to_string(), container.packages.join(" "))]);
            self.emit(cfg, "Building Nix Packages", annotations, None);
        }
        self.inner
            .resolver
            .prepare(&mut container, &cfg.task_dir.dir)
            .await?;

        if let Some(download) = container.image_download.clone() {
            let image = container.image.clone().unwrap_or_default();
            let annotations = BTreeMap::from([
                ("image".to_string(), image.clone()),
                ("url".to_string(), download.url.clone()),
            ]);
            self.emit(cfg, "Downloading image", annotations, None);
            self.inner.downloader.pull(&image, &download).await?;
        }

        if let Some(image) = &container.image {
            let path = resolve_image_path(image, self.inner.machines.bus().as_ref()).await?;
            container.image_path = Some(path);
        }
        Ok(container)
    }

    /// Machine properties and, for machines with links, the address to advertise.
    async fn introspect(&self, cfg: &TaskConfig, machine: &str) -> Result<(MachineProps, String), DriverError> {
        let settings = &self.inner.settings;
        let props = self
            .inner
            .machines
            .describe(machine, settings.machine_properties_timeout)
            .await?;

        let ip = if !props.network_interfaces.is_empty() {
            let addr = self
                .inner
                .machines
                .address(machine, settings.machine_address_timeout)
                .await?;
            debug!(name = %props.name, ip = %addr, "gathered address of new machine");
            addr.to_string()
        } else {
            cfg.resources
                .networks
                .first()
                .map(|n| n.ip.clone())
                .unwrap_or_default()
        };
        Ok((props, ip))
    }

    /// Undo a partial start: OOM registration, forwarding rules, then the session.
    async fn unwind(&self, machine: &str, forwarded: &[String], session: &SessionRef) {
        self.inner.oom.deregister(machine).await;
        if !forwarded.is_empty() {
            if let Err(e) = configure_forwarding(self.inner.firewall.as_ref(), true, forwarded).await {
                error!(error = %e, "failed to remove forwarding rules");
            }
        }
        abandon(session).await;
    }

    /// Surface the last line of each of the task's log files as an event.
    async fn report_supervisor_failure(&self, cfg: &TaskConfig) {
        for (file, line) in last_log_lines(&cfg.task_dir.log_dir, &cfg.name).await {
            error!(file = %file, out = %line, "systemd-nspawn failed");
            self.emit(cfg, &line, BTreeMap::new(), Some("Systemd-Nspawn failed".to_string()));
        }
    }
}

/// Shut down a session whose task never made it into the registry.
async fn abandon(session: &SessionRef) {
    if session.exited() {
        return;
    }
    if let Err(e) = session.shutdown(None, std::time::Duration::ZERO).await {
        error!(error = %e, "destroying executor failed");
    }
    session.kill().await;
}

/// `(file name, last non-empty line)` of every file in `dir` named `<prefix>*`.
pub(crate) async fn last_log_lines(dir: &Path, prefix: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "error finding log files");
            return out;
        }
    };

    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix) {
            files.push((name, entry.path()));
        }
    }
    files.sort();

    for (name, path) in files {
        let Ok(raw) = tokio::fs::read(&path).await else {
            continue;
        };
        let text = String::from_utf8_lossy(&raw);
        if let Some(last) = text.trim_matches('\n').lines().last().filter(|l| !l.is_empty()) {
            out.push((name, last.to_string()));
        }
    }
    out
}
