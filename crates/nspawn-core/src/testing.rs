//! In-memory stand-ins for the host collaborators.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::SystemTime,
};

use async_trait::async_trait;
use nspawn_exec::{
    ExecCommand, ExecError, ExecOutput, ExecSession, ExecStream, ProcessState, SessionFactory,
    SessionRef, Signal,
};
use nspawn_model::{
    MachineConfig, NetworkResource, ReattachConfig, Resources, TaskConfig, TaskDir, TaskId,
    TaskResourceUsage,
};
use tokio::{
    sync::{mpsc, watch},
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{BuildOptions, ContainerConfig},
    image::{BuildTool, ImageError},
    machine::{
        ImageProps, MachineAddress, MachineBus, MachineError, MachineProps, PullRequest, Transfer,
    },
    netfilter::{Firewall, NetfilterError},
};

pub(crate) fn task_config(driver_config: MachineConfig) -> TaskConfig {
    TaskConfig {
        id: TaskId::from("t-1"),
        alloc_id: "a1".into(),
        name: "web".into(),
        env: BTreeMap::new(),
        resources: Resources {
            networks: vec![NetworkResource {
                ip: "10.0.0.5".into(),
                ..Default::default()
            }],
            ..Default::default()
        },
        mounts: vec![],
        network_isolation: None,
        task_dir: TaskDir::default(),
        stdout_path: "/dev/null".into(),
        stderr_path: "/dev/null".into(),
        driver_config,
    }
}

/// A valid container with no image, builds or task directories.
pub(crate) fn container() -> ContainerConfig {
    let mut task = task_config(MachineConfig::default());
    task.resources = Resources::default();
    ContainerConfig::build(&task, &BuildOptions::default()).unwrap()
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

// ---------------------------------------------------------------------------
// build tool

#[derive(Default)]
struct BuildState {
    built: Vec<String>,
    requisites: Vec<PathBuf>,
    fail: Option<String>,
}

#[derive(Clone)]
pub(crate) struct FakeBuildTool {
    pub profile: PathBuf,
    pub closure: PathBuf,
    state: Arc<Mutex<BuildState>>,
}

impl Default for FakeBuildTool {
    fn default() -> Self {
        Self {
            profile: "/nix/store/fake-profile".into(),
            closure: "/nix/store/fake-closure".into(),
            state: Default::default(),
        }
    }
}

impl FakeBuildTool {
    /// A merged profile on disk under `store` with the given top-level
    /// directories and `etc` files.
    pub fn with_profile(store: &Path, dirs: &[&str], etc: &[&str]) -> Self {
        let profile = store.join("profile");
        for d in dirs {
            std::fs::create_dir_all(profile.join(d)).unwrap();
        }
        std::fs::create_dir_all(profile.join("etc")).unwrap();
        for f in etc {
            std::fs::write(profile.join("etc").join(f), b"").unwrap();
        }
        Self {
            profile,
            closure: store.join("closure"),
            state: Default::default(),
        }
    }

    pub fn built(&self) -> Vec<String> {
        lock(&self.state).built.clone()
    }

    pub fn set_requisites(&self, paths: &[&str]) {
        lock(&self.state).requisites = paths.iter().map(PathBuf::from).collect();
    }

    pub fn fail_with(&self, stderr: &str) {
        lock(&self.state).fail = Some(stderr.to_string());
    }

    fn check(&self, command: &str) -> Result<(), ImageError> {
        match &lock(&self.state).fail {
            Some(stderr) => Err(ImageError::Command {
                command: command.to_string(),
                stderr: stderr.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BuildTool for FakeBuildTool {
    async fn build(&self, installable: &str) -> Result<PathBuf, ImageError> {
        self.check(&format!("nix build {installable}"))?;
        lock(&self.state).built.push(installable.to_string());
        if installable.ends_with(".closure") {
            Ok(self.closure.clone())
        } else {
            Ok("/nix/store/fake-toplevel".into())
        }
    }

    async fn profile_install(&self, flakes: &[String], _link: &Path) -> Result<PathBuf, ImageError> {
        self.check(&format!("nix profile install {}", flakes.join(" ")))?;
        Ok(self.profile.clone())
    }

    async fn build_closure(&self, flakes: &[String], _link: &Path) -> Result<PathBuf, ImageError> {
        self.check(&format!("nix build closure {}", flakes.join(" ")))?;
        Ok(self.closure.clone())
    }

    async fn requisites(&self, _path: &Path) -> Result<Vec<PathBuf>, ImageError> {
        Ok(lock(&self.state).requisites.clone())
    }
}

// ---------------------------------------------------------------------------
// control plane

#[derive(Default)]
struct BusState {
    machines: HashMap<String, MachineProps>,
    addresses: HashMap<String, Vec<MachineAddress>>,
    images: HashMap<String, ImageProps>,
    pulls: Vec<PullRequest>,
    fail_pull: Option<String>,
    transfer_polls: usize,
    active: HashMap<u32, usize>,
    next_id: u32,
    max_active: usize,
    listings: usize,
    describe_calls: usize,
}

#[derive(Clone, Default)]
pub(crate) struct FakeBus {
    state: Arc<Mutex<BusState>>,
}

impl FakeBus {
    pub fn add_machine(&self, props: MachineProps, addresses: Vec<MachineAddress>) {
        let mut s = lock(&self.state);
        s.addresses.insert(props.name.clone(), addresses);
        s.machines.insert(props.name.clone(), props);
    }

    pub fn add_image(&self, props: ImageProps) {
        lock(&self.state).images.insert(props.name.clone(), props);
    }

    /// Number of listings a started transfer stays visible for.
    pub fn transfer_polls(&self, n: usize) {
        lock(&self.state).transfer_polls = n;
    }

    pub fn fail_pull(&self, message: &str) {
        lock(&self.state).fail_pull = Some(message.to_string());
    }

    pub fn pulls(&self) -> Vec<PullRequest> {
        lock(&self.state).pulls.clone()
    }

    pub fn transfer_listings(&self) -> usize {
        lock(&self.state).listings
    }

    pub fn max_concurrent_pulls(&self) -> usize {
        lock(&self.state).max_active
    }

    pub fn describe_calls(&self) -> usize {
        lock(&self.state).describe_calls
    }
}

fn missing(method: &'static str, name: &str) -> MachineError {
    MachineError::Call {
        method,
        message: format!("no such object {name:?}"),
    }
}

#[async_trait]
impl MachineBus for FakeBus {
    async fn describe_machine(&self, name: &str) -> Result<MachineProps, MachineError> {
        let mut s = lock(&self.state);
        s.describe_calls += 1;
        s.machines
            .get(name)
            .cloned()
            .ok_or_else(|| missing("GetMachine", name))
    }

    async fn machine_addresses(&self, name: &str) -> Result<Vec<MachineAddress>, MachineError> {
        lock(&self.state)
            .addresses
            .get(name)
            .cloned()
            .ok_or_else(|| missing("GetMachineAddresses", name))
    }

    async fn describe_image(&self, name: &str) -> Result<ImageProps, MachineError> {
        lock(&self.state)
            .images
            .get(name)
            .cloned()
            .ok_or_else(|| missing("GetImage", name))
    }

    async fn pull_image(&self, req: &PullRequest) -> Result<u32, MachineError> {
        let mut s = lock(&self.state);
        if let Some(message) = s.fail_pull.clone() {
            return Err(MachineError::Call {
                method: "PullTar",
                message,
            });
        }
        s.pulls.push(req.clone());
        s.next_id += 1;
        let id = s.next_id;
        let polls = s.transfer_polls;
        s.active.insert(id, polls);
        s.max_active = s.max_active.max(s.active.len());
        Ok(id)
    }

    async fn list_transfers(&self) -> Result<Vec<Transfer>, MachineError> {
        let mut s = lock(&self.state);
        s.listings += 1;
        s.active.retain(|_, remaining| *remaining > 0);
        let mut out = Vec::new();
        for (id, remaining) in s.active.iter_mut() {
            *remaining -= 1;
            out.push(Transfer {
                id: *id,
                local: String::new(),
                progress: if *remaining % 2 == 0 { f64::NAN } else { 0.5 },
            });
        }
        Ok(out)
    }

    async fn systemd_version(&self) -> Result<String, MachineError> {
        Ok("252.4-1".to_string())
    }
}

// ---------------------------------------------------------------------------
// firewall

#[derive(Default)]
struct FirewallState {
    rules: Vec<Vec<String>>,
    appends: usize,
    deletes: usize,
    calls: usize,
}

#[derive(Clone, Default)]
pub(crate) struct FakeFirewall {
    state: Arc<Mutex<FirewallState>>,
}

impl FakeFirewall {
    pub fn rules(&self) -> Vec<Vec<String>> {
        lock(&self.state).rules.clone()
    }

    pub fn appends(&self) -> usize {
        lock(&self.state).appends
    }

    pub fn deletes(&self) -> usize {
        lock(&self.state).deletes
    }

    pub fn calls(&self) -> usize {
        lock(&self.state).calls
    }
}

#[async_trait]
impl Firewall for FakeFirewall {
    async fn exists(&self, _table: &str, _chain: &str, rule: &[String]) -> Result<bool, NetfilterError> {
        let mut s = lock(&self.state);
        s.calls += 1;
        Ok(s.rules.iter().any(|r| r == rule))
    }

    async fn append(&self, _table: &str, _chain: &str, rule: &[String]) -> Result<(), NetfilterError> {
        let mut s = lock(&self.state);
        s.calls += 1;
        s.appends += 1;
        s.rules.push(rule.to_vec());
        Ok(())
    }

    async fn delete(&self, _table: &str, _chain: &str, rule: &[String]) -> Result<(), NetfilterError> {
        let mut s = lock(&self.state);
        s.calls += 1;
        s.deletes += 1;
        s.rules.retain(|r| r != rule);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// execution facility

pub(crate) struct FakeSession {
    pid: u32,
    launched: Mutex<Option<ExecCommand>>,
    exit: watch::Sender<Option<ProcessState>>,
    calls: Mutex<Vec<String>>,
    exit_on_launch: Option<i32>,
    opaque: bool,
}

impl FakeSession {
    fn new(pid: u32, exit_on_launch: Option<i32>) -> Self {
        Self {
            pid,
            launched: Mutex::new(None),
            exit: watch::channel(None).0,
            calls: Mutex::new(Vec::new()),
            exit_on_launch,
            opaque: false,
        }
    }

    /// Let the supervised process exit.
    pub fn exit_with(&self, exit_code: i32, signal: i32) {
        self.exit.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(ProcessState {
                pid: self.pid,
                exit_code,
                signal,
                time: SystemTime::now(),
            });
            true
        });
    }

    pub fn command(&self) -> Option<ExecCommand> {
        lock(&self.launched).clone()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl ExecSession for FakeSession {
    async fn launch(&self, cmd: ExecCommand) -> Result<ProcessState, ExecError> {
        {
            let mut launched = lock(&self.launched);
            if launched.is_some() {
                return Err(ExecError::AlreadyLaunched);
            }
            *launched = Some(cmd);
        }
        if let Some(code) = self.exit_on_launch {
            self.exit_with(code, 0);
        }
        Ok(ProcessState {
            pid: self.pid,
            exit_code: 0,
            signal: 0,
            time: SystemTime::now(),
        })
    }

    async fn wait(&self) -> Result<ProcessState, ExecError> {
        let mut rx = self.exit.subscribe();
        let state = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ExecError::Cancelled)?;
        state.ok_or(ExecError::NotLaunched)
    }

    async fn shutdown(&self, signal: Option<Signal>, _grace: Duration) -> Result<(), ExecError> {
        self.record(format!("shutdown {}", signal.map(|s| s.as_str()).unwrap_or("-")));
        if self.exited() {
            return Err(ExecError::NotRunning(self.pid));
        }
        self.exit_with(0, signal.unwrap_or(Signal::SIGTERM) as i32);
        Ok(())
    }

    async fn signal(&self, signal: Signal) -> Result<(), ExecError> {
        self.record(format!("signal {}", signal.as_str()));
        if self.exited() {
            return Err(ExecError::NotRunning(self.pid));
        }
        Ok(())
    }

    async fn exec(&self, _deadline: Instant, program: &str, args: &[String]) -> Result<ExecOutput, ExecError> {
        self.record(format!("exec {program} {}", args.join(" ")));
        Ok(ExecOutput {
            stdout: b"hello\n".to_vec(),
            exit_code: 3,
        })
    }

    async fn exec_streaming(&self, command: &[String], _tty: bool, _stream: ExecStream) -> Result<i32, ExecError> {
        self.record(format!("stream {}", command.join(" ")));
        Ok(0)
    }

    fn stats(&self, _interval: Duration, _cancel: CancellationToken) -> mpsc::Receiver<TaskResourceUsage> {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(TaskResourceUsage {
            timestamp: SystemTime::now(),
            rss_bytes: 4096,
            cpu_user_ticks: 1,
            cpu_system_ticks: 1,
        });
        rx
    }

    fn reattach_config(&self) -> Option<ReattachConfig> {
        if self.opaque {
            return None;
        }
        lock(&self.launched)
            .as_ref()
            .map(|_| ReattachConfig { pid: self.pid })
    }

    fn exit_state(&self) -> Option<ProcessState> {
        *self.exit.borrow()
    }

    async fn kill(&self) {
        self.record("kill".to_string());
        self.exit_with(-1, Signal::SIGKILL as i32);
    }
}

#[derive(Default)]
struct SessionsState {
    created: Vec<Arc<FakeSession>>,
    exit_on_launch: Option<i32>,
    opaque: bool,
    next_pid: u32,
}

#[derive(Clone, Default)]
pub(crate) struct FakeSessions {
    state: Arc<Mutex<SessionsState>>,
}

impl FakeSessions {
    /// Sessions created from now on exit with `code` right after launch.
    pub fn exit_on_launch(&self, code: i32) {
        lock(&self.state).exit_on_launch = Some(code);
    }

    /// Sessions created from now on cannot describe how to reattach.
    pub fn opaque(&self) {
        lock(&self.state).opaque = true;
    }

    pub fn created(&self) -> Vec<Arc<FakeSession>> {
        lock(&self.state).created.clone()
    }

    pub fn last(&self) -> Arc<FakeSession> {
        lock(&self.state).created.last().cloned().unwrap()
    }
}

#[async_trait]
impl SessionFactory for FakeSessions {
    fn create(&self) -> SessionRef {
        let mut s = lock(&self.state);
        s.next_pid += 1;
        let mut session = FakeSession::new(1000 + s.next_pid, s.exit_on_launch);
        session.opaque = s.opaque;
        let session = Arc::new(session);
        s.created.push(Arc::clone(&session));
        session
    }

    async fn reattach(&self, cfg: &ReattachConfig) -> Result<SessionRef, ExecError> {
        let session = Arc::new(FakeSession::new(cfg.pid, None));
        *lock(&session.launched) = Some(ExecCommand::default());
        lock(&self.state).created.push(Arc::clone(&session));
        Ok(session)
    }
}
