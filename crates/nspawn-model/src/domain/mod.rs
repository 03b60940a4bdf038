mod task_id;
pub use task_id::TaskId;

mod task_config;
pub use task_config::{
    AllocatedPort, AllocatedPorts, MountConfig, NetworkIsolation, NetworkResource, Port,
    Resources, TaskConfig, TaskDir,
};

mod task_state;
pub use task_state::TaskState;

mod task_status;
pub use task_status::TaskStatus;

mod exit;
pub use exit::ExitResult;

mod exec;
pub use exec::ExecTaskResult;

mod event;
pub use event::TaskEvent;

mod oom;
pub use oom::OomEvent;

mod handle;
pub use handle::{DriverHandle, HandleError, PersistedTaskState, ReattachConfig};

mod network;
pub use network::DriverNetwork;

mod usage;
pub use usage::TaskResourceUsage;

mod plugin;
pub use plugin::{
    Capabilities, Fingerprint, FsIsolation, HealthState, MountConfigSupport, NetIsolationMode,
    PluginInfo,
};

pub(crate) mod time_serde;

/// Allocation identifier assigned by the orchestrator.
///
/// Appended to every machine name so names stay unique on the host.
pub type AllocId = String;
