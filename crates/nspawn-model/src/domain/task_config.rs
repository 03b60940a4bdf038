use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{AllocId, MachineConfig, TaskId};

/// Caller-supplied description of a task.
///
/// Immutable once accepted: the driver owns it for the whole lifetime of the task
/// and only ever derives new values from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Task identifier, unique per driver instance.
    pub id: TaskId,
    /// Allocation the task belongs to.
    pub alloc_id: AllocId,
    /// Human readable task name (used to derive the machine name).
    pub name: String,
    /// Environment prepared by the orchestrator.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Resources granted to the task.
    #[serde(default)]
    pub resources: Resources,
    /// Host volumes requested by the task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountConfig>,
    /// Externally managed network namespace, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_isolation: Option<NetworkIsolation>,
    /// Directories prepared for the task on the host.
    pub task_dir: TaskDir,
    /// Where the supervisor's stdout is written.
    pub stdout_path: PathBuf,
    /// Where the supervisor's stderr is written.
    pub stderr_path: PathBuf,
    /// Container specific configuration block.
    #[serde(default)]
    pub driver_config: MachineConfig,
}

/// Host directories prepared for a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDir {
    /// Task root directory; build links and the container root live here.
    pub dir: PathBuf,
    /// Directory shared by all tasks of the allocation.
    pub shared_alloc_dir: PathBuf,
    /// Task local directory.
    pub local_dir: PathBuf,
    /// Task secrets directory.
    pub secrets_dir: PathBuf,
    /// Directory holding the task's log files.
    pub log_dir: PathBuf,
}

/// Resources granted to the task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    /// Requested memory in MiB.
    #[serde(default)]
    pub memory_mb: u64,
    /// Optional memory ceiling in MiB, `0` when unset.
    #[serde(default)]
    pub memory_max_mb: u64,
    /// Networks allocated to the task (used by the legacy `port_map`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkResource>,
    /// Allocated ports (used by `ports`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<AllocatedPorts>,
}

/// A network allocated to the task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkResource {
    pub ip: String,
    #[serde(default)]
    pub reserved_ports: Vec<Port>,
    #[serde(default)]
    pub dynamic_ports: Vec<Port>,
}

/// A labelled port of a network allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub label: String,
    pub value: u16,
    #[serde(default)]
    pub to: u16,
}

/// A port from the allocation's port set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedPort {
    pub label: String,
    /// Host port.
    pub value: u16,
    /// Port inside the container, `0` means "same as `value`".
    #[serde(default)]
    pub to: u16,
    #[serde(default)]
    pub host_ip: String,
}

/// The allocation's port set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocatedPorts(pub Vec<AllocatedPort>);

impl AllocatedPorts {
    /// Look up a port by label.
    pub fn get(&self, label: &str) -> Option<&AllocatedPort> {
        self.0.iter().find(|p| p.label == label)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A host volume mounted into the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountConfig {
    pub task_path: String,
    pub host_path: String,
    #[serde(default)]
    pub readonly: bool,
}

/// Network namespace managed outside of the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIsolation {
    /// Path of the namespace handle, e.g. `/var/run/netns/<id>`.
    pub path: PathBuf,
}
