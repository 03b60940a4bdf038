use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of the driver plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub plugin_type: String,
    pub plugin_version: String,
    pub api_versions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FsIsolation {
    None,
    Chroot,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetIsolationMode {
    Host,
    Group,
    Task,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MountConfigSupport {
    None,
    All,
}

/// Optional features supported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub send_signals: bool,
    pub exec: bool,
    pub fs_isolation: FsIsolation,
    pub net_isolation_modes: Vec<NetIsolationMode>,
    pub mount_configs: MountConfigSupport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthState {
    Undetected,
    Unhealthy,
    Healthy,
}

/// Periodic health report of the driver on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub health: HealthState,
    pub health_description: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Fingerprint {
    pub fn undetected(description: impl Into<String>) -> Self {
        Self {
            health: HealthState::Undetected,
            health_description: description.into(),
            attributes: BTreeMap::new(),
        }
    }
}
