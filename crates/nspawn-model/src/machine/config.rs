use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Container configuration block of a task, as written by the user.
///
/// Values are kept as declared; validation and normalisation into a
/// launchable configuration happen in the driver. Maps are ordered so that
/// everything derived from them is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Host path -> container path, read-write.
    pub bind: BTreeMap<String, String>,
    /// Host path -> container path, read-only.
    pub bind_read_only: BTreeMap<String, String>,
    /// Run an init system inside the container.
    pub boot: bool,
    /// Extra capabilities granted to the container.
    pub capability: Vec<String>,
    /// Command line executed in the container.
    pub command: Vec<String>,
    /// Console mode: `interactive`, `read-only`, `passive` or `pipe`.
    pub console: Option<String>,
    /// Environment passed into the container.
    pub environment: BTreeMap<String, String>,
    /// Run on a throw-away snapshot of the image.
    pub ephemeral: bool,
    /// Image name or path (directory or raw disk image).
    pub image: Option<String>,
    /// Download the image before starting.
    pub image_download: Option<ImageDownload>,
    /// Create a virtual ethernet link between host and container.
    pub network_veth: bool,
    /// Network zone the container joins.
    pub network_zone: Option<String>,
    /// `new-root[:old-root]` pivot inside the container.
    pub pivot_root: Option<String>,
    /// Deprecated label -> container port map.
    pub port_map: BTreeMap<String, u16>,
    /// Port labels to expose from the allocation's port set.
    pub ports: Vec<String>,
    /// Run the command as PID 2 with a stub init as PID 1.
    pub process_two: bool,
    /// Extra unit properties of the container scope.
    pub properties: BTreeMap<String, String>,
    /// Mount the root file system read-only.
    pub read_only: bool,
    /// resolv.conf handling policy.
    pub resolv_conf: Option<String>,
    /// User to run the command as.
    pub user: Option<String>,
    /// Enable user namespacing.
    pub user_namespacing: bool,
    /// Volatile mode: `yes`, `no`, `state` or `overlay`.
    pub volatile: Option<String>,
    /// Working directory of the command, must be absolute.
    pub working_directory: Option<String>,
    /// Container root directory.
    pub directory: Option<String>,
    /// Journal linking mode.
    pub link_journal: Option<String>,
    /// Flake reference of a system configuration to boot.
    pub nixos: Option<String>,
    /// Flake references of packages to make available.
    pub packages: Vec<String>,
    /// Strip characters that are invalid in machine names (default on).
    pub sanitize_names: Option<bool>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            bind: BTreeMap::new(),
            bind_read_only: BTreeMap::new(),
            boot: false,
            capability: Vec::new(),
            command: Vec::new(),
            console: Some("read-only".to_string()),
            environment: BTreeMap::new(),
            ephemeral: false,
            image: None,
            image_download: None,
            network_veth: false,
            network_zone: None,
            pivot_root: None,
            port_map: BTreeMap::new(),
            ports: Vec::new(),
            process_two: false,
            properties: BTreeMap::new(),
            read_only: false,
            resolv_conf: Some("copy-host".to_string()),
            user: None,
            user_namespacing: false,
            volatile: None,
            working_directory: None,
            directory: None,
            link_journal: None,
            nixos: None,
            packages: Vec::new(),
            sanitize_names: None,
        }
    }
}

impl MachineConfig {
    /// `true` when a system configuration should be built and booted.
    pub fn is_system_image(&self) -> bool {
        self.nixos.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// `true` when a package list should be built into a profile.
    pub fn is_package_list(&self) -> bool {
        !self.packages.is_empty()
    }
}

/// Image download request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDownload {
    pub url: String,
    /// `tar` or `raw`.
    #[serde(rename = "type", default = "default_image_type")]
    pub image_type: String,
    #[serde(default)]
    pub force: bool,
    /// `no`, `checksum` or `signature`.
    #[serde(default = "default_verify")]
    pub verify: String,
}

fn default_image_type() -> String {
    "tar".to_string()
}

fn default_verify() -> String {
    "no".to_string()
}
