use std::{collections::BTreeMap, path::PathBuf};

use nspawn_model::{MachineConfig, Resources, TaskConfig};
use tracing::debug;

use crate::config::{
    error::ConfigError,
    options::{Console, ImageKind, LinkJournal, ResolvConf, Verify, Volatile, parse_opt},
    validate::validate,
};

const ALLOC_DIR_ENV: &str = "NOMAD_ALLOC_DIR";
const TASK_DIR_ENV: &str = "NOMAD_TASK_DIR";
const SECRETS_DIR_ENV: &str = "NOMAD_SECRETS_DIR";

/// Root file system handed to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePath {
    /// Passed with `-D`.
    Directory(PathBuf),
    /// Disk image, passed with `-i`.
    File(PathBuf),
}

/// Validated `image_download` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSpec {
    pub url: String,
    pub kind: ImageKind,
    pub force: bool,
    pub verify: Verify,
}

/// Host-wide inputs of [`ContainerConfig::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Host volumes may be mounted.
    pub volumes: bool,
    /// Bound of the sanitized task name inside the machine name.
    pub name_prefix_len: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            volumes: true,
            name_prefix_len: 27,
        }
    }
}

/// Validated, normalised options of one container.
///
/// Built once per task. The image resolver may still add read-only binds, a
/// root directory and a default command before the argument vector is
/// rendered; nothing changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Machine name, unique per allocation.
    pub machine: String,
    /// Image name or path as declared.
    pub image: Option<String>,
    /// Image location resolved on the host.
    pub image_path: Option<ImagePath>,
    pub image_download: Option<DownloadSpec>,
    pub directory: Option<PathBuf>,
    pub link_journal: Option<LinkJournal>,
    pub boot: bool,
    pub ephemeral: bool,
    pub network_veth: bool,
    pub network_namespace: Option<PathBuf>,
    pub process_two: bool,
    pub read_only: bool,
    pub user_namespacing: bool,
    pub console: Option<Console>,
    pub pivot_root: Option<String>,
    pub resolv_conf: Option<ResolvConf>,
    pub user: Option<String>,
    pub volatile: Option<Volatile>,
    pub working_directory: Option<String>,
    /// Host path -> container path.
    pub bind: BTreeMap<String, String>,
    /// Host path -> container path, read-only.
    pub bind_read_only: BTreeMap<String, String>,
    pub environment: BTreeMap<String, String>,
    /// Port label -> `host:container`.
    pub ports: BTreeMap<String, String>,
    /// Unit properties of the machine scope.
    pub properties: BTreeMap<String, String>,
    pub capability: Vec<String>,
    pub network_zone: Option<String>,
    pub command: Vec<String>,
    /// Flake reference of a system configuration to build.
    pub nixos: Option<String>,
    /// Flake references of packages to build.
    pub packages: Vec<String>,
    /// Deprecated label -> container port map, reported back to the caller.
    pub port_map: BTreeMap<String, u16>,
}

impl ContainerConfig {
    /// Validate the task's configuration block and derive the container options.
    pub fn build(task: &TaskConfig, opts: &BuildOptions) -> Result<Self, ConfigError> {
        let mut raw = task.driver_config.clone();

        if task.network_isolation.is_some() {
            raw.user_namespacing = false;
            raw.network_veth = false;
        }
        validate(&raw)?;

        let machine = machine_name(task, &raw, opts.name_prefix_len);
        let environment = merge_environment(&raw.environment, &task.env);

        let mut bind = raw.bind.clone();
        let mut bind_read_only = raw.bind_read_only.clone();
        let dirs = &task.task_dir;
        for (host, env, default) in [
            (&dirs.shared_alloc_dir, ALLOC_DIR_ENV, "/alloc"),
            (&dirs.local_dir, TASK_DIR_ENV, "/local"),
            (&dirs.secrets_dir, SECRETS_DIR_ENV, "/secrets"),
        ] {
            if host.as_os_str().is_empty() {
                continue;
            }
            let guest = task.env.get(env).map(String::as_str).unwrap_or(default);
            bind.insert(host.display().to_string(), guest.to_string());
        }

        if !task.mounts.is_empty() {
            if !opts.volumes {
                return Err(ConfigError::VolumesDisabled);
            }
            for m in &task.mounts {
                let target = if m.readonly {
                    &mut bind_read_only
                } else {
                    &mut bind
                };
                target.insert(m.host_path.clone(), m.task_path.clone());
            }
        }

        let mut properties = raw.properties.clone();
        properties.extend(memory_properties(&task.resources));

        let ports = resolve_ports(&raw, &task.resources)?;

        let image_download = match &raw.image_download {
            Some(dl) => Some(DownloadSpec {
                url: dl.url.clone(),
                kind: dl.image_type.parse()?,
                force: dl.force,
                verify: dl.verify.parse()?,
            }),
            None => None,
        };

        Ok(Self {
            machine,
            image: non_empty(&raw.image),
            image_path: None,
            image_download,
            directory: raw
                .directory
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            link_journal: parse_opt(raw.link_journal.as_deref())?,
            boot: raw.boot,
            ephemeral: raw.ephemeral,
            network_veth: raw.network_veth,
            network_namespace: task.network_isolation.as_ref().map(|n| n.path.clone()),
            process_two: raw.process_two,
            read_only: raw.read_only,
            user_namespacing: raw.user_namespacing,
            console: parse_opt(raw.console.as_deref())?,
            pivot_root: non_empty(&raw.pivot_root),
            resolv_conf: parse_opt(raw.resolv_conf.as_deref())?,
            user: non_empty(&raw.user),
            volatile: parse_opt(raw.volatile.as_deref())?,
            working_directory: non_empty(&raw.working_directory),
            bind,
            bind_read_only,
            environment,
            ports,
            properties,
            capability: raw.capability.clone(),
            network_zone: non_empty(&raw.network_zone),
            command: raw.command.clone(),
            nixos: non_empty(&raw.nixos),
            packages: raw.packages.clone(),
            port_map: raw.port_map.clone(),
        })
    }

    /// `true` when the root file system comes from a nix build.
    pub fn needs_build(&self) -> bool {
        self.nixos.is_some() || !self.packages.is_empty()
    }
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
}

/// Replace every run of characters outside `[a-zA-Z0-9-]` with a single `-`
/// and cut the result to `max` characters.
pub fn sanitize_name(name: &str, max: usize) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out.truncate(max);
    out
}

fn machine_name(task: &TaskConfig, raw: &MachineConfig, max: usize) -> String {
    let prefix = if raw.sanitize_names.unwrap_or(true) {
        sanitize_name(&task.name, max)
    } else {
        task.name.clone()
    };
    format!("{prefix}-{}", task.alloc_id)
}

/// Caller environment wins over the configured one; `-` in keys becomes `_`.
fn merge_environment(
    configured: &BTreeMap<String, String>,
    task: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = configured.clone();
    merged.extend(task.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
        .into_iter()
        .map(|(k, v)| (k.replace('-', "_"), v))
        .collect()
}

fn memory_properties(res: &Resources) -> BTreeMap<String, String> {
    const MIB: u64 = 1024 * 1024;

    let mut props = BTreeMap::new();
    if res.memory_max_mb != 0 {
        props.insert("MemoryHigh".to_string(), (res.memory_mb * MIB).to_string());
        props.insert("MemoryMax".to_string(), (res.memory_max_mb * MIB).to_string());
    } else if res.memory_mb != 0 {
        props.insert("MemoryMax".to_string(), (res.memory_mb * MIB).to_string());
    }
    props
}

/// Resolve declared ports to `host:container` pairs keyed by label.
fn resolve_ports(
    raw: &MachineConfig,
    res: &Resources,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut ports = BTreeMap::new();

    if !raw.port_map.is_empty() && !raw.ports.is_empty() {
        return Err(ConfigError::PortDeclaration);
    }

    if !raw.ports.is_empty() {
        let allocated = res
            .ports
            .as_ref()
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::NoPorts)?;
        for label in &raw.ports {
            let port = allocated
                .get(label)
                .ok_or_else(|| ConfigError::UnknownPort(label.clone()))?;
            let to = if port.to == 0 { port.value } else { port.to };
            debug!(port = port.value, to, "exposed port");
            ports.insert(label.clone(), format!("{}:{to}", port.value));
        }
    } else if !raw.port_map.is_empty() {
        let network = res.networks.first().ok_or(ConfigError::NoNetwork)?;
        for port in network.reserved_ports.iter().chain(&network.dynamic_ports) {
            let mapped = raw.port_map.get(&port.label).copied().unwrap_or(port.value);
            debug!(ip = %network.ip, port = port.value, mapped, "mapped port");
            ports.insert(port.label.clone(), format!("{}:{mapped}", port.value));
        }
    }

    Ok(ports)
}
