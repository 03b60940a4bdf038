use std::{net::Ipv4Addr, path::PathBuf};

use async_trait::async_trait;

use crate::{
    config::{ImageKind, Verify},
    machine::error::MachineError,
};

/// Properties of a registered machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineProps {
    pub name: String,
    /// PID of the machine's init (or payload) process on the host.
    pub leader: u32,
    /// Host-side interface indices of the machine's links.
    pub network_interfaces: Vec<i32>,
    pub class: String,
    pub service: String,
    pub state: String,
    pub unit: String,
    pub root_directory: String,
}

/// One address reported for a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineAddress {
    /// Address family, `AF_INET` or `AF_INET6`.
    pub family: i32,
    pub address: Vec<u8>,
}

impl MachineAddress {
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        if self.family != libc::AF_INET {
            return None;
        }
        let octets: [u8; 4] = self.address.as_slice().try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }
}

/// The last IPv4 address that is not link-local.
pub fn routable_ipv4(addrs: &[MachineAddress]) -> Option<Ipv4Addr> {
    addrs
        .iter()
        .filter_map(MachineAddress::ipv4)
        .filter(|ip| !ip.is_link_local())
        .last()
}

/// Properties of an image known to the machine manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageProps {
    pub name: String,
    pub path: PathBuf,
    pub image_type: String,
    pub read_only: bool,
}

/// Request to pull an image through the import manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub kind: ImageKind,
    pub url: String,
    /// Local image name.
    pub local: String,
    pub verify: Verify,
    pub force: bool,
}

/// A running import transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub id: u32,
    pub local: String,
    /// Completion in `[0, 1]`; may be NaN while unknown.
    pub progress: f64,
}

/// Control-plane queries about machines, images and the service manager.
#[async_trait]
pub trait MachineBus: Send + Sync + 'static {
    async fn describe_machine(&self, name: &str) -> Result<MachineProps, MachineError>;

    async fn machine_addresses(&self, name: &str) -> Result<Vec<MachineAddress>, MachineError>;

    async fn describe_image(&self, name: &str) -> Result<ImageProps, MachineError>;

    /// Start a transfer; returns its id.
    async fn pull_image(&self, req: &PullRequest) -> Result<u32, MachineError>;

    async fn list_transfers(&self) -> Result<Vec<Transfer>, MachineError>;

    /// Raw version string of the running service manager, e.g. `"252.4-1"`.
    async fn systemd_version(&self) -> Result<String, MachineError>;
}
