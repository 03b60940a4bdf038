//! Container execution engine.
//!
//! Turns a [`TaskConfig`](nspawn_model::TaskConfig) into a running
//! `systemd-nspawn` machine and reconciles its lifecycle back to the caller.
//! Every host facility the engine touches (process supervision, the nix build
//! tool, the system bus, the firewall) sits behind a trait so the
//! composition root decides what is real.

pub mod config;
pub mod driver;
pub mod image;
pub mod machine;
pub mod netfilter;
pub mod oom;
pub mod state;

mod settings;
#[cfg(test)]
mod testing;
pub use settings::{DriverConfig, DriverSettings};

pub use driver::{Collaborators, Driver, DriverError};

pub mod prelude {
    pub use crate::config::{ConfigError, ContainerConfig};
    pub use crate::driver::{Collaborators, Driver, DriverError};
    pub use crate::image::{BuildTool, NixCli};
    pub use crate::machine::{MachineBus, MachineClient};
    pub use crate::netfilter::{Firewall, Iptables};
    pub use crate::oom::{JournalTail, OomListener};
    pub use crate::{DriverConfig, DriverSettings};
}
