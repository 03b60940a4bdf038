//! Machine introspection through the control plane.

mod bus;
mod client;
#[cfg(feature = "dbus")]
mod system_bus;
mod environ;
mod error;
mod iface;

pub use bus::{
    ImageProps, MachineAddress, MachineBus, MachineProps, PullRequest, Transfer, routable_ipv4,
};
pub use client::MachineClient;
#[cfg(feature = "dbus")]
pub use system_bus::SystemBus;
pub use environ::read_environ;
pub use error::MachineError;
pub use iface::interface_names;
