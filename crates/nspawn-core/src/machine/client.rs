use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use tracing::trace;

use crate::machine::{
    bus::{MachineBus, MachineProps, routable_ipv4},
    error::MachineError,
};

/// Bounded polling over [`MachineBus`].
///
/// Right after the supervisor is spawned the machine is not registered yet,
/// so queries are retried with a short backoff until they succeed or the
/// deadline passes.
#[derive(Clone)]
pub struct MachineClient {
    bus: Arc<dyn MachineBus>,
    backoff: Duration,
}

impl MachineClient {
    pub fn new(bus: Arc<dyn MachineBus>, backoff: Duration) -> Self {
        Self { bus, backoff }
    }

    pub fn bus(&self) -> &Arc<dyn MachineBus> {
        &self.bus
    }

    pub async fn describe(&self, name: &str, timeout: Duration) -> Result<MachineProps, MachineError> {
        let attempt = async {
            loop {
                match self.bus.describe_machine(name).await {
                    Ok(props) => return props,
                    Err(e) => trace!(machine = name, error = %e, "machine not ready"),
                }
                tokio::time::sleep(self.backoff).await;
            }
        };
        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| MachineError::Timeout("machine properties"))
    }

    /// First routable IPv4 address of the machine.
    pub async fn address(&self, name: &str, timeout: Duration) -> Result<Ipv4Addr, MachineError> {
        let attempt = async {
            loop {
                match self.bus.machine_addresses(name).await {
                    Ok(addrs) => {
                        if let Some(ip) = routable_ipv4(&addrs) {
                            return ip;
                        }
                    }
                    Err(e) => trace!(machine = name, error = %e, "addresses not ready"),
                }
                tokio::time::sleep(self.backoff).await;
            }
        };
        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| MachineError::Timeout("machine addresses"))
    }
}
