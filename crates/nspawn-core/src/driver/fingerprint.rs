use std::collections::BTreeMap;

use nspawn_model::{Fingerprint, HealthState};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::driver::Driver;

const REQUIRED_BINARIES: [&str; 2] = ["systemd-nspawn", "machinectl"];

impl Driver {
    /// Health reports: one right away, then one every fingerprint period.
    ///
    /// The stream ends when `cancel` fires, the driver shuts down or the
    /// receiver is dropped.
    pub fn fingerprint(&self, cancel: CancellationToken) -> mpsc::Receiver<Fingerprint> {
        let (tx, rx) = mpsc::channel(1);
        let driver = self.clone();
        let shutdown = self.inner.cancel.clone();
        let period = self.inner.settings.fingerprint_period;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let fp = driver.build_fingerprint().await;
                        if tx.send(fp).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("fingerprint stream closed");
        });
        rx
    }

    pub async fn build_fingerprint(&self) -> Fingerprint {
        let config = self.config();
        if !config.enabled {
            return Fingerprint::undetected("disabled");
        }

        for bin in REQUIRED_BINARIES {
            if which::which(bin).is_err() {
                return Fingerprint::undetected(format!("{bin} not found"));
            }
        }

        let version = match self.inner.machines.bus().systemd_version().await {
            Ok(raw) => major_version(&raw),
            Err(e) => return Fingerprint::undetected(format!("systemd version unavailable: {e}")),
        };
        if !nix::unistd::geteuid().is_root() {
            return Fingerprint::undetected("driver must run as root");
        }

        Fingerprint {
            health: HealthState::Healthy,
            health_description: "ready".to_string(),
            attributes: BTreeMap::from([
                ("driver.nix".to_string(), "true".to_string()),
                ("driver.nix.nspawn.version".to_string(), version),
                ("driver.nix.volumes".to_string(), config.volumes.to_string()),
            ]),
        }
    }
}

/// `"252.4-1"` -> `"252"`.
pub(crate) fn major_version(raw: &str) -> String {
    let raw = raw.trim().trim_matches('"');
    raw.split('.').next().unwrap_or(raw).to_string()
}
