use std::{net::SocketAddr, path::Path};

use anyhow::Context;
use nspawn_core::{DriverConfig, DriverSettings};
use nspawn_observe::LoggerConfig;
use serde::Deserialize;

pub const CONFIG_ENV: &str = "NSPAWN_AGENTD_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address of the HTTP API.
    pub listen: SocketAddr,
    pub logger: LoggerConfig,
    pub driver: DriverConfig,
    pub settings: DriverSettings,
    /// Follow the kernel log for OOM kills.
    pub oom_journal: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 4747)),
            logger: LoggerConfig::default(),
            driver: DriverConfig::default(),
            settings: DriverSettings::default(),
            oom_journal: true,
        }
    }
}

impl AgentConfig {
    /// Config file named by the first argument, else by `NSPAWN_AGENTD_CONFIG`,
    /// else defaults.
    pub fn load(arg: Option<String>) -> anyhow::Result<Self> {
        match arg.or_else(|| std::env::var(CONFIG_ENV).ok()) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}
