use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Network facts reported back to the orchestrator after a successful start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverNetwork {
    /// Legacy label -> container port map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_map: BTreeMap<String, u16>,
    /// Address the task can be reached at.
    pub ip: String,
    pub auto_advertise: bool,
}
