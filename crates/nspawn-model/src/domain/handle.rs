use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::SystemTime;
use thiserror::Error;

use crate::{TaskConfig, domain::time_serde};

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("unsupported handle version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("handle carries no driver state")]
    Empty,
    #[error("failed to encode driver state: {0}")]
    Encode(String),
    #[error("failed to decode driver state: {0}")]
    Decode(String),
}

/// Opaque token allowing a new driver process to resume an execution session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReattachConfig {
    /// PID of the supervised process.
    pub pid: u32,
}

/// The durable subset of a task handle, written once at start and read once at recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTaskState {
    pub reattach: ReattachConfig,
    pub machine_name: String,
    #[serde(with = "time_serde")]
    pub started_at: SystemTime,
}

/// Handle handed to the orchestrator by `start_task` and given back on `recover_task`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverHandle {
    pub version: u32,
    pub config: TaskConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub driver_state: Vec<u8>,
}

impl DriverHandle {
    pub fn new(version: u32, config: TaskConfig) -> Self {
        Self {
            version,
            config,
            driver_state: Vec::new(),
        }
    }

    /// Encode `state` into the opaque driver state blob.
    pub fn set_driver_state<T: Serialize>(&mut self, state: &T) -> Result<(), HandleError> {
        self.driver_state =
            serde_json::to_vec(state).map_err(|e| HandleError::Encode(e.to_string()))?;
        Ok(())
    }

    /// Decode the opaque driver state blob.
    pub fn driver_state<T: DeserializeOwned>(&self) -> Result<T, HandleError> {
        if self.driver_state.is_empty() {
            return Err(HandleError::Empty);
        }
        serde_json::from_slice(&self.driver_state).map_err(|e| HandleError::Decode(e.to_string()))
    }

    pub fn ensure_version(&self, expected: u32) -> Result<(), HandleError> {
        if self.version != expected {
            return Err(HandleError::Version {
                found: self.version,
                expected,
            });
        }
        Ok(())
    }
}
