use std::time::Duration;

use async_trait::async_trait;
use nspawn_core::DriverConfig;
use nspawn_model::{
    Capabilities, DriverHandle, DriverNetwork, ExecTaskResult, ExitResult, Fingerprint,
    PluginInfo, TaskConfig, TaskId, TaskResourceUsage, TaskStatus,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Identity and negotiation data of the plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescription {
    pub info: PluginInfo,
    pub capabilities: Capabilities,
    pub config_schema: serde_json::Value,
    pub task_config_schema: serde_json::Value,
}

/// What the orchestrator must persist for a started task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedTask {
    pub handle: DriverHandle,
    pub network: DriverNetwork,
}

/// The driver contract exposed to an orchestrator.
///
/// Implemented by [`DriverApiAdapter`](crate::DriverApiAdapter); wrap it to
/// add authentication or auditing.
#[async_trait]
pub trait ApiHandler: Send + Sync + 'static {
    fn describe(&self) -> PluginDescription;

    fn set_config(&self, config: DriverConfig);

    async fn fingerprint(&self) -> Fingerprint;

    async fn start_task(&self, cfg: TaskConfig) -> Result<StartedTask, ApiError>;

    async fn recover_task(&self, handle: DriverHandle) -> Result<(), ApiError>;

    async fn wait_task(&self, id: &TaskId) -> Result<ExitResult, ApiError>;

    async fn stop_task(&self, id: &TaskId, timeout: Duration, signal: &str) -> Result<(), ApiError>;

    async fn destroy_task(&self, id: &TaskId, force: bool) -> Result<(), ApiError>;

    async fn inspect_task(&self, id: &TaskId) -> Result<TaskStatus, ApiError>;

    /// Next resource sample, or `None` if the task exited meanwhile.
    async fn task_stats(&self, id: &TaskId, interval: Duration) -> Result<Option<TaskResourceUsage>, ApiError>;

    async fn signal_task(&self, id: &TaskId, signal: &str) -> Result<(), ApiError>;

    async fn exec_task(&self, id: &TaskId, cmd: Vec<String>, timeout: Duration) -> Result<ExecTaskResult, ApiError>;
}
