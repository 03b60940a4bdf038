use std::time::Duration;

use async_trait::async_trait;
use nspawn_core::{Driver, DriverConfig, driver};
use nspawn_model::{
    DriverHandle, ExecTaskResult, ExitResult, Fingerprint, TaskConfig, TaskId,
    TaskResourceUsage, TaskStatus,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ApiError,
    handler::{ApiHandler, PluginDescription, StartedTask},
};

/// Delegates every call to a [`Driver`].
pub struct DriverApiAdapter {
    driver: Driver,
}

impl DriverApiAdapter {
    pub fn new(driver: Driver) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl ApiHandler for DriverApiAdapter {
    fn describe(&self) -> PluginDescription {
        PluginDescription {
            info: driver::plugin_info(),
            capabilities: driver::capabilities(),
            config_schema: driver::config_schema(),
            task_config_schema: driver::task_config_schema(),
        }
    }

    fn set_config(&self, config: DriverConfig) {
        self.driver.set_config(config);
    }

    async fn fingerprint(&self) -> Fingerprint {
        self.driver.build_fingerprint().await
    }

    async fn start_task(&self, cfg: TaskConfig) -> Result<StartedTask, ApiError> {
        let (handle, network) = self.driver.start_task(&cfg).await?;
        Ok(StartedTask { handle, network })
    }

    async fn recover_task(&self, handle: DriverHandle) -> Result<(), ApiError> {
        Ok(self.driver.recover_task(&handle).await?)
    }

    async fn wait_task(&self, id: &TaskId) -> Result<ExitResult, ApiError> {
        Ok(self.driver.wait_task(id).await?)
    }

    async fn stop_task(&self, id: &TaskId, timeout: Duration, signal: &str) -> Result<(), ApiError> {
        Ok(self.driver.stop_task(id, timeout, signal).await?)
    }

    async fn destroy_task(&self, id: &TaskId, force: bool) -> Result<(), ApiError> {
        Ok(self.driver.destroy_task(id, force).await?)
    }

    async fn inspect_task(&self, id: &TaskId) -> Result<TaskStatus, ApiError> {
        Ok(self.driver.inspect_task(id)?)
    }

    async fn task_stats(&self, id: &TaskId, interval: Duration) -> Result<Option<TaskResourceUsage>, ApiError> {
        let cancel = CancellationToken::new();
        let mut rx = self.driver.task_stats(id, interval, cancel.clone())?;
        let sample = rx.recv().await;
        cancel.cancel();
        Ok(sample)
    }

    async fn signal_task(&self, id: &TaskId, signal: &str) -> Result<(), ApiError> {
        Ok(self.driver.signal_task(id, signal).await?)
    }

    async fn exec_task(&self, id: &TaskId, cmd: Vec<String>, timeout: Duration) -> Result<ExecTaskResult, ApiError> {
        Ok(self.driver.exec_task(id, &cmd, timeout).await?)
    }
}
