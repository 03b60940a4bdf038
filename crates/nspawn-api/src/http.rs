use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use nspawn_core::DriverConfig;
use nspawn_model::{DriverHandle, TaskConfig, TaskId};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{error::ApiError, handler::ApiHandler};

/// HTTP API service builder.
pub struct HttpApi<H> {
    handler: Arc<H>,
}

impl<H> HttpApi<H>
where
    H: ApiHandler,
{
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Routes:
    /// - GET /api/v1/plugin - identity, capabilities and schemas
    /// - PUT /api/v1/config - replace the plugin configuration
    /// - GET /api/v1/fingerprint - current health
    /// - POST /api/v1/tasks - start a task
    /// - POST /api/v1/tasks/recover - resume a task from its handle
    /// - GET /api/v1/tasks/{id} - inspect
    /// - DELETE /api/v1/tasks/{id}?force= - destroy
    /// - POST /api/v1/tasks/{id}/wait - block until exit
    /// - POST /api/v1/tasks/{id}/stop
    /// - POST /api/v1/tasks/{id}/signal
    /// - POST /api/v1/tasks/{id}/exec
    /// - GET /api/v1/tasks/{id}/stats?interval_ms=
    pub fn router(self) -> Router {
        Router::new()
            .route("/api/v1/plugin", get(describe::<H>))
            .route("/api/v1/config", put(set_config::<H>))
            .route("/api/v1/fingerprint", get(fingerprint::<H>))
            .route("/api/v1/tasks", post(start_task::<H>))
            .route("/api/v1/tasks/recover", post(recover_task::<H>))
            .route("/api/v1/tasks/{id}", get(inspect_task::<H>).delete(destroy_task::<H>))
            .route("/api/v1/tasks/{id}/wait", post(wait_task::<H>))
            .route("/api/v1/tasks/{id}/stop", post(stop_task::<H>))
            .route("/api/v1/tasks/{id}/signal", post(signal_task::<H>))
            .route("/api/v1/tasks/{id}/exec", post(exec_task::<H>))
            .route("/api/v1/tasks/{id}/stats", get(task_stats::<H>))
            .with_state(self.handler)
    }

    /// Serve on `listener` until `cancel` fires.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "http api listening");
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
    }
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StopTaskRequest {
    #[serde(default)]
    timeout_ms: u64,
    #[serde(default)]
    signal: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignalTaskRequest {
    signal: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExecTaskRequest {
    cmd: Vec<String>,
    #[serde(default = "default_exec_timeout_ms")]
    timeout_ms: u64,
}

fn default_exec_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Default, Deserialize)]
struct DestroyQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    #[serde(default = "default_stats_interval_ms")]
    interval_ms: u64,
}

fn default_stats_interval_ms() -> u64 {
    1_000
}

// ============================================================================
// Handlers
// ============================================================================

async fn describe<H: ApiHandler>(State(h): State<Arc<H>>) -> impl IntoResponse {
    Json(h.describe())
}

async fn set_config<H: ApiHandler>(State(h): State<Arc<H>>, Json(cfg): Json<DriverConfig>) -> StatusCode {
    h.set_config(cfg);
    StatusCode::NO_CONTENT
}

async fn fingerprint<H: ApiHandler>(State(h): State<Arc<H>>) -> impl IntoResponse {
    Json(h.fingerprint().await)
}

async fn start_task<H: ApiHandler>(
    State(h): State<Arc<H>>,
    Json(cfg): Json<TaskConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let started = h.start_task(cfg).await?;
    Ok((StatusCode::CREATED, Json(started)))
}

async fn recover_task<H: ApiHandler>(
    State(h): State<Arc<H>>,
    Json(handle): Json<DriverHandle>,
) -> Result<StatusCode, ApiError> {
    h.recover_task(handle).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn inspect_task<H: ApiHandler>(
    State(h): State<Arc<H>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(h.inspect_task(&TaskId::from(id)).await?))
}

async fn destroy_task<H: ApiHandler>(
    State(h): State<Arc<H>>,
    Path(id): Path<String>,
    Query(q): Query<DestroyQuery>,
) -> Result<StatusCode, ApiError> {
    h.destroy_task(&TaskId::from(id), q.force).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn wait_task<H: ApiHandler>(
    State(h): State<Arc<H>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(h.wait_task(&TaskId::from(id)).await?))
}

async fn stop_task<H: ApiHandler>(
    State(h): State<Arc<H>>,
    Path(id): Path<String>,
    Json(req): Json<StopTaskRequest>,
) -> Result<StatusCode, ApiError> {
    h.stop_task(&TaskId::from(id), Duration::from_millis(req.timeout_ms), &req.signal)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn signal_task<H: ApiHandler>(
    State(h): State<Arc<H>>,
    Path(id): Path<String>,
    Json(req): Json<SignalTaskRequest>,
) -> Result<StatusCode, ApiError> {
    if req.signal.is_empty() {
        return Err(ApiError::InvalidRequest("signal must not be empty".into()));
    }
    h.signal_task(&TaskId::from(id), &req.signal).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn exec_task<H: ApiHandler>(
    State(h): State<Arc<H>>,
    Path(id): Path<String>,
    Json(req): Json<ExecTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let out = h
        .exec_task(&TaskId::from(id), req.cmd, Duration::from_millis(req.timeout_ms))
        .await?;
    Ok(Json(out))
}

async fn task_stats<H: ApiHandler>(
    State(h): State<Arc<H>>,
    Path(id): Path<String>,
    Query(q): Query<StatsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let sample = h
        .task_stats(&TaskId::from(id), Duration::from_millis(q.interval_ms))
        .await?;
    Ok(Json(sample))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use nspawn_core::{DriverError, driver};
    use nspawn_model::{
        ExecTaskResult, ExitResult, Fingerprint, TaskResourceUsage, TaskStatus,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::handler::{PluginDescription, StartedTask};

    struct Empty;

    fn missing<T>(id: &TaskId) -> Result<T, ApiError> {
        Err(DriverError::TaskNotFound(id.clone()).into())
    }

    #[async_trait]
    impl ApiHandler for Empty {
        fn describe(&self) -> PluginDescription {
            PluginDescription {
                info: driver::plugin_info(),
                capabilities: driver::capabilities(),
                config_schema: driver::config_schema(),
                task_config_schema: driver::task_config_schema(),
            }
        }

        fn set_config(&self, _config: DriverConfig) {}

        async fn fingerprint(&self) -> Fingerprint {
            Fingerprint::undetected("disabled")
        }

        async fn start_task(&self, cfg: TaskConfig) -> Result<StartedTask, ApiError> {
            Err(DriverError::TaskExists(cfg.id).into())
        }

        async fn recover_task(&self, handle: DriverHandle) -> Result<(), ApiError> {
            missing(&handle.config.id)
        }

        async fn wait_task(&self, id: &TaskId) -> Result<ExitResult, ApiError> {
            missing(id)
        }

        async fn stop_task(&self, id: &TaskId, _timeout: Duration, _signal: &str) -> Result<(), ApiError> {
            missing(id)
        }

        async fn destroy_task(&self, id: &TaskId, _force: bool) -> Result<(), ApiError> {
            missing(id)
        }

        async fn inspect_task(&self, id: &TaskId) -> Result<TaskStatus, ApiError> {
            missing(id)
        }

        async fn task_stats(&self, id: &TaskId, _interval: Duration) -> Result<Option<TaskResourceUsage>, ApiError> {
            missing(id)
        }

        async fn signal_task(&self, id: &TaskId, _signal: &str) -> Result<(), ApiError> {
            missing(id)
        }

        async fn exec_task(&self, _id: &TaskId, cmd: Vec<String>, _timeout: Duration) -> Result<ExecTaskResult, ApiError> {
            if cmd.is_empty() {
                return Err(DriverError::EmptyCommand.into());
            }
            Ok(ExecTaskResult::default())
        }
    }

    async fn request(method: &str, path: &str, body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(HttpApi::new(Arc::new(Empty)).serve(listener, cancel.clone()));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let raw = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        cancel.cancel();
        server.await.unwrap().unwrap();
        response
    }

    #[tokio::test]
    async fn plugin_description() {
        let res = request("GET", "/api/v1/plugin", "").await;
        assert!(res.starts_with("HTTP/1.1 200"), "{res}");
        assert!(res.contains(r#""name":"nix""#));
    }

    #[tokio::test]
    async fn unknown_task_is_404() {
        let res = request("GET", "/api/v1/tasks/nope", "").await;
        assert!(res.starts_with("HTTP/1.1 404"), "{res}");
        assert!(res.contains("task nope not found"));
    }

    #[tokio::test]
    async fn empty_exec_is_400() {
        let res = request("POST", "/api/v1/tasks/t-1/exec", r#"{"cmd":[]}"#).await;
        assert!(res.starts_with("HTTP/1.1 400"), "{res}");
    }

    #[tokio::test]
    async fn empty_signal_is_rejected() {
        let res = request("POST", "/api/v1/tasks/t-1/signal", r#"{"signal":""}"#).await;
        assert!(res.starts_with("HTTP/1.1 400"), "{res}");
    }

    #[tokio::test]
    async fn config_update_has_no_body() {
        let res = request("PUT", "/api/v1/config", r#"{"enabled":false}"#).await;
        assert!(res.starts_with("HTTP/1.1 204"), "{res}");
    }
}
