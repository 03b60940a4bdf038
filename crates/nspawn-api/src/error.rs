use nspawn_core::DriverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl ApiError {
    /// HTTP status code the error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidRequest(_) => 400,
            ApiError::Driver(e) => match e {
                DriverError::TaskNotFound(_) => 404,
                DriverError::TaskExists(_) | DriverError::TaskRunning(_) => 409,
                DriverError::EmptyCommand | DriverError::Config(_) | DriverError::Handle(_) => 400,
                DriverError::Shutdown => 503,
                _ => 500,
            },
        }
    }
}

#[cfg(feature = "http")]
impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
