use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::jobs::JobError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Scheduler error: {0}")]
    Upstream(String),

    #[error("Authentication required")]
    Unauthorized,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: u16,
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Validation(msg) => ApiError::Validation(msg),
            e @ JobError::NotFound(_) => ApiError::NotFound(e.to_string()),
            e @ JobError::Conflict(_) => ApiError::Conflict(e.to_string()),
            JobError::Upstream(e) => ApiError::Upstream(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        };

        if status.is_server_error() {
            tracing::error!(component = "api", status = status.as_u16(), error = %self, "Request failed");
        }

        let body = Json(ErrorResponse {
            success: false,
            error: self.to_string(),
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
