use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::utils::api_response::ApiResponse;

/// Error taxonomy for the whole workflow.
///
/// `Validation` is user-correctable input (bad camera folder, no matching
/// submission). `NotFound` is recoverable by operator action (e.g. create the
/// MediaValet folder first). `ExternalService` is any upstream call failing or
/// returning an unexpected shape; state writes are deferred until the upstream
/// read succeeds, so these never leave a half-committed request behind.
/// `Configuration` means the deployment config references fields or attributes
/// that don't exist and is not recoverable at request time.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{service}: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        AppError::Configuration(message.into())
    }

    /// Wrap a reqwest/deserialization failure from one of the external
    /// services, keeping the service name for the error envelope.
    pub fn external(service: &'static str, err: impl std::fmt::Display) -> Self {
        AppError::ExternalService {
            service,
            message: err.to_string(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        ApiResponse::<()>::error(status, self.to_string(), Some(json!({ "error": self.to_string() })))
            .into_response()
    }
}
