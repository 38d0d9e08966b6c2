//! Robopeer grading service
//!
//! HTTP front end over the grading sandbox: accepts git and single-file
//! submissions and answers with the rendered logs under the status the
//! container's exit code maps to.

pub mod config;
pub mod routes;

pub use config::Config;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use capsules_sandbox::{Sandbox, SandboxError};
use daemon_client::ClientError;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sandbox: Arc<Sandbox>,
}

impl AppState {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

/// Custom error type for API responses
#[derive(Debug)]
pub struct AppError {
    pub status_code: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status_code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }
}

impl From<SandboxError> for AppError {
    fn from(err: SandboxError) -> Self {
        let status_code =
            StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match err {
            SandboxError::ProjectNotFound { .. } => "Project not found.".to_string(),
            SandboxError::ProjectDisabled { .. } => "Project is currently disabled.".to_string(),
            other => other.to_string(),
        };
        Self::new(status_code, message)
    }
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Container daemon error: {}", err),
        )
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code, self.message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Health check endpoint
async fn healthz() -> impl IntoResponse {
    "OK"
}

/// Create the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/count", get(routes::count_containers))
        .route("/api/grade/git/:name", post(routes::grade_git))
        .route("/api/grade/single", post(routes::grade_single))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
