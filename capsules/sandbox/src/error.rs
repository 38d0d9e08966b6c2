use daemon_client::ModemError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures raised to the caller instead of being folded into a
/// [`GradeResult`](crate::GradeResult).
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("project {name} not found")]
    ProjectNotFound { name: String },

    #[error("project {name} is currently disabled")]
    ProjectDisabled { name: String },

    #[error("invalid configuration for project {name}: {message}")]
    ProjectConfig { name: String, message: String },

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("container daemon unreachable at {path}: {source}")]
    DaemonUnreachable {
        path: PathBuf,
        #[source]
        source: ModemError,
    },
}

impl SandboxError {
    pub fn code(&self) -> &'static str {
        match self {
            SandboxError::ProjectNotFound { .. } => "project_not_found",
            SandboxError::ProjectDisabled { .. } => "project_disabled",
            SandboxError::ProjectConfig { .. } => "project_config",
            SandboxError::InvalidJob(_) => "invalid_job",
            SandboxError::DaemonUnreachable { .. } => "daemon_unreachable",
        }
    }

    /// HTTP status the route layer reports for this error.
    pub fn status(&self) -> u16 {
        match self {
            SandboxError::ProjectNotFound { .. } => 404,
            SandboxError::ProjectDisabled { .. } => 410,
            SandboxError::InvalidJob(_) => 400,
            SandboxError::ProjectConfig { .. } | SandboxError::DaemonUnreachable { .. } => 500,
        }
    }
}
