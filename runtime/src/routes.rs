//! HTTP route handlers for the grading API

use crate::{AppError, AppResult, AppState};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use capsules_sandbox::job::ARG_SEPARATOR;
use capsules_sandbox::{GitJob, GradeResult, Project, SingleFileJob};
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Body of `POST /api/grade/git/:name`
#[derive(Debug, Deserialize)]
pub struct GitRequest {
    #[serde(rename = "gitURL", alias = "gitUrl")]
    pub git_url: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
}

/// Body of `POST /api/grade/single`
#[derive(Debug, Deserialize)]
pub struct SingleRequest {
    #[serde(default, alias = "content")]
    pub code: String,
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub args: Option<Args>,
    pub timeout: Option<u64>,
    #[serde(alias = "lang")]
    pub language: Option<String>,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
}

/// Program arguments, either as a list or `;`-separated.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Args {
    List(Vec<String>),
    Joined(String),
}

impl Args {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Args::List(args) => args,
            Args::Joined(joined) => joined
                .split(ARG_SEPARATOR)
                .filter(|arg| !arg.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// POST /api/grade/git/:name - Grade a repository against a project's tests
pub async fn grade_git(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> AppResult<Response> {
    info!(project = %name, "received git grading request");

    // An unknown project answers 404 whatever the body holds.
    Project::locate(&state.sandbox.config().projects_dir, &name)?;
    let request: GitRequest = parse_body(&body)?;
    let (Some(git_url), Some(branch), Some(commit)) = (
        present(request.git_url),
        present(request.branch),
        present(request.commit),
    ) else {
        warn!(project = %name, "git grading request is missing parameters");
        return Err(missing_parameters());
    };

    let mut job = GitJob::new(git_url, branch, commit);
    job.envs = request.envs;

    let result = state.sandbox.grade_git(&name, job).await?;
    Ok(grade_response(&result))
}

/// POST /api/grade/single - Compile and run one submitted file
pub async fn grade_single(State(state): State<AppState>, body: Bytes) -> AppResult<Response> {
    info!("received single-file grading request");

    let request: SingleRequest = parse_body(&body)?;
    let (Some(language), Some(timeout)) = (
        present(request.language),
        request.timeout.filter(|secs| *secs > 0),
    ) else {
        warn!("single-file grading request is missing parameters");
        return Err(missing_parameters());
    };

    let mut job = SingleFileJob::new(language, request.code, timeout)
        .with_flags(request.flags)
        .with_args(request.args.map(Args::into_vec).unwrap_or_default());
    job.envs = request.envs;

    let result = state.sandbox.grade_single_file(job).await?;
    Ok(grade_response(&result))
}

/// GET /api/count - Running containers launched by this service
pub async fn count_containers(State(state): State<AppState>) -> AppResult<String> {
    let count = state.sandbox.active_containers().await?;
    debug!(count, "counted active containers");
    Ok(count.to_string())
}

fn grade_response(result: &GradeResult) -> Response {
    let status = StatusCode::from_u16(result.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [
            ("x-robopeer-job", result.job_id().to_string()),
            ("x-robopeer-outcome", result.outcome().as_str().to_string()),
        ],
        result.report(),
    )
        .into_response()
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|err| {
        warn!(error = %err, "invalid request body");
        AppError::new(StatusCode::BAD_REQUEST, "Invalid JSON.")
    })
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn missing_parameters() -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "Missing parameters")
}
