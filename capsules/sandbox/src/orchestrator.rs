//! Drives one grading job through a container's lifecycle.
//!
//! `create -> start -> register -> wait -> deregister -> remove`, one daemon
//! connection per job. Expected grading failures come back as data inside
//! [`GradeResult`]; only an unreachable daemon or a malformed job is raised
//! as [`SandboxError`]. Removal is attempted on every path once an id exists.

use daemon_client::{ClientError, Container, ContainerSpec, DaemonApi, Modem, WaitOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::exit::classify;
use crate::job::{GitJob, SingleFileJob};
use crate::payload;
use crate::project::Project;
use crate::registry::JobRegistry;
use crate::result::GradeResult;

#[derive(Debug)]
pub struct Sandbox {
    config: SandboxConfig,
    api: DaemonApi,
    registry: Arc<JobRegistry>,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_registry(config, Arc::new(JobRegistry::new()))
    }

    pub fn with_registry(config: SandboxConfig, registry: Arc<JobRegistry>) -> Self {
        let api = DaemonApi::new(config.api_version.clone());
        Self {
            config,
            api,
            registry,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Check that the daemon answers at all.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let mut modem = Modem::open(&self.config.socket_path).await?;
        let result = self.api.ping(&modem).await;
        let _ = modem.disconnect().await;
        result
    }

    /// Number of running containers this service launched.
    pub async fn active_containers(&self) -> Result<usize, ClientError> {
        let mut modem = Modem::open(&self.config.socket_path).await?;
        let result = self.api.list(&modem, false).await;
        let _ = modem.disconnect().await;
        Ok(result?
            .iter()
            .filter(|summary| {
                summary.labels.get(payload::SANDBOX_LABEL).map(String::as_str) == Some("1")
            })
            .count())
    }

    /// Grade a repository against the tests of `project_name`.
    pub async fn grade_git(
        &self,
        project_name: &str,
        job: GitJob,
    ) -> Result<GradeResult, SandboxError> {
        job.validate()?;
        let project = Project::locate(&self.config.projects_dir, project_name)?;
        if !project.enabled {
            warn!(project = %project.name, "grading requested for disabled project");
            return Err(SandboxError::ProjectDisabled {
                name: project.name,
            });
        }

        let timeout = project.timeout.unwrap_or(self.config.default_timeout);
        let job_id = Uuid::new_v4().to_string();
        let spec = payload::git_spec(&self.config, &project, &job, timeout, &job_id)
            .map_err(|err| SandboxError::InvalidJob(err.to_string()))?;

        info!(
            job_id = %job_id,
            project = %project.name,
            repo = %job.repo_url,
            commit = %job.commit,
            "grading git submission"
        );
        self.run(job_id, spec).await
    }

    /// Compile and run one submitted file.
    pub async fn grade_single_file(&self, job: SingleFileJob) -> Result<GradeResult, SandboxError> {
        job.validate()?;
        let job_id = Uuid::new_v4().to_string();
        let spec = payload::single_file_spec(&self.config, &job, &job_id)
            .map_err(|err| SandboxError::InvalidJob(err.to_string()))?;

        info!(
            job_id = %job_id,
            language = %job.language,
            timeout_secs = job.timeout_seconds,
            "grading single file"
        );
        self.run(job_id, spec).await
    }

    async fn connect(&self) -> Result<Modem, SandboxError> {
        Modem::open(&self.config.socket_path)
            .await
            .map_err(|source| SandboxError::DaemonUnreachable {
                path: self.config.socket_path.clone(),
                source,
            })
    }

    async fn run(&self, job_id: String, spec: ContainerSpec) -> Result<GradeResult, SandboxError> {
        let started = Instant::now();
        let modem = self.connect().await?;
        let mut container = Container::new(modem, self.api.clone(), spec);

        let outcome = self.drive(&mut container).await;
        self.cleanup(&mut container, &job_id).await;
        let elapsed = started.elapsed();

        Ok(match outcome {
            Ok(outcome) => self.grade(job_id, outcome, elapsed),
            Err(err) => {
                error!(
                    job_id = %job_id,
                    container_id = container.id().unwrap_or("-"),
                    error = %err,
                    "grading job failed"
                );
                GradeResult::internal_error(job_id, err.to_string(), elapsed)
            }
        })
    }

    async fn drive(&self, container: &mut Container) -> Result<WaitOutcome, ClientError> {
        container.start().await?;
        if let Some(handle) = container.handle() {
            self.registry.insert(handle);
        }
        container.wait().await
    }

    fn grade(&self, job_id: String, outcome: WaitOutcome, elapsed: Duration) -> GradeResult {
        let verdict = classify(outcome.exit_code);
        if verdict.is_fatal() {
            error!(
                job_id = %job_id,
                exit_code = outcome.exit_code,
                meaning = verdict.meaning,
                "container exited with a fatal code"
            );
        } else {
            info!(
                job_id = %job_id,
                exit_code = outcome.exit_code,
                outcome = verdict.outcome.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                "grading finished"
            );
        }
        GradeResult::from_exit(job_id, outcome.exit_code, outcome.rendered_logs(), elapsed)
    }

    /// Deregister and remove. Failures are logged and never change the result.
    async fn cleanup(&self, container: &mut Container, job_id: &str) {
        let Some(id) = container.id().map(str::to_string) else {
            return;
        };
        self.registry.remove(&id);

        if let Err(err) = container.reconnect().await {
            warn!(job_id = %job_id, container_id = %id, error = %err, "cannot reconnect to remove container");
            return;
        }
        match container.remove(true).await {
            Ok(()) => debug!(job_id = %job_id, container_id = %id, "container removed"),
            Err(err) => {
                warn!(job_id = %job_id, container_id = %id, error = %err, "failed to remove container")
            }
        }
        let _ = container.disconnect().await;
    }
}
