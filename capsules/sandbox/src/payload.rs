//! Container specs for each kind of grading job.
//!
//! Both kinds share the same isolation: a low memory ceiling without swap and
//! one pinned CPU. Git jobs keep the network to fetch the repository and see
//! the project's tests through a read-only bind; single-file jobs get neither.

use daemon_client::{BindMount, ContainerSpec, ContainerSpecBuilder, SpecError, SwapPolicy};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::SandboxConfig;
use crate::job::{GitJob, SingleFileJob, ARG_SEPARATOR};
use crate::project::Project;

pub const SANDBOX_LABEL: &str = "robopeer.sandbox";
pub const JOB_LABEL: &str = "robopeer.job";
pub const PROJECT_LABEL: &str = "robopeer.project";
pub const PROJECT_MOUNT: &str = "/var/dev";

/// `TIMEOUT` value understood by the in-container wrapper: whole seconds.
pub fn timeout_env(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs().max(1))
}

fn isolated(config: &SandboxConfig, image: &str, job_id: &str) -> ContainerSpecBuilder {
    ContainerSpec::builder(image)
        .tty(false)
        .memory_bytes(config.memory_limit_bytes)
        .swap(SwapPolicy::Disabled)
        .cpuset(config.cpuset.clone())
        .label(SANDBOX_LABEL, "1")
        .label(JOB_LABEL, job_id)
}

fn with_envs(mut builder: ContainerSpecBuilder, envs: &BTreeMap<String, String>) -> ContainerSpecBuilder {
    for (key, value) in envs {
        builder = builder.env(key.clone(), value.clone());
    }
    builder
}

pub fn git_spec(
    config: &SandboxConfig,
    project: &Project,
    job: &GitJob,
    timeout: Duration,
    job_id: &str,
) -> Result<ContainerSpec, SpecError> {
    let builder = isolated(config, &config.git_image, job_id)
        .network_disabled(false)
        .label(PROJECT_LABEL, project.name.clone())
        .bind(BindMount::read_only(&project.dir, PROJECT_MOUNT))
        .env("TIMEOUT", timeout_env(timeout))
        .env("GIT_URL", job.repo_url.clone())
        .env("GIT_BRANCH", job.branch.clone())
        .env("GIT_COMMIT", job.commit.clone());
    with_envs(builder, &job.envs).build()
}

pub fn single_file_spec(
    config: &SandboxConfig,
    job: &SingleFileJob,
    job_id: &str,
) -> Result<ContainerSpec, SpecError> {
    let builder = isolated(config, &config.single_image, job_id)
        .network_disabled(true)
        .env(
            "TIMEOUT",
            timeout_env(Duration::from_secs(job.timeout_seconds)),
        )
        .env("CODE_FLAGS", job.flags.clone())
        .env("CODE_SOURCE", job.content.clone())
        .env("CODE_LANGUAGE", job.language.clone())
        .env("CODE_ARGV", job.args.join(ARG_SEPARATOR))
        .env("CODE_ARGC", job.args.len().to_string());
    with_envs(builder, &job.envs).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn project() -> Project {
        Project {
            name: "libft".to_string(),
            dir: PathBuf::from("/srv/robopeer/projects/libft"),
            enabled: true,
            timeout: None,
        }
    }

    #[test]
    fn git_spec_binds_project_and_keeps_network() {
        let config = SandboxConfig::default();
        let job = GitJob::new("https://github.com/a/libft.git", "main", "deadbeef")
            .with_env("STUDENT", "w2");

        let spec = git_spec(&config, &project(), &job, Duration::from_secs(90), "job-1").unwrap();

        assert_eq!(spec.image(), "w2wizard/git");
        assert!(!spec.network_disabled());
        assert_eq!(spec.memory_bytes(), 50 * 1024 * 1024);
        assert_eq!(spec.swap(), SwapPolicy::Disabled);
        assert_eq!(spec.cpuset(), Some("0"));
        assert_eq!(spec.binds().len(), 1);
        assert_eq!(spec.binds()[0].container_path, PROJECT_MOUNT);
        assert!(spec.binds()[0].read_only);
        assert_eq!(spec.env_var("TIMEOUT"), Some("90s"));
        assert_eq!(spec.env_var("GIT_COMMIT"), Some("deadbeef"));
        let keys: Vec<&str> = spec.env().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["TIMEOUT", "GIT_URL", "GIT_BRANCH", "GIT_COMMIT", "STUDENT"]
        );
        assert_eq!(spec.labels().get(JOB_LABEL).map(String::as_str), Some("job-1"));
        assert_eq!(spec.labels().get(PROJECT_LABEL).map(String::as_str), Some("libft"));
    }

    #[test]
    fn single_file_argv_keeps_commas_inside_arguments() {
        let config = SandboxConfig::default();
        let joined = SingleFileJob::new("c", "", 5).with_args(["a,b"]);
        let split = SingleFileJob::new("c", "", 5).with_args(["a", "b"]);

        let joined = single_file_spec(&config, &joined, "job-3").unwrap();
        let split = single_file_spec(&config, &split, "job-4").unwrap();

        assert_eq!(joined.env_var("CODE_ARGV"), Some("a,b"));
        assert_eq!(joined.env_var("CODE_ARGC"), Some("1"));
        assert_eq!(split.env_var("CODE_ARGV"), Some("a;b"));
        assert_eq!(split.env_var("CODE_ARGC"), Some("2"));
        assert_ne!(joined.env_var("CODE_ARGV"), split.env_var("CODE_ARGV"));
    }

    #[test]
    fn single_file_spec_is_offline_and_unbound() {
        let config = SandboxConfig::default();
        let job = SingleFileJob::new("c", "int main(void) { return 0; }", 5)
            .with_flags("-Wall -Werror")
            .with_args(["one", "two words"]);

        let spec = single_file_spec(&config, &job, "job-2").unwrap();

        assert_eq!(spec.image(), "w2wizard/single");
        assert!(spec.network_disabled());
        assert!(spec.binds().is_empty());
        assert_eq!(spec.env_var("TIMEOUT"), Some("5s"));
        assert_eq!(spec.env_var("CODE_LANGUAGE"), Some("c"));
        assert_eq!(spec.env_var("CODE_FLAGS"), Some("-Wall -Werror"));
        assert_eq!(spec.env_var("CODE_ARGV"), Some("one;two words"));
        assert_eq!(spec.env_var("CODE_ARGC"), Some("2"));
        assert_eq!(spec.labels().get(SANDBOX_LABEL).map(String::as_str), Some("1"));
    }

    #[test]
    fn bad_extra_env_is_rejected_by_the_spec() {
        let job = SingleFileJob::new("c", "", 5).with_env("BAD=KEY", "x");
        assert!(matches!(
            single_file_spec(&SandboxConfig::default(), &job, "job-3"),
            Err(SpecError::InvalidEnvKey { .. })
        ));
    }

    #[test]
    fn timeout_env_rounds_up_to_one_second() {
        assert_eq!(timeout_env(Duration::from_millis(200)), "1s");
        assert_eq!(timeout_env(Duration::from_secs(20)), "20s");
    }
}
