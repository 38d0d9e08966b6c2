use daemon_client::DEFAULT_API_VERSION;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the orchestrator needs to build and run containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    pub socket_path: PathBuf,
    pub api_version: String,
    pub projects_dir: PathBuf,
    pub git_image: String,
    pub single_image: String,
    pub memory_limit_bytes: u64,
    pub cpuset: String,
    /// Used for git jobs whose project does not set its own timeout.
    pub default_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/docker.sock"),
            api_version: DEFAULT_API_VERSION.to_string(),
            projects_dir: PathBuf::from("./projects"),
            git_image: "w2wizard/git".to_string(),
            single_image: "w2wizard/single".to_string(),
            memory_limit_bytes: 50 * 1024 * 1024,
            cpuset: "0".to_string(),
            default_timeout: Duration::from_secs(20),
        }
    }
}
