//! Configuration for the grading service

use capsules_sandbox::SandboxConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the robopeer grading service
#[derive(Debug, Clone, Parser)]
#[command(name = "robopeer")]
#[command(about = "Grades code submissions inside resource-limited containers")]
pub struct Config {
    /// Address the HTTP API listens on
    #[arg(long, env, default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Unix socket of the container daemon
    #[arg(long, env, default_value = "/var/run/docker.sock")]
    pub docker_socket: PathBuf,

    /// Daemon API version prefix
    #[arg(long, env, default_value = daemon_client::DEFAULT_API_VERSION)]
    pub docker_api_version: String,

    /// Directory holding one sub-directory per gradable project
    #[arg(long, env, default_value = "./projects")]
    pub projects_dir: PathBuf,

    /// Image used for git submissions
    #[arg(long, env, default_value = "w2wizard/git")]
    pub git_image: String,

    /// Image used for single-file submissions
    #[arg(long, env, default_value = "w2wizard/single")]
    pub single_image: String,

    /// Memory limit per container, in MiB
    #[arg(long, env, default_value_t = 50)]
    pub memory_limit_mb: u64,

    /// CPUs containers may run on
    #[arg(long, env, default_value = "0")]
    pub cpuset: String,

    /// Timeout for projects that do not configure one (e.g. "20s", "1m")
    #[arg(long, env, default_value = "20s", value_parser = humantime::parse_duration)]
    pub default_timeout: Duration,

    /// Output logs in JSON format
    #[arg(long, env)]
    pub log_json: bool,
}

impl Config {
    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            socket_path: self.docker_socket.clone(),
            api_version: self.docker_api_version.clone(),
            projects_dir: self.projects_dir.clone(),
            git_image: self.git_image.clone(),
            single_image: self.single_image.clone(),
            memory_limit_bytes: self.memory_limit_mb.saturating_mul(1024 * 1024),
            cpuset: self.cpuset.clone(),
            default_timeout: self.default_timeout,
        }
    }
}
