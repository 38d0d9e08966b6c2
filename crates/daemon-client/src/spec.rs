//! Immutable description of one container to create.
//!
//! A [`ContainerSpec`] is validated when it is built, so the daemon never
//! sees a half-formed payload.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("container image must not be empty")]
    EmptyImage,

    #[error("a memory limit greater than zero is required")]
    MissingMemoryLimit,

    #[error("swap limit {swap} is below the memory limit {memory}")]
    SwapBelowMemory { memory: u64, swap: u64 },

    #[error("bind mount paths must be absolute: {path}")]
    RelativeBindPath { path: String },

    #[error("invalid environment variable name {key:?}")]
    InvalidEnvKey { key: String },
}

/// How much swap the container may use on top of its memory ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapPolicy {
    /// No swap at all: the swap ceiling equals the memory ceiling.
    Disabled,
    /// Total memory plus swap ceiling in bytes.
    Limit(u64),
    Unlimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl BindMount {
    pub fn read_only(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: true,
        }
    }

    fn render(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            mode
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    image: String,
    network_disabled: bool,
    tty: bool,
    user: Option<String>,
    memory_bytes: u64,
    swap: SwapPolicy,
    cpuset: Option<String>,
    binds: Vec<BindMount>,
    env: Vec<(String, String)>,
    labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn builder(image: impl Into<String>) -> ContainerSpecBuilder {
        ContainerSpecBuilder {
            image: image.into(),
            network_disabled: false,
            tty: false,
            user: None,
            memory_bytes: None,
            swap: SwapPolicy::Disabled,
            cpuset: None,
            binds: Vec::new(),
            env: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn network_disabled(&self) -> bool {
        self.network_disabled
    }

    pub fn tty(&self) -> bool {
        self.tty
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    pub fn swap(&self) -> SwapPolicy {
        self.swap
    }

    pub fn cpuset(&self) -> Option<&str> {
        self.cpuset.as_deref()
    }

    pub fn binds(&self) -> &[BindMount] {
        &self.binds
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Value of the first environment entry named `key`.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// JSON body for `POST /containers/create`.
    pub fn to_create_body(&self) -> serde_json::Result<Vec<u8>> {
        let memory_swap = match self.swap {
            SwapPolicy::Disabled => self.memory_bytes as i64,
            SwapPolicy::Limit(limit) => limit as i64,
            SwapPolicy::Unlimited => -1,
        };
        let body = CreateBody {
            image: &self.image,
            network_disabled: self.network_disabled,
            attach_stdin: false,
            attach_stdout: false,
            attach_stderr: false,
            open_stdin: false,
            tty: self.tty,
            user: self.user.as_deref(),
            env: self
                .env
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect(),
            labels: &self.labels,
            host_config: HostConfigBody {
                auto_remove: false,
                privileged: false,
                memory: self.memory_bytes,
                memory_swap,
                cpuset_cpus: self.cpuset.as_deref(),
                binds: self.binds.iter().map(BindMount::render).collect(),
            },
        };
        serde_json::to_vec(&body)
    }
}

#[derive(Debug, Clone)]
pub struct ContainerSpecBuilder {
    image: String,
    network_disabled: bool,
    tty: bool,
    user: Option<String>,
    memory_bytes: Option<u64>,
    swap: SwapPolicy,
    cpuset: Option<String>,
    binds: Vec<BindMount>,
    env: Vec<(String, String)>,
    labels: BTreeMap<String, String>,
}

impl ContainerSpecBuilder {
    pub fn network_disabled(mut self, disabled: bool) -> Self {
        self.network_disabled = disabled;
        self
    }

    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }

    pub fn swap(mut self, swap: SwapPolicy) -> Self {
        self.swap = swap;
        self
    }

    pub fn cpuset(mut self, cpus: impl Into<String>) -> Self {
        self.cpuset = Some(cpus.into());
        self
    }

    pub fn bind(mut self, mount: BindMount) -> Self {
        self.binds.push(mount);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<ContainerSpec, SpecError> {
        if self.image.trim().is_empty() {
            return Err(SpecError::EmptyImage);
        }
        let memory_bytes = match self.memory_bytes {
            Some(bytes) if bytes > 0 => bytes,
            _ => return Err(SpecError::MissingMemoryLimit),
        };
        if let SwapPolicy::Limit(swap) = self.swap {
            if swap < memory_bytes {
                return Err(SpecError::SwapBelowMemory {
                    memory: memory_bytes,
                    swap,
                });
            }
        }
        for mount in &self.binds {
            if !mount.host_path.is_absolute() || !Path::new(&mount.container_path).is_absolute() {
                return Err(SpecError::RelativeBindPath {
                    path: format!("{}:{}", mount.host_path.display(), mount.container_path),
                });
            }
        }
        if let Some((key, _)) = self
            .env
            .iter()
            .find(|(key, _)| key.is_empty() || key.contains('='))
        {
            return Err(SpecError::InvalidEnvKey { key: key.clone() });
        }

        Ok(ContainerSpec {
            image: self.image,
            network_disabled: self.network_disabled,
            tty: self.tty,
            user: self.user,
            memory_bytes,
            swap: self.swap,
            cpuset: self.cpuset,
            binds: self.binds,
            env: self.env,
            labels: self.labels,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateBody<'a> {
    image: &'a str,
    network_disabled: bool,
    attach_stdin: bool,
    attach_stdout: bool,
    attach_stderr: bool,
    open_stdin: bool,
    tty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    env: Vec<String>,
    labels: &'a BTreeMap<String, String>,
    host_config: HostConfigBody<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfigBody<'a> {
    auto_remove: bool,
    privileged: bool,
    memory: u64,
    memory_swap: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    cpuset_cpus: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    binds: Vec<String>,
}
