//! Project lookup under the projects directory.
//!
//! A project is a directory `<projects_dir>/<name>` holding the test
//! descriptor `index.test.ts` and an optional `config.json`.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SandboxError;

pub const TEST_DESCRIPTOR: &str = "index.test.ts";
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    /// Canonical absolute path, suitable for a bind mount.
    pub dir: PathBuf,
    pub enabled: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    timeout: Option<TimeoutValue>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimeoutValue {
    Seconds(u64),
    Text(String),
}

impl Project {
    pub fn locate(projects_dir: &Path, name: &str) -> Result<Self, SandboxError> {
        let not_found = || SandboxError::ProjectNotFound {
            name: name.to_string(),
        };
        if !is_valid_name(name) {
            return Err(not_found());
        }

        let dir = projects_dir.join(name);
        if !dir.join(TEST_DESCRIPTOR).is_file() {
            return Err(not_found());
        }
        let dir = fs::canonicalize(&dir).map_err(|_| not_found())?;

        let config_error = |message: String| SandboxError::ProjectConfig {
            name: name.to_string(),
            message,
        };
        let config = match fs::read(dir.join(CONFIG_FILE)) {
            Ok(raw) => serde_json::from_slice::<ConfigFile>(&raw)
                .map_err(|err| config_error(format!("{CONFIG_FILE}: {err}")))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => ConfigFile {
                enabled: true,
                timeout: None,
            },
            Err(err) => return Err(config_error(format!("{CONFIG_FILE}: {err}"))),
        };

        let timeout = match config.timeout {
            None => None,
            Some(TimeoutValue::Seconds(0)) => {
                return Err(config_error("timeout must be positive".to_string()))
            }
            Some(TimeoutValue::Seconds(secs)) => Some(Duration::from_secs(secs)),
            Some(TimeoutValue::Text(text)) => Some(
                humantime::parse_duration(&text)
                    .map_err(|err| config_error(format!("timeout {text:?}: {err}")))?,
            ),
        };

        Ok(Self {
            name: name.to_string(),
            dir,
            enabled: config.enabled,
            timeout,
        })
    }
}

/// Names map directly onto a directory, so only plain path segments pass.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
