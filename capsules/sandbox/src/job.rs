use std::collections::BTreeMap;

use crate::error::SandboxError;

/// Separator of the program arguments passed to the single-file runner.
pub const ARG_SEPARATOR: &str = ";";

/// Grade a repository at a given revision against a project's tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitJob {
    pub repo_url: String,
    pub branch: String,
    pub commit: String,
    /// Extra environment passed to the container after the job variables.
    pub envs: BTreeMap<String, String>,
}

impl GitJob {
    pub fn new(
        repo_url: impl Into<String>,
        branch: impl Into<String>,
        commit: impl Into<String>,
    ) -> Self {
        Self {
            repo_url: repo_url.into(),
            branch: branch.into(),
            commit: commit.into(),
            envs: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), SandboxError> {
        for (field, value) in [
            ("repository URL", &self.repo_url),
            ("branch", &self.branch),
            ("commit", &self.commit),
        ] {
            if value.trim().is_empty() {
                return Err(SandboxError::InvalidJob(format!("{field} is required")));
            }
            if value.contains(|c: char| matches!(c, '\n' | '\r' | '\0')) {
                return Err(SandboxError::InvalidJob(format!(
                    "{field} contains control characters"
                )));
            }
        }
        Ok(())
    }
}

/// Compile and run one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleFileJob {
    pub language: String,
    pub content: String,
    pub flags: String,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
    pub envs: BTreeMap<String, String>,
}

impl SingleFileJob {
    pub fn new(language: impl Into<String>, content: impl Into<String>, timeout_seconds: u64) -> Self {
        Self {
            language: language.into(),
            content: content.into(),
            flags: String::new(),
            args: Vec::new(),
            timeout_seconds,
            envs: BTreeMap::new(),
        }
    }

    pub fn with_flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = flags.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.language.trim().is_empty() {
            return Err(SandboxError::InvalidJob("language is required".to_string()));
        }
        if self.timeout_seconds == 0 {
            return Err(SandboxError::InvalidJob(
                "timeout must be a positive number of seconds".to_string(),
            ));
        }
        if self.content.contains('\0') {
            return Err(SandboxError::InvalidJob(
                "source contains NUL bytes".to_string(),
            ));
        }
        if let Some(arg) = self
            .args
            .iter()
            .find(|arg| arg.contains(ARG_SEPARATOR) || arg.contains('\0'))
        {
            return Err(SandboxError::InvalidJob(format!(
                "argument {arg:?} contains '{ARG_SEPARATOR}' or a NUL byte"
            )));
        }
        Ok(())
    }
}
