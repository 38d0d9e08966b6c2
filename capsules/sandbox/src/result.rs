use serde::Serialize;
use std::time::Duration;

use crate::exit::{classify, Outcome};

/// Terminal result of one grading job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResult {
    job_id: String,
    outcome: Outcome,
    status: u16,
    exit_code: Option<i64>,
    logs: String,
    error: Option<String>,
    duration_ms: u64,
}

impl GradeResult {
    /// Result for a container that ran to completion.
    pub fn from_exit(
        job_id: impl Into<String>,
        exit_code: i64,
        logs: String,
        duration: Duration,
    ) -> Self {
        let verdict = classify(exit_code);
        let error = verdict
            .is_fatal()
            .then(|| format!("{} (exit code {exit_code})", verdict.meaning));
        Self {
            job_id: job_id.into(),
            outcome: verdict.outcome,
            status: verdict.status,
            exit_code: Some(exit_code),
            logs,
            error,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Result for a job that never produced an exit code.
    pub fn internal_error(
        job_id: impl Into<String>,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            outcome: Outcome::InternalError,
            status: 500,
            exit_code: None,
            logs: String::new(),
            error: Some(message.into()),
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn exit_code(&self) -> Option<i64> {
        self.exit_code
    }

    pub fn logs(&self) -> &str {
        &self.logs
    }

    /// Root cause for internal errors.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Text shown to the submitter: the logs, prefixed by the root cause when
    /// the job failed internally.
    pub fn report(&self) -> String {
        match (&self.error, self.logs.is_empty()) {
            (Some(error), true) => error.clone(),
            (Some(error), false) => format!("{error}\n{}", self.logs),
            (None, _) => self.logs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_failure_keeps_code_and_logs() {
        let result = GradeResult::from_exit(
            "job-1",
            127,
            "[2024-01-01 00:00:00] make: not found".to_string(),
            Duration::from_millis(1500),
        );
        assert_eq!(result.outcome(), Outcome::InternalError);
        assert_eq!(result.status(), 500);
        assert_eq!(result.exit_code(), Some(127));
        assert_eq!(result.duration_ms(), 1500);
        assert_eq!(
            result.report(),
            "build script is malformed (exit code 127)\n[2024-01-01 00:00:00] make: not found"
        );
    }

    #[test]
    fn serializes_camel_case() {
        let result = GradeResult::from_exit("job-2", 124, String::new(), Duration::ZERO);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["jobId"], "job-2");
        assert_eq!(json["outcome"], "timeout");
        assert_eq!(json["status"], 408);
        assert_eq!(json["exitCode"], 124);
        assert!(json["error"].is_null());
    }

    #[test]
    fn internal_error_has_no_exit_code() {
        let result = GradeResult::internal_error("job-3", "daemon returned 500", Duration::ZERO);
        assert_eq!(result.exit_code(), None);
        assert_eq!(result.report(), "daemon returned 500");
    }
}
