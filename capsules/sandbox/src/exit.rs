//! Exit-code taxonomy of the grading images.
//!
//! The images wrap the submission in a timeout wrapper and a test runner; the
//! exit code is the only signal that crosses back. Classification is a pure
//! function of that code and never looks at logs.

use serde::Serialize;

pub const SUCCESS: i64 = 0;
pub const MINOR_ERROR: i64 = 1;
pub const MAJOR_ERROR: i64 = 2;
pub const TIMEOUT: i64 = 124;
pub const SCRIPT_FAILURE: i64 = 127;
pub const NOT_FOUND: i64 = 128;
pub const KILLED: i64 = 137;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    Timeout,
    InternalError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::Timeout => "timeout",
            Outcome::InternalError => "internal_error",
        }
    }
}

/// Classification of one exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub outcome: Outcome,
    /// HTTP-style status reported to the caller.
    pub status: u16,
    pub meaning: &'static str,
}

impl Verdict {
    /// Codes that indicate broken infrastructure rather than a bad submission.
    pub fn is_fatal(&self) -> bool {
        self.outcome == Outcome::InternalError
    }
}

pub fn classify(exit_code: i64) -> Verdict {
    let (outcome, status, meaning) = match exit_code {
        SUCCESS => (Outcome::Pass, 200, "success"),
        MINOR_ERROR => (Outcome::Fail, 400, "test or assertion failure"),
        MAJOR_ERROR => (Outcome::Fail, 400, "major error"),
        TIMEOUT => (Outcome::Timeout, 408, "timed out"),
        SCRIPT_FAILURE => (Outcome::InternalError, 500, "build script is malformed"),
        NOT_FOUND => (Outcome::Fail, 400, "requested resource not found"),
        KILLED => (Outcome::Fail, 400, "killed: out of memory or SIGKILL"),
        _ => (Outcome::InternalError, 500, "unrecognized exit code"),
    };
    Verdict {
        outcome,
        status,
        meaning,
    }
}
