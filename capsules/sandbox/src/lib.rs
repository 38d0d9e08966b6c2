//! Grading sandbox: turns a grading job into a container run and the run's
//! exit code into a [`GradeResult`].

pub mod config;
pub mod error;
pub mod exit;
pub mod job;
pub mod orchestrator;
pub mod payload;
pub mod project;
pub mod registry;
pub mod result;

pub use config::SandboxConfig;
pub use error::SandboxError;
pub use exit::{classify, Outcome, Verdict};
pub use job::{GitJob, SingleFileJob};
pub use orchestrator::Sandbox;
pub use project::Project;
pub use registry::{JobRegistry, SweepReport};
pub use result::GradeResult;
