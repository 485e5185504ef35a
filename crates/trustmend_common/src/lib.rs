//! trustmend_common - shared library for the TLS remediation pipeline
//!
//! Components are leaves (audit, backup, patch, git, deploy, probe,
//! trust, verify); the pipeline module sequences them behind the fixed
//! phase ordering and owns all termination decisions.

pub mod audit;
pub mod backup;
pub mod config;
pub mod confirm;
pub mod deploy;
pub mod errors;
pub mod exec;
pub mod git;
pub mod patch;
pub mod pipeline;
pub mod probe;
pub mod targets;
pub mod trust;
pub mod verify;

pub use config::RunConfig;
pub use errors::{RemedyError, Result};
pub use pipeline::{Orchestrator, PipelineRun, RunReport};
