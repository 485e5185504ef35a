//! Command execution layer
//!
//! Single place where external CLIs (git, kubectl, argocd, openssl,
//! trust-store tools) are invoked. Captures real exit code, stdout,
//! stderr, and duration, and returns structured results without
//! interpretation — callers decide what a non-zero exit means.
//!
//! The `CommandRunner` trait is the seam the orchestrator's tests use
//! to script external-collaborator behavior.

use std::process::Command;
use std::time::Instant;

/// Maximum output captured per stream.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// How an invocation terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// Ran and exited zero.
    Success,
    /// Ran and exited non-zero.
    NonZeroExit,
    /// The binary was not found on PATH.
    NotFound,
    /// The OS refused to spawn it.
    PermissionDenied,
    /// Any other spawn failure.
    SpawnError,
}

/// Structured result of one external command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Full command line, for logs and error detail.
    pub command: String,
    pub status: ExecStatus,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ExecResult {
    pub fn ok(&self) -> bool {
        self.status == ExecStatus::Success
    }

    /// stderr if non-empty, else stdout — whichever carries the
    /// tool's complaint.
    pub fn complaint(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// Abstraction over process spawning.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> ExecResult;
}

/// Runs commands on the real system.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> ExecResult {
        let command = render_command(program, args);
        tracing::debug!(%command, "executing");
        let start = Instant::now();

        match Command::new(program).args(args).output() {
            Ok(output) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let status = if output.status.success() {
                    ExecStatus::Success
                } else {
                    ExecStatus::NonZeroExit
                };
                ExecResult {
                    command,
                    status,
                    exit_code,
                    stdout: truncate_output(&output.stdout),
                    stderr: truncate_output(&output.stderr),
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
            Err(e) => {
                let status = match e.kind() {
                    std::io::ErrorKind::NotFound => ExecStatus::NotFound,
                    std::io::ErrorKind::PermissionDenied => ExecStatus::PermissionDenied,
                    _ => ExecStatus::SpawnError,
                };
                ExecResult {
                    command,
                    status,
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
        }
    }
}

fn render_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.to_string();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [truncated]", &text[..end])
}
