//! Deployed-service verification
//!
//! After the sync lands, scans the recent logs of each patched
//! workload for TLS/certificate complaints. Findings are warnings —
//! a busy service may legitimately mention certificates — so this
//! never fails the run, it surfaces what to look at.

use crate::exec::CommandRunner;
use crate::targets::ServiceTarget;
use serde::{Deserialize, Serialize};

const LOG_TAIL: &str = "50";
const MAX_QUOTED_LINES: usize = 5;

/// Log-scan result for one workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFinding {
    pub service: String,
    /// Suspicious lines, capped.
    pub suspect_lines: Vec<String>,
    /// Set when the logs themselves could not be fetched.
    pub fetch_error: Option<String>,
}

impl LogFinding {
    pub fn clean(&self) -> bool {
        self.suspect_lines.is_empty() && self.fetch_error.is_none()
    }
}

/// Scan the recent logs of every given target's workload.
pub fn scan_workload_logs(
    runner: &dyn CommandRunner,
    targets: &[&ServiceTarget],
) -> Vec<LogFinding> {
    targets
        .iter()
        .map(|target| {
            let result = runner.run(
                "kubectl",
                &[
                    "logs",
                    "-n",
                    &target.namespace,
                    "-l",
                    &target.selector,
                    "--tail",
                    LOG_TAIL,
                ],
            );
            if !result.ok() {
                return LogFinding {
                    service: target.name.clone(),
                    suspect_lines: Vec::new(),
                    fetch_error: Some(result.complaint().to_string()),
                };
            }
            LogFinding {
                service: target.name.clone(),
                suspect_lines: suspect_lines(&result.stdout),
                fetch_error: None,
            }
        })
        .collect()
}

fn suspect_lines(logs: &str) -> Vec<String> {
    logs.lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            lower.contains("certificate") || lower.contains("x509") || lower.contains("tls")
        })
        .take(MAX_QUOTED_LINES)
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::exec::{ExecResult, ExecStatus};
    use crate::targets::default_targets;

    struct LogRunner {
        logs: &'static str,
        fail: bool,
    }

    impl CommandRunner for LogRunner {
        fn run(&self, program: &str, args: &[&str]) -> ExecResult {
            ExecResult {
                command: format!("{} {}", program, args.join(" ")),
                status: if self.fail { ExecStatus::NonZeroExit } else { ExecStatus::Success },
                exit_code: i32::from(self.fail),
                stdout: self.logs.to_string(),
                stderr: if self.fail { "pods not found".to_string() } else { String::new() },
                duration_ms: 1,
            }
        }
    }

    fn patched_targets() -> Vec<ServiceTarget> {
        default_targets(&RunConfig::default())
            .into_iter()
            .filter(|t| t.patchable())
            .collect()
    }

    #[test]
    fn test_clean_logs_have_no_findings() {
        let runner = LogRunner { logs: "request handled\nready\n", fail: false };
        let targets = patched_targets();
        let refs: Vec<&ServiceTarget> = targets.iter().collect();
        let findings = scan_workload_logs(&runner, &refs);
        assert!(findings.iter().all(LogFinding::clean));
    }

    #[test]
    fn test_certificate_complaints_surface() {
        let runner = LogRunner {
            logs: "x509: certificate signed by unknown authority\nok\n",
            fail: false,
        };
        let targets = patched_targets();
        let refs: Vec<&ServiceTarget> = targets.iter().collect();
        let findings = scan_workload_logs(&runner, &refs);
        assert!(findings.iter().all(|f| !f.clean()));
        assert!(findings[0].suspect_lines[0].contains("x509"));
    }

    #[test]
    fn test_fetch_failure_is_a_warning_not_an_abort() {
        let runner = LogRunner { logs: "", fail: true };
        let targets = patched_targets();
        let refs: Vec<&ServiceTarget> = targets.iter().collect();
        let findings = scan_workload_logs(&runner, &refs);
        assert_eq!(findings.len(), refs.len());
        assert!(findings.iter().all(|f| f.fetch_error.is_some()));
    }

    #[test]
    fn test_suspect_lines_are_capped() {
        let noisy = "tls error\n".repeat(40);
        assert_eq!(suspect_lines(&noisy).len(), MAX_QUOTED_LINES);
    }
}
