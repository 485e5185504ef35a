//! Phase orchestrator
//!
//! Drives the fixed phase sequence, enforces confirmation gates,
//! aborts remaining phases on the first unrecoverable failure, and
//! produces the final report and exit code. Components only report
//! outcomes; this module is the only place that decides termination.

use crate::audit::{self, AuditFinding};
use crate::backup::BackupManager;
use crate::config::{RunConfig, PROBE_CONCURRENCY, ROLLOUT_POLL_INTERVAL_SECS};
use crate::confirm::ConfirmationGate;
use crate::deploy::{self, AppRollout, SyncApp};
use crate::errors::RemedyError;
use crate::exec::CommandRunner;
use crate::git::{self, CommitOutcome};
use crate::patch::{self, PatchOutcome};
use crate::probe::{self, ProbeResult};
use crate::targets::ServiceTarget;
use crate::trust;
use crate::verify::{self, LogFinding};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Exit codes the CLI maps the run outcome to.
pub const EXIT_OK: i32 = 0;
pub const EXIT_PREREQUISITE: i32 = 1;
pub const EXIT_PHASE_FAILED: i32 = 2;
pub const EXIT_ABORTED: i32 = 3;
pub const EXIT_TRUST_WARNING: i32 = 4;

/// The fixed phase ordering. The Summary step renders the results and
/// is not itself recorded, so the recorded sequence is always a prefix
/// of this list.
pub const PHASE_ORDER: [Phase; 11] = [
    Phase::Prerequisites,
    Phase::Audit,
    Phase::ConfirmApply,
    Phase::Patch,
    Phase::ConfirmCommit,
    Phase::Commit,
    Phase::Deploy,
    Phase::Verify,
    Phase::ConfirmTrust,
    Phase::InstallTrust,
    Phase::ProbeEndpoints,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Prerequisites,
    Audit,
    ConfirmApply,
    Patch,
    ConfirmCommit,
    Commit,
    Deploy,
    Verify,
    ConfirmTrust,
    InstallTrust,
    ProbeEndpoints,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Prerequisites => "prerequisites",
            Phase::Audit => "audit",
            Phase::ConfirmApply => "confirm-apply",
            Phase::Patch => "patch",
            Phase::ConfirmCommit => "confirm-commit",
            Phase::Commit => "commit",
            Phase::Deploy => "deploy",
            Phase::Verify => "verify",
            Phase::ConfirmTrust => "confirm-trust",
            Phase::InstallTrust => "install-trust",
            Phase::ProbeEndpoints => "probe-endpoints",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    Ok,
    SkippedIdempotent,
    Failed,
    Aborted,
}

impl PhaseStatus {
    /// Terminal statuses stop the run; nothing may follow them.
    pub fn terminal(&self) -> bool {
        matches!(self, PhaseStatus::Failed | PhaseStatus::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Ok => "ok",
            PhaseStatus::SkippedIdempotent => "skipped-idempotent",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Aborted => "aborted",
        }
    }
}

/// One recorded phase outcome. Appended, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub detail: String,
    pub duration_ms: u64,
}

/// Top-level state of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub target_branch: String,
    pub phase_results: Vec<PhaseResult>,
    pub aborted: bool,
    pub exit_code: i32,
}

impl PipelineRun {
    pub fn status_of(&self, phase: Phase) -> Option<PhaseStatus> {
        self.phase_results
            .iter()
            .find(|r| r.phase == phase)
            .map(|r| r.status)
    }
}

/// Everything the summary renders: the run plus per-component detail.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run: PipelineRun,
    pub findings: Vec<AuditFinding>,
    pub patches: Vec<PatchOutcome>,
    pub rollouts: Vec<AppRollout>,
    pub log_findings: Vec<LogFinding>,
    pub probes: Vec<ProbeResult>,
    /// Subject/expiry of the CA the remediation is built on.
    pub cert_info: Option<String>,
    pub trust_warning: Option<String>,
}

impl RunReport {
    /// Whether the run changed any artifact.
    pub fn changed_anything(&self) -> bool {
        self.patches.iter().any(|p| p.changed)
    }
}

/// Mutable state threaded through the phases of one run.
#[derive(Default)]
struct RunState {
    findings: Vec<AuditFinding>,
    patches: Vec<PatchOutcome>,
    rollouts: Vec<AppRollout>,
    log_findings: Vec<LogFinding>,
    probes: Vec<ProbeResult>,
    cert_info: Option<String>,
    trust_warning: Option<String>,
    ca_pem: Option<Vec<u8>>,
    backups: BackupManager,
}

pub struct Orchestrator<'a> {
    config: &'a RunConfig,
    targets: Vec<ServiceTarget>,
    runner: &'a dyn CommandRunner,
    gate: &'a dyn ConfirmationGate,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a RunConfig,
        targets: Vec<ServiceTarget>,
        runner: &'a dyn CommandRunner,
        gate: &'a dyn ConfirmationGate,
    ) -> Self {
        Self { config, targets, runner, gate }
    }

    /// Execute the full phase sequence (or the audit prefix on
    /// dry-run) and return the report.
    pub async fn execute(&self) -> RunReport {
        let mut run = PipelineRun {
            run_id: Uuid::new_v4(),
            target_branch: self.config.target_branch.clone(),
            phase_results: Vec::new(),
            aborted: false,
            exit_code: EXIT_OK,
        };
        let mut state = RunState::default();
        tracing::info!(run_id = %run.run_id, branch = %run.target_branch, "pipeline starting");

        for phase in PHASE_ORDER {
            let started = Instant::now();
            let (status, detail) = self.run_phase(phase, &mut state).await;
            let result = PhaseResult {
                phase,
                status,
                detail,
                duration_ms: started.elapsed().as_millis() as u64,
            };
            tracing::info!(phase = %phase, status = %status.as_str(), "phase finished");
            run.phase_results.push(result);

            if status.terminal() {
                break;
            }
            if self.config.dry_run && phase == Phase::Audit {
                tracing::info!("dry run, stopping after audit");
                break;
            }
        }

        run.aborted = run
            .phase_results
            .iter()
            .any(|r| r.status == PhaseStatus::Aborted);
        run.exit_code = exit_code(&run, state.trust_warning.is_some());

        RunReport {
            run,
            findings: state.findings,
            patches: state.patches,
            rollouts: state.rollouts,
            log_findings: state.log_findings,
            probes: state.probes,
            cert_info: state.cert_info,
            trust_warning: state.trust_warning,
        }
    }

    async fn run_phase(&self, phase: Phase, state: &mut RunState) -> (PhaseStatus, String) {
        match phase {
            Phase::Prerequisites => self.phase_prerequisites(state),
            Phase::Audit => self.phase_audit(state),
            Phase::ConfirmApply => self.phase_confirm_apply(),
            Phase::Patch => self.phase_patch(state),
            Phase::ConfirmCommit => self.phase_confirm_commit(state),
            Phase::Commit => self.phase_commit(state),
            Phase::Deploy => self.phase_deploy(state).await,
            Phase::Verify => self.phase_verify(state),
            Phase::ConfirmTrust => self.phase_confirm_trust(),
            Phase::InstallTrust => self.phase_install_trust(state),
            Phase::ProbeEndpoints => self.phase_probe_endpoints(state).await,
        }
    }

    /// Targets that participate in the mutating phases.
    fn pending_targets(&self) -> Vec<&ServiceTarget> {
        self.targets
            .iter()
            .filter(|t| t.patchable() && self.config.service_in_scope(&t.name))
            .collect()
    }

    fn phase_prerequisites(&self, state: &mut RunState) -> (PhaseStatus, String) {
        if !self.config.repo_root.join(".git").exists() {
            return (
                PhaseStatus::Failed,
                format!("{} is not a git working tree", self.config.repo_root.display()),
            );
        }

        // Dry runs only read the working tree.
        if self.config.dry_run {
            return (PhaseStatus::Ok, "working tree present (dry run)".to_string());
        }

        let mut missing = Vec::new();
        for (tool, args) in [
            ("git", vec!["--version"]),
            ("kubectl", vec!["version", "--client"]),
            ("argocd", vec!["version", "--client"]),
        ] {
            if !self.runner.run(tool, &args).ok() {
                missing.push(tool);
            }
        }
        if !missing.is_empty() {
            return (
                PhaseStatus::Failed,
                format!("required tools unavailable: {}", missing.join(", ")),
            );
        }

        match trust::fetch_ca_certificate(
            self.runner,
            &self.config.ca_secret,
            &self.config.ca_secret_namespace,
        ) {
            Ok(pem) => {
                state.cert_info = trust::inspect_certificate(self.runner, &pem);
                if let Some(info) = &state.cert_info {
                    tracing::info!(%info, "root CA");
                }
                state.ca_pem = Some(pem);
            }
            Err(e) => {
                return (
                    PhaseStatus::Failed,
                    format!("cannot proceed without the root CA secret: {}", e),
                );
            }
        }

        (PhaseStatus::Ok, "tools present, root CA secret readable".to_string())
    }

    fn phase_audit(&self, state: &mut RunState) -> (PhaseStatus, String) {
        state.findings = audit::audit_all(&self.config.repo_root, &self.targets);

        if audit::all_unreadable(&state.findings) {
            return (PhaseStatus::Failed, "every artifact is unreadable".to_string());
        }

        let secure = state.findings.iter().filter(|f| f.state.is_secure()).count();
        let unreadable = state
            .findings
            .iter()
            .filter(|f| f.state.is_unreadable())
            .count();
        let insecure = state.findings.len() - secure - unreadable;
        (
            PhaseStatus::Ok,
            format!("{} secure, {} insecure, {} unreadable", secure, insecure, unreadable),
        )
    }

    fn phase_confirm_apply(&self) -> (PhaseStatus, String) {
        let pending = self.pending_targets();
        if pending.is_empty() {
            return (PhaseStatus::SkippedIdempotent, "no patchable services in scope".to_string());
        }
        let names: Vec<&str> = pending.iter().map(|t| t.name.as_str()).collect();
        let prompt = format!("Apply TLS remediation patches to {}?", names.join(", "));
        if self.gate.confirm(&prompt) {
            (PhaseStatus::Ok, "confirmed".to_string())
        } else {
            (PhaseStatus::Aborted, "declined at apply gate".to_string())
        }
    }

    fn phase_patch(&self, state: &mut RunState) -> (PhaseStatus, String) {
        for target in self.pending_targets() {
            match patch::apply(&self.config.repo_root, target, &mut state.backups) {
                Ok(outcome) => state.patches.push(outcome),
                Err(e) => return (PhaseStatus::Failed, e.to_string()),
            }
        }

        let changed = state.patches.iter().filter(|p| p.changed).count();
        let unchanged = state.patches.len() - changed;
        if changed == 0 {
            (
                PhaseStatus::SkippedIdempotent,
                format!("{} artifact(s) already patched", unchanged),
            )
        } else {
            (PhaseStatus::Ok, format!("{} changed, {} already patched", changed, unchanged))
        }
    }

    fn phase_confirm_commit(&self, state: &RunState) -> (PhaseStatus, String) {
        if !state.patches.iter().any(|p| p.changed) {
            return (PhaseStatus::SkippedIdempotent, "nothing to commit".to_string());
        }
        let prompt = format!(
            "Commit and push {} artifact(s) to origin/{}?",
            state.patches.iter().filter(|p| p.changed).count(),
            self.config.target_branch
        );
        if self.gate.confirm(&prompt) {
            (PhaseStatus::Ok, "confirmed".to_string())
        } else {
            (PhaseStatus::Aborted, "declined at commit gate".to_string())
        }
    }

    fn phase_commit(&self, state: &RunState) -> (PhaseStatus, String) {
        let changed: Vec<&PatchOutcome> = state.patches.iter().filter(|p| p.changed).collect();
        if changed.is_empty() {
            return (PhaseStatus::SkippedIdempotent, "no staged changes".to_string());
        }

        // Stage the repo-relative paths; the runner executes git -C root.
        let services: Vec<String> = changed.iter().map(|p| p.target.clone()).collect();
        let paths: Vec<std::path::PathBuf> = self
            .targets
            .iter()
            .filter(|t| services.contains(&t.name))
            .map(|t| t.artifact.clone())
            .collect();

        match git::commit_and_push(
            self.runner,
            &self.config.repo_root,
            &paths,
            &services,
            &self.config.target_branch,
        ) {
            Ok(CommitOutcome::Committed { .. }) => {
                (PhaseStatus::Ok, format!("pushed to origin/{}", self.config.target_branch))
            }
            Ok(CommitOutcome::NothingToCommit) => {
                (PhaseStatus::SkippedIdempotent, "no staged changes".to_string())
            }
            Err(e) => (PhaseStatus::Failed, e.to_string()),
        }
    }

    async fn phase_deploy(&self, state: &mut RunState) -> (PhaseStatus, String) {
        let changed_services: Vec<&str> = state
            .patches
            .iter()
            .filter(|p| p.changed)
            .map(|p| p.target.as_str())
            .collect();
        if changed_services.is_empty() {
            return (PhaseStatus::SkippedIdempotent, "no artifacts changed, nothing to sync".to_string());
        }

        let mut apps: Vec<SyncApp> = Vec::new();
        for target in self.targets.iter().filter(|t| changed_services.contains(&t.name.as_str())) {
            if !apps.iter().any(|a| a.app == target.app) {
                apps.push(SyncApp {
                    app: target.app.clone(),
                    namespace: target.namespace.clone(),
                    workload: target.workload.clone(),
                });
            }
        }

        state.rollouts = deploy::sync_and_await(
            self.runner,
            &apps,
            self.config.sync_timeout(),
            Duration::from_secs(ROLLOUT_POLL_INTERVAL_SECS),
        )
        .await;

        let stuck: Vec<&str> = state
            .rollouts
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.app.as_str())
            .collect();
        if stuck.is_empty() {
            (PhaseStatus::Ok, format!("{} application(s) synced and ready", state.rollouts.len()))
        } else {
            let err = RemedyError::RolloutTimeout {
                app: stuck.join(", "),
                elapsed_ms: state
                    .rollouts
                    .iter()
                    .map(|r| r.elapsed_ms)
                    .max()
                    .unwrap_or(0),
            };
            (PhaseStatus::Failed, err.to_string())
        }
    }

    fn phase_verify(&self, state: &mut RunState) -> (PhaseStatus, String) {
        let targets = self.pending_targets();
        state.log_findings = verify::scan_workload_logs(self.runner, &targets);

        let noisy = state.log_findings.iter().filter(|f| !f.clean()).count();
        if noisy == 0 {
            (PhaseStatus::Ok, "no TLS complaints in recent logs".to_string())
        } else {
            // Warnings only; a mention of certificates is not proof of
            // failure.
            (PhaseStatus::Ok, format!("{} workload(s) worth a look, see log findings", noisy))
        }
    }

    fn phase_confirm_trust(&self) -> (PhaseStatus, String) {
        let prompt = "Install the cluster root CA into the local trust store?";
        if self.gate.confirm(prompt) {
            (PhaseStatus::Ok, "confirmed".to_string())
        } else {
            (PhaseStatus::Aborted, "declined at trust gate".to_string())
        }
    }

    fn phase_install_trust(&self, state: &mut RunState) -> (PhaseStatus, String) {
        let pem = match &state.ca_pem {
            Some(pem) => pem.clone(),
            None => match trust::fetch_ca_certificate(
                self.runner,
                &self.config.ca_secret,
                &self.config.ca_secret_namespace,
            ) {
                Ok(pem) => pem,
                Err(e) => {
                    let warning = e.to_string();
                    state.trust_warning = Some(warning.clone());
                    return (PhaseStatus::Ok, format!("warning: {}", warning));
                }
            },
        };

        match trust::install_local_trust(self.runner, &pem) {
            Ok(()) => (PhaseStatus::Ok, "root CA installed into local trust store".to_string()),
            Err(e) => {
                // Non-fatal: the service-side fix is already deployed.
                let warning = e.to_string();
                state.trust_warning = Some(warning.clone());
                (PhaseStatus::Ok, format!("warning: {}", warning))
            }
        }
    }

    async fn phase_probe_endpoints(&self, state: &mut RunState) -> (PhaseStatus, String) {
        let urls: Vec<String> = self.targets.iter().map(|t| t.endpoint.clone()).collect();
        let in_scope: Vec<String> = self
            .pending_targets()
            .iter()
            .map(|t| t.endpoint.clone())
            .collect();

        state.probes =
            probe::probe_all(&urls, self.config.probe_timeout(), PROBE_CONCURRENCY).await;

        let (failures, warnings) = probe::partition_failures(&state.probes, &in_scope);
        if failures.is_empty() {
            let detail = if warnings.is_empty() {
                format!("{} endpoint(s) reachable", state.probes.len())
            } else {
                format!(
                    "remediated endpoints reachable, {} out-of-scope warning(s)",
                    warnings.len()
                )
            };
            (PhaseStatus::Ok, detail)
        } else {
            let broken: Vec<String> = failures
                .iter()
                .map(|f| format!("{} ({})", f.url, f.outcome.as_str()))
                .collect();
            (PhaseStatus::Failed, format!("remediated endpoints failing: {}", broken.join(", ")))
        }
    }
}

/// Map the recorded run to the CLI exit code.
fn exit_code(run: &PipelineRun, trust_warning: bool) -> i32 {
    if run.aborted {
        return EXIT_ABORTED;
    }
    if let Some(failed) = run
        .phase_results
        .iter()
        .find(|r| r.status == PhaseStatus::Failed)
    {
        return if failed.phase == Phase::Prerequisites {
            EXIT_PREREQUISITE
        } else {
            EXIT_PHASE_FAILED
        };
    }
    if trust_warning {
        return EXIT_TRUST_WARNING;
    }
    EXIT_OK
}

/// True when `results` is a prefix of the fixed ordering and nothing
/// follows a terminal entry.
pub fn is_valid_phase_prefix(results: &[PhaseResult]) -> bool {
    if results.len() > PHASE_ORDER.len() {
        return false;
    }
    for (result, expected) in results.iter().zip(PHASE_ORDER.iter()) {
        if result.phase != *expected {
            return false;
        }
    }
    if let Some(pos) = results.iter().position(|r| r.status.terminal()) {
        return pos == results.len() - 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(phase: Phase, status: PhaseStatus) -> PhaseResult {
        PhaseResult { phase, status, detail: String::new(), duration_ms: 0 }
    }

    fn run_with(results: Vec<PhaseResult>) -> PipelineRun {
        let aborted = results.iter().any(|r| r.status == PhaseStatus::Aborted);
        PipelineRun {
            run_id: Uuid::new_v4(),
            target_branch: "dev".to_string(),
            phase_results: results,
            aborted,
            exit_code: 0,
        }
    }

    #[test]
    fn test_exit_code_success() {
        let run = run_with(PHASE_ORDER.iter().map(|p| result(*p, PhaseStatus::Ok)).collect());
        assert_eq!(exit_code(&run, false), EXIT_OK);
    }

    #[test]
    fn test_exit_code_prerequisite_failure() {
        let run = run_with(vec![result(Phase::Prerequisites, PhaseStatus::Failed)]);
        assert_eq!(exit_code(&run, false), EXIT_PREREQUISITE);
    }

    #[test]
    fn test_exit_code_core_phase_failure() {
        let run = run_with(vec![
            result(Phase::Prerequisites, PhaseStatus::Ok),
            result(Phase::Audit, PhaseStatus::Ok),
            result(Phase::ConfirmApply, PhaseStatus::Ok),
            result(Phase::Patch, PhaseStatus::Failed),
        ]);
        assert_eq!(exit_code(&run, false), EXIT_PHASE_FAILED);
    }

    #[test]
    fn test_exit_code_abort_beats_failure() {
        let run = run_with(vec![
            result(Phase::Prerequisites, PhaseStatus::Ok),
            result(Phase::Audit, PhaseStatus::Ok),
            result(Phase::ConfirmApply, PhaseStatus::Aborted),
        ]);
        assert_eq!(exit_code(&run, false), EXIT_ABORTED);
    }

    #[test]
    fn test_exit_code_trust_warning_is_partial_success() {
        let run = run_with(PHASE_ORDER.iter().map(|p| result(*p, PhaseStatus::Ok)).collect());
        assert_eq!(exit_code(&run, true), EXIT_TRUST_WARNING);
    }

    #[test]
    fn test_phase_prefix_accepts_full_ordering() {
        let results: Vec<PhaseResult> =
            PHASE_ORDER.iter().map(|p| result(*p, PhaseStatus::Ok)).collect();
        assert!(is_valid_phase_prefix(&results));
    }

    #[test]
    fn test_phase_prefix_rejects_entry_after_terminal() {
        let results = vec![
            result(Phase::Prerequisites, PhaseStatus::Ok),
            result(Phase::Audit, PhaseStatus::Failed),
            result(Phase::ConfirmApply, PhaseStatus::Ok),
        ];
        assert!(!is_valid_phase_prefix(&results));
    }

    #[test]
    fn test_phase_prefix_rejects_out_of_order() {
        let results = vec![
            result(Phase::Audit, PhaseStatus::Ok),
            result(Phase::Prerequisites, PhaseStatus::Ok),
        ];
        assert!(!is_valid_phase_prefix(&results));
    }

    #[test]
    fn test_phase_display_names() {
        assert_eq!(Phase::ConfirmApply.to_string(), "confirm-apply");
        assert_eq!(Phase::ProbeEndpoints.to_string(), "probe-endpoints");
        assert_eq!(PhaseStatus::SkippedIdempotent.as_str(), "skipped-idempotent");
    }
}
