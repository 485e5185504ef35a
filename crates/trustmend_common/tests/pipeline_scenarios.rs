//! End-to-end pipeline scenarios against a fixture working tree.
//!
//! External collaborators (git, kubectl, argocd, trust stores) are
//! scripted through the CommandRunner seam; endpoints are served by
//! throwaway local listeners so probes exercise real sockets.

use base64::Engine;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use trustmend_common::confirm::ConfirmationGate;
use trustmend_common::exec::{CommandRunner, ExecResult, ExecStatus};
use trustmend_common::pipeline::{
    is_valid_phase_prefix, Orchestrator, Phase, PhaseStatus, EXIT_ABORTED, EXIT_OK,
    EXIT_PHASE_FAILED, EXIT_TRUST_WARNING,
};
use trustmend_common::targets::{default_targets, ServiceTarget};
use trustmend_common::RunConfig;

const CERT_PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIBtest\n-----END CERTIFICATE-----\n";

const OAUTH2_INSECURE: &str = "\
config:
  clientID: oauth2-proxy
  sslInsecureSkipVerify: true
";

const GRAFANA_INSECURE: &str = "\
grafana:
  adminUser: admin
  grafana.ini:
    auth.generic_oauth:
      enabled: true
      tls_skip_verify_insecure: true
";

const ARGOCD_SECURE: &str = "\
data:
  rootCA: |
    {{ .Values.rootCA }}
";

/// Gate answering from a script; defaults to yes when exhausted.
struct ScriptedGate {
    answers: Mutex<VecDeque<bool>>,
}

impl ScriptedGate {
    fn new(answers: &[bool]) -> Self {
        Self { answers: Mutex::new(answers.iter().copied().collect()) }
    }

    fn all_yes() -> Self {
        Self::new(&[])
    }
}

impl ConfirmationGate for ScriptedGate {
    fn confirm(&self, _prompt: &str) -> bool {
        self.answers.lock().unwrap().pop_front().unwrap_or(true)
    }
}

/// Scripted cluster: git/argocd/openssl succeed, kubectl answers from
/// canned data, trust-store tool availability is configurable.
struct ClusterRunner {
    never_ready: Vec<&'static str>,
    trust_tool_present: bool,
    invocations: Mutex<Vec<String>>,
}

impl ClusterRunner {
    fn new() -> Self {
        Self {
            never_ready: Vec::new(),
            trust_tool_present: true,
            invocations: Mutex::new(Vec::new()),
        }
    }

    fn secret_json() -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(CERT_PEM);
        format!(r#"{{"data":{{"tls.crt":"{}"}}}}"#, encoded)
    }

    fn deployment_json(&self, workload: &str) -> String {
        let ready = u64::from(!self.never_ready.contains(&workload));
        format!(
            r#"{{"spec":{{"replicas":1}},"status":{{"readyReplicas":{},"updatedReplicas":{}}}}}"#,
            ready, ready
        )
    }
}

impl CommandRunner for ClusterRunner {
    fn run(&self, program: &str, args: &[&str]) -> ExecResult {
        let command = format!("{} {}", program, args.join(" "));
        self.invocations.lock().unwrap().push(command.clone());

        let mut success = true;
        let mut stdout = String::new();

        match program {
            // The patched artifacts are staged, so the diff guard
            // reports a pending change.
            "git" if args.contains(&"--cached") => {
                success = false;
            }
            "kubectl" if args.first() == Some(&"get") && args.get(1) == Some(&"secret") => {
                stdout = Self::secret_json();
            }
            "kubectl" if args.first() == Some(&"get") && args.get(1) == Some(&"deployment") => {
                stdout = self.deployment_json(args[2]);
            }
            "kubectl" if args.first() == Some(&"logs") => {
                stdout = "request handled\n".to_string();
            }
            "openssl" => {
                stdout = "subject=CN = Cluster Root CA\nnotAfter=Jan  1 00:00:00 2030 GMT\n"
                    .to_string();
            }
            "which" => {
                success = self.trust_tool_present && args == ["trust"];
            }
            _ => {}
        }

        ExecResult {
            command,
            status: if success { ExecStatus::Success } else { ExecStatus::NonZeroExit },
            exit_code: i32::from(!success),
            stdout,
            stderr: String::new(),
            duration_ms: 1,
        }
    }
}

/// Seed a fixture working tree with the three artifacts.
fn seed_repo(root: &Path) {
    fs::create_dir_all(root.join(".git")).unwrap();
    for (rel, content) in [
        ("helm/oauth2-proxy/values.yaml", OAUTH2_INSECURE),
        ("argocd/helm/prometheus/values.yaml", GRAFANA_INSECURE),
        ("helm/argocd-config/templates/configmap.yaml", ARGOCD_SECURE),
    ] {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

/// One-shot HTTP listener; answers a single request then goes away.
async fn serve_once() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await;
        }
    });
    format!("http://{}", addr)
}

fn config_for(root: &Path) -> RunConfig {
    RunConfig {
        repo_root: root.to_path_buf(),
        sync_timeout_secs: 1,
        probe_timeout_secs: 2,
        ..RunConfig::default()
    }
}

/// Registry with endpoints rewired to local listeners. The audit-only
/// argocd endpoint points at a dead port so out-of-scope failures are
/// exercised too.
async fn local_targets(config: &RunConfig) -> Vec<ServiceTarget> {
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    };

    let mut targets = default_targets(config);
    for target in &mut targets {
        target.endpoint = if target.patchable() { serve_once().await } else { dead.clone() };
    }
    targets
}

fn artifact_contents(root: &Path) -> HashMap<PathBuf, String> {
    let mut contents = HashMap::new();
    for target in default_targets(&RunConfig::default()) {
        let path = root.join(&target.artifact);
        contents.insert(path.clone(), fs::read_to_string(&path).unwrap());
    }
    contents
}

fn backup_count(root: &Path) -> usize {
    fn walk(dir: &Path, count: &mut usize) {
        for entry in fs::read_dir(dir).unwrap().flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, count);
            } else if path.file_name().unwrap().to_string_lossy().contains(".backup.") {
                *count += 1;
            }
        }
    }
    let mut count = 0;
    walk(root, &mut count);
    count
}

#[tokio::test]
async fn scenario_a_insecure_artifacts_get_fixed() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());
    let config = config_for(dir.path());
    let targets = local_targets(&config).await;
    let runner = ClusterRunner::new();
    let gate = ScriptedGate::all_yes();

    let report = Orchestrator::new(&config, targets, &runner, &gate).execute().await;

    assert_eq!(report.run.exit_code, EXIT_OK);
    assert!(is_valid_phase_prefix(&report.run.phase_results));
    assert_eq!(report.run.phase_results.len(), 11);

    let oauth2 = fs::read_to_string(dir.path().join("helm/oauth2-proxy/values.yaml")).unwrap();
    assert!(!oauth2.contains("sslInsecureSkipVerify: true"));
    assert!(oauth2.contains("SSL_CERT_FILE"));

    let grafana =
        fs::read_to_string(dir.path().join("argocd/helm/prometheus/values.yaml")).unwrap();
    assert!(grafana.contains("tls_client_ca:"));

    // Backup-before-mutate: one backup per changed artifact.
    assert_eq!(backup_count(dir.path()), 2);

    // The committer staged exactly the changed paths and pushed.
    let invocations = runner.invocations.lock().unwrap();
    assert!(invocations.iter().any(|c| c.contains("add -- helm/oauth2-proxy/values.yaml")));
    assert!(invocations.iter().any(|c| c.contains("push origin dev")));

    // Certificate inspection surfaced during prerequisites.
    assert!(report.cert_info.unwrap().contains("Cluster Root CA"));
}

#[tokio::test]
async fn scenario_b_second_run_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());
    let config = config_for(dir.path());
    let runner = ClusterRunner::new();
    let gate = ScriptedGate::all_yes();

    let targets = local_targets(&config).await;
    let first = Orchestrator::new(&config, targets, &runner, &gate).execute().await;
    assert_eq!(first.run.exit_code, EXIT_OK);

    let before = artifact_contents(dir.path());
    let backups_before = backup_count(dir.path());

    let targets = local_targets(&config).await;
    let second = Orchestrator::new(&config, targets, &runner, &gate).execute().await;

    assert_eq!(second.run.exit_code, EXIT_OK);
    assert_eq!(second.run.status_of(Phase::Patch), Some(PhaseStatus::SkippedIdempotent));
    assert_eq!(second.run.status_of(Phase::Commit), Some(PhaseStatus::SkippedIdempotent));
    assert_eq!(second.run.status_of(Phase::Deploy), Some(PhaseStatus::SkippedIdempotent));
    assert!(second.patches.iter().all(|p| !p.changed));

    // Zero additional file changes and zero new backups.
    assert_eq!(artifact_contents(dir.path()), before);
    assert_eq!(backup_count(dir.path()), backups_before);
}

#[tokio::test]
async fn scenario_c_declined_apply_gate_aborts_untouched() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());
    let config = config_for(dir.path());
    let targets = local_targets(&config).await;
    let runner = ClusterRunner::new();
    let gate = ScriptedGate::new(&[false]);

    let before = artifact_contents(dir.path());
    let report = Orchestrator::new(&config, targets, &runner, &gate).execute().await;

    assert_eq!(report.run.exit_code, EXIT_ABORTED);
    assert!(report.run.aborted);
    assert!(is_valid_phase_prefix(&report.run.phase_results));

    let last = report.run.phase_results.last().unwrap();
    assert_eq!(last.phase, Phase::ConfirmApply);
    assert_eq!(last.status, PhaseStatus::Aborted);

    // No file was modified and no backup was taken.
    assert_eq!(artifact_contents(dir.path()), before);
    assert_eq!(backup_count(dir.path()), 0);
}

#[tokio::test]
async fn scenario_d_rollout_timeout_preserves_partial_status() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());
    let mut config = config_for(dir.path());
    // Zero timeout: the workload gets exactly one readiness poll.
    config.sync_timeout_secs = 0;
    let targets = local_targets(&config).await;
    let mut runner = ClusterRunner::new();
    runner.never_ready = vec!["prometheus-grafana"];
    let gate = ScriptedGate::all_yes();

    let report = Orchestrator::new(&config, targets, &runner, &gate).execute().await;

    assert_eq!(report.run.exit_code, EXIT_PHASE_FAILED);
    assert_eq!(report.run.status_of(Phase::Deploy), Some(PhaseStatus::Failed));
    assert!(is_valid_phase_prefix(&report.run.phase_results));

    // Both apps have a recorded outcome; one timed out, one succeeded.
    assert_eq!(report.rollouts.len(), 2);
    let stuck: Vec<_> = report.rollouts.iter().filter(|r| !r.succeeded()).collect();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].app, "prometheus");
    assert!(stuck[0].synced);
    assert!(report.rollouts.iter().any(|r| r.succeeded()));
}

#[tokio::test]
async fn trust_install_failure_is_partial_success() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());
    let config = config_for(dir.path());
    let targets = local_targets(&config).await;
    let mut runner = ClusterRunner::new();
    runner.trust_tool_present = false;
    let gate = ScriptedGate::all_yes();

    let report = Orchestrator::new(&config, targets, &runner, &gate).execute().await;

    assert_eq!(report.run.exit_code, EXIT_TRUST_WARNING);
    assert!(report.trust_warning.is_some());
    // The core phases all succeeded; trust is the only blemish.
    assert_eq!(report.run.status_of(Phase::Commit), Some(PhaseStatus::Ok));
    assert_eq!(report.run.status_of(Phase::InstallTrust), Some(PhaseStatus::Ok));
}

#[tokio::test]
async fn dry_run_stops_after_audit() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());
    let mut config = config_for(dir.path());
    config.dry_run = true;
    let targets = local_targets(&config).await;
    let runner = ClusterRunner::new();
    let gate = ScriptedGate::new(&[false]); // must never be consulted

    let before = artifact_contents(dir.path());
    let report = Orchestrator::new(&config, targets, &runner, &gate).execute().await;

    assert_eq!(report.run.exit_code, EXIT_OK);
    let phases: Vec<Phase> = report.run.phase_results.iter().map(|r| r.phase).collect();
    assert_eq!(phases, vec![Phase::Prerequisites, Phase::Audit]);
    assert_eq!(artifact_contents(dir.path()), before);
    assert_eq!(report.findings.len(), 3);
}

#[tokio::test]
async fn service_allowlist_limits_mutation() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());
    let mut config = config_for(dir.path());
    config.service_allowlist = vec!["oauth2-proxy".to_string()];
    let targets = local_targets(&config).await;
    let runner = ClusterRunner::new();
    let gate = ScriptedGate::all_yes();

    let report = Orchestrator::new(&config, targets, &runner, &gate).execute().await;

    assert_eq!(report.run.exit_code, EXIT_OK);
    assert_eq!(report.patches.len(), 1);
    assert_eq!(report.patches[0].target, "oauth2-proxy");

    // Grafana's artifact is untouched.
    let grafana =
        fs::read_to_string(dir.path().join("argocd/helm/prometheus/values.yaml")).unwrap();
    assert!(grafana.contains("tls_skip_verify_insecure: true"));
}
