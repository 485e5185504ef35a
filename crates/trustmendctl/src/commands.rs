//! Command handlers
//!
//! Each handler returns the process exit code; `main` does the exiting.

use crate::output;
use owo_colors::OwoColorize;
use std::fs;
use trustmend_common::audit;
use trustmend_common::backup;
use trustmend_common::confirm::{AutoConfirmGate, ConfirmationGate, InteractiveGate};
use trustmend_common::config::{RunConfig, PROBE_CONCURRENCY};
use trustmend_common::exec::SystemRunner;
use trustmend_common::pipeline::{Orchestrator, EXIT_ABORTED, EXIT_OK, EXIT_PHASE_FAILED};
use trustmend_common::probe;
use trustmend_common::targets::default_targets;
use trustmend_common::trust;
use trustmend_common::verify;

fn gate_for(config: &RunConfig) -> Box<dyn ConfirmationGate> {
    if config.assume_yes {
        Box::new(AutoConfirmGate)
    } else {
        Box::new(InteractiveGate)
    }
}

/// Full pipeline run (or the audit prefix under `--dry-run`).
pub async fn run(config: RunConfig) -> i32 {
    tracing::info!(
        branch = %config.target_branch,
        dry_run = config.dry_run,
        "starting remediation run"
    );
    let targets = default_targets(&config);
    let runner = SystemRunner;
    let gate = gate_for(&config);

    let orchestrator = Orchestrator::new(&config, targets, &runner, gate.as_ref());
    let report = orchestrator.execute().await;

    output::render_report(&report);
    if report.run.exit_code == EXIT_OK && report.changed_anything() {
        output::print_next_steps(&config.target_branch);
    }
    report.run.exit_code
}

/// Audit-only status check.
pub fn check(config: RunConfig, json: bool) -> i32 {
    let targets = default_targets(&config);
    let findings = audit::audit_all(&config.repo_root, &targets);

    if json {
        match serde_json::to_string_pretty(&findings) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => {
                eprintln!("cannot render findings: {}", e);
                return EXIT_PHASE_FAILED;
            }
        }
    } else {
        output::print_header("TLS Validation Status");
        output::render_findings(&findings);

        let secure = findings.iter().filter(|f| f.state.is_secure()).count();
        if secure == findings.len() {
            println!("\n{} all {} services have proper TLS validation", "✓".green(), secure);
        } else {
            println!(
                "\n{} {}/{} services secure, {} need attention",
                "⚠".yellow(),
                secure,
                findings.len(),
                findings.len() - secure
            );
        }
    }

    if audit::all_unreadable(&findings) {
        EXIT_PHASE_FAILED
    } else {
        EXIT_OK
    }
}

/// Deployed-service verification: log scan plus endpoint probes.
pub async fn verify(config: RunConfig) -> i32 {
    let targets = default_targets(&config);
    let runner = SystemRunner;

    let pending: Vec<_> = targets
        .iter()
        .filter(|t| t.patchable() && config.service_in_scope(&t.name))
        .collect();

    output::print_header("Verifying Deployed Services");

    let log_findings = verify::scan_workload_logs(&runner, &pending);
    for finding in &log_findings {
        if finding.clean() {
            println!("  {} {}: no TLS complaints in recent logs", "✓".green(), finding.service);
        } else if let Some(err) = &finding.fetch_error {
            println!("  {} {}: logs unavailable: {}", "⚠".yellow(), finding.service, err);
        } else {
            println!("  {} {}:", "⚠".yellow(), finding.service);
            for line in &finding.suspect_lines {
                println!("      {}", line);
            }
        }
    }

    let urls: Vec<String> = targets.iter().map(|t| t.endpoint.clone()).collect();
    let in_scope: Vec<String> = pending.iter().map(|t| t.endpoint.clone()).collect();
    let probes = probe::probe_all(&urls, config.probe_timeout(), PROBE_CONCURRENCY).await;

    println!();
    for result in &probes {
        let glyph = if result.outcome == probe::ProbeOutcome::Reachable {
            format!("{}", "✓".green())
        } else {
            format!("{}", "✗".red())
        };
        println!("  {} {:<40} {}", glyph, result.url, result.outcome.as_str());
    }

    let (failures, _) = probe::partition_failures(&probes, &in_scope);
    if failures.is_empty() {
        EXIT_OK
    } else {
        EXIT_PHASE_FAILED
    }
}

/// Standalone trust-store installation.
pub fn trust_install(config: RunConfig) -> i32 {
    let runner = SystemRunner;
    let pem = match trust::fetch_ca_certificate(&runner, &config.ca_secret, &config.ca_secret_namespace)
    {
        Ok(pem) => pem,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            return EXIT_PHASE_FAILED;
        }
    };

    if let Some(info) = trust::inspect_certificate(&runner, &pem) {
        println!("Root CA: {}", info);
    }

    let gate = gate_for(&config);
    if !gate.confirm("Install the cluster root CA into the local trust store?") {
        println!("{} cancelled, trust store unchanged", "✗".yellow());
        return EXIT_ABORTED;
    }

    match trust::install_local_trust(&runner, &pem) {
        Ok(()) => {
            println!("{} root CA installed into local trust store", "✓".green());
            EXIT_OK
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            EXIT_PHASE_FAILED
        }
    }
}

/// Explicit restore of every in-scope artifact from its latest backup.
/// Rollback is never automatic; this is the operator asking for it.
pub fn rollback(config: RunConfig) -> i32 {
    let targets = default_targets(&config);
    let pending: Vec<_> = targets
        .iter()
        .filter(|t| t.patchable() && config.service_in_scope(&t.name))
        .collect();

    let mut restorable = Vec::new();
    for target in &pending {
        let artifact = config.repo_root.join(&target.artifact);
        match backup::latest_backup(&artifact) {
            Some(backup_path) => restorable.push((target.name.clone(), artifact, backup_path)),
            None => println!("  {} {}: no backup found", "⚠".yellow(), target.name),
        }
    }

    if restorable.is_empty() {
        println!("nothing to restore");
        return EXIT_OK;
    }

    println!("Restoring from backups:");
    for (name, artifact, backup_path) in &restorable {
        println!("  {}: {} <- {}", name, artifact.display(), backup_path.display());
    }

    let gate = gate_for(&config);
    if !gate.confirm("Overwrite the artifacts above with their backups?") {
        println!("{} cancelled, nothing restored", "✗".yellow());
        return EXIT_ABORTED;
    }

    for (name, artifact, backup_path) in &restorable {
        if let Err(e) = fs::copy(backup_path, artifact) {
            eprintln!("{} restore failed for {}: {}", "✗".red(), name, e);
            return EXIT_PHASE_FAILED;
        }
        println!("  {} {} restored", "✓".green(), name);
    }
    EXIT_OK
}
