//! Terminal rendering for pipeline reports
//!
//! The summary always prints every recorded phase, even after an
//! abort, so a partial run is diagnosable without log excavation.

use owo_colors::OwoColorize;
use trustmend_common::audit::{AuditFinding, AuditState};
use trustmend_common::pipeline::{PhaseStatus, RunReport};
use trustmend_common::probe::ProbeOutcome;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

pub fn print_header(title: &str) {
    println!("\n{}", RULE.blue());
    println!("  {}", title.bold());
    println!("{}\n", RULE.blue());
}

fn status_line(status: PhaseStatus) -> String {
    match status {
        PhaseStatus::Ok => format!("{}", "ok".green()),
        PhaseStatus::SkippedIdempotent => format!("{}", "skipped-idempotent".cyan()),
        PhaseStatus::Failed => format!("{}", "failed".red()),
        PhaseStatus::Aborted => format!("{}", "aborted".yellow()),
    }
}

/// Render the audit findings table.
pub fn render_findings(findings: &[AuditFinding]) {
    for finding in findings {
        let (glyph, detail) = match &finding.state {
            AuditState::Secure(detail) => (format!("{}", "✓".green()), detail.clone()),
            AuditState::Insecure(detail) => (format!("{}", "✗".red()), detail.clone()),
            AuditState::Unreadable(detail) => (format!("{}", "⚠".yellow()), detail.clone()),
        };
        println!("  {} {:<14} {}", glyph, finding.service, detail);
    }
}

/// Render the full run summary.
pub fn render_report(report: &RunReport) {
    print_header("Remediation Summary");

    if let Some(info) = &report.cert_info {
        println!("Root CA: {}\n", info);
    }

    for result in &report.run.phase_results {
        println!(
            "  {:<16} {:<20} {:>6}ms  {}",
            result.phase,
            status_line(result.status),
            result.duration_ms,
            result.detail
        );
    }

    if !report.findings.is_empty() {
        println!("\nAudit:");
        render_findings(&report.findings);
    }

    if !report.rollouts.is_empty() {
        println!("\nRollouts:");
        for rollout in &report.rollouts {
            let glyph = if rollout.succeeded() {
                format!("{}", "✓".green())
            } else {
                format!("{}", "✗".red())
            };
            println!(
                "  {} {:<14} synced={} ready={} {}ms",
                glyph, rollout.app, rollout.synced, rollout.ready, rollout.elapsed_ms
            );
        }
    }

    for finding in report.log_findings.iter().filter(|f| !f.clean()) {
        println!("\n{} {} logs:", "⚠".yellow(), finding.service);
        if let Some(err) = &finding.fetch_error {
            println!("    (logs unavailable: {})", err);
        }
        for line in &finding.suspect_lines {
            println!("    {}", line);
        }
    }

    if !report.probes.is_empty() {
        println!("\nEndpoints:");
        for probe in &report.probes {
            let glyph = match probe.outcome {
                ProbeOutcome::Reachable => format!("{}", "✓".green()),
                ProbeOutcome::Unreachable => format!("{}", "✗".yellow()),
                ProbeOutcome::TlsError => format!("{}", "✗".red()),
            };
            println!(
                "  {} {:<40} {:<12} {}ms",
                glyph,
                probe.url,
                probe.outcome.as_str(),
                probe.latency_ms
            );
        }
    }

    if let Some(warning) = &report.trust_warning {
        println!("\n{} trust install: {}", "⚠".yellow(), warning);
    }

    println!(
        "\nrun {} finished with exit code {}",
        report.run.run_id,
        report.run.exit_code
    );
}

/// Printed after a successful mutating run.
pub fn print_next_steps(branch: &str) {
    println!("\n{}", "Next steps:".cyan());
    println!("  1. Review the pushed commit on {}", branch);
    println!("  2. Watch the applications settle in the deployment dashboard");
    println!("  3. Test SSO logins against the remediated services");
}
