//! Managed service registry
//!
//! Static description of every service whose configuration artifact the
//! pipeline audits, and the structural patch (if any) that replaces its
//! skip-verify setting with proper CA trust. Built once at startup from
//! the run configuration; immutable for the run.

use crate::config::RunConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where a secure block is inserted into an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anchor {
    /// After the first line containing this substring, re-indented to
    /// that line's indentation.
    AfterLine(String),
    /// Appended at the end of the document, at top level.
    DocumentEnd,
}

/// One block of lines to insert at one anchor. Line indentation is
/// relative to the anchor line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insertion {
    pub anchor: Anchor,
    pub lines: Vec<String>,
}

/// Declarative description of a structural change to one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSpec {
    /// Line substring identifying the insecure setting.
    pub insecure_key: String,
    /// Replacement for the insecure line; `None` removes the line.
    pub insecure_replacement: Option<String>,
    /// Secure blocks to add. Skipped when the post-patch marker is
    /// already present.
    pub insertions: Vec<Insertion>,
}

/// One managed service and its configuration artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTarget {
    pub name: String,
    /// Artifact path relative to the repo root.
    pub artifact: PathBuf,
    /// Substring whose presence means the artifact is still insecure.
    pub insecure_marker: String,
    /// Substring whose presence means the patch has been applied.
    pub post_patch_marker: String,
    /// `None` for audit-only targets.
    pub patch: Option<PatchSpec>,
    /// Application name in the declarative deployment engine.
    pub app: String,
    pub namespace: String,
    /// Deployment workload whose rollout is awaited.
    pub workload: String,
    /// Label selector used for log verification.
    pub selector: String,
    /// HTTPS endpoint probed after remediation.
    pub endpoint: String,
}

impl ServiceTarget {
    /// Whether this target participates in the mutating phases.
    pub fn patchable(&self) -> bool {
        self.patch.is_some()
    }
}

/// The fixed registry of managed services.
pub fn default_targets(config: &RunConfig) -> Vec<ServiceTarget> {
    vec![
        oauth2_proxy_target(config),
        grafana_target(config),
        argocd_target(config),
    ]
}

fn oauth2_proxy_target(config: &RunConfig) -> ServiceTarget {
    let lines = vec![
        "extraVolumes:".to_string(),
        "  - name: ca-bundle".to_string(),
        "    secret:".to_string(),
        format!("      secretName: {}", config.ca_secret),
        "      defaultMode: 420".to_string(),
        "extraVolumeMounts:".to_string(),
        "  - name: ca-bundle".to_string(),
        "    mountPath: /etc/ssl/certs/cluster-ca.crt".to_string(),
        "    subPath: tls.crt".to_string(),
        "    readOnly: true".to_string(),
        "extraEnv:".to_string(),
        "  - name: SSL_CERT_FILE".to_string(),
        "    value: /etc/ssl/certs/cluster-ca.crt".to_string(),
    ];
    ServiceTarget {
        name: "oauth2-proxy".to_string(),
        artifact: PathBuf::from("helm/oauth2-proxy/values.yaml"),
        insecure_marker: "sslInsecureSkipVerify: true".to_string(),
        post_patch_marker: "SSL_CERT_FILE".to_string(),
        patch: Some(PatchSpec {
            insecure_key: "sslInsecureSkipVerify: true".to_string(),
            insecure_replacement: Some("sslInsecureSkipVerify: false".to_string()),
            insertions: vec![Insertion { anchor: Anchor::DocumentEnd, lines }],
        }),
        app: "oauth2-proxy".to_string(),
        namespace: "automation".to_string(),
        workload: "oauth2-proxy".to_string(),
        selector: "app.kubernetes.io/name=oauth2-proxy".to_string(),
        endpoint: format!("https://auth.{}", config.domain),
    }
}

fn grafana_target(config: &RunConfig) -> ServiceTarget {
    let mount_lines = vec![
        "  # Mount CA certificate for TLS validation".to_string(),
        "  extraSecretMounts:".to_string(),
        "    - name: ca-cert".to_string(),
        format!("      secretName: {}", config.ca_secret),
        "      defaultMode: 0444".to_string(),
        "      mountPath: /etc/grafana/ca".to_string(),
        "      readOnly: true".to_string(),
    ];
    ServiceTarget {
        name: "grafana".to_string(),
        artifact: PathBuf::from("argocd/helm/prometheus/values.yaml"),
        insecure_marker: "tls_skip_verify_insecure: true".to_string(),
        post_patch_marker: "tls_client_ca:".to_string(),
        patch: Some(PatchSpec {
            insecure_key: "tls_skip_verify_insecure: true".to_string(),
            insecure_replacement: Some("tls_skip_verify_insecure: false".to_string()),
            insertions: vec![
                Insertion {
                    anchor: Anchor::AfterLine("grafana:".to_string()),
                    lines: mount_lines,
                },
                Insertion {
                    anchor: Anchor::AfterLine("tls_skip_verify_insecure".to_string()),
                    lines: vec!["tls_client_ca: /etc/grafana/ca/tls.crt".to_string()],
                },
            ],
        }),
        app: "prometheus".to_string(),
        namespace: "monitoring".to_string(),
        workload: "prometheus-grafana".to_string(),
        selector: "app.kubernetes.io/name=grafana".to_string(),
        endpoint: format!("https://grafana.{}", config.domain),
    }
}

/// Argo CD's rootCA lives in a Helm template this pipeline only reads;
/// the target is audited but never patched.
fn argocd_target(config: &RunConfig) -> ServiceTarget {
    ServiceTarget {
        name: "argocd".to_string(),
        artifact: PathBuf::from("helm/argocd-config/templates/configmap.yaml"),
        insecure_marker: "insecureSkipVerify: true".to_string(),
        post_patch_marker: "rootCA:".to_string(),
        patch: None,
        app: "argocd-config".to_string(),
        namespace: "argocd".to_string(),
        workload: "argocd-server".to_string(),
        selector: "app.kubernetes.io/name=argocd-server".to_string(),
        endpoint: format!("https://argocd.{}", config.domain),
    }
}
