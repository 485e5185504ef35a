//! Run configuration
//!
//! One immutable `RunConfig` is constructed at startup from defaults,
//! environment variables, and CLI flags (flags win), then passed to
//! every component call. No component reads the environment itself.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default GitOps branch the remediation commits to.
pub const DEFAULT_BRANCH: &str = "dev";

/// Default per-application rollout timeout.
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 180;

/// Default per-URL probe timeout.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Interval between rollout status polls.
pub const ROLLOUT_POLL_INTERVAL_SECS: u64 = 5;

/// Bounded worker count for endpoint probes.
pub const PROBE_CONCURRENCY: usize = 4;

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root of the GitOps working tree holding the Helm artifacts.
    pub repo_root: PathBuf,

    /// Branch the committer pushes to.
    pub target_branch: String,

    /// Base domain the service endpoints are probed under.
    pub domain: String,

    /// Name of the secret holding the cluster root CA.
    pub ca_secret: String,

    /// Namespace of the root CA secret.
    pub ca_secret_namespace: String,

    /// Audit only; never mutate, commit, or deploy.
    pub dry_run: bool,

    /// Treat every confirmation gate as pre-answered "yes".
    pub assume_yes: bool,

    /// Restrict patching/deploying/probing to these service names.
    /// Empty means all registered services.
    pub service_allowlist: Vec<String>,

    /// Per-application rollout timeout in seconds.
    pub sync_timeout_secs: u64,

    /// Per-URL probe timeout in seconds.
    pub probe_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            target_branch: DEFAULT_BRANCH.to_string(),
            domain: "homelab.internal".to_string(),
            ca_secret: "cluster-root-ca".to_string(),
            ca_secret_namespace: "cert-manager".to_string(),
            dry_run: false,
            assume_yes: false,
            service_allowlist: Vec::new(),
            sync_timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
        }
    }
}

impl RunConfig {
    /// Build a config from the process environment. CLI flags are
    /// applied on top by the caller.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(root) = env::var("TRUSTMEND_REPO_ROOT") {
            config.repo_root = PathBuf::from(root);
        }
        if let Ok(branch) = env::var("TRUSTMEND_BRANCH") {
            if !branch.trim().is_empty() {
                config.target_branch = branch.trim().to_string();
            }
        }
        if let Ok(domain) = env::var("TRUSTMEND_DOMAIN") {
            if !domain.trim().is_empty() {
                config.domain = domain.trim().to_string();
            }
        }
        if let Ok(secret) = env::var("TRUSTMEND_CA_SECRET") {
            if !secret.trim().is_empty() {
                config.ca_secret = secret.trim().to_string();
            }
        }
        config.dry_run = env_flag("TRUSTMEND_DRY_RUN");
        config.assume_yes = env_flag("TRUSTMEND_ASSUME_YES");

        if let Some(secs) = env_u64("TRUSTMEND_SYNC_TIMEOUT_SECS") {
            config.sync_timeout_secs = secs;
        }
        if let Some(secs) = env_u64("TRUSTMEND_PROBE_TIMEOUT_SECS") {
            config.probe_timeout_secs = secs;
        }

        config
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Whether a service participates in the mutating phases.
    pub fn service_in_scope(&self, name: &str) -> bool {
        self.service_allowlist.is_empty()
            || self.service_allowlist.iter().any(|s| s == name)
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).unwrap_or_default().trim().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scopes_every_service() {
        let config = RunConfig::default();
        assert!(config.service_in_scope("oauth2-proxy"));
        assert!(config.service_in_scope("grafana"));
    }

    #[test]
    fn test_allowlist_restricts_scope() {
        let config = RunConfig {
            service_allowlist: vec!["grafana".to_string()],
            ..RunConfig::default()
        };
        assert!(config.service_in_scope("grafana"));
        assert!(!config.service_in_scope("oauth2-proxy"));
    }

    #[test]
    fn test_env_flag_parsing() {
        env::set_var("TRUSTMEND_TEST_FLAG", "true");
        assert!(env_flag("TRUSTMEND_TEST_FLAG"));
        env::set_var("TRUSTMEND_TEST_FLAG", "0");
        assert!(!env_flag("TRUSTMEND_TEST_FLAG"));
        env::remove_var("TRUSTMEND_TEST_FLAG");
        assert!(!env_flag("TRUSTMEND_TEST_FLAG"));
    }

    #[test]
    fn test_timeouts_convert_to_duration() {
        let config = RunConfig { sync_timeout_secs: 7, ..RunConfig::default() };
        assert_eq!(config.sync_timeout(), Duration::from_secs(7));
    }
}
