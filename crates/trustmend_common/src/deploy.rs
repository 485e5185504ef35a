//! Deployment trigger
//!
//! Requests a sync per application against the declarative engine,
//! then polls the underlying workload's rollout at a fixed interval
//! until every replica reports ready or the per-app timeout elapses.
//! Applications are independent deployables: one timeout never stops
//! the remaining apps from syncing, and per-app results are preserved
//! for diagnosis.

use crate::exec::CommandRunner;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// One application to sync, with the workload whose rollout is awaited.
#[derive(Debug, Clone)]
pub struct SyncApp {
    pub app: String,
    pub namespace: String,
    pub workload: String,
}

/// Per-application sync/rollout outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRollout {
    pub app: String,
    pub synced: bool,
    pub ready: bool,
    pub elapsed_ms: u64,
    pub detail: String,
}

impl AppRollout {
    pub fn succeeded(&self) -> bool {
        self.synced && self.ready
    }
}

/// Sync every app and await its rollout. The returned list always has
/// one entry per requested app, success or not.
pub async fn sync_and_await(
    runner: &dyn CommandRunner,
    apps: &[SyncApp],
    per_app_timeout: Duration,
    poll_interval: Duration,
) -> Vec<AppRollout> {
    let mut results = Vec::with_capacity(apps.len());
    for app in apps {
        results.push(sync_one(runner, app, per_app_timeout, poll_interval).await);
    }
    results
}

async fn sync_one(
    runner: &dyn CommandRunner,
    app: &SyncApp,
    timeout: Duration,
    poll_interval: Duration,
) -> AppRollout {
    let start = Instant::now();
    tracing::info!(app = %app.app, "requesting sync");

    let sync = runner.run("argocd", &["app", "sync", &app.app, "--async"]);
    if !sync.ok() {
        return AppRollout {
            app: app.app.clone(),
            synced: false,
            ready: false,
            elapsed_ms: start.elapsed().as_millis() as u64,
            detail: format!("sync request failed: {}", sync.complaint()),
        };
    }

    // Bounded poll loop. The timeout is a hard resource bound; there
    // is no retry beyond it.
    loop {
        let status = runner.run(
            "kubectl",
            &[
                "get",
                "deployment",
                &app.workload,
                "-n",
                &app.namespace,
                "-o",
                "json",
            ],
        );

        if status.ok() {
            match rollout_ready(&status.stdout) {
                Ok(true) => {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    tracing::info!(app = %app.app, elapsed_ms, "rollout ready");
                    return AppRollout {
                        app: app.app.clone(),
                        synced: true,
                        ready: true,
                        elapsed_ms,
                        detail: "all replicas ready".to_string(),
                    };
                }
                Ok(false) => {}
                Err(reason) => {
                    tracing::warn!(app = %app.app, %reason, "rollout status unparsable");
                }
            }
        }

        if start.elapsed() >= timeout {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            tracing::warn!(app = %app.app, elapsed_ms, "rollout timed out");
            return AppRollout {
                app: app.app.clone(),
                synced: true,
                ready: false,
                elapsed_ms,
                detail: format!("rollout timed out after {}ms", elapsed_ms),
            };
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Parse `kubectl get deployment -o json` and decide readiness.
fn rollout_ready(json_text: &str) -> Result<bool, String> {
    let doc: serde_json::Value =
        serde_json::from_str(json_text).map_err(|e| e.to_string())?;

    let desired = doc
        .pointer("/spec/replicas")
        .and_then(|v| v.as_u64())
        .unwrap_or(1);
    let ready = doc
        .pointer("/status/readyReplicas")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let updated = doc
        .pointer("/status/updatedReplicas")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    Ok(ready >= desired && updated >= desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecResult, ExecStatus};
    use std::sync::Mutex;

    fn deployment_json(desired: u64, ready: u64, updated: u64) -> String {
        format!(
            r#"{{"spec":{{"replicas":{}}},"status":{{"readyReplicas":{},"updatedReplicas":{}}}}}"#,
            desired, ready, updated
        )
    }

    #[test]
    fn test_rollout_ready_when_replicas_match() {
        assert!(rollout_ready(&deployment_json(2, 2, 2)).unwrap());
        assert!(!rollout_ready(&deployment_json(2, 1, 2)).unwrap());
        assert!(!rollout_ready(&deployment_json(2, 2, 1)).unwrap());
    }

    #[test]
    fn test_rollout_defaults_one_replica() {
        // No spec.replicas: Kubernetes defaults to 1.
        assert!(rollout_ready(r#"{"status":{"readyReplicas":1,"updatedReplicas":1}}"#).unwrap());
    }

    #[test]
    fn test_rollout_missing_status_not_ready() {
        assert!(!rollout_ready(r#"{"spec":{"replicas":1}}"#).unwrap());
    }

    #[test]
    fn test_rollout_garbage_is_error() {
        assert!(rollout_ready("not json").is_err());
    }

    /// Runner scripting per-app behavior: sync result and a sequence
    /// of poll answers.
    struct ScriptedRunner {
        /// app name -> ready after this many polls (None = never).
        ready_after: Vec<(&'static str, Option<usize>)>,
        polls: Mutex<std::collections::HashMap<String, usize>>,
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &str, args: &[&str]) -> ExecResult {
            let command = format!("{} {}", program, args.join(" "));
            let mut result = ExecResult {
                command: command.clone(),
                status: ExecStatus::Success,
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 1,
            };

            if program == "kubectl" {
                let workload = args[2].to_string();
                let mut polls = self.polls.lock().unwrap();
                let count = polls.entry(workload.clone()).or_insert(0);
                *count += 1;
                let threshold = self
                    .ready_after
                    .iter()
                    .find(|(app, _)| workload.contains(app))
                    .and_then(|(_, t)| *t);
                let ready = matches!(threshold, Some(t) if *count >= t);
                result.stdout = deployment_json(1, u64::from(ready), u64::from(ready));
            }
            result
        }
    }

    fn app(name: &'static str) -> SyncApp {
        SyncApp {
            app: name.to_string(),
            namespace: "default".to_string(),
            workload: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_timeout_on_one_app_does_not_stop_the_rest() {
        let runner = ScriptedRunner {
            ready_after: vec![("oauth2-proxy", Some(1)), ("prometheus", None)],
            polls: Mutex::new(Default::default()),
        };

        let results = sync_and_await(
            &runner,
            &[app("prometheus"), app("oauth2-proxy")],
            Duration::from_millis(30),
            Duration::from_millis(5),
        )
        .await;

        assert_eq!(results.len(), 2);
        let prometheus = &results[0];
        assert!(prometheus.synced && !prometheus.ready);
        assert!(prometheus.detail.contains("timed out"));

        // The app after the timed-out one still synced and readied.
        let oauth = &results[1];
        assert!(oauth.succeeded());
    }

    #[tokio::test]
    async fn test_ready_after_a_few_polls() {
        let runner = ScriptedRunner {
            ready_after: vec![("oauth2-proxy", Some(3))],
            polls: Mutex::new(Default::default()),
        };

        let results = sync_and_await(
            &runner,
            &[app("oauth2-proxy")],
            Duration::from_millis(200),
            Duration::from_millis(1),
        )
        .await;

        assert!(results[0].succeeded());
        assert!(*runner.polls.lock().unwrap().get("oauth2-proxy").unwrap() >= 3);
    }
}
