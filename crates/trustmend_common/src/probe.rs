//! Endpoint prober
//!
//! Issues HTTPS probes against the remediated endpoints with a bounded
//! worker pool. A TLS failure is classified separately from a plain
//! connection failure — observing TLS outcomes is the point of the
//! remediation. Probes never abort the phase themselves; the
//! orchestrator fails the phase only when an in-scope endpoint is
//! broken.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Classification of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOutcome {
    Reachable,
    Unreachable,
    TlsError,
}

impl ProbeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::Reachable => "reachable",
            ProbeOutcome::Unreachable => "unreachable",
            ProbeOutcome::TlsError => "tls error",
        }
    }
}

/// One probed URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub url: String,
    pub outcome: ProbeOutcome,
    pub latency_ms: u64,
    pub detail: String,
}

/// Probe every URL concurrently (bounded workers). The result list
/// contains all requested URLs in their original order regardless of
/// completion order.
pub async fn probe_all(
    urls: &[String],
    timeout_per_url: Duration,
    concurrency: usize,
) -> Vec<ProbeResult> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = JoinSet::new();

    for (index, url) in urls.iter().enumerate() {
        let url = url.clone();
        let semaphore = semaphore.clone();
        set.spawn(async move {
            // Semaphore is never closed while the set is alive.
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            (index, probe_one(&url, timeout_per_url).await)
        });
    }

    let mut slots: Vec<Option<ProbeResult>> = vec![None; urls.len()];
    while let Some(joined) = set.join_next().await {
        if let Ok((index, result)) = joined {
            slots[index] = Some(result);
        }
    }

    slots
        .into_iter()
        .zip(urls)
        .map(|(slot, url)| {
            slot.unwrap_or_else(|| ProbeResult {
                url: url.clone(),
                outcome: ProbeOutcome::Unreachable,
                latency_ms: 0,
                detail: "probe task panicked".to_string(),
            })
        })
        .collect()
}

async fn probe_one(url: &str, timeout: Duration) -> ProbeResult {
    let start = Instant::now();

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            return ProbeResult {
                url: url.to_string(),
                outcome: ProbeOutcome::Unreachable,
                latency_ms: 0,
                detail: format!("client build failed: {}", e),
            }
        }
    };

    match client.get(url).send().await {
        Ok(response) => ProbeResult {
            url: url.to_string(),
            outcome: ProbeOutcome::Reachable,
            latency_ms: start.elapsed().as_millis() as u64,
            // Any HTTP status counts as reachable: the TLS handshake
            // succeeded, which is what is being verified.
            detail: format!("HTTP {}", response.status().as_u16()),
        },
        Err(e) => {
            let (outcome, detail) = classify_error(&e);
            ProbeResult {
                url: url.to_string(),
                outcome,
                latency_ms: start.elapsed().as_millis() as u64,
                detail,
            }
        }
    }
}

/// Distinguish TLS failures from plain connectivity failures by
/// inspecting the error chain.
fn classify_error(error: &reqwest::Error) -> (ProbeOutcome, String) {
    let chain = error_chain_text(error);
    if is_tls_failure(&chain) {
        (ProbeOutcome::TlsError, chain)
    } else {
        (ProbeOutcome::Unreachable, chain)
    }
}

fn error_chain_text(error: &reqwest::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

fn is_tls_failure(chain: &str) -> bool {
    let lower = chain.to_lowercase();
    ["certificate", "unknownissuer", "self signed", "self-signed", "handshake", "tls", "ssl"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Split results into hard failures (in-scope endpoints that are not
/// reachable) and warnings (out-of-scope failures).
pub fn partition_failures<'a>(
    results: &'a [ProbeResult],
    in_scope: &[String],
) -> (Vec<&'a ProbeResult>, Vec<&'a ProbeResult>) {
    let mut failures = Vec::new();
    let mut warnings = Vec::new();
    for result in results {
        if result.outcome == ProbeOutcome::Reachable {
            continue;
        }
        if in_scope.iter().any(|url| url == &result.url) {
            failures.push(result);
        } else {
            warnings.push(result);
        }
    }
    (failures, warnings)
}
