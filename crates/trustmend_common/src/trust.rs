//! Trust installer
//!
//! Extracts the cluster root CA from its secret, writes it to a
//! permission-restricted temporary path, and registers it with the
//! host trust store. Failure here is warning-level: the service-side
//! fix is already committed and deployed.

use crate::errors::{RemedyError, Result};
use crate::exec::CommandRunner;
use base64::Engine;
use std::fs;
use std::path::{Path, PathBuf};

/// Fetch the CA certificate PEM from the named secret.
pub fn fetch_ca_certificate(
    runner: &dyn CommandRunner,
    secret: &str,
    namespace: &str,
) -> Result<Vec<u8>> {
    let result = runner.run(
        "kubectl",
        &["get", "secret", secret, "-n", namespace, "-o", "json"],
    );
    if !result.ok() {
        return Err(RemedyError::TrustInstall(format!(
            "secret {}/{} not fetchable: {}",
            namespace,
            secret,
            result.complaint()
        )));
    }
    parse_secret_certificate(&result.stdout).map_err(RemedyError::TrustInstall)
}

/// Pull `data["tls.crt"]` out of a secret's JSON and base64-decode it.
fn parse_secret_certificate(json_text: &str) -> std::result::Result<Vec<u8>, String> {
    let doc: serde_json::Value =
        serde_json::from_str(json_text).map_err(|e| format!("secret JSON unparsable: {}", e))?;
    let encoded = doc
        .pointer("/data/tls.crt")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "secret has no data[\"tls.crt\"]".to_string())?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("tls.crt is not valid base64: {}", e))
}

/// Certificate subject and expiry, for display during prerequisites.
/// Best effort: `None` when openssl is unavailable.
pub fn inspect_certificate(runner: &dyn CommandRunner, pem: &[u8]) -> Option<String> {
    let path = write_restricted_temp(pem).ok()?;
    let result = runner.run(
        "openssl",
        &[
            "x509",
            "-in",
            path.to_str()?,
            "-noout",
            "-subject",
            "-enddate",
        ],
    );
    let _ = fs::remove_file(&path);
    result.ok().then(|| result.stdout.trim().to_string())
}

/// Register the certificate with whichever trust-store tool the host
/// carries.
pub fn install_local_trust(runner: &dyn CommandRunner, pem: &[u8]) -> Result<()> {
    let path = write_restricted_temp(pem)
        .map_err(|e| RemedyError::TrustInstall(format!("cannot stage certificate: {}", e)))?;
    let outcome = install_from_path(runner, &path);
    let _ = fs::remove_file(&path);
    outcome
}

fn install_from_path(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    let path_str = path
        .to_str()
        .ok_or_else(|| RemedyError::TrustInstall("non-UTF8 temp path".to_string()))?;

    if tool_exists(runner, "trust") {
        let result = runner.run("trust", &["anchor", "--store", path_str]);
        return if result.ok() {
            tracing::info!("trust anchor installed via p11-kit");
            Ok(())
        } else {
            Err(RemedyError::TrustInstall(result.complaint().to_string()))
        };
    }

    if tool_exists(runner, "update-ca-certificates") {
        let dest = "/usr/local/share/ca-certificates/trustmend-root-ca.crt";
        let copy = runner.run("cp", &[path_str, dest]);
        if !copy.ok() {
            return Err(RemedyError::TrustInstall(copy.complaint().to_string()));
        }
        let update = runner.run("update-ca-certificates", &[]);
        return if update.ok() {
            tracing::info!("trust anchor installed via update-ca-certificates");
            Ok(())
        } else {
            Err(RemedyError::TrustInstall(update.complaint().to_string()))
        };
    }

    if tool_exists(runner, "security") {
        let result = runner.run(
            "security",
            &[
                "add-trusted-cert",
                "-d",
                "-r",
                "trustRoot",
                "-k",
                "/Library/Keychains/System.keychain",
                path_str,
            ],
        );
        return if result.ok() {
            tracing::info!("trust anchor installed via macOS keychain");
            Ok(())
        } else {
            Err(RemedyError::TrustInstall(result.complaint().to_string()))
        };
    }

    Err(RemedyError::TrustInstall(
        "no supported trust-store tool found (trust, update-ca-certificates, security)"
            .to_string(),
    ))
}

fn tool_exists(runner: &dyn CommandRunner, tool: &str) -> bool {
    runner.run("which", &[tool]).ok()
}

/// Write the PEM to a temp path readable only by the current user.
fn write_restricted_temp(pem: &[u8]) -> std::io::Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("trustmend-ca-{}.crt", uuid::Uuid::new_v4()));
    fs::write(&path, pem)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(path)
}
