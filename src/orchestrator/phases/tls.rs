//! Phase 5: self-signed TLS certificate for the configured domain.

use std::fs;

use tempfile::TempDir;

use super::PhaseContext;
use crate::error::PhaseError;
use crate::system::privilege::{PathKind, PrivilegedFile};
use crate::system::run_command;

pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";

const CERT_DAYS: &str = "825";

pub async fn is_satisfied(ctx: &PhaseContext) -> Result<bool, PhaseError> {
    if !ctx.config.enable_tls {
        log::info!("[Phase] [TLS] TLS disabled, nothing to generate");
        return Ok(true);
    }
    // tls/ is 0750 for the service account; test as root
    let dir = ctx.config.tls_dir();
    for name in [CERT_FILE, KEY_FILE] {
        if !ctx.broker.path_exists(&dir.join(name), PathKind::File).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

pub async fn execute(ctx: &PhaseContext) -> Result<(), PhaseError> {
    let config = &ctx.config;
    let scratch = TempDir::new()
        .map_err(|e| PhaseError::Terminal(format!("create scratch directory: {}", e)))?;
    let cert_path = scratch.path().join(CERT_FILE);
    let key_path = scratch.path().join(KEY_FILE);
    let cert_arg = cert_path.to_string_lossy().into_owned();
    let key_arg = key_path.to_string_lossy().into_owned();
    let subject = format!("/CN={}", config.domain);
    let san = format!("subjectAltName=DNS:{}", config.domain);

    let out = run_command(
        "openssl",
        &[
            "req", "-x509", "-newkey", "rsa:4096", "-sha256", "-nodes", "-days", CERT_DAYS,
            "-keyout", &key_arg, "-out", &cert_arg, "-subj", &subject, "-addext", &san,
        ],
    )
    .await
    .map_err(PhaseError::Terminal)?;
    if !out.success() {
        return Err(PhaseError::Terminal(format!(
            "openssl req failed: {}",
            out.failure_summary()
        )));
    }

    let read = |path: &std::path::Path| {
        fs::read(path).map_err(|e| PhaseError::Terminal(format!("read {}: {}", path.display(), e)))
    };
    let cert = read(cert_path.as_path())?;
    let key = read(key_path.as_path())?;

    let owner = ctx.service_owner();
    let tls_dir = config.tls_dir();
    ctx.broker
        .ensure_directory(&tls_dir, &owner, 0o750)
        .await?;
    ctx.broker
        .commit(PrivilegedFile::stage(&key, tls_dir.join(KEY_FILE), owner.clone(), 0o600)?)
        .await?;
    ctx.broker
        .commit(PrivilegedFile::stage(&cert, tls_dir.join(CERT_FILE), owner, 0o644)?)
        .await?;

    log::info!(
        "[Phase] [TLS] ✓ Certificate for {} installed in {}",
        config.domain,
        tls_dir.display()
    );
    Ok(())
}
