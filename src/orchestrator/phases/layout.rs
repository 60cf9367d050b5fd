//! Phases 3 and 4: install directory tree and the `.env` file.

use std::fmt::Write as _;
use std::path::PathBuf;

use super::PhaseContext;
use crate::error::PhaseError;
use crate::models::Configuration;
use crate::policy::ResourceTier;
use crate::system::privilege::{PathKind, PrivilegedFile};

pub const DIRECTORY_MODE: u32 = 0o750;
pub const ENV_FILE_MODE: u32 = 0o600;

/// Directories owned by the service account.
fn directories(config: &Configuration) -> Vec<PathBuf> {
    let mut dirs = vec![config.install_dir.clone(), config.install_dir.join("data")];
    if config.enable_backups {
        dirs.push(config.install_dir.join("backups"));
    }
    dirs
}

pub async fn directory_is_satisfied(ctx: &PhaseContext) -> Result<bool, PhaseError> {
    for dir in directories(&ctx.config) {
        if !ctx.broker.path_exists(&dir, PathKind::Directory).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

pub async fn create_directories(ctx: &PhaseContext) -> Result<(), PhaseError> {
    let owner = ctx.service_owner();
    for dir in directories(&ctx.config) {
        ctx.broker
            .ensure_directory(&dir, &owner, DIRECTORY_MODE)
            .await?;
    }
    Ok(())
}

pub async fn write_env_file(ctx: &PhaseContext) -> Result<(), PhaseError> {
    let contents = render_env_file(&ctx.config, &ctx.tier);
    let file = PrivilegedFile::stage(
        contents.as_bytes(),
        ctx.config.env_file(),
        ctx.service_owner(),
        ENV_FILE_MODE,
    )?;
    ctx.broker.commit(file).await?;
    log::info!(
        "[Phase] [ENV] ✓ Wrote {} (tier {}, {} workers)",
        ctx.config.env_file().display(),
        ctx.tier.tier.as_str(),
        ctx.tier.workers
    );
    Ok(())
}

/// Double-quote a value for Docker Compose `.env` parsing.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            // Compose interpolates $VAR inside double quotes
            '$' => out.push_str("$$"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render the application environment file, tuned for `tier`.
pub fn render_env_file(config: &Configuration, tier: &ResourceTier) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Generated by stagehand; rewritten on every run.");
    let _ = writeln!(out, "COMPOSE_PROJECT_NAME={}", config.compose_project());
    let _ = writeln!(out, "APP_DOMAIN={}", config.domain);
    let _ = writeln!(out, "APP_ENV={}", config.environment.as_str());
    let _ = writeln!(out, "ADMIN_EMAIL={}", config.admin_email);
    let _ = writeln!(out, "ADMIN_PASSWORD={}", quote(config.admin_password.expose()));
    let _ = writeln!(
        out,
        "DATABASE_PASSWORD={}",
        quote(config.database_password.expose())
    );
    let _ = writeln!(out, "HTTP_PORT={}", config.http_port);
    let _ = writeln!(out, "HTTPS_PORT={}", config.https_port);
    let _ = writeln!(out, "ENABLE_TLS={}", config.enable_tls);
    let _ = writeln!(out, "ENABLE_BACKUPS={}", config.enable_backups);
    if config.enable_tls {
        let tls_dir = config.tls_dir();
        let _ = writeln!(out, "TLS_CERT_FILE={}", tls_dir.join(super::tls::CERT_FILE).display());
        let _ = writeln!(out, "TLS_KEY_FILE={}", tls_dir.join(super::tls::KEY_FILE).display());
    }
    let _ = writeln!(out, "RESOURCE_TIER={}", tier.tier.as_str());
    let _ = writeln!(out, "WORKERS={}", tier.workers);
    let _ = writeln!(out, "MEMORY_LIMIT_MB={}", tier.memory_budget_mib);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrivilegeError;
    use crate::models::fixtures::sample_config;
    use crate::models::Secret;
    use crate::orchestrator::phases::testing::{context, ScriptedElevator};
    use crate::system::privilege::ElevatedOp;
    use std::sync::Arc;

    #[test]
    fn test_env_file_carries_tier_tuning() {
        let tier = ResourceTier::classify(12.0, 8);
        let env = render_env_file(&sample_config(), &tier);
        assert!(env.contains("WORKERS=4\n"));
        assert!(env.contains("MEMORY_LIMIT_MB=4096\n"));
        assert!(env.contains("RESOURCE_TIER=mid\n"));
        assert!(env.contains("APP_DOMAIN=app.example.com\n"));
        assert!(env.contains("TLS_CERT_FILE=/opt/stagehand/tls/cert.pem\n"));
    }

    #[test]
    fn test_secrets_are_quoted() {
        let mut config = sample_config();
        config.admin_password = Secret::new("Pa$$\"word\\12A");
        let env = render_env_file(&config, &ResourceTier::classify(4.0, 2));
        assert!(env.contains(r#"ADMIN_PASSWORD="Pa$$$$\"word\\12A""#));
        assert!(env.contains("DATABASE_PASSWORD=\"DbSecret456#x\"\n"));
    }

    #[test]
    fn test_tls_paths_omitted_when_disabled() {
        let mut config = sample_config();
        config.enable_tls = false;
        let env = render_env_file(&config, &ResourceTier::classify(4.0, 2));
        assert!(!env.contains("TLS_CERT_FILE"));
    }

    #[tokio::test]
    async fn test_directories_checked_through_elevation() {
        let config = sample_config();
        let present = directories(&config);
        // None of these exist for the test user; only the elevated test sees them
        let elevator = Arc::new(ScriptedElevator {
            present,
            ..Default::default()
        });
        let ctx = context(config, elevator.clone());

        assert!(directory_is_satisfied(&ctx).await.unwrap());
        let ops = elevator.log.lock().unwrap().clone();
        assert_eq!(ops.len(), 3);
        assert!(ops.iter().all(|op| matches!(
            op,
            ElevatedOp::Exists { kind: PathKind::Directory, .. }
        )));
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_satisfied() {
        let config = sample_config();
        let elevator = Arc::new(ScriptedElevator {
            present: vec![config.install_dir.clone()],
            ..Default::default()
        });
        let ctx = context(config, elevator);
        assert!(!directory_is_satisfied(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_denied_directory_check_is_privilege_error() {
        let elevator = Arc::new(ScriptedElevator {
            denied: true,
            ..Default::default()
        });
        let ctx = context(sample_config(), elevator);
        let err = directory_is_satisfied(&ctx).await.unwrap_err();
        assert!(matches!(err, PhaseError::Privilege(PrivilegeError::Denied { .. })));
    }

    #[test]
    fn test_backups_directory_follows_toggle() {
        let mut config = sample_config();
        assert_eq!(directories(&config).len(), 3);
        config.enable_backups = false;
        assert_eq!(directories(&config).len(), 2);
    }
}
