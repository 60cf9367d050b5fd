//! Phase 1: install the host packages the stack depends on.

use super::PhaseContext;
use crate::error::PhaseError;
use crate::system::{command_exists, run_elevated, CommandOutput};

/// Commands that must resolve on PATH once this phase has run.
pub const REQUIRED_COMMANDS: [&str; 3] = ["docker", "openssl", "curl"];

/// Debian/Ubuntu packages providing [`REQUIRED_COMMANDS`] and `docker compose`.
pub const PACKAGES: [&str; 4] = ["docker.io", "docker-compose-v2", "openssl", "curl"];

pub async fn is_satisfied(_ctx: &PhaseContext) -> Result<bool, PhaseError> {
    for cmd in REQUIRED_COMMANDS {
        if !command_exists(cmd).await {
            log::info!("[Phase] [PACKAGES] '{}' not found on PATH", cmd);
            return Ok(false);
        }
    }
    Ok(true)
}

pub async fn execute(ctx: &PhaseContext) -> Result<(), PhaseError> {
    let tool = ctx.config.elevation_tool;

    let update = run_elevated(tool, "env", &["DEBIAN_FRONTEND=noninteractive", "apt-get", "update"])
        .await
        .map_err(PhaseError::Terminal)?;
    check_apt("apt-get update", &update)?;

    let mut args = vec![
        "DEBIAN_FRONTEND=noninteractive",
        "apt-get",
        "install",
        "-y",
        "--no-install-recommends",
    ];
    args.extend(PACKAGES);
    let install = run_elevated(tool, "env", &args)
        .await
        .map_err(PhaseError::Terminal)?;
    check_apt("apt-get install", &install)?;

    log::info!("[Phase] [PACKAGES] ✓ Installed {}", PACKAGES.join(", "));
    Ok(())
}

/// Lock contention and mirror failures are worth retrying; a missing package is not.
fn check_apt(step: &str, output: &CommandOutput) -> Result<(), PhaseError> {
    if output.success() {
        return Ok(());
    }
    let summary = format!("{} failed: {}", step, output.failure_summary());
    if output.stderr.contains("Unable to locate package")
        || output.stderr.contains("a password is required")
    {
        Err(PhaseError::Terminal(summary))
    } else {
        Err(PhaseError::Transient(summary))
    }
}
