//! Phase 2: create the system group and user the stack runs as.

use super::PhaseContext;
use crate::error::PhaseError;
use crate::system::{run_command, run_elevated, validate_argument};

async fn user_exists(user: &str) -> Result<bool, PhaseError> {
    run_command("id", &["-u", user])
        .await
        .map(|out| out.success())
        .map_err(PhaseError::Terminal)
}

async fn group_exists(group: &str) -> Result<bool, PhaseError> {
    run_command("getent", &["group", group])
        .await
        .map(|out| out.success())
        .map_err(PhaseError::Terminal)
}

pub async fn is_satisfied(ctx: &PhaseContext) -> Result<bool, PhaseError> {
    Ok(group_exists(&ctx.config.service_group).await?
        && user_exists(&ctx.config.service_user).await?)
}

pub async fn execute(ctx: &PhaseContext) -> Result<(), PhaseError> {
    let config = &ctx.config;
    let user = config.service_user.as_str();
    let group = config.service_group.as_str();
    validate_argument(user).map_err(PhaseError::Terminal)?;
    validate_argument(group).map_err(PhaseError::Terminal)?;

    if !group_exists(group).await? {
        let out = run_elevated(config.elevation_tool, "groupadd", &["--system", group])
            .await
            .map_err(PhaseError::Terminal)?;
        if !out.success() {
            return Err(PhaseError::Terminal(format!(
                "groupadd {} failed: {}",
                group,
                out.failure_summary()
            )));
        }
        log::info!("[Phase] [ACCOUNT] Created group {}", group);
    }

    if !user_exists(user).await? {
        let home = config.install_dir.to_string_lossy().into_owned();
        let out = run_elevated(
            config.elevation_tool,
            "useradd",
            &[
                "--system",
                "--gid",
                group,
                "--home-dir",
                &home,
                "--no-create-home",
                "--shell",
                "/usr/sbin/nologin",
                user,
            ],
        )
        .await
        .map_err(PhaseError::Terminal)?;
        if !out.success() {
            return Err(PhaseError::Terminal(format!(
                "useradd {} failed: {}",
                user,
                out.failure_summary()
            )));
        }
        log::info!("[Phase] [ACCOUNT] Created user {}", user);
    }

    Ok(())
}
