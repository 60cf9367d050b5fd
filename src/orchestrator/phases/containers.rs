//! Phase 5.5: bring up the Docker Compose stack.

use super::PhaseContext;
use crate::error::PhaseError;
use crate::system::run_elevated;

fn compose_args<'a>(project: &'a str, dir: &'a str) -> Vec<&'a str> {
    vec!["compose", "--project-name", project, "--project-directory", dir]
}

pub async fn is_satisfied(ctx: &PhaseContext) -> Result<bool, PhaseError> {
    let config = &ctx.config;
    let project = config.compose_project();
    let dir = config.install_dir.to_string_lossy().into_owned();
    let mut args = compose_args(&project, &dir);
    args.extend(["ps", "--status", "running", "--quiet"]);

    // An unreachable daemon simply means the stack is not up yet
    match run_elevated(config.elevation_tool, "docker", &args).await {
        Ok(out) if out.success() => Ok(running_services(&out.stdout) > 0),
        Ok(_) => Ok(false),
        Err(e) => Err(PhaseError::Terminal(e)),
    }
}

pub async fn execute(ctx: &PhaseContext) -> Result<(), PhaseError> {
    let config = &ctx.config;
    let project = config.compose_project();
    let dir = config.install_dir.to_string_lossy().into_owned();
    let env_file = config.env_file().to_string_lossy().into_owned();
    let mut args = compose_args(&project, &dir);
    args.extend(["--env-file", env_file.as_str(), "up", "-d", "--remove-orphans"]);

    let out = run_elevated(config.elevation_tool, "docker", &args)
        .await
        .map_err(PhaseError::Terminal)?;
    if out.success() {
        log::info!("[Phase] [CONTAINERS] ✓ Stack {} started", project);
        Ok(())
    } else if out.stderr.contains("no configuration file provided") {
        Err(PhaseError::Terminal(format!(
            "no compose file in {}: {}",
            dir,
            out.failure_summary()
        )))
    } else {
        Err(PhaseError::Transient(format!(
            "docker compose up failed: {}",
            out.failure_summary()
        )))
    }
}

/// Count container ids printed by `docker compose ps --quiet`.
fn running_services(stdout: &str) -> usize {
    stdout.lines().filter(|l| !l.trim().is_empty()).count()
}
