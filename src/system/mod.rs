//! System module: validated command execution, elevation, pre-flight checks

pub mod preflight;
pub mod privilege;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;

use crate::models::ElevationTool;

/// Milestone logging: routed to the parsed session log as well as the full one.
#[macro_export]
macro_rules! log_parsed {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        // Use target="parsed" for high-level events
        log::info!(target: "parsed", "{}", msg);
    }}
}

/// Package and account names accepted as command arguments.
static ARGUMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._+\-]*$").expect("valid argument regex"));

/// Reject anything that is not a plain lowercase name before it reaches a command line.
pub fn validate_argument(value: &str) -> Result<(), String> {
    if ARGUMENT_RE.is_match(value) {
        Ok(())
    } else {
        Err(format!(
            "'{}' contains invalid characters. Only lowercase alphanumerics and . _ + - are allowed.",
            value
        ))
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last non-empty stderr line, falling back to the exit status.
    pub fn failure_summary(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| format!("exit status {:?}", self.code))
    }
}

/// Run `program` with `args`, capturing output. `Err` only when it cannot be spawned.
pub async fn run_command(program: &str, args: &[&str]) -> Result<CommandOutput, String> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("Failed to execute {}: {}", program, e))?;

    // Capture and log stdout/stderr
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !stdout.trim().is_empty() {
        log::info!("[{}] stdout: {}", program, stdout.trim());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !stderr.trim().is_empty() {
        log::info!("[{}] stderr: {}", program, stderr.trim());
    }

    Ok(CommandOutput {
        code: output.status.code(),
        stdout,
        stderr,
    })
}

/// Run `program` under the configured elevation tool.
pub async fn run_elevated(
    tool: ElevationTool,
    program: &str,
    args: &[&str],
) -> Result<CommandOutput, String> {
    let mut full_args: Vec<&str> = tool.prefix_args().to_vec();
    full_args.push(program);
    full_args.extend_from_slice(args);
    log::info!("[System] [ELEVATED] {} {}", tool.program(), full_args.join(" "));
    run_command(tool.program(), &full_args).await
}

/// Whether `cmd` resolves on PATH.
pub async fn command_exists(cmd: &str) -> bool {
    if validate_argument(cmd).is_err() {
        return false;
    }
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {}", cmd))
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
