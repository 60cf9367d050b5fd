//! CLI definitions using clap derive API, plus the failure report printed
//! when a command stops.

use chrono::{DateTime, Utc};
use clap::builder::{styling::AnsiColor, Styles};
use clap::{Args, Parser, Subcommand};
use std::fmt::Write;
use std::path::PathBuf;

use crate::config::loader::parse_override;
use crate::error::OrchestratorError;
use crate::orchestrator::{ExecutionState, StateStore};

/// Stagehand - resumable installation orchestrator
#[derive(Parser, Debug)]
#[command(
    name = "stagehand",
    author,
    version,
    styles = Styles::styled()
        .header(AnsiColor::Green.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default().bold())
        .placeholder(AnsiColor::Cyan.on_default()),
    about = "Install a containerized application in resumable, checkpointed phases",
    after_help = "Examples:\n  \
                  stagehand check --config stagehand.toml\n  \
                  stagehand run --config stagehand.toml\n  \
                  stagehand run --resume\n  \
                  stagehand status"
)]
pub struct Cli {
    /// Checkpoint file (defaults to ~/.stagehand_state.json)
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Echo debug output to the terminal
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the installation phases
    Run(RunArgs),

    /// Validate configuration and run pre-flight checks only
    Check(ConfigArgs),

    /// Show the last completed phase and where a resume would continue
    Status,

    /// Delete the checkpoint so the next run starts from the first phase
    Reset(ResetArgs),
}

/// Where configuration comes from.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// TOML configuration document
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Override a setting (highest precedence); repeatable
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_override)]
    pub overrides: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Continue after the last checkpoint using the configuration saved in it
    #[arg(long)]
    pub resume: bool,

    /// Never prompt
    #[arg(long)]
    pub non_interactive: bool,

    /// Print which phases would be skipped or run, then exit
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Do not ask for confirmation
    #[arg(long)]
    pub non_interactive: bool,
}

/// What the operator can do after a failed command.
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    /// A phase of this run was checkpointed; `--resume` continues after it.
    Resume {
        checkpoint: ExecutionState,
        /// Set when the checkpoint lives outside the default location.
        state_file: Option<PathBuf>,
    },
    /// Nothing from this run was checkpointed; start again.
    Restart,
    /// The command was not an installation run.
    Unavailable,
}

/// The checkpoint a `run --resume` would continue from, if it belongs to
/// the command that just failed.
///
/// A checkpoint older than `since` is left over from an earlier run and is
/// only offered when this command was itself a resume of it. An unreadable
/// checkpoint offers nothing.
pub fn resumable_checkpoint(
    store: &StateStore,
    since: DateTime<Utc>,
    resuming: bool,
) -> Option<ExecutionState> {
    match store.load() {
        Ok(Some(state)) if resuming || state.timestamp >= since => Some(state),
        Ok(Some(state)) => {
            log::debug!(
                "[Main] Checkpoint at phase {} predates this run ({}); not offering resume",
                state.phase,
                state.timestamp.to_rfc3339()
            );
            None
        }
        Ok(None) => None,
        Err(e) => {
            log::debug!("[Main] Checkpoint unreadable while reporting failure: {}", e);
            None
        }
    }
}

/// Operator-facing report for a failed command, newline-terminated.
pub fn failure_report(error: &OrchestratorError, next: &NextStep) -> String {
    let mut report = String::new();
    let _ = writeln!(report);
    let _ = writeln!(report, "✗ Stopped at {}", error.stage());
    let _ = writeln!(report, "  {}", error.user_message());
    match next {
        NextStep::Resume {
            checkpoint,
            state_file,
        } => {
            let mut resume = String::from("stagehand run --resume");
            if let Some(path) = state_file {
                let _ = write!(resume, " --state-file {}", path.display());
            }
            let _ = writeln!(
                report,
                "  Fix the problem above, then continue after phase {} ({}) with: {}",
                checkpoint.phase, checkpoint.phase_name, resume
            );
        }
        NextStep::Restart => {
            let _ = writeln!(
                report,
                "  No phase completed in this run; fix the problem above and re-run: stagehand run --config <file>"
            );
        }
        NextStep::Unavailable => {}
    }
    report
}
