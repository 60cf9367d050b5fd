use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use inquire::Confirm;
use log::LevelFilter;
use tokio::sync::{mpsc, watch};

use stagehand::cli::{
    failure_report, resumable_checkpoint, Cli, Commands, ConfigArgs, NextStep, ResetArgs, RunArgs,
};
use stagehand::log_collector::default_logs_path;
use stagehand::orchestrator::{PlannedAction, StateStore};
use stagehand::system::preflight::PreflightReport;
use stagehand::{
    CommandElevator, ConfigSources, ConfigStore, Configuration, HostProbe, InstallPhase,
    LogCollector, Orchestrator, OrchestratorError, OrchestratorEvent, Phase, PreflightOptions,
    PrivilegeBroker, RetryPolicy, RunStart, Validator,
};

/// Operator declined a confirmation prompt.
const EXIT_ABORTED: i32 = 1;

#[tokio::main]
async fn main() {
    let started_at = Utc::now();
    let cli = Cli::parse();

    // =========================================================================
    // LOGGING INITIALIZATION - MUST BE FIRST
    // =========================================================================
    let collector = match init_logging(cli.verbose) {
        Ok(collector) => Some(collector),
        Err(e) => {
            eprintln!("[Main] WARNING: file logging disabled: {:#}", e);
            None
        }
    };
    log::info!("Stagehand {} starting", stagehand::VERSION);

    let code = match resolve_store(&cli) {
        Ok(store) => {
            let custom_state_file = cli.state_file.is_some();
            // Some(resuming) for installation runs
            let run_mode = match &cli.command {
                Commands::Run(args) => Some(args.resume),
                _ => None,
            };
            match dispatch(cli, store.clone()).await {
                Ok(code) => code,
                Err(e) => {
                    report_failure(&e, &store, started_at, run_mode, custom_state_file);
                    e.exit_code()
                }
            }
        }
        Err(e) => {
            eprintln!("✗ {}", e.user_message());
            e.exit_code()
        }
    };

    // Wait for log collector to empty all pending messages before exit
    if let Some(collector) = collector {
        if let Err(e) = collector.wait_for_empty() {
            eprintln!("[Main] WARNING: Failed to flush logs: {}", e);
        }
    }
    std::process::exit(code);
}

fn init_logging(verbose: bool) -> anyhow::Result<LogCollector> {
    let console = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let log_dir = default_logs_path();
    let collector = LogCollector::new(&log_dir, console)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("initializing logs in {}", log_dir.display()))?;
    collector.install().map_err(anyhow::Error::msg)
}

fn resolve_store(cli: &Cli) -> Result<StateStore, OrchestratorError> {
    let path = match &cli.state_file {
        Some(path) => path.clone(),
        None => StateStore::default_path()?,
    };
    Ok(StateStore::new(path))
}

async fn dispatch(cli: Cli, store: StateStore) -> Result<i32, OrchestratorError> {
    match cli.command {
        Commands::Run(args) => run_install(args, store).await,
        Commands::Check(args) => check(args).await,
        Commands::Status => status(&store),
        Commands::Reset(args) => reset(args, &store),
    }
}

fn load_config(args: &ConfigArgs) -> Result<Configuration, OrchestratorError> {
    let sources = ConfigSources::from_process(args.config.clone(), args.overrides.clone());
    Ok(ConfigStore::load(&sources)?)
}

fn print_preflight(report: &PreflightReport) {
    println!("Pre-flight checks:");
    for check in &report.checks {
        let mark = if check.passed { "✓" } else { "✗" };
        println!("  {} {:<20} {}", mark, check.kind.as_str(), check.detail);
    }
    println!(
        "  Resource tier: {} ({} workers, {} MiB memory budget)",
        report.tier.tier.as_str(),
        report.tier.workers,
        report.tier.memory_budget_mib
    );
}

async fn check(args: ConfigArgs) -> Result<i32, OrchestratorError> {
    let config = load_config(&args)?;
    println!("✓ Configuration valid for {}", config.domain);
    let report = Validator::new(Arc::new(HostProbe::new()))
        .run_preflight(&config, PreflightOptions::default())
        .await;
    print_preflight(&report);
    report.into_result()?;
    println!("✓ Host is ready");
    Ok(0)
}

fn status(store: &StateStore) -> Result<i32, OrchestratorError> {
    match store.load()? {
        None => println!("No checkpoint at {}; the next run starts at phase 1.", store.path().display()),
        Some(state) => {
            println!(
                "Last completed: phase {} ({}) at {}",
                state.phase,
                state.phase_name,
                state.timestamp.to_rfc3339()
            );
            match InstallPhase::registry().into_iter().find(|p| p.id() > state.phase) {
                Some(next) => println!(
                    "Resume point:   phase {} ({}) via `stagehand run --resume`",
                    next.id(),
                    next.label()
                ),
                None => println!("All phases complete."),
            }
            println!("Configuration:  {} ({})", state.config.domain, state.config.environment.as_str());
        }
    }
    Ok(0)
}

fn confirm(prompt: &str) -> bool {
    match Confirm::new(prompt)
        .with_default(false)
        .with_help_message("Use --non-interactive to skip this prompt")
        .prompt()
    {
        Ok(answer) => answer,
        Err(e) => {
            eprintln!("Failed to read confirmation: {}", e);
            false
        }
    }
}

fn reset(args: ResetArgs, store: &StateStore) -> Result<i32, OrchestratorError> {
    let Some(state) = store.load()? else {
        println!("Nothing to reset: no checkpoint at {}", store.path().display());
        return Ok(0);
    };
    if !args.non_interactive
        && !confirm(&format!(
            "Discard checkpoint after phase {} ({})?",
            state.phase, state.phase_name
        ))
    {
        println!("Aborted.");
        return Ok(EXIT_ABORTED);
    }
    store.clear()?;
    println!("✓ Checkpoint removed; the next run starts at phase 1.");
    Ok(0)
}

fn warn_if_root() {
    if nix::unistd::geteuid().is_root() {
        log::warn!("[Main] Running as root: elevated operations still go through the configured elevation tool");
    }
}

fn print_event(event: &OrchestratorEvent) {
    match event {
        OrchestratorEvent::PhaseStarted { id, label } => println!("▶ [{}] {}", id, label),
        OrchestratorEvent::PhaseSkipped { id, label } => {
            println!("↷ [{}] {} (checkpointed)", id, label)
        }
        OrchestratorEvent::PhaseRetrying {
            id,
            attempt,
            delay,
            error,
            ..
        } => println!(
            "  ↻ [{}] attempt {} failed: {}; retrying in {}s",
            id,
            attempt,
            error,
            delay.as_secs_f64()
        ),
        OrchestratorEvent::PhaseCompleted {
            id,
            label,
            already_satisfied,
            ..
        } => {
            if *already_satisfied {
                println!("✓ [{}] {} (already satisfied)", id, label)
            } else {
                println!("✓ [{}] {}", id, label)
            }
        }
        OrchestratorEvent::PhaseFailed { id, label, error } => {
            println!("✗ [{}] {}: {}", id, label, error)
        }
    }
}

async fn run_install(args: RunArgs, store: StateStore) -> Result<i32, OrchestratorError> {
    warn_if_root();

    let (config, start) = if args.resume {
        let state = store
            .load()?
            .ok_or_else(|| OrchestratorError::NoStateToResume(store.path().to_path_buf()))?;
        if args.config.config.is_some() || !args.config.overrides.is_empty() {
            log::warn!("[Main] --config/--set ignored on resume; using the configuration saved in the checkpoint");
        }
        (state.config, RunStart::Resume)
    } else {
        let config = load_config(&args.config)?;
        (config.clone(), RunStart::Fresh(config))
    };

    // Fail before any work if the checkpoint could not be written
    store.ensure_directory()?;

    let broker = Arc::new(PrivilegeBroker::new(
        Arc::new(CommandElevator::new(config.elevation_tool)),
        RetryPolicy::for_privileged_ops(),
    ));
    let orchestrator = Orchestrator::new(InstallPhase::registry(), store, broker);

    if args.dry_run {
        println!("Dry run for {}:", config.domain);
        for planned in orchestrator.plan(&start)? {
            let action = match planned.action {
                PlannedAction::Skip => "skip (checkpointed)",
                PlannedAction::Run => "run",
            };
            println!("  [{}] {:<28} {}", planned.id, planned.label, action);
        }
        return Ok(0);
    }

    let report = Validator::new(Arc::new(HostProbe::new()))
        .run_preflight(
            &config,
            PreflightOptions {
                check_ports: !args.resume,
            },
        )
        .await;
    print_preflight(&report);
    let report = report.into_result()?;

    if !args.non_interactive
        && !confirm(&format!(
            "Install {} into {}?",
            config.domain,
            config.install_dir.display()
        ))
    {
        println!("Aborted.");
        return Ok(EXIT_ABORTED);
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("[Main] Interrupt received, cancelling current phase");
            let _ = cancel_tx.send(true);
        }
    });

    let (event_tx, mut event_rx) = mpsc::channel::<OrchestratorEvent>(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    let orchestrator = orchestrator
        .with_events(event_tx)
        .with_cancellation(cancel_rx);
    let result = orchestrator.run(start, report.tier).await;

    // Close the event channel so the printer drains and exits
    drop(orchestrator);
    let _ = printer.await;

    let run = result?;
    println!(
        "\n✓ Installation complete: {} phase(s) executed, {} already satisfied, {} skipped",
        run.executed().len(),
        run.phases.iter().filter(|p| p.already_satisfied).count(),
        run.count(stagehand::PhaseStatus::Skipped)
    );
    println!("  Health endpoint: {}", config.health_url());
    Ok(0)
}

fn report_failure(
    error: &OrchestratorError,
    store: &StateStore,
    started_at: DateTime<Utc>,
    run_mode: Option<bool>,
    custom_state_file: bool,
) {
    let next = match run_mode {
        None => NextStep::Unavailable,
        Some(resuming) => match resumable_checkpoint(store, started_at, resuming) {
            Some(checkpoint) => NextStep::Resume {
                checkpoint,
                state_file: custom_state_file.then(|| store.path().to_path_buf()),
            },
            None => NextStep::Restart,
        },
    };
    eprint!("{}", failure_report(error, &next));
    log::error!("[Main] Run failed at {}: {}", error.stage(), error);
}
