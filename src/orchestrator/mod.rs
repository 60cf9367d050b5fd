//! Phase Orchestration: ordered, resumable installation with a checkpoint after every phase.
//!
//! A run walks the registered phases in ascending [`PhaseId`] order. Phases at
//! or below the checkpoint of a resumed run are skipped; every other phase is
//! checked with `is_already_satisfied`, executed when needed (transient errors
//! retried with exponential backoff), and checkpointed on success. The first
//! failure halts the run without touching the checkpoint.

pub mod checkpoint;
pub mod executor;
pub mod phases;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

pub use checkpoint::StateStore;
pub use executor::{retry_with_backoff, Attempted, RetryPolicy};
pub use phases::{InstallPhase, Phase, PhaseContext};
pub use state::{ExecutionState, PhaseId, PhaseStatus};

use crate::error::{OrchestratorError, PhaseError};
use crate::models::Configuration;
use crate::policy::ResourceTier;
use crate::system::privilege::PrivilegeBroker;

/// Progress notifications for a front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    PhaseStarted {
        id: PhaseId,
        label: String,
    },
    PhaseSkipped {
        id: PhaseId,
        label: String,
    },
    PhaseRetrying {
        id: PhaseId,
        label: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    PhaseCompleted {
        id: PhaseId,
        label: String,
        attempts: u32,
        already_satisfied: bool,
    },
    PhaseFailed {
        id: PhaseId,
        label: String,
        error: String,
    },
}

/// How a run begins.
#[derive(Debug, Clone)]
pub enum RunStart {
    /// Start at the first phase with a freshly loaded configuration.
    Fresh(Configuration),
    /// Continue after the saved checkpoint using the configuration stored in it.
    Resume,
}

/// Final status of one phase in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseOutcome {
    pub id: PhaseId,
    pub label: String,
    pub status: PhaseStatus,
    /// `execute` attempts; 0 when skipped or already satisfied.
    pub attempts: u32,
    pub already_satisfied: bool,
}

impl PhaseOutcome {
    fn advance(&mut self, next: PhaseStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "phase {}: {} -> {}",
            self.id,
            self.status.as_str(),
            next.as_str()
        );
        self.status = next;
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub resumed_after: Option<PhaseId>,
    pub phases: Vec<PhaseOutcome>,
}

impl RunReport {
    pub fn count(&self, status: PhaseStatus) -> usize {
        self.phases.iter().filter(|p| p.status == status).count()
    }

    /// Phases whose `execute` actually ran.
    pub fn executed(&self) -> Vec<PhaseId> {
        self.phases
            .iter()
            .filter(|p| p.attempts > 0)
            .map(|p| p.id)
            .collect()
    }
}

/// What a run would do with a phase, computed without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlannedAction {
    /// At or below the checkpoint.
    Skip,
    /// Check, then execute if not already satisfied.
    Run,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedPhase {
    pub id: PhaseId,
    pub label: String,
    pub action: PlannedAction,
}

/// Drives phases in order against one checkpoint.
pub struct Orchestrator<P = InstallPhase> {
    /// Sorted by id
    phases: Vec<P>,

    store: StateStore,

    broker: Arc<PrivilegeBroker>,

    /// Channel for sending progress events to the CLI
    events: Option<mpsc::Sender<OrchestratorEvent>>,

    /// Channel for receiving cancellation signals (SIGINT)
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl<P: Phase> Orchestrator<P> {
    pub fn new(mut phases: Vec<P>, store: StateStore, broker: Arc<PrivilegeBroker>) -> Self {
        phases.sort_by_key(|p| p.id());
        for pair in phases.windows(2) {
            if pair[0].id() == pair[1].id() {
                log::warn!(
                    "[Orchestrator] Duplicate phase id {} ({} / {})",
                    pair[0].id(),
                    pair[0].label(),
                    pair[1].label()
                );
            }
        }
        Orchestrator {
            phases,
            store,
            broker,
            events: None,
            cancel_rx: None,
        }
    }

    pub fn with_events(mut self, tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_cancellation(mut self, rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(rx);
        self
    }

    pub fn phases(&self) -> &[P] {
        &self.phases
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// The checkpoint a resumed run would continue from.
    pub fn load_resume_state(&self) -> Result<ExecutionState, OrchestratorError> {
        self.store
            .load()?
            .ok_or_else(|| OrchestratorError::NoStateToResume(self.store.path().to_path_buf()))
    }

    /// Which phases a run would skip or attempt. Reads the checkpoint, writes nothing.
    pub fn plan(&self, start: &RunStart) -> Result<Vec<PlannedPhase>, OrchestratorError> {
        let resumed_after = match start {
            RunStart::Fresh(_) => None,
            RunStart::Resume => Some(self.load_resume_state()?.phase),
        };
        Ok(self
            .phases
            .iter()
            .map(|p| PlannedPhase {
                id: p.id(),
                label: p.label().to_string(),
                action: if resumed_after.map_or(false, |last| p.id() <= last) {
                    PlannedAction::Skip
                } else {
                    PlannedAction::Run
                },
            })
            .collect())
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.try_send(event);
        }
    }

    /// Execute the pipeline.
    ///
    /// # Errors
    /// - `StateDirectoryMissing` before any phase when the checkpoint cannot be written
    /// - `NoStateToResume` for `RunStart::Resume` without a checkpoint
    /// - `PhaseFailure` for the first phase that fails; later phases never run
    /// - `Cancelled` when the cancellation signal fires; the checkpoint is left as is
    pub async fn run(
        &self,
        start: RunStart,
        tier: ResourceTier,
    ) -> Result<RunReport, OrchestratorError> {
        // No fallback location: refuse to start work that could not be resumed
        self.store.ensure_directory()?;

        let (config, resumed_after) = match start {
            RunStart::Fresh(config) => (config, None),
            RunStart::Resume => {
                let state = self.load_resume_state()?;
                log::info!(
                    "[Orchestrator] Resuming after phase {} ({}), checkpointed {}",
                    state.phase,
                    state.phase_name,
                    state.timestamp.to_rfc3339()
                );
                (state.config, Some(state.phase))
            }
        };

        let ctx = PhaseContext {
            config: Arc::new(config),
            broker: Arc::clone(&self.broker),
            tier,
        };
        let retry = RetryPolicy::from_config(&ctx.config);

        let mut report = RunReport {
            resumed_after,
            phases: self
                .phases
                .iter()
                .map(|p| PhaseOutcome {
                    id: p.id(),
                    label: p.label().to_string(),
                    status: PhaseStatus::Pending,
                    attempts: 0,
                    already_satisfied: false,
                })
                .collect(),
        };

        let mut cancel = self.cancel_rx.clone();

        for (index, phase) in self.phases.iter().enumerate() {
            let id = phase.id();
            let label = phase.label().to_string();

            if resumed_after.map_or(false, |last| id <= last) {
                log::info!("[Orchestrator] [PHASE {}] Skipped ({}): already checkpointed", id, label);
                report.phases[index].advance(PhaseStatus::Skipped);
                self.emit(OrchestratorEvent::PhaseSkipped { id, label });
                continue;
            }

            report.phases[index].advance(PhaseStatus::Running);
            crate::log_parsed!("PHASE {} START: {}", id, label);
            self.emit(OrchestratorEvent::PhaseStarted {
                id,
                label: label.clone(),
            });

            let (already_satisfied, attempted) = tokio::select! {
                biased;
                _ = wait_for_cancel(cancel.as_mut()) => {
                    log::warn!("[Orchestrator] [PHASE {}] Cancelled ({}); checkpoint unchanged", id, label);
                    return Err(OrchestratorError::Cancelled { id, label });
                }
                outcome = self.drive_phase(phase, &ctx, &retry) => outcome,
            };

            let outcome = &mut report.phases[index];
            outcome.attempts = attempted.attempts;
            outcome.already_satisfied = already_satisfied;

            match attempted.result {
                Ok(()) => {
                    if let Err(e) = self
                        .store
                        .save(&ExecutionState::new(id, label.clone(), (*ctx.config).clone()))
                    {
                        outcome.advance(PhaseStatus::Failed);
                        log::error!("[Orchestrator] [PHASE {}] Checkpoint failed: {}", id, e);
                        return Err(e.into());
                    }
                    outcome.advance(PhaseStatus::Completed);
                    crate::log_parsed!("PHASE {} COMPLETE: {}", id, label);
                    self.emit(OrchestratorEvent::PhaseCompleted {
                        id,
                        label,
                        attempts: attempted.attempts,
                        already_satisfied,
                    });
                }
                Err(source) => {
                    outcome.advance(PhaseStatus::Failed);
                    log::error!(
                        "[Orchestrator] [PHASE {}] ✗ {} failed after {} attempt(s): {}",
                        id,
                        label,
                        attempted.attempts,
                        source
                    );
                    self.emit(OrchestratorEvent::PhaseFailed {
                        id,
                        label: label.clone(),
                        error: source.to_string(),
                    });
                    return Err(match source {
                        PhaseError::Privilege(source) => {
                            OrchestratorError::Privilege { id, label, source }
                        }
                        source => OrchestratorError::PhaseFailure {
                            id,
                            label,
                            attempts: attempted.attempts,
                            source,
                        },
                    });
                }
            }
        }

        debug_assert!(report.phases.iter().all(|p| p.status.is_terminal()));
        log::info!(
            "[Orchestrator] ✓ All {} phases done ({} executed, {} skipped)",
            report.phases.len(),
            report.executed().len(),
            report.count(PhaseStatus::Skipped)
        );
        Ok(report)
    }

    /// Check then execute one phase. Returns whether it was already satisfied
    /// and the execute outcome (0 attempts when satisfied).
    async fn drive_phase(
        &self,
        phase: &P,
        ctx: &PhaseContext,
        retry: &RetryPolicy,
    ) -> (bool, Attempted<(), PhaseError>) {
        let id = phase.id();
        let label = phase.label();

        let check = retry_with_backoff(
            retry,
            PhaseError::is_transient,
            |attempt, delay, e| self.report_retry(id, label, attempt, delay, e),
            |_| phase.is_already_satisfied(ctx),
        )
        .await;

        match check.result {
            Ok(true) => {
                log::info!("[Orchestrator] [PHASE {}] {} already satisfied", id, label);
                return (
                    true,
                    Attempted {
                        result: Ok(()),
                        attempts: 0,
                    },
                );
            }
            Ok(false) => {}
            Err(e) => {
                return (
                    false,
                    Attempted {
                        result: Err(e),
                        attempts: check.attempts,
                    },
                )
            }
        }

        let attempted = retry_with_backoff(
            retry,
            PhaseError::is_transient,
            |attempt, delay, e| self.report_retry(id, label, attempt, delay, e),
            |attempt| {
                log::info!("[Orchestrator] [PHASE {}] Executing {} (attempt {})", id, label, attempt);
                phase.execute(ctx)
            },
        )
        .await;
        (false, attempted)
    }

    fn report_retry(&self, id: PhaseId, label: &str, attempt: u32, delay: Duration, e: &PhaseError) {
        log::warn!(
            "[Orchestrator] [PHASE {}] Attempt {} failed, retrying in {:?}: {}",
            id,
            attempt,
            delay,
            e
        );
        self.emit(OrchestratorEvent::PhaseRetrying {
            id,
            label: label.to_string(),
            attempt,
            delay,
            error: e.to_string(),
        });
    }
}

/// Resolves once the cancellation flag is set. Never resolves without a receiver
/// or after the sender is gone.
async fn wait_for_cancel(rx: Option<&mut watch::Receiver<bool>>) {
    if let Some(rx) = rx {
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if !closed {
            return;
        }
    }
    futures::future::pending::<()>().await
}
