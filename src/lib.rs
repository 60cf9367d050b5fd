//! Stagehand: resumable installation orchestrator
//!
//! Installs a containerized application on a Linux host in ordered phases,
//! checkpointing after each one so a failed or interrupted run resumes where
//! it stopped.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy and exit codes
//! - **models**: Configuration and shared value types
//! - **config**: Layered configuration loading and validation
//! - **policy**: Resource tier classification
//! - **hardware**: Host facts behind the `SystemProbe` trait
//! - **system**: Command execution, privilege broker, pre-flight validator
//! - **orchestrator**: Phase contract, retry, checkpointing and the run loop
//! - **cli**: Command-line surface

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;

// Resource tier policy
pub mod policy;

// Host detection
pub mod hardware;

// OS abstraction: commands, elevation, pre-flight
pub mod system;

// Robust, decoupled logging system
pub mod log_collector;

// Phases, checkpointing and the run loop
pub mod orchestrator;

pub mod cli;

// Re-export the log crate for macro usage
pub use log;

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{ConfigError, OrchestratorError, PhaseError, PrivilegeError, StateError};

pub use models::{Configuration, ElevationTool, Environment, Secret};

pub use config::{ConfigSources, ConfigStore};

pub use policy::{ResourceTier, Tier};

pub use hardware::{HostProbe, SystemProbe, SystemProfile};

pub use system::preflight::{PreflightOptions, PreflightReport, Validator};
pub use system::privilege::{
    CommandElevator, ElevatedOp, Elevator, Ownership, PathKind, PrivilegeBroker, PrivilegedFile,
};

pub use log_collector::{LogCollector, LogLine};

pub use orchestrator::{
    ExecutionState, InstallPhase, Orchestrator, OrchestratorEvent, Phase, PhaseContext, PhaseId,
    PhaseStatus, RetryPolicy, RunReport, RunStart, StateStore,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
