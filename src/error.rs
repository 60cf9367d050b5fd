//! Unified error type hierarchy for Stagehand
//!
//! Provides structured error handling with ConfigError, PhaseError,
//! PrivilegeError, StateError and the top-level OrchestratorError that the
//! CLI maps to exit codes.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::orchestrator::state::PhaseId;

/// Configuration loading, merging and validation errors.
///
/// All of these are fatal and reported before any phase runs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid TOML in {path}: {reason}")]
    InvalidToml { path: String, reason: String },

    #[error("Unknown configuration key '{key}' (from {layer})")]
    UnknownKey { key: String, layer: String },

    #[error("Required setting '{0}' is missing")]
    MissingField(String),

    #[error("Invalid value for '{key}' (from {layer}): {reason}")]
    InvalidValue {
        key: String,
        layer: String,
        reason: String,
    },

    #[error("Setting '{key}' = {value} is outside the allowed range {min}..={max}")]
    OutOfRange {
        key: String,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Setting '{key}' rejected by password policy: {reason}")]
    WeakPassword { key: String, reason: String },

    #[error("Conflicting settings detected: {0}")]
    ConflictDetected(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Error reported by a phase's `execute` or satisfied check.
///
/// The phase classifies its own failures; the orchestrator never guesses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseError {
    /// Likely to succeed on retry (mirror hiccup, container still starting).
    #[error("transient: {0}")]
    Transient(String),

    /// Requires operator intervention; never retried.
    #[error("{0}")]
    Terminal(String),

    /// An elevated operation was refused or failed after the broker's own
    /// retries. Never retried by the orchestrator.
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
}

impl PhaseError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PhaseError::Transient(_))
    }

    pub fn message(&self) -> String {
        match self {
            PhaseError::Transient(msg) | PhaseError::Terminal(msg) => msg.clone(),
            PhaseError::Privilege(e) => e.to_string(),
        }
    }
}

/// Privilege elevation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrivilegeError {
    /// The elevation binary is missing or cannot be spawned.
    #[error("Privilege elevation unavailable: {0}")]
    Unavailable(String),

    /// The elevation mechanism refused the operation (no cached credentials, policy).
    #[error("Privilege elevation denied for {op}: {reason}")]
    Denied { op: String, reason: String },

    /// The elevated command ran but failed.
    #[error("Elevated {op} failed: {reason}")]
    OperationFailed { op: String, reason: String },

    /// Local (unprivileged) staging failed.
    #[error("Failed to stage privileged file: {0}")]
    Staging(String),
}

/// Persisted execution state errors.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State directory does not exist: {0}")]
    DirectoryMissing(PathBuf),

    #[error("State document at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("IO error during state operations: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Top-level error for a run, one variant per taxonomy entry.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Pre-flight checks failed:\n  - {}", .0.join("\n  - "))]
    Preflight(Vec<String>),

    #[error("Phase {id} ({label}) failed after {attempts} attempt(s): {source}")]
    PhaseFailure {
        id: PhaseId,
        label: String,
        attempts: u32,
        #[source]
        source: PhaseError,
    },

    #[error("Phase {id} ({label}) stopped on privilege elevation: {source}")]
    Privilege {
        id: PhaseId,
        label: String,
        #[source]
        source: PrivilegeError,
    },

    #[error("State directory does not exist: {0} (refusing to run without a resumable checkpoint)")]
    StateDirectoryMissing(PathBuf),

    #[error("--resume requested but no saved state exists at {0}")]
    NoStateToResume(PathBuf),

    #[error("State error: {0}")]
    State(StateError),

    #[error("Run cancelled during phase {id} ({label})")]
    Cancelled { id: PhaseId, label: String },
}

impl From<StateError> for OrchestratorError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::DirectoryMissing(path) => OrchestratorError::StateDirectoryMissing(path),
            other => OrchestratorError::State(other),
        }
    }
}

impl OrchestratorError {
    /// Process exit code, distinct per taxonomy entry.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::Config(_) => 2,
            OrchestratorError::Preflight(_) => 3,
            OrchestratorError::PhaseFailure { .. } => 4,
            OrchestratorError::Privilege { .. } => 5,
            OrchestratorError::StateDirectoryMissing(_) => 6,
            OrchestratorError::NoStateToResume(_) => 7,
            OrchestratorError::State(_) => 8,
            OrchestratorError::Cancelled { .. } => 130,
        }
    }

    /// Where the run stopped, for the operator-facing report.
    pub fn stage(&self) -> String {
        match self {
            OrchestratorError::Config(_) => "configuration".to_string(),
            OrchestratorError::Preflight(_) => "pre-flight".to_string(),
            OrchestratorError::PhaseFailure { id, label, .. }
            | OrchestratorError::Privilege { id, label, .. }
            | OrchestratorError::Cancelled { id, label } => format!("phase {} ({})", id, label),
            OrchestratorError::StateDirectoryMissing(_)
            | OrchestratorError::NoStateToResume(_)
            | OrchestratorError::State(_) => "state checkpoint".to_string(),
        }
    }

    /// Get a user-facing error message suitable for terminal display
    pub fn user_message(&self) -> String {
        match self {
            OrchestratorError::Config(e) => format!("Configuration error: {}", e),
            OrchestratorError::Preflight(failures) => format!(
                "System does not meet requirements ({} blocker(s)):\n  - {}",
                failures.len(),
                failures.join("\n  - ")
            ),
            OrchestratorError::PhaseFailure {
                id,
                label,
                attempts,
                source,
            } => format!(
                "Phase {} ({}) failed after {} attempt(s): {}",
                id,
                label,
                attempts,
                source.message()
            ),
            OrchestratorError::Privilege { id, label, source } => format!(
                "Phase {} ({}) could not run a privileged operation: {}",
                id, label, source
            ),
            OrchestratorError::StateDirectoryMissing(path) => format!(
                "State directory {} does not exist; create it and re-run",
                path.display()
            ),
            OrchestratorError::NoStateToResume(path) => format!(
                "Nothing to resume: no state file at {}. Start a fresh run without --resume",
                path.display()
            ),
            OrchestratorError::State(e) => format!("State file error: {}", e),
            OrchestratorError::Cancelled { id, label } => {
                format!("Cancelled by operator during phase {} ({})", id, label)
            }
        }
    }
}
