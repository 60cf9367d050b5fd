//! Pre-flight Validator
//!
//! Independent host checks run concurrently before any phase. Every failure
//! is collected so the operator sees all blockers at once, and the report
//! carries the resource tier used to tune later phases.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::hardware::{SystemProbe, SystemProfile};
use crate::models::Configuration;
use crate::policy::ResourceTier;

/// Logical cores needed to run the container stack.
pub const MIN_CPU_CORES: u32 = 2;

/// One independent pre-flight check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckKind {
    DiskSpace,
    Memory,
    Cpu,
    Ports,
    Elevation,
}

impl CheckKind {
    pub const ALL: [CheckKind; 5] = [
        CheckKind::DiskSpace,
        CheckKind::Memory,
        CheckKind::Cpu,
        CheckKind::Ports,
        CheckKind::Elevation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::DiskSpace => "disk space",
            CheckKind::Memory => "memory",
            CheckKind::Cpu => "cpu",
            CheckKind::Ports => "ports",
            CheckKind::Elevation => "privilege elevation",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub kind: CheckKind,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(kind: CheckKind, detail: impl Into<String>) -> Self {
        CheckResult {
            kind,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(kind: CheckKind, detail: impl Into<String>) -> Self {
        CheckResult {
            kind,
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Which checks to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreflightOptions {
    /// Off on resume: a partially started stack may already hold the ports.
    pub check_ports: bool,
}

impl Default for PreflightOptions {
    fn default() -> Self {
        PreflightOptions { check_ports: true }
    }
}

/// Aggregated pre-flight outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
    pub profile: SystemProfile,
    pub tier: ResourceTier,
}

impl PreflightReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// One line per failed check.
    pub fn failures(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.kind, c.detail))
            .collect()
    }

    pub fn into_result(self) -> Result<Self, OrchestratorError> {
        if self.passed() {
            Ok(self)
        } else {
            Err(OrchestratorError::Preflight(self.failures()))
        }
    }
}

/// Runs pre-flight checks against a [`SystemProbe`].
pub struct Validator {
    probe: Arc<dyn SystemProbe>,
}

impl Validator {
    pub fn new(probe: Arc<dyn SystemProbe>) -> Self {
        Validator { probe }
    }

    /// Run every enabled check concurrently and merge the results.
    pub async fn run_preflight(
        &self,
        config: &Configuration,
        options: PreflightOptions,
    ) -> PreflightReport {
        let config = Arc::new(config.clone());
        let kinds: Vec<CheckKind> = CheckKind::ALL
            .into_iter()
            .filter(|k| options.check_ports || *k != CheckKind::Ports)
            .collect();

        log::info!("[Preflight] Running {} checks", kinds.len());

        let jobs = kinds.iter().map(|&kind| {
            let probe = Arc::clone(&self.probe);
            let config = Arc::clone(&config);
            async move {
                tokio::task::spawn_blocking(move || evaluate(kind, probe.as_ref(), &config))
                    .await
                    .unwrap_or_else(|e| CheckResult::fail(kind, format!("check aborted: {}", e)))
            }
        });

        let probe = Arc::clone(&self.probe);
        let profile_job = tokio::task::spawn_blocking(move || SystemProfile::capture(probe.as_ref()));

        let (checks, profile) = futures::join!(join_all(jobs), profile_job);
        let profile = match profile {
            Ok(profile) => profile,
            Err(e) => {
                log::warn!("[Preflight] Profile capture aborted: {}", e);
                SystemProfile {
                    memory_gib: 0.0,
                    cpu_cores: 1,
                }
            }
        };
        let tier = ResourceTier::classify(profile.memory_gib, profile.cpu_cores);

        for check in &checks {
            if check.passed {
                log::info!("[Preflight] ✓ {}: {}", check.kind, check.detail);
            } else {
                log::error!("[Preflight] ✗ {}: {}", check.kind, check.detail);
            }
        }
        log::info!(
            "[Preflight] Resource tier: {} ({} MiB, {} workers)",
            tier.tier.as_str(),
            tier.memory_budget_mib,
            tier.workers
        );

        PreflightReport {
            checks,
            profile,
            tier,
        }
    }
}

/// Evaluate one check synchronously.
pub fn evaluate(kind: CheckKind, probe: &dyn SystemProbe, config: &Configuration) -> CheckResult {
    match kind {
        CheckKind::DiskSpace => {
            let free = probe.disk_free_gib(&config.install_dir);
            let required = f64::from(config.min_disk_gib);
            let detail = format!(
                "{:.1} GiB free for {}, {} GiB required",
                free,
                config.install_dir.display(),
                config.min_disk_gib
            );
            if free >= required {
                CheckResult::pass(kind, detail)
            } else {
                CheckResult::fail(kind, detail)
            }
        }
        CheckKind::Memory => {
            let total = probe.total_memory_gib();
            let detail = format!(
                "{:.1} GiB installed, {} GiB required",
                total, config.min_memory_gib
            );
            if total >= f64::from(config.min_memory_gib) {
                CheckResult::pass(kind, detail)
            } else {
                CheckResult::fail(kind, detail)
            }
        }
        CheckKind::Cpu => {
            let cores = probe.cpu_cores();
            let detail = format!("{} logical cores, {} required", cores, MIN_CPU_CORES);
            if cores >= MIN_CPU_CORES {
                CheckResult::pass(kind, detail)
            } else {
                CheckResult::fail(kind, detail)
            }
        }
        CheckKind::Ports => {
            let busy: Vec<String> = config
                .required_ports()
                .into_iter()
                .filter(|p| probe.port_in_use(*p))
                .map(|p| p.to_string())
                .collect();
            if busy.is_empty() {
                CheckResult::pass(kind, format!("{:?} available", config.required_ports()))
            } else {
                CheckResult::fail(kind, format!("port(s) {} already in use", busy.join(", ")))
            }
        }
        CheckKind::Elevation => match probe.elevation_available(config.elevation_tool) {
            Ok(()) => CheckResult::pass(kind, format!("{} available", config.elevation_tool.program())),
            Err(reason) => CheckResult::fail(kind, reason),
        },
    }
}
