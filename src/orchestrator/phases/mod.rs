//! Orchestrator phases: the installation pipeline stages.
//!
//! Every stage implements [`Phase`]. The registered stages form a closed enum
//! ([`InstallPhase`]) with an explicit ordered registry:
//! - **1** (`packages`) - System packages
//! - **2** (`account`) - Service account
//! - **3, 4** (`layout`) - Install directory and environment file
//! - **5** (`tls`) - TLS certificate
//! - **5.5** (`containers`) - Container stack
//! - **6** (`validation`) - Service health check
//!
//! Phases never touch the checkpoint; they only report success or a
//! classified [`PhaseError`].

pub mod account;
pub mod containers;
pub mod layout;
pub mod packages;
pub mod tls;
pub mod validation;

use std::sync::Arc;

use futures::future::BoxFuture;

use super::state::PhaseId;
use crate::error::PhaseError;
use crate::models::Configuration;
use crate::policy::ResourceTier;
use crate::system::privilege::{Ownership, PrivilegeBroker};

/// Everything a phase may read or use. Immutable for the whole run.
#[derive(Clone)]
pub struct PhaseContext {
    pub config: Arc<Configuration>,
    pub broker: Arc<PrivilegeBroker>,
    pub tier: ResourceTier,
}

impl PhaseContext {
    /// `service_user:service_group`
    pub fn service_owner(&self) -> Ownership {
        Ownership::new(&self.config.service_user, &self.config.service_group)
    }
}

/// One resumable unit of installation work.
///
/// `is_already_satisfied` must be side-effect free. `execute` must be safe to
/// re-run after a crash part-way through it.
pub trait Phase: Send + Sync {
    fn id(&self) -> PhaseId;

    fn label(&self) -> &str;

    fn is_already_satisfied<'a>(
        &'a self,
        ctx: &'a PhaseContext,
    ) -> BoxFuture<'a, Result<bool, PhaseError>>;

    fn execute<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<(), PhaseError>>;
}

/// The registered installation phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallPhase {
    SystemPackages,
    ServiceAccount,
    InstallDirectory,
    EnvironmentFile,
    TlsCertificate,
    ContainerStack,
    ServiceValidation,
}

impl InstallPhase {
    /// All phases in execution order.
    pub fn registry() -> Vec<InstallPhase> {
        vec![
            InstallPhase::SystemPackages,
            InstallPhase::ServiceAccount,
            InstallPhase::InstallDirectory,
            InstallPhase::EnvironmentFile,
            InstallPhase::TlsCertificate,
            InstallPhase::ContainerStack,
            InstallPhase::ServiceValidation,
        ]
    }
}

impl Phase for InstallPhase {
    fn id(&self) -> PhaseId {
        match self {
            InstallPhase::SystemPackages => PhaseId::new(1),
            InstallPhase::ServiceAccount => PhaseId::new(2),
            InstallPhase::InstallDirectory => PhaseId::new(3),
            InstallPhase::EnvironmentFile => PhaseId::new(4),
            InstallPhase::TlsCertificate => PhaseId::new(5),
            InstallPhase::ContainerStack => PhaseId::sub(5, 5),
            InstallPhase::ServiceValidation => PhaseId::new(6),
        }
    }

    fn label(&self) -> &str {
        match self {
            InstallPhase::SystemPackages => "Install system packages",
            InstallPhase::ServiceAccount => "Create service account",
            InstallPhase::InstallDirectory => "Prepare install directory",
            InstallPhase::EnvironmentFile => "Write environment file",
            InstallPhase::TlsCertificate => "Generate TLS certificate",
            InstallPhase::ContainerStack => "Start container stack",
            InstallPhase::ServiceValidation => "Validate service",
        }
    }

    fn is_already_satisfied<'a>(
        &'a self,
        ctx: &'a PhaseContext,
    ) -> BoxFuture<'a, Result<bool, PhaseError>> {
        match self {
            InstallPhase::SystemPackages => Box::pin(packages::is_satisfied(ctx)),
            InstallPhase::ServiceAccount => Box::pin(account::is_satisfied(ctx)),
            InstallPhase::InstallDirectory => Box::pin(layout::directory_is_satisfied(ctx)),
            // Content depends on tier and config; always rewritten
            InstallPhase::EnvironmentFile => Box::pin(async { Ok(false) }),
            InstallPhase::TlsCertificate => Box::pin(tls::is_satisfied(ctx)),
            InstallPhase::ContainerStack => Box::pin(containers::is_satisfied(ctx)),
            InstallPhase::ServiceValidation => Box::pin(async { Ok(false) }),
        }
    }

    fn execute<'a>(&'a self, ctx: &'a PhaseContext) -> BoxFuture<'a, Result<(), PhaseError>> {
        match self {
            InstallPhase::SystemPackages => Box::pin(packages::execute(ctx)),
            InstallPhase::ServiceAccount => Box::pin(account::execute(ctx)),
            InstallPhase::InstallDirectory => Box::pin(layout::create_directories(ctx)),
            InstallPhase::EnvironmentFile => Box::pin(layout::write_env_file(ctx)),
            InstallPhase::TlsCertificate => Box::pin(tls::execute(ctx)),
            InstallPhase::ContainerStack => Box::pin(containers::execute(ctx)),
            InstallPhase::ServiceValidation => Box::pin(validation::execute(ctx)),
        }
    }
}
