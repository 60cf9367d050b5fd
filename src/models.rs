//! Core data structures shared across the configuration, preflight and
//! orchestration layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Deployment tier of the target application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// OS mechanism used for the narrow set of elevated operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationTool {
    /// `sudo -n`: non-interactive, relies on cached or NOPASSWD credentials.
    Sudo,
    /// `pkexec`: Polkit, may show a system authentication prompt.
    Pkexec,
}

impl ElevationTool {
    pub fn program(&self) -> &'static str {
        match self {
            ElevationTool::Sudo => "sudo",
            ElevationTool::Pkexec => "pkexec",
        }
    }

    /// Arguments placed between the program and the elevated command.
    pub fn prefix_args(&self) -> &'static [&'static str] {
        match self {
            ElevationTool::Sudo => &["-n", "--"],
            ElevationTool::Pkexec => &[],
        }
    }
}

/// A credential whose value never appears in Debug/Display output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Validated, immutable configuration for one installation run.
///
/// Produced by [`crate::config::ConfigStore::load`] and snapshotted into every
/// persisted checkpoint so a resumed run uses exactly these values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    // Network identity
    pub domain: String,
    pub admin_email: String,

    // Credentials
    pub admin_password: Secret,
    pub database_password: Secret,

    pub environment: Environment,

    // Service account and placement
    pub service_user: String,
    pub service_group: String,
    pub install_dir: PathBuf,

    pub http_port: u16,
    pub https_port: u16,

    // Feature toggles
    pub enable_tls: bool,
    pub enable_backups: bool,

    // Preflight thresholds
    pub min_disk_gib: u32,
    pub min_memory_gib: u32,

    // Retry tuning
    pub retry_attempts: u32,
    pub retry_base_delay_secs: u64,

    pub elevation_tool: ElevationTool,
}

impl Configuration {
    /// Ports that must be free before the stack starts.
    pub fn required_ports(&self) -> Vec<u16> {
        let mut ports = vec![self.http_port];
        if self.enable_tls {
            ports.push(self.https_port);
        }
        ports
    }

    /// Local health endpoint probed by the final validation phase.
    pub fn health_url(&self) -> String {
        if self.enable_tls {
            format!("https://127.0.0.1:{}/health", self.https_port)
        } else {
            format!("http://127.0.0.1:{}/health", self.http_port)
        }
    }

    /// Docker Compose project name derived from the domain.
    pub fn compose_project(&self) -> String {
        let sanitized: String = self
            .domain
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("stagehand_{}", sanitized)
    }

    pub fn tls_dir(&self) -> PathBuf {
        self.install_dir.join("tls")
    }

    pub fn env_file(&self) -> PathBuf {
        self.install_dir.join(".env")
    }
}
