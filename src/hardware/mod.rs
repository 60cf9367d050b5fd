//! Hardware detection public API module.
//!
//! Aggregates the host facts needed by the preflight validator behind the
//! [`SystemProbe`] trait so checks can run against a fake host in tests.

pub mod cpu;
pub mod network;
pub mod ram;
pub mod storage;

pub use cpu::detect_cpu_cores;
pub use network::is_port_in_use;
pub use ram::detect_total_memory_gib;
pub use storage::detect_disk_free_gib;

use crate::models::ElevationTool;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;

/// Host facts consumed by preflight checks.
///
/// Implementations must be cheap to share across the blocking threads the
/// checks run on.
pub trait SystemProbe: Send + Sync {
    fn total_memory_gib(&self) -> f64;
    fn cpu_cores(&self) -> u32;
    fn disk_free_gib(&self, target: &Path) -> f64;
    fn port_in_use(&self, port: u16) -> bool;
    /// Whether the elevation mechanism exists and can run non-interactively.
    fn elevation_available(&self, tool: ElevationTool) -> Result<(), String>;
}

/// Memory and CPU snapshot used for tier classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemProfile {
    pub memory_gib: f64,
    pub cpu_cores: u32,
}

impl SystemProfile {
    pub fn capture(probe: &dyn SystemProbe) -> Self {
        SystemProfile {
            memory_gib: probe.total_memory_gib(),
            cpu_cores: probe.cpu_cores(),
        }
    }
}

/// Production probe backed by sysinfo, num_cpus and the local network stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProbe;

impl HostProbe {
    pub fn new() -> Self {
        HostProbe
    }

    fn command_exists(cmd: &str) -> bool {
        Command::new("sh")
            .arg("-c")
            .arg(format!("command -v {}", cmd))
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

impl SystemProbe for HostProbe {
    fn total_memory_gib(&self) -> f64 {
        detect_total_memory_gib()
    }

    fn cpu_cores(&self) -> u32 {
        detect_cpu_cores()
    }

    fn disk_free_gib(&self, target: &Path) -> f64 {
        detect_disk_free_gib(target)
    }

    fn port_in_use(&self, port: u16) -> bool {
        is_port_in_use(port)
    }

    fn elevation_available(&self, tool: ElevationTool) -> Result<(), String> {
        if !Self::command_exists(tool.program()) {
            return Err(format!("'{}' is not installed or not on PATH", tool.program()));
        }

        match tool {
            ElevationTool::Sudo => {
                // -n fails instead of prompting when no credentials are cached
                let output = Command::new("sudo")
                    .args(["-n", "true"])
                    .output()
                    .map_err(|e| format!("failed to run sudo: {}", e))?;
                if output.status.success() {
                    Ok(())
                } else {
                    Err(format!(
                        "sudo requires a password; run 'sudo -v' first or configure NOPASSWD ({})",
                        String::from_utf8_lossy(&output.stderr).trim()
                    ))
                }
            }
            // Polkit authorizes per call; presence is all that can be checked up front
            ElevationTool::Pkexec => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_probe_reports_sane_values() {
        let probe = HostProbe::new();
        assert!(probe.cpu_cores() >= 1);
        assert!(probe.total_memory_gib() >= 0.0);
    }

    #[test]
    fn test_profile_capture() {
        let profile = SystemProfile::capture(&HostProbe::new());
        assert!(profile.cpu_cores >= 1);
    }

    #[test]
    fn test_command_exists() {
        assert!(HostProbe::command_exists("sh"));
        assert!(!HostProbe::command_exists("definitely-not-a-real-binary-xyz"));
    }
}
