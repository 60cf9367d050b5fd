//! RAM detection module.
//!
//! Reads total system memory through `sysinfo`, falling back to
//! `/proc/meminfo` when the sysinfo snapshot reports nothing.

use std::fs;
use sysinfo::System;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Detect total RAM in GiB (fractional, so tier boundaries are exact).
///
/// Returns 0.0 when detection fails; the memory preflight check then reports
/// the host as below threshold instead of guessing.
pub fn detect_total_memory_gib() -> f64 {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total > 0 {
        return total as f64 / BYTES_PER_GIB;
    }

    match fs::read_to_string("/proc/meminfo") {
        Ok(content) => parse_meminfo_gib(&content).unwrap_or(0.0),
        Err(_) => 0.0,
    }
}

/// Extract `MemTotal` (kB) from /proc/meminfo content as GiB.
fn parse_meminfo_gib(content: &str) -> Option<f64> {
    content
        .lines()
        .find(|line| line.starts_with("MemTotal"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb as f64 / (1024.0 * 1024.0))
}
