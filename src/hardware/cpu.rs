//! CPU detection module.

/// Detect the number of logical CPU cores available to this process.
pub fn detect_cpu_cores() -> u32 {
    num_cpus::get().max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_cpu_cores_at_least_one() {
        assert!(detect_cpu_cores() >= 1);
    }
}
