//! Resource tier policy: memory and CPU to performance settings.

use serde::{Deserialize, Serialize};

/// Memory threshold (GiB) where `mid` starts.
pub const MID_TIER_MEMORY_GIB: f64 = 8.0;

/// Memory threshold (GiB) where `high` starts.
pub const HIGH_TIER_MEMORY_GIB: f64 = 16.0;

/// Resource tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Low,
    Mid,
    High,
}

impl Tier {
    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Low => "low",
            Tier::Mid => "mid",
            Tier::High => "high",
        }
    }

    /// Memory budget handed to the application containers, in MiB.
    pub fn memory_budget_mib(&self) -> u32 {
        match self {
            Tier::Low => 2048,
            Tier::Mid => 4096,
            Tier::High => 8192,
        }
    }
}

/// Auto-tuning decision derived from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTier {
    pub tier: Tier,
    pub memory_budget_mib: u32,
    pub workers: u32,
}

impl ResourceTier {
    /// Classify a host by total memory (GiB) and CPU core count.
    ///
    /// Boundaries are inclusive on the upper tier: 8.00 GiB is `mid`,
    /// 16.00 GiB is `high`.
    pub fn classify(memory_gib: f64, cpu_cores: u32) -> Self {
        let tier = if memory_gib < MID_TIER_MEMORY_GIB {
            Tier::Low
        } else if memory_gib < HIGH_TIER_MEMORY_GIB {
            Tier::Mid
        } else {
            Tier::High
        };

        let workers = match tier {
            Tier::Low => 2,
            Tier::Mid => 4,
            Tier::High => cpu_cores.max(2),
        };

        ResourceTier {
            tier,
            memory_budget_mib: tier.memory_budget_mib(),
            workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        let t = ResourceTier::classify(7.99, 4);
        assert_eq!((t.tier, t.workers), (Tier::Low, 2));

        let t = ResourceTier::classify(8.00, 4);
        assert_eq!((t.tier, t.workers), (Tier::Mid, 4));

        let t = ResourceTier::classify(15.99, 4);
        assert_eq!((t.tier, t.workers), (Tier::Mid, 4));

        let t = ResourceTier::classify(16.00, 10);
        assert_eq!((t.tier, t.workers), (Tier::High, 10));
    }

    #[test]
    fn test_high_tier_worker_floor() {
        let t = ResourceTier::classify(16.00, 1);
        assert_eq!((t.tier, t.workers), (Tier::High, 2));
        let t = ResourceTier::classify(64.0, 0);
        assert_eq!(t.workers, 2);
    }

    #[test]
    fn test_memory_budget_follows_tier() {
        assert_eq!(ResourceTier::classify(2.0, 8).memory_budget_mib, 2048);
        assert_eq!(ResourceTier::classify(12.0, 8).memory_budget_mib, 4096);
        assert_eq!(ResourceTier::classify(32.0, 8).memory_budget_mib, 8192);
    }

    #[test]
    fn test_low_and_mid_ignore_core_count() {
        assert_eq!(ResourceTier::classify(4.0, 64).workers, 2);
        assert_eq!(ResourceTier::classify(10.0, 64).workers, 4);
    }
}
