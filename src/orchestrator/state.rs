//! Phase identifiers, per-phase status and the persisted execution record.
//!
//! **Architecture**:
//! - `PhaseId`: sortable identifier with optional sub-phase (5 < 5.5 < 6)
//! - `PhaseStatus`: lifecycle of one phase within a run
//! - `ExecutionState`: the single checkpoint document written after each phase

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::models::Configuration;

/// Phase identifier: a whole phase number plus an optional one-digit sub-phase.
///
/// Ordering is numeric, so `5 < 5.5 < 6`. Serialized as a JSON number
/// (`5` or `5.5`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhaseId {
    major: u16,
    minor: u8,
}

impl PhaseId {
    /// A whole phase.
    pub const fn new(major: u16) -> Self {
        PhaseId { major, minor: 0 }
    }

    /// A sub-phase (`sub(5, 5)` is 5.5). `minor` must be 1..=9.
    pub const fn sub(major: u16, minor: u8) -> Self {
        assert!(minor >= 1 && minor <= 9, "sub-phase digit must be 1..=9");
        PhaseId { major, minor }
    }

    pub fn major(&self) -> u16 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }

    fn as_f64(&self) -> f64 {
        f64::from(self.major) + f64::from(self.minor) / 10.0
    }

    /// Parse `5`, `5.5`, or a numeric value read from a state document.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 || value > f64::from(u16::MAX) {
            return None;
        }
        let tenths = (value * 10.0).round();
        // Reject values with more than one decimal digit
        if (value * 10.0 - tenths).abs() > 1e-6 {
            return None;
        }
        let tenths = tenths as u32;
        Some(PhaseId {
            major: (tenths / 10) as u16,
            minor: (tenths % 10) as u8,
        })
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "{}", self.major)
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

impl Serialize for PhaseId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.minor == 0 {
            serializer.serialize_u16(self.major)
        } else {
            serializer.serialize_f64(self.as_f64())
        }
    }
}

struct PhaseIdVisitor;

impl<'de> Visitor<'de> for PhaseIdVisitor {
    type Value = PhaseId;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a phase number such as 5 or 5.5")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<PhaseId, E> {
        u16::try_from(v)
            .map(PhaseId::new)
            .map_err(|_| E::custom(format!("phase {} out of range", v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<PhaseId, E> {
        u64::try_from(v)
            .map_err(|_| E::custom(format!("phase {} is negative", v)))
            .and_then(|v| self.visit_u64(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<PhaseId, E> {
        PhaseId::from_f64(v).ok_or_else(|| E::custom(format!("invalid phase number {}", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<PhaseId, E> {
        v.parse::<f64>()
            .ok()
            .and_then(PhaseId::from_f64)
            .ok_or_else(|| E::custom(format!("invalid phase number '{}'", v)))
    }
}

impl<'de> Deserialize<'de> for PhaseId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PhaseIdVisitor)
    }
}

/// Lifecycle of one phase within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseStatus {
    /// Not yet reached
    Pending,
    /// Satisfied check or execute in progress
    Running,
    /// Finished (executed or already satisfied) and checkpointed
    Completed,
    /// At or below the last checkpoint of a resumed run
    Skipped,
    /// Terminal error or retries exhausted; halts the run
    Failed,
}

impl PhaseStatus {
    /// Get the human-readable name for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::Failed => "failed",
        }
    }

    /// Completed, Skipped and Failed are final for a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseStatus::Completed | PhaseStatus::Skipped | PhaseStatus::Failed
        )
    }

    /// Get all valid status transitions FROM this status.
    pub fn valid_next(&self) -> &'static [PhaseStatus] {
        match self {
            PhaseStatus::Pending => &[PhaseStatus::Running, PhaseStatus::Skipped],
            PhaseStatus::Running => &[PhaseStatus::Completed, PhaseStatus::Failed],
            PhaseStatus::Completed | PhaseStatus::Skipped | PhaseStatus::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: PhaseStatus) -> bool {
        self.valid_next().contains(&next)
    }
}

/// The persisted record of progress.
///
/// Overwritten after every completed phase; never mutated mid-phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Last completed phase
    pub phase: PhaseId,

    /// Its human label
    pub phase_name: String,

    /// When the phase completed (ISO-8601, UTC)
    pub timestamp: DateTime<Utc>,

    /// Configuration the run was started with
    pub config: Configuration,
}

impl ExecutionState {
    pub fn new(phase: PhaseId, phase_name: impl Into<String>, config: Configuration) -> Self {
        ExecutionState {
            phase,
            phase_name: phase_name.into(),
            timestamp: Utc::now(),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_config;

    #[test]
    fn test_sub_phase_ordering() {
        let five = PhaseId::new(5);
        let five_half = PhaseId::sub(5, 5);
        let six = PhaseId::new(6);
        assert!(five < five_half);
        assert!(five_half < six);
        assert!(PhaseId::sub(5, 9) < six);
    }

    #[test]
    fn test_phase_id_display() {
        assert_eq!(PhaseId::new(3).to_string(), "3");
        assert_eq!(PhaseId::sub(5, 5).to_string(), "5.5");
    }

    #[test]
    fn test_phase_id_json_numbers() {
        assert_eq!(serde_json::to_string(&PhaseId::new(5)).unwrap(), "5");
        assert_eq!(serde_json::to_string(&PhaseId::sub(5, 5)).unwrap(), "5.5");
        assert_eq!(serde_json::from_str::<PhaseId>("5").unwrap(), PhaseId::new(5));
        assert_eq!(
            serde_json::from_str::<PhaseId>("5.5").unwrap(),
            PhaseId::sub(5, 5)
        );
        assert_eq!(serde_json::from_str::<PhaseId>("6.0").unwrap(), PhaseId::new(6));
    }

    #[test]
    fn test_phase_id_rejects_bad_numbers() {
        assert!(serde_json::from_str::<PhaseId>("-1").is_err());
        assert!(serde_json::from_str::<PhaseId>("5.25").is_err());
        assert!(serde_json::from_str::<PhaseId>("\"abc\"").is_err());
    }

    #[test]
    fn test_status_transitions() {
        assert!(PhaseStatus::Pending.can_transition_to(PhaseStatus::Running));
        assert!(PhaseStatus::Pending.can_transition_to(PhaseStatus::Skipped));
        assert!(PhaseStatus::Running.can_transition_to(PhaseStatus::Completed));
        assert!(!PhaseStatus::Pending.can_transition_to(PhaseStatus::Completed));
        assert!(!PhaseStatus::Failed.can_transition_to(PhaseStatus::Running));
        assert!(PhaseStatus::Skipped.is_terminal());
        assert!(!PhaseStatus::Running.is_terminal());
    }

    #[test]
    fn test_state_document_shape() {
        let state = ExecutionState::new(PhaseId::sub(5, 5), "Start container stack", sample_config());
        let value: serde_json::Value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["phase"], serde_json::json!(5.5));
        assert_eq!(value["phase_name"], "Start container stack");
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
        assert_eq!(value["config"]["domain"], "app.example.com");
    }
}
