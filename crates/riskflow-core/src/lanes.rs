//! Lane selection for submissions.

use riskflow_state::Lane;
use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;

/// Caller-declared urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityHint {
    Urgent,
    Normal,
    Bulk,
}

impl std::str::FromStr for PriorityHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "urgent" | "high" => Ok(PriorityHint::Urgent),
            "normal" | "medium" => Ok(PriorityHint::Normal),
            "bulk" | "low" => Ok(PriorityHint::Bulk),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Deterministic, stateless mapping from a submission to a lane.
///
/// An explicit hint wins. Without one, small submissions go to the high lane,
/// medium-sized ones to the medium lane and everything else to the low lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanePolicy {
    pub high_max_rows: usize,
    pub medium_max_rows: usize,
}

impl Default for LanePolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl LanePolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            high_max_rows: config.high_lane_max_rows,
            medium_max_rows: config.medium_lane_max_rows,
        }
    }

    pub fn classify(&self, hint: Option<PriorityHint>, rows: usize) -> Lane {
        match hint {
            Some(PriorityHint::Urgent) => Lane::High,
            Some(PriorityHint::Normal) => Lane::Medium,
            Some(PriorityHint::Bulk) => Lane::Low,
            None if rows <= self.high_max_rows => Lane::High,
            None if rows <= self.medium_max_rows => Lane::Medium,
            None => Lane::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_overrides_size() {
        let policy = LanePolicy::default();
        assert_eq!(policy.classify(Some(PriorityHint::Urgent), 50_000), Lane::High);
        assert_eq!(policy.classify(Some(PriorityHint::Bulk), 1), Lane::Low);
        assert_eq!(policy.classify(Some(PriorityHint::Normal), 1), Lane::Medium);
    }

    #[test]
    fn size_decides_without_hint() {
        let policy = LanePolicy::default();
        assert_eq!(policy.classify(None, 1), Lane::High);
        assert_eq!(policy.classify(None, 100), Lane::High);
        assert_eq!(policy.classify(None, 101), Lane::Medium);
        assert_eq!(policy.classify(None, 5000), Lane::Medium);
        assert_eq!(policy.classify(None, 5001), Lane::Low);
    }

    #[test]
    fn hint_parsing_accepts_lane_names() {
        assert_eq!("HIGH".parse::<PriorityHint>().unwrap(), PriorityHint::Urgent);
        assert_eq!("bulk".parse::<PriorityHint>().unwrap(), PriorityHint::Bulk);
        assert!("asap".parse::<PriorityHint>().is_err());
    }
}
