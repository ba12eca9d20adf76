//! Persisted daily session plans.
//!
//! The step list is stored as a versioned JSON document. A stored document
//! whose version differs from `PLAN_SCHEMA_VERSION`, or that no longer
//! parses, is stale: it is rebuilt rather than trusted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::VerseRange;
use crate::sequence::{AyahTask, Step};
use crate::time::{LocalDay, Timestamp};
use crate::types::{PacingMode, VerseId};

pub const PLAN_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Open,
    Completed,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Open => "OPEN",
            PlanStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(PlanStatus::Open),
            "COMPLETED" => Some(PlanStatus::Completed),
            _ => None,
        }
    }
}

/// Gate requirements snapshotted when the plan was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GateRequirements {
    pub warmup_required: bool,
    pub weekly_required: bool,
    pub new_unlocked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPlan {
    pub id: Uuid,
    pub learner_id: String,
    pub day: LocalDay,
    pub status: PlanStatus,
    pub mode: PacingMode,
    pub requirements: GateRequirements,
    pub steps: Vec<Step>,
    pub warmup_retry_used: bool,
    pub warmup_passed: Option<bool>,
    pub weekly_passed: Option<bool>,
    /// Locked to review-only by a failed gate.
    pub review_only: bool,
    /// New verses actually exposed, recorded at completion.
    pub new_range: Option<VerseRange>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub version: u32,
    /// Loaded from an incompatible document; `steps` is empty.
    #[serde(skip)]
    pub stale: bool,
}

impl SessionPlan {
    pub fn is_completed(&self) -> bool {
        self.status == PlanStatus::Completed
    }

    /// Verses in the warm-up block, in plan order.
    pub fn warmup_verses(&self) -> Vec<VerseId> {
        self.verses_for(AyahTask::Warmup)
    }

    pub fn weekly_verses(&self) -> Vec<VerseId> {
        self.verses_for(AyahTask::Weekly)
    }

    /// Verses scheduled for blind recall; the only ones that can move the cursor.
    pub fn blind_verses(&self) -> Vec<VerseId> {
        self.verses_for(AyahTask::Blind)
    }

    fn verses_for(&self, wanted: AyahTask) -> Vec<VerseId> {
        self.steps
            .iter()
            .filter_map(|s| match *s {
                Step::Ayah { verse, task } if task == wanted => Some(verse),
                _ => None,
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct PlanDocument {
    version: u32,
    steps: Vec<Step>,
}

#[derive(Deserialize)]
struct PlanHeader {
    version: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedSteps {
    Current(Vec<Step>),
    Stale,
}

pub fn encode_steps(steps: &[Step]) -> Result<String, serde_json::Error> {
    serde_json::to_string(&PlanDocument {
        version: PLAN_SCHEMA_VERSION,
        steps: steps.to_vec(),
    })
}

pub fn decode_steps(json: &str) -> DecodedSteps {
    match serde_json::from_str::<PlanHeader>(json) {
        Ok(h) if h.version == PLAN_SCHEMA_VERSION => {}
        _ => return DecodedSteps::Stale,
    }
    match serde_json::from_str::<PlanDocument>(json) {
        Ok(doc) => DecodedSteps::Current(doc.steps),
        Err(_) => DecodedSteps::Stale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{LinkKind, ReviewTier};

    #[test]
    fn test_encode_carries_version() {
        let json = encode_steps(&[Step::ayah(1, AyahTask::Expose)]).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["version"], PLAN_SCHEMA_VERSION);
    }

    #[test]
    fn test_decode_current() {
        let steps = vec![
            Step::ayah(3, AyahTask::Review(ReviewTier::Manzil)),
            Step::Link { from: 1, to: 2, link: LinkKind::New },
        ];
        let json = encode_steps(&steps).unwrap();
        assert_eq!(decode_steps(&json), DecodedSteps::Current(steps));
    }

    #[test]
    fn test_old_version_is_stale() {
        let json = r#"{"version": 0, "steps": []}"#;
        assert_eq!(decode_steps(json), DecodedSteps::Stale);
    }

    #[test]
    fn test_legacy_shape_is_stale() {
        // Pre-versioning plans were a bare array of loosely typed records.
        let json = r#"[{"verse": 1, "stage": "NEW", "phase": "EXPOSE"}]"#;
        assert_eq!(decode_steps(json), DecodedSteps::Stale);
        let json = r#"{"version": 1, "steps": [{"kind": "teleport"}]}"#;
        assert_eq!(decode_steps(json), DecodedSteps::Stale);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(PlanStatus::parse("OPEN"), Some(PlanStatus::Open));
        assert_eq!(PlanStatus::parse(PlanStatus::Completed.as_str()), Some(PlanStatus::Completed));
        assert_eq!(PlanStatus::parse("open"), None);
    }
}
