use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::time::Timestamp;
use crate::types::{PacingMode, StepKind, VerseId};

/// Learned average seconds per step, one running average per step kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepAverages {
    pub review_secs: f64,
    pub new_secs: f64,
    pub link_secs: f64,
}

impl StepAverages {
    pub fn get(&self, kind: StepKind) -> f64 {
        match kind {
            StepKind::Review => self.review_secs,
            StepKind::New => self.new_secs,
            StepKind::Link => self.link_secs,
        }
    }

    pub fn set(&mut self, kind: StepKind, secs: f64) {
        match kind {
            StepKind::Review => self.review_secs = secs,
            StepKind::New => self.new_secs = secs,
            StepKind::Link => self.link_secs = secs,
        }
    }

    /// Cost of one new verse: expose, guided and blind steps plus its link.
    pub fn new_verse_secs(&self) -> f64 {
        3.0 * self.new_secs + self.link_secs
    }
}

/// Per-learner pacing thresholds, as fractions of the daily budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PacingThresholds {
    /// Debt ratio at which pacing moves to CONSOLIDATION.
    pub consolidation_ratio: f64,
    /// Debt ratio at which pacing moves to CATCH_UP.
    pub catch_up_ratio: f64,
    /// Share of the budget that new material may never eat into.
    pub review_floor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerProfile {
    pub learner_id: String,
    pub utc_offset_minutes: i32,
    pub pacing_mode: PacingMode,
    /// Next verse to memorize.
    pub cursor: VerseId,
    pub daily_minutes: u32,
    pub averages: StepAverages,
    pub thresholds: PacingThresholds,
    pub rebalance_until: Option<Timestamp>,
    pub version: u32,
}

impl LearnerProfile {
    /// Fresh profile seeded from configured defaults.
    pub fn new(learner_id: &str, config: &EngineConfig) -> Self {
        let pacing = &config.pacing;
        Self {
            learner_id: learner_id.to_string(),
            utc_offset_minutes: 0,
            pacing_mode: PacingMode::Normal,
            cursor: 1,
            daily_minutes: pacing.default_daily_minutes,
            averages: StepAverages {
                review_secs: pacing.default_review_secs,
                new_secs: pacing.default_new_secs,
                link_secs: pacing.default_link_secs,
            },
            thresholds: PacingThresholds {
                consolidation_ratio: pacing.consolidation_ratio,
                catch_up_ratio: pacing.catch_up_ratio,
                review_floor: pacing.review_floor,
            },
            rebalance_until: None,
            version: 0,
        }
    }

    pub fn with_offset(mut self, utc_offset_minutes: i32) -> Self {
        self.utc_offset_minutes = utc_offset_minutes;
        self
    }

    pub fn with_daily_minutes(mut self, minutes: u32) -> Self {
        self.daily_minutes = minutes;
        self
    }

    pub fn with_cursor(mut self, cursor: VerseId) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn budget_secs(&self) -> f64 {
        f64::from(self.daily_minutes) * 60.0
    }
}
