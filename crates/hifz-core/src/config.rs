//! Tunable engine parameters.
//!
//! Every section is `#[serde(default)]`, so a partial TOML file overrides
//! only the values it names.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::gate::GateParams;
use crate::pacing::PacingParams;
use crate::queue::QueueParams;
use crate::review::ReviewParams;
use crate::streak::StreakParams;
use crate::transition::TransitionParams;
use crate::types::VerseId;

/// Ayah count of the Qur'an.
pub const TOTAL_VERSES: VerseId = 6236;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub total_verses: VerseId,
    pub review: ReviewParams,
    pub transitions: TransitionParams,
    pub pacing: PacingParams,
    pub gates: GateParams,
    pub queue: QueueParams,
    pub streak: StreakParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_verses: TOTAL_VERSES,
            review: ReviewParams::default(),
            transitions: TransitionParams::default(),
            pacing: PacingParams::default(),
            gates: GateParams::default(),
            queue: QueueParams::default(),
            streak: StreakParams::default(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidConfig(msg.into())
}

impl EngineConfig {
    /// Reject parameter combinations the engine cannot schedule with.
    pub fn validate(&self) -> Result<()> {
        if self.total_verses == 0 {
            return Err(invalid("total_verses must be positive"));
        }
        let r = &self.review;
        if r.minute_ladder.is_empty() && r.day_ladder.is_empty() {
            return Err(invalid("review ladders are both empty"));
        }
        if r.minute_ladder.contains(&0) || r.day_ladder.contains(&0) {
            return Err(invalid("review ladder rungs must be positive"));
        }
        if !(r.ease_floor > 0.0
            && r.ease_floor <= r.default_ease
            && r.default_ease <= r.ease_ceiling)
        {
            return Err(invalid(format!(
                "ease must satisfy 0 < floor <= default <= ceiling (got {} / {} / {})",
                r.ease_floor, r.default_ease, r.ease_ceiling
            )));
        }
        if r.max_interval_days == 0 {
            return Err(invalid("review.max_interval_days must be positive"));
        }

        let t = &self.transitions;
        if !(0.0..=1.0).contains(&t.weak_floor) {
            return Err(invalid("transitions.weak_floor must be within [0, 1]"));
        }

        let p = &self.pacing;
        if !(p.smoothing > 0.0 && p.smoothing <= 1.0) {
            return Err(invalid("pacing.smoothing must be within (0, 1]"));
        }
        if p.consolidation_ratio > p.catch_up_ratio {
            return Err(invalid(
                "pacing.consolidation_ratio must not exceed pacing.catch_up_ratio",
            ));
        }
        if !(0.0..=1.0).contains(&p.review_floor) {
            return Err(invalid("pacing.review_floor must be within [0, 1]"));
        }
        if p.observation_floor_secs > p.observation_ceiling_secs {
            return Err(invalid("pacing observation floor exceeds ceiling"));
        }
        if p.default_daily_minutes == 0 {
            return Err(invalid("pacing.default_daily_minutes must be positive"));
        }

        let g = &self.gates;
        if !(0.0..=3.0).contains(&g.pass_average) {
            return Err(invalid("gates.pass_average must be within [0, 3]"));
        }
        if g.weekly_interval_days == 0 || g.monthly_interval_days == 0 {
            return Err(invalid("gate intervals must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let c = EngineConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.total_verses, 6236);
        assert_eq!(c.review.day_ladder, vec![1, 3, 7, 16, 35]);
        assert_eq!(c.queue.max_new_per_day, 10);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut c = EngineConfig::default();
        c.pacing.consolidation_ratio = 0.9;
        let err = c.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert!(err.to_string().contains("consolidation_ratio"));
    }

    #[test]
    fn test_bad_ease_rejected() {
        let mut c = EngineConfig::default();
        c.review.ease_floor = 2.8;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_zero_smoothing_rejected() {
        let mut c = EngineConfig::default();
        c.pacing.smoothing = 0.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let c: EngineConfig =
            serde_json::from_str(r#"{"gates": {"weekly_sample_size": 8}}"#).unwrap();
        assert_eq!(c.gates.weekly_sample_size, 8);
        assert_eq!(c.gates.max_again, 1);
        assert_eq!(c.review, ReviewParams::default());
    }
}
