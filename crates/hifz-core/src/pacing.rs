//! Pacing and review debt.
//!
//! Debt is how far today's due backlog runs past the daily budget. The debt
//! ratio, together with the number of missed days, selects the pacing mode.
//! Learned step durations are smoothed running averages, one per step kind.

use serde::{Deserialize, Serialize};

use crate::profile::{LearnerProfile, PacingThresholds, StepAverages};
use crate::time::{LocalDay, Timestamp};
use crate::types::{PacingMode, StepKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingParams {
    pub default_daily_minutes: u32,
    pub default_review_secs: f64,
    pub default_new_secs: f64,
    pub default_link_secs: f64,
    /// Weight of this session's observation when blending averages.
    pub smoothing: f64,
    pub observation_floor_secs: f64,
    pub observation_ceiling_secs: f64,
    pub consolidation_ratio: f64,
    pub catch_up_ratio: f64,
    pub review_floor: f64,
    /// Missed days that force CATCH_UP regardless of debt.
    pub catch_up_missed_days: u32,
    /// Fraction of the usual new-material slice allowed in CONSOLIDATION.
    pub consolidation_new_share: f64,
}

impl Default for PacingParams {
    fn default() -> Self {
        Self {
            default_daily_minutes: 20,
            default_review_secs: 30.0,
            default_new_secs: 45.0,
            default_link_secs: 20.0,
            smoothing: 0.3,
            observation_floor_secs: 3.0,
            observation_ceiling_secs: 600.0,
            consolidation_ratio: 0.25,
            catch_up_ratio: 0.75,
            review_floor: 0.4,
            catch_up_missed_days: 6,
            consolidation_new_share: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DebtReport {
    pub due_count: usize,
    pub backlog_minutes: f64,
    pub budget_minutes: f64,
    pub debt_minutes: f64,
    pub debt_ratio: f64,
}

/// Debt for `due_count` outstanding reviews against the learner's budget.
pub fn review_debt(due_count: usize, profile: &LearnerProfile) -> DebtReport {
    let backlog_minutes = due_count as f64 * profile.averages.review_secs / 60.0;
    let budget_minutes = f64::from(profile.daily_minutes);
    let debt_minutes = (backlog_minutes - budget_minutes).max(0.0);
    DebtReport {
        due_count,
        backlog_minutes,
        budget_minutes,
        debt_minutes,
        debt_ratio: debt_minutes / budget_minutes.max(1.0),
    }
}

/// Full local days skipped between the last completed session and today.
pub fn missed_days(last_completed: Option<LocalDay>, today: LocalDay) -> u32 {
    match last_completed {
        Some(day) => today.days_since(day).saturating_sub(1).clamp(0, i64::from(u32::MAX)) as u32,
        None => 0,
    }
}

/// Thresholds in force at `now`, eased while a rebalance window is open.
pub fn effective_thresholds(
    profile: &LearnerProfile,
    now: Timestamp,
    rebalance_relief: f64,
) -> PacingThresholds {
    let mut t = profile.thresholds;
    if profile.rebalance_until.is_some_and(|until| now < until) {
        let relief = 1.0 + rebalance_relief.max(0.0);
        t.consolidation_ratio *= relief;
        t.catch_up_ratio *= relief;
    }
    t
}

pub fn select_mode(
    debt_ratio: f64,
    missed_days: u32,
    thresholds: &PacingThresholds,
    params: &PacingParams,
) -> PacingMode {
    if missed_days >= params.catch_up_missed_days || debt_ratio >= thresholds.catch_up_ratio {
        PacingMode::CatchUp
    } else if debt_ratio >= thresholds.consolidation_ratio {
        PacingMode::Consolidation
    } else {
        PacingMode::Normal
    }
}

/// Blend this session's observed durations into the prior averages.
/// Kinds with no observations keep their prior value.
pub fn update_averages(
    prior: &StepAverages,
    observations: &[(StepKind, u32)],
    params: &PacingParams,
) -> StepAverages {
    let mut next = *prior;
    let alpha = params.smoothing.clamp(0.0, 1.0);
    for kind in [StepKind::Review, StepKind::New, StepKind::Link] {
        let samples: Vec<f64> = observations
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, secs)| {
                f64::from(*secs)
                    .clamp(params.observation_floor_secs, params.observation_ceiling_secs)
            })
            .collect();
        if samples.is_empty() {
            continue;
        }
        let observed = samples.iter().sum::<f64>() / samples.len() as f64;
        next.set(kind, (1.0 - alpha) * prior.get(kind) + alpha * observed);
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use approx::assert_relative_eq;

    fn profile(minutes: u32) -> LearnerProfile {
        LearnerProfile::new("l1", &EngineConfig::default()).with_daily_minutes(minutes)
    }

    #[test]
    fn test_no_debt_within_budget() {
        let d = review_debt(20, &profile(20));
        assert_relative_eq!(d.backlog_minutes, 10.0);
        assert_relative_eq!(d.debt_minutes, 0.0);
        assert_relative_eq!(d.debt_ratio, 0.0);
    }

    #[test]
    fn test_debt_over_budget() {
        let d = review_debt(80, &profile(20));
        assert_relative_eq!(d.backlog_minutes, 40.0);
        assert_relative_eq!(d.debt_minutes, 20.0);
        assert_relative_eq!(d.debt_ratio, 1.0);
    }

    #[test]
    fn test_missed_days() {
        let today = LocalDay(20_000);
        assert_eq!(missed_days(None, today), 0);
        assert_eq!(missed_days(Some(LocalDay(19_999)), today), 0);
        assert_eq!(missed_days(Some(LocalDay(19_989)), today), 10);
        assert_eq!(missed_days(Some(today), today), 0);
    }

    #[test]
    fn test_mode_selection_by_ratio() {
        let p = PacingParams::default();
        let t = profile(20).thresholds;
        assert_eq!(select_mode(0.1, 0, &t, &p), PacingMode::Normal);
        assert_eq!(select_mode(0.3, 0, &t, &p), PacingMode::Consolidation);
        assert_eq!(select_mode(0.8, 0, &t, &p), PacingMode::CatchUp);
    }

    #[test]
    fn test_missed_days_force_catch_up() {
        let p = PacingParams::default();
        let t = profile(20).thresholds;
        assert_eq!(select_mode(0.0, 10, &t, &p), PacingMode::CatchUp);
        assert_eq!(select_mode(0.0, 5, &t, &p), PacingMode::Normal);
    }

    #[test]
    fn test_rebalance_eases_thresholds_until_window_closes() {
        let mut prof = profile(20);
        prof.rebalance_until = Some(1_000);
        let eased = effective_thresholds(&prof, 500, 0.5);
        assert_relative_eq!(eased.catch_up_ratio, 0.75 * 1.5);
        assert_relative_eq!(eased.consolidation_ratio, 0.25 * 1.5);
        let closed = effective_thresholds(&prof, 1_000, 0.5);
        assert_eq!(closed, prof.thresholds);
    }

    #[test]
    fn test_update_averages_blends_and_clamps() {
        let p = PacingParams::default();
        let prior = profile(20).averages;
        let obs = vec![
            (StepKind::Review, 20),
            (StepKind::Review, 40),
            // Outlier clamps to 600
            (StepKind::Link, 5_000),
        ];
        let next = update_averages(&prior, &obs, &p);
        assert_relative_eq!(next.review_secs, 0.7 * 30.0 + 0.3 * 30.0);
        assert_relative_eq!(next.link_secs, 0.7 * 20.0 + 0.3 * 600.0);
        assert_relative_eq!(next.new_secs, prior.new_secs);
    }

    #[test]
    fn test_update_averages_floor() {
        let p = PacingParams::default();
        let prior = profile(20).averages;
        let next = update_averages(&prior, &[(StepKind::New, 0)], &p);
        assert_relative_eq!(next.new_secs, 0.7 * 45.0 + 0.3 * 3.0);
    }
}
