//! Quality gates: warm-up, weekly test and monthly audit.
//!
//! Warm-up and weekly gates share one pass rule over the latest grade per
//! verse. A session starts in `Progressing` and can only move to
//! `ReviewOnly`; there is no way back within the same session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::{SECS_PER_DAY, Timestamp};
use crate::types::{Grade, VerseId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateParams {
    pub pass_average: f64,
    pub max_again: usize,
    pub weekly_interval_days: u32,
    pub weekly_sample_size: usize,
    /// Verses below this station are too fresh for the weekly test.
    pub weekly_min_station: u32,
    pub monthly_interval_days: u32,
    pub audit_debt_ratio: f64,
    /// Retention (mean grade score / 3) below this is dangerous.
    pub audit_retention_floor: f64,
    pub retention_window_days: u32,
    pub rebalance_window_days: u32,
    pub rebalance_relief: f64,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            pass_average: 2.0,
            max_again: 1,
            weekly_interval_days: 7,
            weekly_sample_size: 5,
            weekly_min_station: 3,
            monthly_interval_days: 30,
            audit_debt_ratio: 0.5,
            audit_retention_floor: 0.6,
            retention_window_days: 3,
            rebalance_window_days: 7,
            rebalance_relief: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateKind {
    Warmup,
    Weekly,
    Monthly,
}

impl GateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GateKind::Warmup => "WARMUP",
            GateKind::Weekly => "WEEKLY",
            GateKind::Monthly => "MONTHLY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateResult {
    Pass,
    Fail,
    Rebalanced,
}

impl GateResult {
    pub fn as_str(self) -> &'static str {
        match self {
            GateResult::Pass => "PASS",
            GateResult::Fail => "FAIL",
            GateResult::Rebalanced => "REBALANCED",
        }
    }
}

/// Audit trail entry. Write-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateRun {
    pub learner_id: String,
    pub session_id: Option<Uuid>,
    pub kind: GateKind,
    pub result: GateResult,
    pub sample_size: usize,
    pub pass_rate: f64,
    pub average_score: f64,
    pub at: Timestamp,
}

/// Score of one gate attempt over the latest grade per verse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateScore {
    pub sample_size: usize,
    pub average: f64,
    pub again_count: usize,
    /// Share of verses graded GOOD or EASY.
    pub pass_rate: f64,
    pub passed: bool,
}

/// Score chronologically ordered `(verse, grade)` pairs; later grades for
/// the same verse replace earlier ones. `None` when nothing was graded.
pub fn score_latest(
    grades: impl IntoIterator<Item = (VerseId, Grade)>,
    params: &GateParams,
) -> Option<GateScore> {
    let latest: BTreeMap<VerseId, Grade> = grades.into_iter().collect();
    if latest.is_empty() {
        return None;
    }
    let n = latest.len();
    let total: u32 = latest.values().map(|g| u32::from(g.score())).sum();
    let again_count = latest.values().filter(|g| **g == Grade::Again).count();
    let passes = latest.values().filter(|g| g.is_pass()).count();
    let average = f64::from(total) / n as f64;
    Some(GateScore {
        sample_size: n,
        average,
        again_count,
        pass_rate: passes as f64 / n as f64,
        passed: average >= params.pass_average && again_count <= params.max_again,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarmupOutcome {
    NotRequired,
    /// Required but nothing graded yet.
    Pending,
    Passed,
    /// First pass failed; the single retry has not been graded yet.
    RetryRequired,
    /// Failed the first pass and the retry.
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarmupVerdict {
    pub outcome: WarmupOutcome,
    pub first: Option<GateScore>,
    pub retry: Option<GateScore>,
}

impl WarmupVerdict {
    /// Score to record in the audit trail for a terminal outcome.
    pub fn deciding_score(&self) -> Option<GateScore> {
        self.retry.or(self.first)
    }
}

/// Evaluate the warm-up gate from its first pass and its single retry.
pub fn evaluate_warmup(
    required: bool,
    first: &[(VerseId, Grade)],
    retry: &[(VerseId, Grade)],
    params: &GateParams,
) -> WarmupVerdict {
    if !required {
        return WarmupVerdict {
            outcome: WarmupOutcome::NotRequired,
            first: None,
            retry: None,
        };
    }
    let first = score_latest(first.iter().copied(), params);
    let retry_score = score_latest(retry.iter().copied(), params);
    let outcome = match (first, retry_score) {
        (None, _) => WarmupOutcome::Pending,
        (Some(f), _) if f.passed => WarmupOutcome::Passed,
        (Some(_), None) => WarmupOutcome::RetryRequired,
        (Some(_), Some(r)) if r.passed => WarmupOutcome::Passed,
        (Some(_), Some(_)) => WarmupOutcome::Locked,
    };
    WarmupVerdict {
        outcome,
        first,
        // A passing first attempt makes any retry grades irrelevant.
        retry: if first.is_some_and(|f| f.passed) {
            None
        } else {
            retry_score
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WeeklyOutcome {
    NotRequired,
    Pending,
    Passed,
    Failed,
}

pub fn evaluate_weekly(
    required: bool,
    grades: &[(VerseId, Grade)],
    params: &GateParams,
) -> (WeeklyOutcome, Option<GateScore>) {
    if !required {
        return (WeeklyOutcome::NotRequired, None);
    }
    match score_latest(grades.iter().copied(), params) {
        None => (WeeklyOutcome::Pending, None),
        Some(s) if s.passed => (WeeklyOutcome::Passed, Some(s)),
        Some(s) => (WeeklyOutcome::Failed, Some(s)),
    }
}

/// Terminal per-session gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionGate {
    #[default]
    Progressing,
    ReviewOnly,
}

impl SessionGate {
    /// Fold gate outcomes into the session state. Once review-only, always
    /// review-only. Gates that were required but never finished count as
    /// failures here.
    pub fn settle(self, warmup: WarmupOutcome, weekly: WeeklyOutcome) -> SessionGate {
        let warmup_ok = matches!(warmup, WarmupOutcome::NotRequired | WarmupOutcome::Passed);
        let weekly_ok = matches!(weekly, WeeklyOutcome::NotRequired | WeeklyOutcome::Passed);
        if self == SessionGate::ReviewOnly || !warmup_ok || !weekly_ok {
            SessionGate::ReviewOnly
        } else {
            SessionGate::Progressing
        }
    }
}

/// Weekly gate is due when it has never run or last ran at least
/// `weekly_interval_days` ago.
pub fn weekly_due(last_run: Option<Timestamp>, now: Timestamp, params: &GateParams) -> bool {
    last_run.is_none_or(|t| now - t >= i64::from(params.weekly_interval_days) * SECS_PER_DAY)
}

/// Mean grade score over the window, normalised to `[0, 1]`.
pub fn retention_average(grades: &[Grade]) -> Option<f64> {
    if grades.is_empty() {
        return None;
    }
    let total: u32 = grades.iter().map(|g| u32::from(g.score())).sum();
    Some(f64::from(total) / (3.0 * grades.len() as f64))
}

/// The monthly audit fires when both debt and retention are in danger and
/// no audit ran within the monthly interval.
pub fn monthly_audit_due(
    debt_ratio: f64,
    retention: Option<f64>,
    last_audit: Option<Timestamp>,
    now: Timestamp,
    params: &GateParams,
) -> bool {
    let cooled_down = last_audit
        .is_none_or(|t| now - t >= i64::from(params.monthly_interval_days) * SECS_PER_DAY);
    let retention_danger = retention.is_some_and(|r| r < params.audit_retention_floor);
    cooled_down && debt_ratio >= params.audit_debt_ratio && retention_danger
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use Grade::*;

    fn p() -> GateParams {
        GateParams::default()
    }

    #[test]
    fn test_score_uses_latest_grade_per_verse() {
        let s = score_latest([(1, Again), (2, Good), (1, Good)], &p()).unwrap();
        assert_eq!(s.sample_size, 2);
        assert_eq!(s.again_count, 0);
        assert_relative_eq!(s.average, 2.0);
        assert!(s.passed);
    }

    #[test]
    fn test_pass_rule_average_and_again_cap() {
        // avg 2.25 but two AGAINs
        let grades = [
            (1, Again),
            (2, Again),
            (3, Easy),
            (4, Easy),
            (5, Easy),
            (6, Easy),
            (7, Easy),
            (8, Easy),
        ];
        let s = score_latest(grades, &p()).unwrap();
        assert!(s.average >= 2.0);
        assert_eq!(s.again_count, 2);
        assert!(!s.passed);

        // one AGAIN, avg exactly 2.0
        let s = score_latest([(1, Again), (2, Easy), (3, Good), (4, Easy)], &p()).unwrap();
        assert_relative_eq!(s.average, 2.0);
        assert!(s.passed);

        // no AGAIN but avg < 2
        let s = score_latest([(1, Hard), (2, Good)], &p()).unwrap();
        assert!(!s.passed);
    }

    #[test]
    fn test_empty_scores_none() {
        assert!(score_latest(Vec::<(VerseId, Grade)>::new(), &p()).is_none());
    }

    #[test]
    fn test_warmup_state_machine() {
        let pass = [(1, Good), (2, Good)];
        let fail = [(1, Again), (2, Again)];

        assert_eq!(evaluate_warmup(false, &fail, &fail, &p()).outcome, WarmupOutcome::NotRequired);
        assert_eq!(evaluate_warmup(true, &[], &[], &p()).outcome, WarmupOutcome::Pending);
        assert_eq!(evaluate_warmup(true, &pass, &[], &p()).outcome, WarmupOutcome::Passed);
        assert_eq!(evaluate_warmup(true, &fail, &[], &p()).outcome, WarmupOutcome::RetryRequired);
        assert_eq!(evaluate_warmup(true, &fail, &pass, &p()).outcome, WarmupOutcome::Passed);

        let locked = evaluate_warmup(true, &fail, &fail, &p());
        assert_eq!(locked.outcome, WarmupOutcome::Locked);
        assert_eq!(locked.deciding_score().unwrap().again_count, 2);
    }

    #[test]
    fn test_two_warmup_failures_always_lock_session() {
        let fail = [(1, Again), (2, Hard), (3, Again)];
        let verdict = evaluate_warmup(true, &fail, &fail, &p());
        let gate = SessionGate::Progressing.settle(verdict.outcome, WeeklyOutcome::NotRequired);
        assert_eq!(gate, SessionGate::ReviewOnly);
        // No transition back
        let gate = gate.settle(WarmupOutcome::Passed, WeeklyOutcome::Passed);
        assert_eq!(gate, SessionGate::ReviewOnly);
    }

    #[test]
    fn test_weekly_evaluation() {
        assert_eq!(evaluate_weekly(false, &[], &p()).0, WeeklyOutcome::NotRequired);
        assert_eq!(evaluate_weekly(true, &[], &p()).0, WeeklyOutcome::Pending);
        assert_eq!(evaluate_weekly(true, &[(9, Easy)], &p()).0, WeeklyOutcome::Passed);
        assert_eq!(evaluate_weekly(true, &[(9, Hard)], &p()).0, WeeklyOutcome::Failed);
        let gate = SessionGate::Progressing.settle(WarmupOutcome::Passed, WeeklyOutcome::Failed);
        assert_eq!(gate, SessionGate::ReviewOnly);
    }

    #[test]
    fn test_weekly_due() {
        let now = 100 * SECS_PER_DAY;
        assert!(weekly_due(None, now, &p()));
        assert!(!weekly_due(Some(now - 6 * SECS_PER_DAY), now, &p()));
        assert!(weekly_due(Some(now - 7 * SECS_PER_DAY), now, &p()));
    }

    #[test]
    fn test_monthly_audit_trigger() {
        let now = 100 * SECS_PER_DAY;
        assert!(monthly_audit_due(0.8, Some(0.4), None, now, &p()));
        // debt fine
        assert!(!monthly_audit_due(0.2, Some(0.4), None, now, &p()));
        // retention fine
        assert!(!monthly_audit_due(0.8, Some(0.9), None, now, &p()));
        // no recent grades
        assert!(!monthly_audit_due(0.8, None, None, now, &p()));
        // cooling down
        assert!(!monthly_audit_due(0.8, Some(0.4), Some(now - 10 * SECS_PER_DAY), now, &p()));
    }

    #[test]
    fn test_retention_average() {
        assert_eq!(retention_average(&[]), None);
        assert_relative_eq!(retention_average(&[Easy, Again]).unwrap(), 0.5);
    }
}
