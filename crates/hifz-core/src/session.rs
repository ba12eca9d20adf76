//! Session lifecycle: start, warm-up checkpoint, completion.
//!
//! Every mutating call runs inside one store transaction. Either all of its
//! writes land or none do.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::content::{ContentProvider, NoContent, VerseContent};
use crate::error::{EngineError, Result};
use crate::event::{
    EventTarget, EventWindow, MAX_FUTURE_SKEW_SECS, RawEvent, SessionEvent, validate_all,
};
use crate::gate::{
    GateKind, GateResult, GateScore, QualityGateRun, SessionGate, WarmupOutcome, WeeklyOutcome,
    evaluate_warmup, evaluate_weekly, monthly_audit_due, retention_average, weekly_due,
};
use crate::pacing::{
    DebtReport, effective_thresholds, missed_days, review_debt, select_mode, update_averages,
};
use crate::plan::{GateRequirements, PlanStatus, SessionPlan};
use crate::ports::SchedulerStore;
use crate::profile::LearnerProfile;
use crate::queue::{QueueInputs, VerseRange, build_queue};
use crate::review::{VerseReviewState, apply_grade};
use crate::sequence::{Step, review_only, sequence, with_warmup_retry};
use crate::streak::{StreakState, compute_streak};
use crate::time::{LocalDay, SECS_PER_DAY, Timestamp};
use crate::transition::Transition;
use crate::types::{Band, Grade, PacingMode, Phase, Stage, StepKind, VerseId};

/// Run `op` between `begin` and `commit`, rolling back on any error.
fn atomically<S, T>(store: &mut S, op: impl FnOnce(&mut S) -> Result<T>) -> Result<T>
where
    S: SchedulerStore,
{
    store.begin()?;
    let result = op(store).and_then(|value| store.commit().map(|()| value));
    if result.is_err()
        && let Err(e) = store.rollback()
    {
        tracing::warn!("rollback failed: {e}");
    }
    result
}

fn require_profile<S: SchedulerStore>(store: &S, learner_id: &str) -> Result<LearnerProfile> {
    store
        .load_profile(learner_id)?
        .ok_or_else(|| EngineError::LearnerNotFound(learner_id.to_string()))
}

fn require_plan<S: SchedulerStore>(store: &S, learner_id: &str, id: Uuid) -> Result<SessionPlan> {
    store
        .find_plan(learner_id, id)?
        .ok_or(EngineError::SessionNotFound(id))
}

fn event_window(
    plan: &SessionPlan,
    profile: &LearnerProfile,
    now: Timestamp,
    total: VerseId,
) -> EventWindow {
    EventWindow {
        earliest: plan.day.start(profile.utc_offset_minutes) - SECS_PER_DAY,
        latest: now + MAX_FUTURE_SKEW_SECS,
        total_verses: total,
    }
}

/// First-pass and retry grades for the plan's warm-up verses.
fn warmup_grades(
    events: &[SessionEvent],
    warmup: &BTreeSet<VerseId>,
) -> (Vec<(VerseId, Grade)>, Vec<(VerseId, Grade)>) {
    let mut first = Vec::new();
    let mut retry = Vec::new();
    for e in events {
        if let (EventTarget::Ayah { verse, stage: Stage::Warmup, phase }, Some(grade)) =
            (e.target, e.grade)
            && warmup.contains(&verse)
        {
            match phase {
                Phase::Retry => retry.push((verse, grade)),
                _ => first.push((verse, grade)),
            }
        }
    }
    (first, retry)
}

fn weekly_grades(events: &[SessionEvent], weekly: &BTreeSet<VerseId>) -> Vec<(VerseId, Grade)> {
    events
        .iter()
        .filter_map(|e| match (e.target, e.grade) {
            (EventTarget::Ayah { verse, stage: Stage::Weekly, .. }, Some(g))
                if weekly.contains(&verse) =>
            {
                Some((verse, g))
            }
            _ => None,
        })
        .collect()
}

fn gate_run(
    plan: &SessionPlan,
    kind: GateKind,
    score: Option<GateScore>,
    passed: bool,
    at: Timestamp,
) -> QualityGateRun {
    QualityGateRun {
        learner_id: plan.learner_id.clone(),
        session_id: Some(plan.id),
        kind,
        result: if passed { GateResult::Pass } else { GateResult::Fail },
        sample_size: score.map_or(0, |s| s.sample_size),
        pass_rate: score.map_or(0.0, |s| s.pass_rate),
        average_score: score.map_or(0.0, |s| s.average),
        at,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    #[serde(flatten)]
    pub step: Step,
    pub stage: Stage,
    pub phase: Phase,
    pub graded: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<VerseContent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub learner_id: String,
    pub day: String,
    pub status: PlanStatus,
    pub mode: PacingMode,
    pub requirements: GateRequirements,
    pub review_only: bool,
    pub warmup_retry_used: bool,
    pub debt: DebtReport,
    pub steps: Vec<StepView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmupCheckpoint {
    pub session_id: Uuid,
    pub outcome: WarmupOutcome,
    pub first: Option<GateScore>,
    pub retry: Option<GateScore>,
    pub review_only: bool,
    pub dropped_events: usize,
    pub already_completed: bool,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub session_id: Uuid,
    /// False when the session had already been completed.
    pub applied: bool,
    pub accepted_events: usize,
    pub dropped_events: usize,
    pub reviews_updated: usize,
    pub transitions_updated: usize,
    pub cursor_before: VerseId,
    pub cursor_after: VerseId,
    pub warmup: WarmupOutcome,
    pub weekly: WeeklyOutcome,
    pub review_only: bool,
    pub mode: PacingMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearnerStatus {
    pub learner_id: String,
    pub today: String,
    pub cursor: VerseId,
    pub memorized: u32,
    pub pacing_mode: PacingMode,
    /// Mode a session started now would use.
    pub projected_mode: PacingMode,
    pub tracked_verses: usize,
    pub due_by_band: BTreeMap<Band, usize>,
    pub weak_transitions: usize,
    pub debt: DebtReport,
    pub missed_days: u32,
    pub rebalance_until: Option<Timestamp>,
    pub today_plan: Option<PlanStatus>,
}

/// Mode, requirements and steps for a new or rebuilt plan.
struct Planned {
    mode: PacingMode,
    requirements: GateRequirements,
    steps: Vec<Step>,
}

pub struct SessionController<S, C = NoContent> {
    store: S,
    content: C,
    config: EngineConfig,
}

impl<S: SchedulerStore> SessionController<S, NoContent> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            content: NoContent,
            config,
        }
    }
}

impl<S: SchedulerStore, C: ContentProvider> SessionController<S, C> {
    pub fn with_content<D: ContentProvider>(self, content: D) -> SessionController<S, D> {
        SessionController {
            store: self.store,
            content,
            config: self.config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Create a learner profile. Enrolling twice is a conflict.
    pub fn enroll(&mut self, profile: LearnerProfile) -> Result<LearnerProfile> {
        if profile.learner_id.trim().is_empty() {
            return Err(EngineError::InvalidConfig("learner id must not be empty".into()));
        }
        if profile.daily_minutes == 0 {
            return Err(EngineError::InvalidConfig("daily minutes must be positive".into()));
        }
        if profile.cursor == 0 || profile.cursor > self.config.total_verses + 1 {
            return Err(EngineError::InvalidConfig(format!(
                "cursor {} outside 1..={}",
                profile.cursor,
                self.config.total_verses + 1
            )));
        }
        if profile.utc_offset_minutes.abs() > 14 * 60 {
            return Err(EngineError::InvalidConfig(format!(
                "utc offset {} minutes out of range",
                profile.utc_offset_minutes
            )));
        }
        let mut profile = profile;
        profile.version = 0;
        atomically(&mut self.store, |store| store.insert_profile(&profile))?;
        tracing::info!("enrolled learner '{}'", profile.learner_id);
        profile.version = 1;
        Ok(profile)
    }

    /// Open today's session, or return the one already open.
    pub fn start_session(&mut self, learner_id: &str, now: Timestamp) -> Result<SessionView> {
        let config = &self.config;
        let (plan, debt) = atomically(&mut self.store, |store| {
            let mut profile = require_profile(store, learner_id)?;
            let today = LocalDay::of(now, profile.utc_offset_minutes);

            let existing = store.find_plan_for_day(learner_id, today)?;
            if let Some(plan) = &existing
                && (!plan.stale || plan.is_completed())
            {
                tracing::debug!("returning existing {} plan {}", plan.status.as_str(), plan.id);
                let states = store.load_review_states(learner_id)?;
                let due = states.iter().filter(|s| s.is_due(now)).count();
                return Ok((plan.clone(), review_debt(due, &profile)));
            }

            let (planned, debt) = plan_day(store, config, &mut profile, today, now)?;
            let plan = match existing {
                Some(mut stale) => {
                    tracing::warn!("rebuilding stale plan {} for {today}", stale.id);
                    stale.mode = planned.mode;
                    stale.requirements = planned.requirements;
                    stale.steps = if stale.review_only {
                        review_only(&planned.steps)
                    } else if stale.warmup_retry_used {
                        with_warmup_retry(&planned.steps, &stale_warmup(&planned.steps))
                    } else {
                        planned.steps
                    };
                    stale.stale = false;
                    store.update_plan(&stale)?;
                    stale.version += 1;
                    stale
                }
                None => {
                    let plan = SessionPlan {
                        id: Uuid::new_v4(),
                        learner_id: learner_id.to_string(),
                        day: today,
                        status: PlanStatus::Open,
                        mode: planned.mode,
                        requirements: planned.requirements,
                        steps: planned.steps,
                        warmup_retry_used: false,
                        warmup_passed: None,
                        weekly_passed: None,
                        review_only: false,
                        new_range: None,
                        created_at: now,
                        completed_at: None,
                        version: 0,
                        stale: false,
                    };
                    store.insert_plan(&plan)?;
                    tracing::info!(
                        "opened plan {} for '{learner_id}' on {today}: {} steps, mode {}",
                        plan.id,
                        plan.steps.len(),
                        plan.mode.as_str()
                    );
                    SessionPlan { version: 1, ..plan }
                }
            };
            Ok((plan, debt))
        })?;
        Ok(self.view(&plan, debt))
    }

    /// Evaluate the warm-up gate mid-session and adjust the open plan.
    pub fn checkpoint_warmup(
        &mut self,
        learner_id: &str,
        session_id: Uuid,
        raw: &[RawEvent],
        now: Timestamp,
    ) -> Result<WarmupCheckpoint> {
        let config = &self.config;
        atomically(&mut self.store, |store| {
            let profile = require_profile(store, learner_id)?;
            let mut plan = require_plan(store, learner_id, session_id)?;
            if plan.is_completed() {
                return Ok(WarmupCheckpoint {
                    session_id,
                    outcome: recorded_warmup(&plan),
                    first: None,
                    retry: None,
                    review_only: plan.review_only,
                    dropped_events: 0,
                    already_completed: true,
                    steps: plan.steps,
                });
            }

            let window = event_window(&plan, &profile, now, config.total_verses);
            let (events, dropped) = validate_all(raw, &window);
            let warmup_list = plan.warmup_verses();
            let warmup: BTreeSet<VerseId> = warmup_list.iter().copied().collect();
            let (first, retry) = warmup_grades(&events, &warmup);
            let mut verdict =
                evaluate_warmup(plan.requirements.warmup_required, &first, &retry, &config.gates);
            if plan.warmup_passed == Some(false) {
                verdict.outcome = WarmupOutcome::Locked;
            }

            let mut changed = false;
            match verdict.outcome {
                WarmupOutcome::RetryRequired if !plan.warmup_retry_used => {
                    plan.warmup_retry_used = true;
                    plan.steps = with_warmup_retry(&plan.steps, &warmup_list);
                    changed = true;
                    tracing::info!("warm-up failed first pass on {session_id}, retry inserted");
                }
                WarmupOutcome::Locked if plan.warmup_passed.is_none() => {
                    plan.warmup_retry_used = true;
                    plan.warmup_passed = Some(false);
                    plan.review_only = true;
                    plan.steps = review_only(&plan.steps);
                    let score = verdict.deciding_score();
                    store.append_gate_run(&gate_run(&plan, GateKind::Warmup, score, false, now))?;
                    changed = true;
                    tracing::info!("warm-up failed twice on {session_id}, session locked to review-only");
                }
                WarmupOutcome::Passed if plan.warmup_passed.is_none() => {
                    plan.warmup_passed = Some(true);
                    let score = verdict.deciding_score();
                    store.append_gate_run(&gate_run(&plan, GateKind::Warmup, score, true, now))?;
                    changed = true;
                    tracing::info!("warm-up passed on {session_id}");
                }
                _ => {}
            }
            if changed {
                store.update_plan(&plan)?;
            }

            Ok(WarmupCheckpoint {
                session_id,
                outcome: verdict.outcome,
                first: verdict.first,
                retry: verdict.retry,
                review_only: plan.review_only,
                dropped_events: dropped,
                already_completed: false,
                steps: plan.steps,
            })
        })
    }

    /// Replay the day's events and commit their effects. Completing an
    /// already completed session is a no-op success.
    pub fn complete_session(
        &mut self,
        learner_id: &str,
        session_id: Uuid,
        raw: &[RawEvent],
        now: Timestamp,
    ) -> Result<CompletionReport> {
        let config = &self.config;
        atomically(&mut self.store, |store| {
            let mut profile = require_profile(store, learner_id)?;
            let mut plan = require_plan(store, learner_id, session_id)?;
            if plan.is_completed() {
                tracing::debug!("session {session_id} already completed, nothing to apply");
                return Ok(CompletionReport {
                    session_id,
                    applied: false,
                    accepted_events: 0,
                    dropped_events: 0,
                    reviews_updated: 0,
                    transitions_updated: 0,
                    cursor_before: profile.cursor,
                    cursor_after: profile.cursor,
                    warmup: recorded_warmup(&plan),
                    weekly: recorded_weekly(&plan),
                    review_only: plan.review_only,
                    mode: plan.mode,
                });
            }

            let window = event_window(&plan, &profile, now, config.total_verses);
            let (events, dropped) = validate_all(raw, &window);

            // Gates first: their outcome decides which events may progress.
            let warmup: BTreeSet<VerseId> = plan.warmup_verses().into_iter().collect();
            let weekly: BTreeSet<VerseId> = plan.weekly_verses().into_iter().collect();
            let (first, retry) = warmup_grades(&events, &warmup);
            let mut verdict =
                evaluate_warmup(plan.requirements.warmup_required, &first, &retry, &config.gates);
            if plan.warmup_passed == Some(false) {
                verdict.outcome = WarmupOutcome::Locked;
            }
            let (weekly_outcome, weekly_score) = evaluate_weekly(
                plan.requirements.weekly_required,
                &weekly_grades(&events, &weekly),
                &config.gates,
            );
            let initial = if plan.review_only {
                SessionGate::ReviewOnly
            } else {
                SessionGate::Progressing
            };
            // A required gate left ungraded locks the session the same as a failed one.
            let locked = initial.settle(verdict.outcome, weekly_outcome) == SessionGate::ReviewOnly;
            let new_allowed = !locked && plan.requirements.new_unlocked;
            let planned_blind: BTreeSet<VerseId> = plan.blind_verses().into_iter().collect();

            // Replay.
            let mut states: HashMap<VerseId, VerseReviewState> = store
                .load_review_states(learner_id)?
                .into_iter()
                .map(|s| (s.verse, s))
                .collect();
            let mut links: HashMap<(VerseId, VerseId), Transition> = store
                .load_transitions(learner_id)?
                .into_iter()
                .map(|t| (t.key(), t))
                .collect();
            let mut touched_states = BTreeSet::new();
            let mut touched_links = BTreeSet::new();
            let mut durations: Vec<(StepKind, u32)> = Vec::new();
            let mut blind: BTreeMap<VerseId, Vec<Grade>> = BTreeMap::new();
            let mut exposed: BTreeSet<VerseId> = BTreeSet::new();

            for e in &events {
                let skip = match e.stage() {
                    Stage::New => !new_allowed,
                    Stage::LinkRepair => locked,
                    _ => false,
                };
                if skip {
                    continue;
                }
                if e.duration_secs > 0 {
                    durations.push((e.step_kind(), e.duration_secs));
                }
                match e.target {
                    EventTarget::Ayah { verse, stage, phase } => {
                        if stage == Stage::New {
                            exposed.insert(verse);
                        }
                        let Some(grade) = e.grade else { continue };
                        if phase == Phase::Blind {
                            blind.entry(verse).or_default().push(grade);
                        }
                        let state = states
                            .entry(verse)
                            .or_insert_with(|| VerseReviewState::seed(verse, &config.review));
                        let duration = (e.duration_secs > 0).then_some(e.duration_secs);
                        *state = apply_grade(state, grade, e.at, duration, &config.review);
                        touched_states.insert(verse);
                    }
                    EventTarget::Link { from, to, .. } => {
                        let Some(grade) = e.grade else { continue };
                        links
                            .entry((from, to))
                            .or_insert_with(|| Transition::new(from, to))
                            .record(grade, e.at, &config.transitions);
                        touched_links.insert((from, to));
                    }
                }
            }

            let cursor_before = profile.cursor;
            if new_allowed {
                while profile.cursor <= config.total_verses
                    && planned_blind.contains(&profile.cursor)
                    && blind
                        .get(&profile.cursor)
                        .is_some_and(|g| !g.is_empty() && g.iter().all(|g| g.is_pass()))
                {
                    profile.cursor += 1;
                }
            }

            profile.averages = update_averages(&profile.averages, &durations, &config.pacing);
            profile.pacing_mode = plan.mode;
            store.update_profile(&profile)?;

            for verse in &touched_states {
                if let Some(state) = states.get(verse) {
                    store.save_review_state(learner_id, state)?;
                }
            }
            for key in &touched_links {
                if let Some(t) = links.get(key) {
                    store.save_transition(learner_id, t)?;
                }
            }
            store.append_events(learner_id, session_id, &events)?;

            if plan.warmup_passed.is_none() {
                let passed = match verdict.outcome {
                    WarmupOutcome::Passed => Some(true),
                    WarmupOutcome::RetryRequired | WarmupOutcome::Locked => Some(false),
                    WarmupOutcome::NotRequired | WarmupOutcome::Pending => None,
                };
                if let Some(passed) = passed {
                    let score = verdict.deciding_score();
                    store.append_gate_run(&gate_run(&plan, GateKind::Warmup, score, passed, now))?;
                    plan.warmup_passed = Some(passed);
                }
            }
            if let Some(score) = weekly_score {
                let run = gate_run(&plan, GateKind::Weekly, Some(score), score.passed, now);
                store.append_gate_run(&run)?;
                plan.weekly_passed = Some(score.passed);
                tracing::info!(
                    "weekly gate {} for '{learner_id}' (avg {:.2} over {})",
                    if score.passed { "passed" } else { "failed" },
                    score.average,
                    score.sample_size
                );
            }

            plan.review_only = locked;
            plan.new_range = match (exposed.first(), exposed.last()) {
                (Some(lo), Some(hi)) => VerseRange::new(*lo, *hi),
                _ => None,
            };
            plan.status = PlanStatus::Completed;
            plan.completed_at = Some(now);
            store.update_plan(&plan)?;

            tracing::info!(
                "completed session {session_id}: {} events ({dropped} dropped), cursor {cursor_before} -> {}",
                events.len(),
                profile.cursor
            );
            Ok(CompletionReport {
                session_id,
                applied: true,
                accepted_events: events.len(),
                dropped_events: dropped,
                reviews_updated: touched_states.len(),
                transitions_updated: touched_links.len(),
                cursor_before,
                cursor_after: profile.cursor,
                warmup: verdict.outcome,
                weekly: weekly_outcome,
                review_only: locked,
                mode: plan.mode,
            })
        })
    }

    pub fn record_browse(&mut self, learner_id: &str, seconds: u32, now: Timestamp) -> Result<()> {
        atomically(&mut self.store, |store| {
            require_profile(store, learner_id)?;
            store.append_browse(learner_id, seconds, now)
        })
    }

    pub fn streak(&self, learner_id: &str, now: Timestamp) -> Result<StreakState> {
        let profile = require_profile(&self.store, learner_id)?;
        let records = self.store.activity_since(learner_id, 0)?;
        let offset = profile.utc_offset_minutes;
        Ok(compute_streak(&records, LocalDay::of(now, offset), offset, &self.config.streak))
    }

    /// Read-only summary; never writes, not even a monthly audit.
    pub fn status(&self, learner_id: &str, now: Timestamp) -> Result<LearnerStatus> {
        let store = &self.store;
        let config = &self.config;
        let profile = require_profile(store, learner_id)?;
        let today = LocalDay::of(now, profile.utc_offset_minutes);
        let states = store.load_review_states(learner_id)?;
        let transitions = store.load_transitions(learner_id)?;
        let last = store.last_completed_session(learner_id, today)?;

        let mut due_by_band: BTreeMap<Band, usize> = BTreeMap::new();
        for s in states.iter().filter(|s| s.is_due(now)) {
            *due_by_band.entry(s.band()).or_default() += 1;
        }
        let due: usize = due_by_band.values().sum();
        let debt = review_debt(due, &profile);
        let missed = missed_days(last.map(|s| s.day), today);
        let thresholds = effective_thresholds(&profile, now, config.gates.rebalance_relief);

        Ok(LearnerStatus {
            learner_id: learner_id.to_string(),
            today: today.to_string(),
            cursor: profile.cursor,
            memorized: profile.cursor.saturating_sub(1),
            pacing_mode: profile.pacing_mode,
            projected_mode: select_mode(debt.debt_ratio, missed, &thresholds, &config.pacing),
            tracked_verses: states.len(),
            due_by_band,
            weak_transitions: transitions
                .iter()
                .filter(|t| t.is_weak(&config.transitions))
                .count(),
            debt,
            missed_days: missed,
            rebalance_until: profile.rebalance_until,
            today_plan: store.find_plan_for_day(learner_id, today)?.map(|p| p.status),
        })
    }

    fn view(&self, plan: &SessionPlan, debt: DebtReport) -> SessionView {
        let steps = plan
            .steps
            .iter()
            .map(|step| StepView {
                step: *step,
                stage: step.stage(),
                phase: step.phase(),
                graded: step.is_graded(),
                content: step
                    .verses()
                    .into_iter()
                    .filter_map(|v| self.content.lookup(v))
                    .collect(),
            })
            .collect();
        SessionView {
            session_id: plan.id,
            learner_id: plan.learner_id.clone(),
            day: plan.day.to_string(),
            status: plan.status,
            mode: plan.mode,
            requirements: plan.requirements,
            review_only: plan.review_only,
            warmup_retry_used: plan.warmup_retry_used,
            debt,
            steps,
        }
    }
}

fn stale_warmup(steps: &[Step]) -> Vec<VerseId> {
    steps
        .iter()
        .filter(|s| s.stage() == Stage::Warmup)
        .flat_map(|s| s.verses())
        .collect()
}

fn recorded_warmup(plan: &SessionPlan) -> WarmupOutcome {
    match plan.warmup_passed {
        Some(true) => WarmupOutcome::Passed,
        Some(false) => WarmupOutcome::Locked,
        None if plan.requirements.warmup_required => WarmupOutcome::Pending,
        None => WarmupOutcome::NotRequired,
    }
}

fn recorded_weekly(plan: &SessionPlan) -> WeeklyOutcome {
    match plan.weekly_passed {
        Some(true) => WeeklyOutcome::Passed,
        Some(false) => WeeklyOutcome::Failed,
        None if plan.requirements.weekly_required => WeeklyOutcome::Pending,
        None => WeeklyOutcome::NotRequired,
    }
}

/// Decide mode and build the step list for `today`. May fire the monthly
/// audit, which writes a gate run and the learner's rebalance window.
fn plan_day<S: SchedulerStore>(
    store: &mut S,
    config: &EngineConfig,
    profile: &mut LearnerProfile,
    today: LocalDay,
    now: Timestamp,
) -> Result<(Planned, DebtReport)> {
    let learner_id = profile.learner_id.clone();
    let gates = &config.gates;
    let states = store.load_review_states(&learner_id)?;
    let transitions = store.load_transitions(&learner_id)?;
    let last = store.last_completed_session(&learner_id, today)?;
    let missed = missed_days(last.map(|s| s.day), today);
    let due = states.iter().filter(|s| s.is_due(now)).count();
    let debt = review_debt(due, profile);

    let window_start = now - i64::from(gates.retention_window_days) * SECS_PER_DAY;
    let recent = store.recent_grades(&learner_id, window_start)?;
    let retention = retention_average(&recent);
    let last_audit = store.last_gate_run(&learner_id, GateKind::Monthly)?;
    if monthly_audit_due(debt.debt_ratio, retention, last_audit, now, gates) {
        let until = now + i64::from(gates.rebalance_window_days) * SECS_PER_DAY;
        profile.rebalance_until = Some(until);
        store.update_profile(profile)?;
        profile.version += 1;
        let retention = retention.unwrap_or(0.0);
        store.append_gate_run(&QualityGateRun {
            learner_id: learner_id.clone(),
            session_id: None,
            kind: GateKind::Monthly,
            result: GateResult::Rebalanced,
            sample_size: recent.len(),
            pass_rate: retention,
            average_score: retention * 3.0,
            at: now,
        })?;
        tracing::info!(
            "monthly audit rebalanced '{learner_id}': debt ratio {:.2}, retention {retention:.2}",
            debt.debt_ratio
        );
    }

    let thresholds = effective_thresholds(profile, now, gates.rebalance_relief);
    let mode = select_mode(debt.debt_ratio, missed, &thresholds, &config.pacing);
    let weekly_is_due = weekly_due(store.last_gate_run(&learner_id, GateKind::Weekly)?, now, gates);

    let inputs = QueueInputs {
        learner_id: &learner_id,
        today,
        now,
        day_end: today.end(profile.utc_offset_minutes),
        mode,
        review_only: false,
        profile: &*profile,
        states: &states,
        transitions: &transitions,
        previous_new: last.and_then(|s| s.new_range),
        weekly_due: weekly_is_due,
        total_verses: config.total_verses,
    };
    let queue = build_queue(
        &inputs,
        &config.pacing,
        gates,
        &config.transitions,
        &config.queue,
    );
    tracing::debug!(
        "queue for '{learner_id}': warmup {}, weekly {}, repairs {}, recent {}, long-term {}, new {:?}",
        queue.warmup.len(),
        queue.weekly.len(),
        queue.repair_links.len(),
        queue.recent.len(),
        queue.long_term.len(),
        queue.new_material
    );

    let planned = Planned {
        mode,
        requirements: GateRequirements {
            warmup_required: !queue.warmup.is_empty(),
            weekly_required: !queue.weekly.is_empty(),
            new_unlocked: queue.new_material.is_some(),
        },
        steps: sequence(&queue),
    };
    Ok((planned, debt))
}
