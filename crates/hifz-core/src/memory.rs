//! In-memory `SchedulerStore`.
//!
//! Transactions snapshot the whole data set on `begin` and restore it on
//! `rollback`. Plans are kept as the same versioned JSON documents the
//! SQLite store writes, so stale-plan handling behaves identically.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::event::SessionEvent;
use crate::gate::{GateKind, QualityGateRun};
use crate::plan::{DecodedSteps, PlanStatus, SessionPlan, decode_steps, encode_steps};
use crate::ports::{CompletedSessionSummary, SchedulerStore};
use crate::profile::LearnerProfile;
use crate::review::VerseReviewState;
use crate::streak::{ActivityKind, ActivityRecord};
use crate::time::{LocalDay, Timestamp};
use crate::transition::Transition;
use crate::types::{Grade, VerseId};

#[derive(Debug, Clone)]
struct StoredPlan {
    plan: SessionPlan,
    steps_json: String,
}

#[derive(Debug, Clone)]
struct StoredEvent {
    learner_id: String,
    event: SessionEvent,
}

#[derive(Debug, Clone, Default)]
struct Data {
    profiles: HashMap<String, LearnerProfile>,
    reviews: HashMap<(String, VerseId), VerseReviewState>,
    transitions: HashMap<(String, VerseId, VerseId), Transition>,
    plans: HashMap<Uuid, StoredPlan>,
    events: Vec<StoredEvent>,
    gate_runs: Vec<QualityGateRun>,
    browse: Vec<(String, u32, Timestamp)>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Data,
    snapshot: Option<Data>,
    fail_event_appends: bool,
}

fn check_version(what: &str, stored: Option<u32>, expected: u32) -> Result<()> {
    let current = stored.unwrap_or(0);
    if current == expected {
        Ok(())
    } else {
        Err(EngineError::Conflict(format!(
            "{what}: expected version {expected}, found {current}"
        )))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `append_events` call fail with a store error.
    pub fn set_fail_event_appends(&mut self, fail: bool) {
        self.fail_event_appends = fail;
    }

    /// Replace a stored plan document verbatim, as an older release would
    /// have left it.
    pub fn overwrite_plan_document(&mut self, session_id: Uuid, json: &str) {
        if let Some(stored) = self.data.plans.get_mut(&session_id) {
            stored.steps_json = json.to_string();
        }
    }

    pub fn gate_runs(&self) -> &[QualityGateRun] {
        &self.data.gate_runs
    }

    pub fn event_count(&self, learner_id: &str) -> usize {
        self.data
            .events
            .iter()
            .filter(|e| e.learner_id == learner_id)
            .count()
    }

    fn hydrate(stored: &StoredPlan) -> SessionPlan {
        let mut plan = stored.plan.clone();
        match decode_steps(&stored.steps_json) {
            DecodedSteps::Current(steps) => plan.steps = steps,
            DecodedSteps::Stale => {
                plan.steps = Vec::new();
                plan.stale = true;
            }
        }
        plan
    }

    fn store_plan(&mut self, plan: &SessionPlan) -> Result<()> {
        let steps_json =
            encode_steps(&plan.steps).map_err(|e| EngineError::Store(e.to_string()))?;
        let mut stored = plan.clone();
        stored.steps = Vec::new();
        stored.stale = false;
        stored.version = plan.version + 1;
        self.data
            .plans
            .insert(plan.id, StoredPlan { plan: stored, steps_json });
        Ok(())
    }
}

impl SchedulerStore for MemoryStore {
    fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(EngineError::Store("transaction already open".into()));
        }
        self.snapshot = Some(self.data.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| EngineError::Store("no open transaction".into()))
    }

    fn rollback(&mut self) -> Result<()> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| EngineError::Store("no open transaction".into()))?;
        self.data = snapshot;
        Ok(())
    }

    fn load_profile(&self, learner_id: &str) -> Result<Option<LearnerProfile>> {
        Ok(self.data.profiles.get(learner_id).cloned())
    }

    fn insert_profile(&mut self, profile: &LearnerProfile) -> Result<()> {
        if self.data.profiles.contains_key(&profile.learner_id) {
            return Err(EngineError::Conflict(format!(
                "learner {} already enrolled",
                profile.learner_id
            )));
        }
        let mut stored = profile.clone();
        stored.version = 1;
        self.data.profiles.insert(profile.learner_id.clone(), stored);
        Ok(())
    }

    fn update_profile(&mut self, profile: &LearnerProfile) -> Result<()> {
        let stored = self
            .data
            .profiles
            .get(&profile.learner_id)
            .ok_or_else(|| EngineError::LearnerNotFound(profile.learner_id.clone()))?;
        check_version("profile", Some(stored.version), profile.version)?;
        let mut next = profile.clone();
        next.version += 1;
        self.data.profiles.insert(profile.learner_id.clone(), next);
        Ok(())
    }

    fn load_review_states(&self, learner_id: &str) -> Result<Vec<VerseReviewState>> {
        let mut states: Vec<_> = self
            .data
            .reviews
            .iter()
            .filter(|((l, _), _)| l == learner_id)
            .map(|(_, s)| s.clone())
            .collect();
        states.sort_by_key(|s| s.verse);
        Ok(states)
    }

    fn save_review_state(&mut self, learner_id: &str, state: &VerseReviewState) -> Result<()> {
        let key = (learner_id.to_string(), state.verse);
        let stored = self.data.reviews.get(&key).map(|s| s.version);
        check_version(&format!("verse {}", state.verse), stored, state.version)?;
        let mut next = state.clone();
        next.version += 1;
        self.data.reviews.insert(key, next);
        Ok(())
    }

    fn load_transitions(&self, learner_id: &str) -> Result<Vec<Transition>> {
        let mut all: Vec<_> = self
            .data
            .transitions
            .iter()
            .filter(|((l, _, _), _)| l == learner_id)
            .map(|(_, t)| t.clone())
            .collect();
        all.sort_by_key(|t| t.key());
        Ok(all)
    }

    fn save_transition(&mut self, learner_id: &str, transition: &Transition) -> Result<()> {
        let key = (learner_id.to_string(), transition.from, transition.to);
        let stored = self.data.transitions.get(&key).map(|t| t.version);
        check_version(
            &format!("transition {}->{}", transition.from, transition.to),
            stored,
            transition.version,
        )?;
        let mut next = transition.clone();
        next.version += 1;
        self.data.transitions.insert(key, next);
        Ok(())
    }

    fn last_completed_session(
        &self,
        learner_id: &str,
        before: LocalDay,
    ) -> Result<Option<CompletedSessionSummary>> {
        Ok(self
            .data
            .plans
            .values()
            .map(|s| &s.plan)
            .filter(|p| {
                p.learner_id == learner_id && p.status == PlanStatus::Completed && p.day < before
            })
            .max_by_key(|p| p.day)
            .map(|p| CompletedSessionSummary {
                day: p.day,
                new_range: p.new_range,
                completed_at: p.completed_at.unwrap_or(p.created_at),
            }))
    }

    fn last_gate_run(&self, learner_id: &str, kind: GateKind) -> Result<Option<Timestamp>> {
        Ok(self
            .data
            .gate_runs
            .iter()
            .filter(|r| r.learner_id == learner_id && r.kind == kind)
            .map(|r| r.at)
            .max())
    }

    fn recent_grades(&self, learner_id: &str, since: Timestamp) -> Result<Vec<Grade>> {
        let mut graded: Vec<(Timestamp, Grade)> = self
            .data
            .events
            .iter()
            .filter(|e| e.learner_id == learner_id && e.event.at >= since)
            .filter_map(|e| e.event.grade.map(|g| (e.event.at, g)))
            .collect();
        graded.sort_by_key(|(at, _)| *at);
        Ok(graded.into_iter().map(|(_, g)| g).collect())
    }

    fn find_plan_for_day(&self, learner_id: &str, day: LocalDay) -> Result<Option<SessionPlan>> {
        Ok(self
            .data
            .plans
            .values()
            .find(|s| s.plan.learner_id == learner_id && s.plan.day == day)
            .map(Self::hydrate))
    }

    fn find_plan(&self, learner_id: &str, session_id: Uuid) -> Result<Option<SessionPlan>> {
        Ok(self
            .data
            .plans
            .get(&session_id)
            .filter(|s| s.plan.learner_id == learner_id)
            .map(Self::hydrate))
    }

    fn insert_plan(&mut self, plan: &SessionPlan) -> Result<()> {
        let duplicate = self.data.plans.contains_key(&plan.id)
            || self
                .data
                .plans
                .values()
                .any(|s| s.plan.learner_id == plan.learner_id && s.plan.day == plan.day);
        if duplicate || plan.version != 0 {
            return Err(EngineError::Conflict(format!(
                "plan for {} on {} already exists",
                plan.learner_id, plan.day
            )));
        }
        self.store_plan(plan)
    }

    fn update_plan(&mut self, plan: &SessionPlan) -> Result<()> {
        let stored = self
            .data
            .plans
            .get(&plan.id)
            .ok_or(EngineError::SessionNotFound(plan.id))?;
        check_version("session plan", Some(stored.plan.version), plan.version)?;
        self.store_plan(plan)
    }

    fn append_events(
        &mut self,
        learner_id: &str,
        _session_id: Uuid,
        events: &[SessionEvent],
    ) -> Result<()> {
        if self.fail_event_appends {
            return Err(EngineError::Store("event log unavailable".into()));
        }
        self.data.events.extend(events.iter().map(|e| StoredEvent {
            learner_id: learner_id.to_string(),
            event: *e,
        }));
        Ok(())
    }

    fn append_gate_run(&mut self, run: &QualityGateRun) -> Result<()> {
        self.data.gate_runs.push(run.clone());
        Ok(())
    }

    fn append_browse(&mut self, learner_id: &str, seconds: u32, at: Timestamp) -> Result<()> {
        self.data.browse.push((learner_id.to_string(), seconds, at));
        Ok(())
    }

    fn activity_since(&self, learner_id: &str, since: Timestamp) -> Result<Vec<ActivityRecord>> {
        let recalls = self
            .data
            .events
            .iter()
            .filter(|e| e.learner_id == learner_id && e.event.at >= since)
            .map(|e| ActivityRecord {
                at: e.event.at,
                kind: ActivityKind::Recall {
                    graded: e.event.grade.is_some(),
                },
            });
        let browse = self
            .data
            .browse
            .iter()
            .filter(|(l, _, at)| l == learner_id && *at >= since)
            .map(|(_, seconds, at)| ActivityRecord {
                at: *at,
                kind: ActivityKind::Browse { seconds: *seconds },
            });
        let mut all: Vec<_> = recalls.chain(browse).collect();
        all.sort_by_key(|r| r.at);
        Ok(all)
    }
}
