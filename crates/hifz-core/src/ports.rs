//! Storage port.
//!
//! The engine reads and writes learner state only through this trait.
//! Every versioned record follows the same optimistic-concurrency rule: a
//! write carrying version `v` succeeds only if the stored record still has
//! version `v` (`0` meaning "not stored yet"), and leaves it at `v + 1`.
//! A mismatch is `EngineError::Conflict`.

use uuid::Uuid;

use crate::error::Result;
use crate::event::SessionEvent;
use crate::gate::{GateKind, QualityGateRun};
use crate::plan::SessionPlan;
use crate::profile::LearnerProfile;
use crate::queue::VerseRange;
use crate::review::VerseReviewState;
use crate::streak::ActivityRecord;
use crate::time::{LocalDay, Timestamp};
use crate::transition::Transition;
use crate::types::Grade;

/// What the warm-up and missed-day logic need from the last finished day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedSessionSummary {
    pub day: LocalDay,
    pub new_range: Option<VerseRange>,
    pub completed_at: Timestamp,
}

pub trait SchedulerStore {
    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    fn load_profile(&self, learner_id: &str) -> Result<Option<LearnerProfile>>;
    fn insert_profile(&mut self, profile: &LearnerProfile) -> Result<()>;
    fn update_profile(&mut self, profile: &LearnerProfile) -> Result<()>;

    fn load_review_states(&self, learner_id: &str) -> Result<Vec<VerseReviewState>>;
    fn save_review_state(&mut self, learner_id: &str, state: &VerseReviewState) -> Result<()>;

    fn load_transitions(&self, learner_id: &str) -> Result<Vec<Transition>>;
    fn save_transition(&mut self, learner_id: &str, transition: &Transition) -> Result<()>;

    /// Most recent completed session strictly before `before`.
    fn last_completed_session(
        &self,
        learner_id: &str,
        before: LocalDay,
    ) -> Result<Option<CompletedSessionSummary>>;

    fn last_gate_run(&self, learner_id: &str, kind: GateKind) -> Result<Option<Timestamp>>;
    /// Grades of every graded event at or after `since`, oldest first.
    fn recent_grades(&self, learner_id: &str, since: Timestamp) -> Result<Vec<Grade>>;

    fn find_plan_for_day(&self, learner_id: &str, day: LocalDay) -> Result<Option<SessionPlan>>;
    fn find_plan(&self, learner_id: &str, session_id: Uuid) -> Result<Option<SessionPlan>>;
    /// Fails with `Conflict` if the learner already has a plan for that day.
    fn insert_plan(&mut self, plan: &SessionPlan) -> Result<()>;
    fn update_plan(&mut self, plan: &SessionPlan) -> Result<()>;

    fn append_events(
        &mut self,
        learner_id: &str,
        session_id: Uuid,
        events: &[SessionEvent],
    ) -> Result<()>;
    fn append_gate_run(&mut self, run: &QualityGateRun) -> Result<()>;
    fn append_browse(&mut self, learner_id: &str, seconds: u32, at: Timestamp) -> Result<()>;

    /// Recall and browse history at or after `since`.
    fn activity_since(&self, learner_id: &str, since: Timestamp) -> Result<Vec<ActivityRecord>>;
}
