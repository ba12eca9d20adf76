//! Retention scheduling engine for Qur'an memorization.
//!
//! Decides, for one learner on one local day, which verses to warm up,
//! test, review and newly memorize; updates each verse's memory state after
//! every graded recall; tracks weak joins between consecutive verses; adapts
//! pacing to review debt; and derives a grace-aware daily streak.
//!
//! Zero I/O. Persistence goes through the `SchedulerStore` port and verse
//! text through `ContentProvider`.

pub mod config;
pub mod content;
pub mod error;
pub mod event;
pub mod gate;
pub mod memory;
pub mod pacing;
pub mod plan;
pub mod ports;
pub mod profile;
pub mod queue;
pub mod review;
pub mod sequence;
pub mod session;
pub mod streak;
pub mod time;
pub mod transition;
pub mod types;

pub use config::{EngineConfig, TOTAL_VERSES};
pub use content::{ContentProvider, NoContent, VerseContent};
pub use error::{EngineError, Result};
pub use event::{EventTarget, RawEvent, SessionEvent};
pub use gate::{GateKind, GateResult, QualityGateRun, WarmupOutcome, WeeklyOutcome};
pub use memory::MemoryStore;
pub use pacing::DebtReport;
pub use plan::{DecodedSteps, GateRequirements, PLAN_SCHEMA_VERSION, PlanStatus, SessionPlan};
pub use ports::{CompletedSessionSummary, SchedulerStore};
pub use profile::{LearnerProfile, PacingThresholds, StepAverages};
pub use queue::{DailyQueue, VerseRange};
pub use review::{ReviewParams, VerseReviewState, apply_grade};
pub use sequence::{AyahTask, LinkKind, ReviewTier, Step};
pub use session::{
    CompletionReport, LearnerStatus, SessionController, SessionView, StepView, WarmupCheckpoint,
};
pub use streak::{ActivityKind, ActivityRecord, StreakState};
pub use time::{LocalDay, Timestamp, now_unix_secs};
pub use transition::Transition;
pub use types::{Band, Grade, PacingMode, Phase, Stage, StepKind, VerseId};
