//! Session events: the raw client wire shape and its validated form.
//!
//! Clients report events as loosely typed records. Each one is validated on
//! its own; a malformed event is dropped and counted, never fatal to the
//! rest of the batch.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;
use crate::types::{Grade, Phase, Stage, StepKind, VerseId};

/// Tolerated client clock skew into the future.
pub const MAX_FUTURE_SKEW_SECS: i64 = 300;

/// Event as reported by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verse: Option<i64>,
    pub stage: String,
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_verse: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_verse: Option<i64>,
    pub occurred_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventTarget {
    Ayah {
        verse: VerseId,
        stage: Stage,
        phase: Phase,
    },
    Link {
        from: VerseId,
        to: VerseId,
        /// LINK_REPAIR stage rather than a new-material join.
        repair: bool,
    },
}

/// A validated event, ready for replay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub target: EventTarget,
    /// `None` for ungraded phases.
    pub grade: Option<Grade>,
    pub duration_secs: u32,
    pub at: Timestamp,
}

impl SessionEvent {
    pub fn stage(&self) -> Stage {
        match self.target {
            EventTarget::Ayah { stage, .. } => stage,
            EventTarget::Link { repair: true, .. } => Stage::LinkRepair,
            EventTarget::Link { repair: false, .. } => Stage::New,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.target {
            EventTarget::Ayah { phase, .. } => phase,
            EventTarget::Link { .. } => Phase::Link,
        }
    }

    /// Duration bucket this event feeds.
    pub fn step_kind(&self) -> StepKind {
        match self.target {
            EventTarget::Link { .. } => StepKind::Link,
            EventTarget::Ayah {
                stage: Stage::New, ..
            } => StepKind::New,
            EventTarget::Ayah { .. } => StepKind::Review,
        }
    }

    /// Flatten back into the wire shape, for the event log.
    pub fn to_raw(&self) -> RawEvent {
        let (verse, from_verse, to_verse) = match self.target {
            EventTarget::Ayah { verse, .. } => (Some(i64::from(verse)), None, None),
            EventTarget::Link { from, to, .. } => {
                (None, Some(i64::from(from)), Some(i64::from(to)))
            }
        };
        RawEvent {
            verse,
            stage: self.stage().as_str().to_string(),
            phase: self.phase().as_str().to_string(),
            grade: self.grade.map(|g| g.as_str().to_string()),
            duration_secs: Some(i64::from(self.duration_secs)),
            from_verse,
            to_verse,
            occurred_at: self.at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventRejection {
    UnknownStage(String),
    UnknownPhase(String),
    PhaseNotAllowed { stage: Stage, phase: Phase },
    MissingVerse,
    VerseOutOfRange(i64),
    SelfLink(VerseId),
    MissingGrade,
    UnknownGrade(String),
    NegativeDuration(i64),
    OutsideWindow(Timestamp),
}

impl fmt::Display for EventRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventRejection::UnknownStage(s) => write!(f, "unknown stage '{s}'"),
            EventRejection::UnknownPhase(s) => write!(f, "unknown phase '{s}'"),
            EventRejection::PhaseNotAllowed { stage, phase } => {
                write!(f, "phase {phase} is not valid in stage {stage}")
            }
            EventRejection::MissingVerse => write!(f, "missing verse id"),
            EventRejection::VerseOutOfRange(v) => write!(f, "verse {v} out of range"),
            EventRejection::SelfLink(v) => write!(f, "link from verse {v} to itself"),
            EventRejection::MissingGrade => write!(f, "graded phase without a grade"),
            EventRejection::UnknownGrade(s) => write!(f, "unknown grade '{s}'"),
            EventRejection::NegativeDuration(d) => write!(f, "negative duration {d}"),
            EventRejection::OutsideWindow(t) => write!(f, "timestamp {t} outside session window"),
        }
    }
}

impl std::error::Error for EventRejection {}

/// Acceptance bounds for one session's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    pub earliest: Timestamp,
    pub latest: Timestamp,
    pub total_verses: VerseId,
}

fn verse_id(raw: Option<i64>, total: VerseId) -> Result<VerseId, EventRejection> {
    let v = raw.ok_or(EventRejection::MissingVerse)?;
    if v < 1 || v > i64::from(total) {
        return Err(EventRejection::VerseOutOfRange(v));
    }
    Ok(v as VerseId)
}

impl RawEvent {
    pub fn validate(&self, window: &EventWindow) -> Result<SessionEvent, EventRejection> {
        let stage: Stage = self
            .stage
            .parse()
            .map_err(|_| EventRejection::UnknownStage(self.stage.clone()))?;
        let phase: Phase = self
            .phase
            .parse()
            .map_err(|_| EventRejection::UnknownPhase(self.phase.clone()))?;
        if !phase.allowed_in(stage) {
            return Err(EventRejection::PhaseNotAllowed { stage, phase });
        }

        let target = if phase == Phase::Link {
            let from = verse_id(self.from_verse, window.total_verses)?;
            let to = verse_id(self.to_verse, window.total_verses)?;
            if from == to {
                return Err(EventRejection::SelfLink(from));
            }
            EventTarget::Link {
                from,
                to,
                repair: stage == Stage::LinkRepair,
            }
        } else {
            EventTarget::Ayah {
                verse: verse_id(self.verse, window.total_verses)?,
                stage,
                phase,
            }
        };

        let grade = if phase.is_graded() {
            let text = self.grade.as_deref().ok_or(EventRejection::MissingGrade)?;
            Some(
                text.parse::<Grade>()
                    .map_err(|_| EventRejection::UnknownGrade(text.to_string()))?,
            )
        } else {
            None
        };

        let duration = self.duration_secs.unwrap_or(0);
        if duration < 0 {
            return Err(EventRejection::NegativeDuration(duration));
        }
        if self.occurred_at < window.earliest || self.occurred_at > window.latest {
            return Err(EventRejection::OutsideWindow(self.occurred_at));
        }

        Ok(SessionEvent {
            target,
            grade,
            duration_secs: u32::try_from(duration).unwrap_or(u32::MAX),
            at: self.occurred_at,
        })
    }
}

/// Validate a batch, dropping the bad ones. Accepted events come back in
/// chronological order; ties keep their reported order.
pub fn validate_all(raw: &[RawEvent], window: &EventWindow) -> (Vec<SessionEvent>, usize) {
    let mut accepted = Vec::with_capacity(raw.len());
    let mut dropped = 0;
    for (i, event) in raw.iter().enumerate() {
        match event.validate(window) {
            Ok(e) => accepted.push(e),
            Err(reason) => {
                dropped += 1;
                tracing::warn!("dropping invalid session event #{i}: {reason}");
            }
        }
    }
    accepted.sort_by_key(|e| e.at);
    (accepted, dropped)
}
