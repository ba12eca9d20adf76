//! Shared vocabulary: grades, bands, pacing modes, stages and phases.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Global ayah number, 1-based.
pub type VerseId = u32;

/// Recall grade reported by the learner for one graded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Grade {
    Again,
    Hard,
    Good,
    Easy,
}

impl Grade {
    /// Numeric score: AGAIN=0, HARD=1, GOOD=2, EASY=3.
    pub fn score(self) -> u8 {
        match self {
            Grade::Again => 0,
            Grade::Hard => 1,
            Grade::Good => 2,
            Grade::Easy => 3,
        }
    }

    /// GOOD or EASY.
    pub fn is_pass(self) -> bool {
        matches!(self, Grade::Good | Grade::Easy)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::Again => "AGAIN",
            Grade::Hard => "HARD",
            Grade::Good => "GOOD",
            Grade::Easy => "EASY",
        }
    }
}

/// Coarse view of a station, used for reporting and review-tier splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Band {
    Encoding,
    Sabqi,
    Manzil,
    Mastered,
}

impl Band {
    pub fn for_station(station: u32) -> Self {
        match station {
            0..=2 => Band::Encoding,
            3..=4 => Band::Sabqi,
            5..=6 => Band::Manzil,
            _ => Band::Mastered,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Band::Encoding => "ENCODING",
            Band::Sabqi => "SABQI",
            Band::Manzil => "MANZIL",
            Band::Mastered => "MASTERED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacingMode {
    #[default]
    Normal,
    Consolidation,
    CatchUp,
}

impl PacingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PacingMode::Normal => "NORMAL",
            PacingMode::Consolidation => "CONSOLIDATION",
            PacingMode::CatchUp => "CATCH_UP",
        }
    }
}

/// Which part of the daily session a step or event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Warmup,
    Weekly,
    Review,
    New,
    LinkRepair,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Warmup => "WARMUP",
            Stage::Weekly => "WEEKLY",
            Stage::Review => "REVIEW",
            Stage::New => "NEW",
            Stage::LinkRepair => "LINK_REPAIR",
        }
    }
}

/// How a verse is practised within its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Standard,
    Retry,
    Expose,
    Guided,
    Blind,
    Link,
}

impl Phase {
    /// Phases whose outcome carries a grade.
    pub fn is_graded(self) -> bool {
        !matches!(self, Phase::Expose | Phase::Guided)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Standard => "STANDARD",
            Phase::Retry => "RETRY",
            Phase::Expose => "EXPOSE",
            Phase::Guided => "GUIDED",
            Phase::Blind => "BLIND",
            Phase::Link => "LINK",
        }
    }

    /// Whether `self` is a legal phase within `stage`.
    pub fn allowed_in(self, stage: Stage) -> bool {
        match stage {
            Stage::Warmup => matches!(self, Phase::Standard | Phase::Retry),
            Stage::Weekly | Stage::Review => self == Phase::Standard,
            Stage::New => matches!(
                self,
                Phase::Expose | Phase::Guided | Phase::Blind | Phase::Link
            ),
            Stage::LinkRepair => self == Phase::Link,
        }
    }
}

/// Step kinds with separately learned average durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Review,
    New,
    Link,
}

/// Error returned when parsing one of the enums above from client text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Normalise client spellings: `link-repair`, `Link_Repair`, `LINK_REPAIR`.
fn normalise(s: &str) -> String {
    s.trim().replace('-', "_").to_ascii_uppercase()
}

macro_rules! impl_from_str {
    ($ty:ty, $kind:literal, [$($variant:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = normalise(s);
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_from_str!(Grade, "grade", [Grade::Again, Grade::Hard, Grade::Good, Grade::Easy]);
impl_from_str!(
    Band,
    "band",
    [Band::Encoding, Band::Sabqi, Band::Manzil, Band::Mastered]
);
impl_from_str!(
    PacingMode,
    "pacing mode",
    [PacingMode::Normal, PacingMode::Consolidation, PacingMode::CatchUp]
);
impl_from_str!(
    Stage,
    "stage",
    [
        Stage::Warmup,
        Stage::Weekly,
        Stage::Review,
        Stage::New,
        Stage::LinkRepair,
    ]
);
impl_from_str!(
    Phase,
    "phase",
    [
        Phase::Standard,
        Phase::Retry,
        Phase::Expose,
        Phase::Guided,
        Phase::Blind,
        Phase::Link,
    ]
);
