//! Review update: apply one recall grade to a verse's memory state.
//!
//! Stations climb a two-part ladder. The lowest stations are measured in
//! minutes and ignore ease; the rest are measured in days and scale with the
//! ease factor. Past the top of the day ladder the interval grows
//! geometrically from the previous one. AGAIN drops the station and
//! schedules a short relearn; HARD holds the station with a shortened
//! interval; GOOD climbs one rung; EASY climbs further with a bonus.
//!
//! The interval is non-decreasing in both station and ease, which is what
//! makes GOOD/EASY never come due earlier than AGAIN/HARD from the same state.

use serde::{Deserialize, Serialize};

use crate::time::{SECS_PER_MINUTE, Timestamp};
use crate::types::{Band, Grade, VerseId};

const MINUTES_PER_DAY: i64 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewParams {
    /// Interval in minutes for stations 1..=len.
    pub minute_ladder: Vec<u32>,
    /// Base interval in days for the stations after the minute ladder.
    pub day_ladder: Vec<u32>,
    pub default_ease: f64,
    pub ease_floor: f64,
    pub ease_ceiling: f64,
    pub easy_ease_bonus: f64,
    pub hard_ease_penalty: f64,
    pub again_ease_penalty: f64,
    /// Stations lost on AGAIN (never below station 1).
    pub lapse_station_drop: u32,
    pub relearn_minutes: u32,
    /// Stations gained on EASY.
    pub easy_station_jump: u32,
    pub easy_interval_bonus: f64,
    pub hard_interval_factor: f64,
    pub max_interval_days: u32,
}

impl Default for ReviewParams {
    fn default() -> Self {
        Self {
            minute_ladder: vec![10, 240],
            day_ladder: vec![1, 3, 7, 16, 35],
            default_ease: 2.5,
            ease_floor: 1.3,
            ease_ceiling: 3.0,
            easy_ease_bonus: 0.15,
            hard_ease_penalty: 0.15,
            again_ease_penalty: 0.20,
            lapse_station_drop: 2,
            relearn_minutes: 10,
            easy_station_jump: 2,
            easy_interval_bonus: 1.3,
            hard_interval_factor: 0.8,
            max_interval_days: 365,
        }
    }
}

/// Long-term memory state of one verse for one learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerseReviewState {
    pub verse: VerseId,
    pub station: u32,
    /// Rung of the interval ladder that produced `next_due`.
    pub checkpoint: u32,
    pub interval_minutes: i64,
    /// Whole days for day-ladder stations, 0 while on the minute ladder.
    pub interval_days: u32,
    pub ease: f64,
    /// Successful recalls since the last lapse.
    pub repetitions: u32,
    pub lapses: u32,
    pub last_grade: Option<Grade>,
    pub last_duration_secs: Option<u32>,
    pub last_reviewed_at: Option<Timestamp>,
    pub next_due: Timestamp,
    /// Optimistic-concurrency version; 0 means never persisted.
    pub version: u32,
}

impl VerseReviewState {
    /// Seed state for a verse graded for the first time.
    pub fn seed(verse: VerseId, params: &ReviewParams) -> Self {
        Self {
            verse,
            station: 1,
            checkpoint: 0,
            interval_minutes: 0,
            interval_days: 0,
            ease: params.default_ease,
            repetitions: 0,
            lapses: 0,
            last_grade: None,
            last_duration_secs: None,
            last_reviewed_at: None,
            next_due: 0,
            version: 0,
        }
    }

    pub fn band(&self) -> Band {
        Band::for_station(self.station)
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.next_due <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Scheduled {
    minutes: i64,
    days: u32,
    checkpoint: u32,
}

impl Scheduled {
    fn scaled(self, factor: f64, params: &ReviewParams) -> Self {
        if self.days == 0 {
            let minutes = ((self.minutes as f64) * factor).round().max(1.0) as i64;
            return Scheduled { minutes, ..self };
        }
        let days = ((self.days as f64) * factor)
            .round()
            .clamp(1.0, params.max_interval_days.max(1) as f64) as u32;
        Scheduled {
            minutes: i64::from(days) * MINUTES_PER_DAY,
            days,
            ..self
        }
    }
}

/// Interval for `station` at `ease`, given the previous interval in days.
fn interval_for(station: u32, ease: f64, prev_days: u32, params: &ReviewParams) -> Scheduled {
    let rung = station.max(1) as usize - 1;
    let minute_rungs = params.minute_ladder.len();

    if let Some(&minutes) = params.minute_ladder.get(rung) {
        return Scheduled {
            minutes: i64::from(minutes.max(1)),
            days: 0,
            checkpoint: rung as u32,
        };
    }

    let scale = ease / params.default_ease;
    let day_rung = rung - minute_rungs;
    let top = params.day_ladder.last().copied().unwrap_or(1);

    let (days, checkpoint) = match params.day_ladder.get(day_rung) {
        Some(&base) => ((base as f64 * scale).round(), rung),
        None => {
            let ceiling = (top as f64 * scale).round();
            let grown = (prev_days as f64 * ease).round();
            (ceiling.max(grown), minute_rungs + params.day_ladder.len())
        }
    };

    let days = days.clamp(1.0, params.max_interval_days.max(1) as f64) as u32;
    Scheduled {
        minutes: i64::from(days) * MINUTES_PER_DAY,
        days,
        checkpoint: checkpoint as u32,
    }
}

fn clamp_ease(ease: f64, params: &ReviewParams) -> f64 {
    ease.clamp(params.ease_floor, params.ease_ceiling)
}

/// Apply `grade` to `state` at `now`, returning the successor state.
pub fn apply_grade(
    state: &VerseReviewState,
    grade: Grade,
    now: Timestamp,
    duration_secs: Option<u32>,
    params: &ReviewParams,
) -> VerseReviewState {
    let mut next = state.clone();
    let station = state.station.max(1);

    let scheduled = match grade {
        Grade::Again => {
            next.station = station.saturating_sub(params.lapse_station_drop).max(1);
            next.ease = clamp_ease(state.ease - params.again_ease_penalty, params);
            next.lapses = state.lapses.saturating_add(1);
            next.repetitions = 0;
            Scheduled {
                minutes: i64::from(params.relearn_minutes.max(1)),
                days: 0,
                checkpoint: 0,
            }
        }
        Grade::Hard => {
            next.station = station;
            next.ease = clamp_ease(state.ease - params.hard_ease_penalty, params);
            next.repetitions = state.repetitions.saturating_add(1);
            interval_for(station, next.ease, state.interval_days, params)
                .scaled(params.hard_interval_factor, params)
        }
        Grade::Good => {
            next.station = station.saturating_add(1);
            next.ease = clamp_ease(state.ease, params);
            next.repetitions = state.repetitions.saturating_add(1);
            interval_for(next.station, next.ease, state.interval_days, params)
        }
        Grade::Easy => {
            next.station = station.saturating_add(params.easy_station_jump.max(1));
            next.ease = clamp_ease(state.ease + params.easy_ease_bonus, params);
            next.repetitions = state.repetitions.saturating_add(1);
            interval_for(next.station, next.ease, state.interval_days, params)
                .scaled(params.easy_interval_bonus, params)
        }
    };

    next.checkpoint = scheduled.checkpoint;
    next.interval_minutes = scheduled.minutes;
    next.interval_days = scheduled.days;
    next.next_due = now + scheduled.minutes * SECS_PER_MINUTE;
    next.last_grade = Some(grade);
    next.last_duration_secs = duration_secs;
    next.last_reviewed_at = Some(now);
    next
}
