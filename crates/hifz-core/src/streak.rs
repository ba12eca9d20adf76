//! Daily streaks with grace.
//!
//! A local day qualifies when the learner made enough graded recalls or
//! browsed long enough. The current streak counts qualifying days back from
//! today (or yesterday, if today has not qualified yet). A single missed day
//! between two qualifying days is forgiven, at most once per grace window.
//! Forgiven days keep the streak alive but do not add to its length.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::time::{LocalDay, Timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreakParams {
    pub qualifying_recalls: u32,
    pub qualifying_browse_minutes: u32,
    pub grace_window_days: u32,
}

impl Default for StreakParams {
    fn default() -> Self {
        Self {
            qualifying_recalls: 5,
            qualifying_browse_minutes: 10,
            grace_window_days: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityKind {
    Recall { graded: bool },
    Browse { seconds: u32 },
}

/// One unit of historical activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub at: Timestamp,
    pub kind: ActivityKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    pub current: u32,
    pub longest: u32,
    pub qualifying_days: Vec<LocalDay>,
    /// Forgiven days inside the current streak.
    pub grace_days_used: u32,
    pub today_qualified: bool,
}

#[derive(Default)]
struct DayTally {
    recalls: u32,
    browse_secs: u64,
}

pub fn qualifying_days(
    records: &[ActivityRecord],
    utc_offset_minutes: i32,
    params: &StreakParams,
) -> BTreeSet<LocalDay> {
    let mut tallies: BTreeMap<LocalDay, DayTally> = BTreeMap::new();
    for r in records {
        let tally = tallies.entry(LocalDay::of(r.at, utc_offset_minutes)).or_default();
        match r.kind {
            ActivityKind::Recall { graded: true } => tally.recalls += 1,
            ActivityKind::Recall { graded: false } => {}
            ActivityKind::Browse { seconds } => tally.browse_secs += u64::from(seconds),
        }
    }
    let browse_floor = u64::from(params.qualifying_browse_minutes) * 60;
    tallies
        .into_iter()
        .filter(|(_, t)| t.recalls >= params.qualifying_recalls || t.browse_secs >= browse_floor)
        .map(|(day, _)| day)
        .collect()
}

/// Tracks forgiven days while walking a calendar in one direction.
struct Grace {
    window: i64,
    last: Option<LocalDay>,
}

impl Grace {
    fn new(params: &StreakParams) -> Self {
        Self {
            window: i64::from(params.grace_window_days.max(1)),
            last: None,
        }
    }

    fn try_forgive(&mut self, day: LocalDay) -> bool {
        let clear = self.last.is_none_or(|f| (f.0 - day.0).abs() >= self.window);
        if clear {
            self.last = Some(day);
        }
        clear
    }
}

fn current_streak(days: &BTreeSet<LocalDay>, today: LocalDay, params: &StreakParams) -> (u32, u32) {
    let mut day = if days.contains(&today) { today } else { today.pred() };
    let mut grace = Grace::new(params);
    let (mut count, mut forgiven) = (0u32, 0u32);
    loop {
        if days.contains(&day) {
            count += 1;
        } else if days.contains(&day.pred()) && grace.try_forgive(day) {
            forgiven += 1;
        } else {
            break;
        }
        day = day.pred();
    }
    if count == 0 { (0, 0) } else { (count, forgiven) }
}

fn longest_streak(days: &BTreeSet<LocalDay>, today: LocalDay, params: &StreakParams) -> u32 {
    let Some(first) = days.first().copied() else {
        return 0;
    };
    let mut grace = Grace::new(params);
    let (mut run, mut best) = (0u32, 0u32);
    let mut day = first;
    while day <= today {
        if days.contains(&day) {
            run += 1;
            best = best.max(run);
        } else if run > 0 && days.contains(&day.succ()) && grace.try_forgive(day) {
            // forgiven, run continues
        } else {
            run = 0;
        }
        day = day.succ();
    }
    best
}

pub fn compute_streak(
    records: &[ActivityRecord],
    today: LocalDay,
    utc_offset_minutes: i32,
    params: &StreakParams,
) -> StreakState {
    let days = qualifying_days(records, utc_offset_minutes, params);
    let (current, grace_days_used) = current_streak(&days, today, params);
    let longest = longest_streak(&days, today, params).max(current);
    StreakState {
        current,
        longest,
        today_qualified: days.contains(&today),
        qualifying_days: days.into_iter().collect(),
        grace_days_used,
    }
}
