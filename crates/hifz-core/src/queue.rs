//! Daily queue assembly.
//!
//! Budget is spent strictly in priority order: warm-up, weekly gate, repair
//! links, recent review, long-term review, new material. Warm-up and weekly
//! sets are mandatory and always included; everything after them takes what
//! the remaining budget allows.

use std::collections::BTreeSet;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use crate::gate::GateParams;
use crate::pacing::PacingParams;
use crate::profile::LearnerProfile;
use crate::review::VerseReviewState;
use crate::time::{LocalDay, Timestamp};
use crate::transition::{Transition, TransitionParams, repair_candidates};
use crate::types::{Band, PacingMode, VerseId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueParams {
    pub max_new_per_day: u32,
}

impl Default for QueueParams {
    fn default() -> Self {
        Self { max_new_per_day: 10 }
    }
}

/// Inclusive range of verse ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerseRange {
    pub start: VerseId,
    pub end: VerseId,
}

impl VerseRange {
    pub fn new(start: VerseId, end: VerseId) -> Option<Self> {
        (start >= 1 && start <= end).then_some(Self { start, end })
    }

    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, verse: VerseId) -> bool {
        (self.start..=self.end).contains(&verse)
    }

    pub fn iter(&self) -> impl Iterator<Item = VerseId> {
        self.start..=self.end
    }
}

/// Everything the queue builder reads. Plain data, no store access.
#[derive(Debug, Clone)]
pub struct QueueInputs<'a> {
    pub learner_id: &'a str,
    pub today: LocalDay,
    pub now: Timestamp,
    /// End of the learner's local day; repair links due before it qualify.
    pub day_end: Timestamp,
    pub mode: PacingMode,
    pub review_only: bool,
    pub profile: &'a LearnerProfile,
    pub states: &'a [VerseReviewState],
    pub transitions: &'a [Transition],
    /// New-material range of the previous completed session.
    pub previous_new: Option<VerseRange>,
    pub weekly_due: bool,
    pub total_verses: VerseId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyQueue {
    pub warmup: Vec<VerseId>,
    pub weekly: Vec<VerseId>,
    pub repair_links: Vec<(VerseId, VerseId)>,
    pub recent: Vec<VerseId>,
    pub long_term: Vec<VerseId>,
    pub new_material: Option<VerseRange>,
}

/// Stable per-learner, per-day seed for the weekly sample.
fn weekly_seed(learner_id: &str, today: LocalDay) -> u64 {
    // FNV-1a over the learner id, then mixed with the day.
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in learner_id.bytes() {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h ^ (today.0 as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

/// Deterministic sample of older material for the weekly gate.
fn weekly_sample(
    inputs: &QueueInputs<'_>,
    exclude: &BTreeSet<VerseId>,
    gates: &GateParams,
) -> Vec<VerseId> {
    let mut pool: Vec<VerseId> = inputs
        .states
        .iter()
        .filter(|s| s.station >= gates.weekly_min_station && !exclude.contains(&s.verse))
        .map(|s| s.verse)
        .collect();
    pool.sort_unstable();
    let amount = gates.weekly_sample_size.min(pool.len());
    if amount == 0 {
        return Vec::new();
    }
    let mut rng = SmallRng::seed_from_u64(weekly_seed(inputs.learner_id, inputs.today));
    let mut picked: Vec<VerseId> = rand::seq::index::sample(&mut rng, pool.len(), amount)
        .into_iter()
        .map(|i| pool[i])
        .collect();
    picked.sort_unstable();
    picked
}

/// Whole items of `unit_secs` that fit in `*remaining`, capped at `cap`;
/// deducts what was taken.
fn take_fitting(remaining: &mut f64, unit_secs: f64, cap: usize) -> usize {
    if unit_secs <= 0.0 || *remaining <= 0.0 {
        return 0;
    }
    let fit = (*remaining / unit_secs).floor() as usize;
    let n = fit.min(cap);
    *remaining -= n as f64 * unit_secs;
    n
}

pub fn build_queue(
    inputs: &QueueInputs<'_>,
    pacing: &PacingParams,
    gates: &GateParams,
    transitions: &TransitionParams,
    params: &QueueParams,
) -> DailyQueue {
    let profile = inputs.profile;
    let avg = &profile.averages;
    let budget = profile.budget_secs();

    // Warm-up: everything exposed in the previous session, due or not.
    let warmup: Vec<VerseId> = inputs
        .previous_new
        .map(|r| r.iter().filter(|v| *v <= inputs.total_verses).collect())
        .unwrap_or_default();
    let mut scheduled: BTreeSet<VerseId> = warmup.iter().copied().collect();

    let weekly = if inputs.weekly_due {
        weekly_sample(inputs, &scheduled, gates)
    } else {
        Vec::new()
    };
    scheduled.extend(weekly.iter().copied());

    let mut remaining = budget - (warmup.len() + weekly.len()) as f64 * avg.review_secs;

    let (repair_links, recent, long_term) = if remaining > 0.0 {
        let candidates = repair_candidates(inputs.transitions, inputs.day_end, transitions);
        let n = take_fitting(&mut remaining, avg.link_secs, candidates.len());
        let repair_links: Vec<(VerseId, VerseId)> =
            candidates.iter().take(n).map(|t| t.key()).collect();

        let mut due: Vec<&VerseReviewState> = inputs
            .states
            .iter()
            .filter(|s| s.is_due(inputs.now) && !scheduled.contains(&s.verse))
            .collect();
        // Most overdue first.
        due.sort_by_key(|s| (s.next_due, s.verse));
        let (recent_due, long_due): (Vec<_>, Vec<_>) = due
            .into_iter()
            .partition(|s| matches!(s.band(), Band::Encoding | Band::Sabqi));

        let n = take_fitting(&mut remaining, avg.review_secs, recent_due.len());
        let recent: Vec<VerseId> = recent_due.iter().take(n).map(|s| s.verse).collect();
        let n = take_fitting(&mut remaining, avg.review_secs, long_due.len());
        let long_term: Vec<VerseId> = long_due.iter().take(n).map(|s| s.verse).collect();
        (repair_links, recent, long_term)
    } else {
        (Vec::new(), Vec::new(), Vec::new())
    };

    let new_material = if inputs.review_only || inputs.mode == PacingMode::CatchUp {
        None
    } else {
        let allowance = remaining
            .min(budget * (1.0 - profile.thresholds.review_floor.clamp(0.0, 1.0)))
            .max(0.0);
        let mut count = (allowance / avg.new_verse_secs().max(1.0)).floor() as u32;
        if inputs.mode == PacingMode::Consolidation {
            let share = pacing.consolidation_new_share.clamp(0.0, 1.0);
            count = (f64::from(count) * share).floor() as u32;
        }
        let left_in_text = (inputs.total_verses + 1).saturating_sub(profile.cursor);
        let count = count.min(params.max_new_per_day).min(left_in_text);
        if count == 0 {
            None
        } else {
            VerseRange::new(profile.cursor, profile.cursor + count - 1)
        }
    };

    DailyQueue {
        warmup,
        weekly,
        repair_links,
        recent,
        long_term,
        new_material,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::review::{VerseReviewState, apply_grade};
    use crate::time::SECS_PER_DAY;
    use crate::types::Grade;

    const NOW: Timestamp = 1_771_632_000 + 8 * 3600;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    fn state(verse: VerseId, station: u32, next_due: Timestamp) -> VerseReviewState {
        VerseReviewState {
            station,
            next_due,
            ..VerseReviewState::seed(verse, &cfg().review)
        }
    }

    fn build(inputs: &QueueInputs<'_>) -> DailyQueue {
        let c = cfg();
        build_queue(inputs, &c.pacing, &c.gates, &c.transitions, &c.queue)
    }

    fn inputs<'a>(
        profile: &'a LearnerProfile,
        states: &'a [VerseReviewState],
        transitions: &'a [Transition],
    ) -> QueueInputs<'a> {
        let today = LocalDay::of(NOW, profile.utc_offset_minutes);
        QueueInputs {
            learner_id: &profile.learner_id,
            today,
            now: NOW,
            day_end: today.end(profile.utc_offset_minutes),
            mode: PacingMode::Normal,
            review_only: false,
            profile,
            states,
            transitions,
            previous_new: None,
            weekly_due: false,
            total_verses: 6236,
        }
    }

    #[test]
    fn test_fresh_learner_gets_three_new_verses() {
        let profile = LearnerProfile::new("fresh", &cfg()).with_daily_minutes(15);
        let q = build(&inputs(&profile, &[], &[]));
        assert!(q.warmup.is_empty() && q.weekly.is_empty());
        assert!(q.recent.is_empty() && q.long_term.is_empty());
        assert_eq!(q.new_material, VerseRange::new(1, 3));
    }

    #[test]
    fn test_no_new_material_in_catch_up_or_review_only() {
        let profile = LearnerProfile::new("l", &cfg()).with_daily_minutes(60);
        let mut i = inputs(&profile, &[], &[]);
        i.mode = PacingMode::CatchUp;
        assert_eq!(build(&i).new_material, None);

        let mut i = inputs(&profile, &[], &[]);
        i.review_only = true;
        assert_eq!(build(&i).new_material, None);
    }

    #[test]
    fn test_consolidation_halves_new_material() {
        let profile = LearnerProfile::new("l", &cfg()).with_daily_minutes(30);
        let normal = build(&inputs(&profile, &[], &[])).new_material.unwrap();
        let mut i = inputs(&profile, &[], &[]);
        i.mode = PacingMode::Consolidation;
        let consolidated = build(&i).new_material.unwrap();
        assert_eq!(consolidated.len(), normal.len() / 2);
    }

    #[test]
    fn test_new_material_stops_at_end_of_text() {
        let profile = LearnerProfile::new("l", &cfg())
            .with_daily_minutes(60)
            .with_cursor(6235);
        let q = build(&inputs(&profile, &[], &[]));
        assert_eq!(q.new_material, VerseRange::new(6235, 6236));

        let done = profile.with_cursor(6237);
        assert_eq!(build(&inputs(&done, &[], &[])).new_material, None);
    }

    #[test]
    fn test_reviews_split_by_band_and_exclude_warmup() {
        let profile = LearnerProfile::new("l", &cfg())
            .with_daily_minutes(30)
            .with_cursor(20);
        let states = vec![
            state(1, 2, NOW - 10),  // encoding → recent
            state(2, 4, NOW - 500), // sabqi → recent, more overdue
            state(3, 6, NOW - 10),  // manzil → long-term
            state(4, 9, NOW - 10),  // mastered → long-term
            state(5, 4, NOW + 10),  // not due
            state(10, 2, NOW - 10), // in warm-up, excluded from review
        ];
        let mut i = inputs(&profile, &states, &[]);
        i.previous_new = VerseRange::new(10, 12);
        let q = build(&i);
        assert_eq!(q.warmup, vec![10, 11, 12]);
        assert_eq!(q.recent, vec![2, 1]);
        assert_eq!(q.long_term, vec![3, 4]);
    }

    #[test]
    fn test_scarce_budget_respects_priority() {
        // 2 minutes = 4 review slots at 30s
        let profile = LearnerProfile::new("l", &cfg()).with_daily_minutes(2);
        let states: Vec<_> = (1..=10)
            .map(|v| state(v, if v <= 5 { 3 } else { 6 }, NOW - 10))
            .collect();
        let mut i = inputs(&profile, &states, &[]);
        i.previous_new = VerseRange::new(20, 21);
        let q = build(&i);
        assert_eq!(q.warmup.len(), 2);
        assert_eq!(q.recent.len(), 2);
        assert!(q.long_term.is_empty());
        assert!(q.new_material.is_none());
    }

    #[test]
    fn test_warmup_always_included_even_over_budget() {
        let profile = LearnerProfile::new("l", &cfg()).with_daily_minutes(1);
        let mut i = inputs(&profile, &[], &[]);
        i.previous_new = VerseRange::new(1, 8);
        let q = build(&i);
        assert_eq!(q.warmup.len(), 8);
        assert!(q.new_material.is_none());
    }

    #[test]
    fn test_weekly_sample_is_deterministic_and_sized() {
        let profile = LearnerProfile::new("weekly", &cfg()).with_daily_minutes(30);
        let states: Vec<_> = (1..=40).map(|v| state(v, 5, NOW + SECS_PER_DAY)).collect();
        let mut i = inputs(&profile, &states, &[]);
        i.weekly_due = true;
        let a = build(&i).weekly;
        let b = build(&i).weekly;
        assert_eq!(a.len(), 5);
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_weekly_skips_fresh_material() {
        let profile = LearnerProfile::new("l", &cfg());
        let states = vec![state(1, 1, NOW + 100), state(2, 2, NOW + 100)];
        let mut i = inputs(&profile, &states, &[]);
        i.weekly_due = true;
        assert!(build(&i).weekly.is_empty());
    }

    #[test]
    fn test_weak_links_queue_as_repairs() {
        let c = cfg();
        let profile = LearnerProfile::new("l", &c).with_daily_minutes(20);
        let mut t = Transition::new(5, 6);
        for (k, g) in [Grade::Again, Grade::Good, Grade::Again, Grade::Again].iter().enumerate() {
            t.record(*g, NOW - 2 * SECS_PER_DAY + k as i64, &c.transitions);
        }
        let transitions = vec![t];
        let q = build(&inputs(&profile, &[], &transitions));
        assert_eq!(q.repair_links, vec![(5, 6)]);
    }

    #[test]
    fn test_freshly_graded_verse_not_due() {
        let c = cfg();
        let seed = VerseReviewState::seed(3, &c.review);
        let s = apply_grade(&seed, Grade::Easy, NOW - 60, None, &c.review);
        let profile = LearnerProfile::new("l", &c);
        let states = vec![s];
        let q = build(&inputs(&profile, &states, &[]));
        assert!(q.recent.is_empty() && q.long_term.is_empty());
    }
}
