//! Transition tracking: success history of verse-to-verse joins.
//!
//! A join is weak once it has enough samples and its success rate sits below
//! the floor. Weak joins carry a repair due time; a join that recovers is
//! marked resolved and drops out of the repair queue until it degrades again.

use serde::{Deserialize, Serialize};

use crate::time::{SECS_PER_DAY, Timestamp};
use crate::types::{Grade, VerseId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionParams {
    pub min_samples: u32,
    pub weak_floor: f64,
    pub repair_delay_secs: i64,
}

impl Default for TransitionParams {
    fn default() -> Self {
        Self {
            min_samples: 3,
            weak_floor: 0.6,
            repair_delay_secs: SECS_PER_DAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: VerseId,
    pub to: VerseId,
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub success_rate: f64,
    pub last_grade: Option<Grade>,
    pub last_at: Option<Timestamp>,
    pub next_repair_due: Option<Timestamp>,
    pub resolved_at: Option<Timestamp>,
    pub version: u32,
}

impl Transition {
    pub fn new(from: VerseId, to: VerseId) -> Self {
        Self {
            from,
            to,
            attempts: 0,
            successes: 0,
            failures: 0,
            success_rate: 0.0,
            last_grade: None,
            last_at: None,
            next_repair_due: None,
            resolved_at: None,
            version: 0,
        }
    }

    pub fn key(&self) -> (VerseId, VerseId) {
        (self.from, self.to)
    }

    pub fn is_weak(&self, params: &TransitionParams) -> bool {
        self.attempts >= params.min_samples && self.success_rate < params.weak_floor
    }

    /// Record one graded attempt at this join.
    pub fn record(&mut self, grade: Grade, at: Timestamp, params: &TransitionParams) {
        self.attempts = self.attempts.saturating_add(1);
        if grade.is_pass() {
            self.successes = self.successes.saturating_add(1);
        } else {
            self.failures = self.failures.saturating_add(1);
        }
        self.success_rate = f64::from(self.successes) / f64::from(self.attempts);
        self.last_grade = Some(grade);
        self.last_at = Some(at);

        if self.is_weak(params) {
            self.next_repair_due = Some(at + params.repair_delay_secs);
            self.resolved_at = None;
        } else if self.next_repair_due.take().is_some() {
            self.resolved_at = Some(at);
        }
    }

    /// Weak and due for repair strictly before `cutoff`.
    pub fn needs_repair(&self, cutoff: Timestamp, params: &TransitionParams) -> bool {
        self.is_weak(params) && self.next_repair_due.is_some_and(|due| due < cutoff)
    }
}

/// Weak joins due before `cutoff`, worst success rate first.
pub fn repair_candidates<'a>(
    transitions: &'a [Transition],
    cutoff: Timestamp,
    params: &TransitionParams,
) -> Vec<&'a Transition> {
    let mut due: Vec<&Transition> = transitions
        .iter()
        .filter(|t| t.needs_repair(cutoff, params))
        .collect();
    due.sort_by(|a, b| {
        a.success_rate
            .total_cmp(&b.success_rate)
            .then(a.next_repair_due.cmp(&b.next_repair_due))
            .then(a.key().cmp(&b.key()))
    });
    due
}
