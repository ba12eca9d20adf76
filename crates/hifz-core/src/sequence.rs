//! Step sequencing: flatten a daily queue into the ordered walk a client
//! follows.
//!
//! Order: warm-up, weekly test, repair links, recent review, long-term
//! review, then each new verse as expose, guided, blind, followed by a link
//! back to the previous new verse.

use serde::{Deserialize, Serialize};

use crate::queue::DailyQueue;
use crate::types::{Phase, Stage, VerseId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewTier {
    Sabqi,
    Manzil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AyahTask {
    Warmup,
    WarmupRetry,
    Weekly,
    Review(ReviewTier),
    Expose,
    Guided,
    Blind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Repair,
    New,
}

/// One step of a session. Only legal stage/phase combinations exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Ayah {
        verse: VerseId,
        task: AyahTask,
    },
    Link {
        from: VerseId,
        to: VerseId,
        link: LinkKind,
    },
}

impl Step {
    pub fn ayah(verse: VerseId, task: AyahTask) -> Self {
        Step::Ayah { verse, task }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Step::Ayah { task, .. } => match task {
                AyahTask::Warmup | AyahTask::WarmupRetry => Stage::Warmup,
                AyahTask::Weekly => Stage::Weekly,
                AyahTask::Review(_) => Stage::Review,
                AyahTask::Expose | AyahTask::Guided | AyahTask::Blind => Stage::New,
            },
            Step::Link { link: LinkKind::Repair, .. } => Stage::LinkRepair,
            Step::Link { link: LinkKind::New, .. } => Stage::New,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Step::Ayah { task, .. } => match task {
                AyahTask::WarmupRetry => Phase::Retry,
                AyahTask::Expose => Phase::Expose,
                AyahTask::Guided => Phase::Guided,
                AyahTask::Blind => Phase::Blind,
                AyahTask::Warmup | AyahTask::Weekly | AyahTask::Review(_) => Phase::Standard,
            },
            Step::Link { .. } => Phase::Link,
        }
    }

    pub fn is_graded(&self) -> bool {
        self.phase().is_graded()
    }

    /// New material and links; the steps a review-only lock removes.
    pub fn is_progression(&self) -> bool {
        matches!(self, Step::Link { .. }) || self.stage() == Stage::New
    }

    /// Verses this step shows.
    pub fn verses(&self) -> Vec<VerseId> {
        match *self {
            Step::Ayah { verse, .. } => vec![verse],
            Step::Link { from, to, .. } => vec![from, to],
        }
    }
}

pub fn sequence(queue: &DailyQueue) -> Vec<Step> {
    let mut steps = Vec::new();
    steps.extend(queue.warmup.iter().map(|v| Step::ayah(*v, AyahTask::Warmup)));
    steps.extend(queue.weekly.iter().map(|v| Step::ayah(*v, AyahTask::Weekly)));
    steps.extend(queue.repair_links.iter().map(|(from, to)| Step::Link {
        from: *from,
        to: *to,
        link: LinkKind::Repair,
    }));
    steps.extend(
        queue
            .recent
            .iter()
            .map(|v| Step::ayah(*v, AyahTask::Review(ReviewTier::Sabqi))),
    );
    steps.extend(
        queue
            .long_term
            .iter()
            .map(|v| Step::ayah(*v, AyahTask::Review(ReviewTier::Manzil))),
    );
    if let Some(range) = queue.new_material {
        let mut previous: Option<VerseId> = None;
        for verse in range.iter() {
            steps.push(Step::ayah(verse, AyahTask::Expose));
            steps.push(Step::ayah(verse, AyahTask::Guided));
            steps.push(Step::ayah(verse, AyahTask::Blind));
            if let Some(from) = previous {
                steps.push(Step::Link {
                    from,
                    to: verse,
                    link: LinkKind::New,
                });
            }
            previous = Some(verse);
        }
    }
    steps
}

/// Drop every progression step.
pub fn review_only(steps: &[Step]) -> Vec<Step> {
    steps.iter().filter(|s| !s.is_progression()).copied().collect()
}

/// Insert one retry step per warm-up verse directly after the warm-up
/// block. Does nothing if retry steps are already present.
pub fn with_warmup_retry(steps: &[Step], verses: &[VerseId]) -> Vec<Step> {
    let has_retry = steps
        .iter()
        .any(|s| matches!(s, Step::Ayah { task: AyahTask::WarmupRetry, .. }));
    if has_retry {
        return steps.to_vec();
    }
    let split = steps
        .iter()
        .position(|s| s.stage() != Stage::Warmup)
        .unwrap_or(steps.len());
    let mut out = Vec::with_capacity(steps.len() + verses.len());
    out.extend_from_slice(&steps[..split]);
    out.extend(verses.iter().map(|v| Step::ayah(*v, AyahTask::WarmupRetry)));
    out.extend_from_slice(&steps[split..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::VerseRange;

    fn describe(steps: &[Step]) -> Vec<String> {
        steps
            .iter()
            .map(|s| match s {
                Step::Ayah { verse, .. } => format!("{}:{}:{}", s.stage(), s.phase(), verse),
                Step::Link { from, to, .. } => format!("{}:LINK:{}->{}", s.stage(), from, to),
            })
            .collect()
    }

    #[test]
    fn test_new_material_only() {
        let q = DailyQueue {
            new_material: VerseRange::new(1, 3),
            ..Default::default()
        };
        assert_eq!(
            describe(&sequence(&q)),
            vec![
                "NEW:EXPOSE:1",
                "NEW:GUIDED:1",
                "NEW:BLIND:1",
                "NEW:EXPOSE:2",
                "NEW:GUIDED:2",
                "NEW:BLIND:2",
                "NEW:LINK:1->2",
                "NEW:EXPOSE:3",
                "NEW:GUIDED:3",
                "NEW:BLIND:3",
                "NEW:LINK:2->3",
            ]
        );
    }

    #[test]
    fn test_full_ordering() {
        let q = DailyQueue {
            warmup: vec![40],
            weekly: vec![7],
            repair_links: vec![(5, 6)],
            recent: vec![30],
            long_term: vec![2],
            new_material: VerseRange::new(41, 41),
        };
        assert_eq!(
            describe(&sequence(&q)),
            vec![
                "WARMUP:STANDARD:40",
                "WEEKLY:STANDARD:7",
                "LINK_REPAIR:LINK:5->6",
                "REVIEW:STANDARD:30",
                "REVIEW:STANDARD:2",
                "NEW:EXPOSE:41",
                "NEW:GUIDED:41",
                "NEW:BLIND:41",
            ]
        );
    }

    #[test]
    fn test_review_only_strips_progression() {
        let q = DailyQueue {
            warmup: vec![10],
            repair_links: vec![(5, 6)],
            recent: vec![3],
            new_material: VerseRange::new(11, 12),
            ..Default::default()
        };
        let steps = review_only(&sequence(&q));
        assert_eq!(describe(&steps), vec!["WARMUP:STANDARD:10", "REVIEW:STANDARD:3"]);
    }

    #[test]
    fn test_retry_inserted_after_warmup_once() {
        let q = DailyQueue {
            warmup: vec![10, 11],
            recent: vec![3],
            ..Default::default()
        };
        let steps = with_warmup_retry(&sequence(&q), &q.warmup);
        assert_eq!(
            describe(&steps),
            vec![
                "WARMUP:STANDARD:10",
                "WARMUP:STANDARD:11",
                "WARMUP:RETRY:10",
                "WARMUP:RETRY:11",
                "REVIEW:STANDARD:3",
            ]
        );
        assert_eq!(with_warmup_retry(&steps, &q.warmup), steps);
    }

    #[test]
    fn test_step_json_shape() {
        let s = Step::ayah(4, AyahTask::Review(ReviewTier::Sabqi));
        let json = serde_json::to_value(s).unwrap();
        assert_eq!(json["kind"], "ayah");
        assert_eq!(json["verse"], 4);
        assert_eq!(json["task"]["review"], "sabqi");
        let back: Step = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);

        assert_eq!(serde_json::to_value(Step::ayah(1, AyahTask::Blind)).unwrap()["task"], "blind");

        let l = Step::Link { from: 1, to: 2, link: LinkKind::New };
        let json = serde_json::to_value(l).unwrap();
        assert_eq!(json["kind"], "link");
        assert_eq!(json["link"], "new");
    }
}
