//! Whole-day flows through the session controller backed by an on-disk
//! SQLite store, including reopening the database between days.

use std::path::Path;

use hifz_core::{
    EngineConfig, LearnerProfile, PlanStatus, RawEvent, SessionController, Timestamp,
    WarmupOutcome,
};
use hifz_store::Store;

const DAY: i64 = 86_400;
/// 2026-02-21 09:00 UTC.
const D1: Timestamp = 1_771_632_000 + 9 * 3_600;

fn open(dir: &Path) -> SessionController<Store> {
    SessionController::new(Store::open_data_dir(dir).unwrap(), EngineConfig::default())
}

fn ayah(verse: u32, stage: &str, phase: &str, grade: Option<&str>, at: Timestamp) -> RawEvent {
    RawEvent {
        verse: Some(i64::from(verse)),
        stage: stage.into(),
        phase: phase.into(),
        grade: grade.map(str::to_string),
        duration_secs: Some(30),
        from_verse: None,
        to_verse: None,
        occurred_at: at,
    }
}

fn first_day_events() -> Vec<RawEvent> {
    let mut out = Vec::new();
    let mut at = D1;
    for verse in 1..=3u32 {
        for (phase, grade) in [("EXPOSE", None), ("GUIDED", None), ("BLIND", Some("GOOD"))] {
            at += 60;
            out.push(ayah(verse, "NEW", phase, grade, at));
        }
        if verse > 1 {
            at += 60;
            out.push(RawEvent {
                verse: None,
                stage: "NEW".into(),
                phase: "LINK".into(),
                grade: Some("GOOD".into()),
                duration_secs: Some(15),
                from_verse: Some(i64::from(verse - 1)),
                to_verse: Some(i64::from(verse)),
                occurred_at: at,
            });
        }
    }
    out
}

#[test]
fn test_day_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut c = open(dir.path());
        let profile = LearnerProfile::new("amina", c.config()).with_daily_minutes(15);
        c.enroll(profile).unwrap();
        let view = c.start_session("amina", D1).unwrap();
        let report = c
            .complete_session("amina", view.session_id, &first_day_events(), D1 + 3_600)
            .unwrap();
        assert!(report.applied);
        assert_eq!(report.cursor_after, 4);
        assert_eq!(report.transitions_updated, 2);
    }

    let mut c = open(dir.path());
    let status = c.status("amina", D1 + 3_700).unwrap();
    assert_eq!(status.cursor, 4);
    assert_eq!(status.tracked_verses, 3);
    assert_eq!(status.today_plan, Some(PlanStatus::Completed));
    assert_eq!(c.store().event_count("amina").unwrap(), first_day_events().len());

    let day2 = D1 + DAY;
    let view = c.start_session("amina", day2).unwrap();
    assert!(view.requirements.warmup_required);
    let warmup: Vec<RawEvent> = (1..=3)
        .map(|v| ayah(v, "WARMUP", "STANDARD", Some("GOOD"), day2 + i64::from(v)))
        .collect();
    let cp = c
        .checkpoint_warmup("amina", view.session_id, &warmup, day2 + 60)
        .unwrap();
    assert_eq!(cp.outcome, WarmupOutcome::Passed);
    assert!(!cp.review_only);

    let again = c.start_session("amina", day2 + 120).unwrap();
    assert_eq!(again.session_id, view.session_id);
}

#[test]
fn test_replayed_completion_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = open(dir.path());
    c.enroll(LearnerProfile::new("bilal", c.config()).with_daily_minutes(15))
        .unwrap();
    let view = c.start_session("bilal", D1).unwrap();
    let events = first_day_events();
    c.complete_session("bilal", view.session_id, &events, D1 + 3_600)
        .unwrap();
    let logged = c.store().event_count("bilal").unwrap();

    let replay = c
        .complete_session("bilal", view.session_id, &events, D1 + 7_200)
        .unwrap();
    assert!(!replay.applied);
    assert_eq!(c.store().event_count("bilal").unwrap(), logged);
}

#[test]
fn test_streak_counts_browse_and_recall() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = open(dir.path());
    c.enroll(LearnerProfile::new("amina", c.config())).unwrap();
    c.record_browse("amina", 900, D1 - DAY).unwrap();
    let view = c.start_session("amina", D1).unwrap();
    c.complete_session("amina", view.session_id, &first_day_events(), D1 + 3_600)
        .unwrap();

    let streak = c.streak("amina", D1 + 3_700).unwrap();
    assert_eq!(streak.current, 2);
    assert!(streak.today_qualified);
}

#[test]
fn test_unreachable_directory_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, "not a directory").unwrap();
    let err = Store::open_data_dir(&blocker.join("nested")).err().unwrap();
    let err: hifz_core::EngineError = err.into();
    assert!(err.is_unavailable());
}
