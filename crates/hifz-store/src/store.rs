use std::path::Path;
use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use hifz_core::plan::{decode_steps, encode_steps};
use hifz_core::{
    ActivityKind, ActivityRecord, CompletedSessionSummary, DecodedSteps, EngineError,
    GateKind, GateRequirements, Grade, LearnerProfile, LocalDay, PLAN_SCHEMA_VERSION,
    PacingThresholds, PlanStatus, QualityGateRun, SchedulerStore, SessionEvent, SessionPlan,
    StepAverages, Timestamp, Transition, VerseRange, VerseReviewState,
};

use crate::config::{DB_FILE, ensure_data_dir};
use crate::error::{Result, StoreError};
use crate::schema;

pub struct Store {
    conn: Connection,
}

/// Parse a TEXT column through `FromStr`, surfacing failures as column
/// conversion errors.
fn text_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(idx)?;
    s.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_text_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Map a uniqueness failure on insert to a conflict.
fn insert_or_conflict(
    result: rusqlite::Result<usize>,
    what: impl FnOnce() -> String,
) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => Err(StoreError::Conflict(what())),
        Err(e) => Err(e.into()),
    }
}

fn bool_opt(v: Option<bool>) -> Option<i64> {
    v.map(i64::from)
}

const PROFILE_COLUMNS: &str = "learner_id, utc_offset_minutes, pacing_mode, cursor, daily_minutes,
     avg_review_secs, avg_new_secs, avg_link_secs,
     consolidation_ratio, catch_up_ratio, review_floor, rebalance_until, version";

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<LearnerProfile> {
    Ok(LearnerProfile {
        learner_id: row.get(0)?,
        utc_offset_minutes: row.get(1)?,
        pacing_mode: text_col(row, 2)?,
        cursor: row.get(3)?,
        daily_minutes: row.get(4)?,
        averages: StepAverages {
            review_secs: row.get(5)?,
            new_secs: row.get(6)?,
            link_secs: row.get(7)?,
        },
        thresholds: PacingThresholds {
            consolidation_ratio: row.get(8)?,
            catch_up_ratio: row.get(9)?,
            review_floor: row.get(10)?,
        },
        rebalance_until: row.get(11)?,
        version: row.get(12)?,
    })
}

const REVIEW_COLUMNS: &str = "verse, station, checkpoint, interval_minutes, interval_days, ease,
     repetitions, lapses, last_grade, last_duration_secs, last_reviewed_at, next_due, version";

fn review_from_row(row: &Row<'_>) -> rusqlite::Result<VerseReviewState> {
    Ok(VerseReviewState {
        verse: row.get(0)?,
        station: row.get(1)?,
        checkpoint: row.get(2)?,
        interval_minutes: row.get(3)?,
        interval_days: row.get(4)?,
        ease: row.get(5)?,
        repetitions: row.get(6)?,
        lapses: row.get(7)?,
        last_grade: opt_text_col(row, 8)?,
        last_duration_secs: row.get(9)?,
        last_reviewed_at: row.get(10)?,
        next_due: row.get(11)?,
        version: row.get(12)?,
    })
}

const TRANSITION_COLUMNS: &str = "from_verse, to_verse, attempts, successes, failures, success_rate,
     last_grade, last_at, next_repair_due, resolved_at, version";

fn transition_from_row(row: &Row<'_>) -> rusqlite::Result<Transition> {
    Ok(Transition {
        from: row.get(0)?,
        to: row.get(1)?,
        attempts: row.get(2)?,
        successes: row.get(3)?,
        failures: row.get(4)?,
        success_rate: row.get(5)?,
        last_grade: opt_text_col(row, 6)?,
        last_at: row.get(7)?,
        next_repair_due: row.get(8)?,
        resolved_at: row.get(9)?,
        version: row.get(10)?,
    })
}

const PLAN_COLUMNS: &str = "id, learner_id, local_day, status, pacing_mode,
     warmup_required, weekly_required, new_unlocked, schema_version, steps_json,
     warmup_retry_used, warmup_passed, weekly_passed, review_only, new_start, new_end,
     created_at, completed_at, version";

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<SessionPlan> {
    let status: String = row.get(3)?;
    let status = PlanStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown plan status '{status}'").into(),
        )
    })?;
    let schema_version: i64 = row.get(8)?;
    let steps_json: String = row.get(9)?;
    let decoded = if schema_version == i64::from(PLAN_SCHEMA_VERSION) {
        decode_steps(&steps_json)
    } else {
        DecodedSteps::Stale
    };
    let (steps, stale) = match decoded {
        DecodedSteps::Current(steps) => (steps, false),
        DecodedSteps::Stale => (Vec::new(), true),
    };
    let new_start: Option<u32> = row.get(14)?;
    let new_end: Option<u32> = row.get(15)?;

    Ok(SessionPlan {
        id: uuid_col(row, 0)?,
        learner_id: row.get(1)?,
        day: LocalDay(row.get(2)?),
        status,
        mode: text_col(row, 4)?,
        requirements: GateRequirements {
            warmup_required: row.get(5)?,
            weekly_required: row.get(6)?,
            new_unlocked: row.get(7)?,
        },
        steps,
        warmup_retry_used: row.get(10)?,
        warmup_passed: row.get(11)?,
        weekly_passed: row.get(12)?,
        review_only: row.get(13)?,
        new_range: new_start.zip(new_end).and_then(|(s, e)| VerseRange::new(s, e)),
        created_at: row.get(16)?,
        completed_at: row.get(17)?,
        version: row.get(18)?,
        stale,
    })
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            StoreError::Unavailable(format!("cannot open {}: {e}", path.display()))
        })?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Open `hifz.db` inside `dir`, creating the directory first.
    pub fn open_data_dir(dir: &Path) -> Result<Self> {
        ensure_data_dir(dir)?;
        let path = dir.join(DB_FILE);
        tracing::debug!("opening store at {}", path.display());
        Self::open(&path)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Transactions ---

    fn begin_tx(&self) -> Result<()> {
        if !self.conn.is_autocommit() {
            return Err(StoreError::InvalidData("transaction already open".into()));
        }
        // Take the write lock up front; other writers wait on busy_timeout.
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn finish_tx(&self, statement: &str) -> Result<()> {
        if self.conn.is_autocommit() {
            return Err(StoreError::InvalidData("no open transaction".into()));
        }
        self.conn.execute_batch(statement)?;
        Ok(())
    }

    // --- Profiles ---

    pub fn get_profile(&self, learner_id: &str) -> Result<Option<LearnerProfile>> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM learner_profiles WHERE learner_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [learner_id], profile_from_row)
            .optional()?)
    }

    fn insert_profile_row(&self, p: &LearnerProfile) -> Result<()> {
        let result = self.conn.execute(
            &format!(
                "INSERT INTO learner_profiles ({PROFILE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1)"
            ),
            params![
                p.learner_id,
                p.utc_offset_minutes,
                p.pacing_mode.as_str(),
                p.cursor,
                p.daily_minutes,
                p.averages.review_secs,
                p.averages.new_secs,
                p.averages.link_secs,
                p.thresholds.consolidation_ratio,
                p.thresholds.catch_up_ratio,
                p.thresholds.review_floor,
                p.rebalance_until,
            ],
        );
        insert_or_conflict(result, || format!("learner {} already enrolled", p.learner_id))
    }

    /// Returns the number of rows changed: 0 on version mismatch or absence.
    fn update_profile_row(&self, p: &LearnerProfile) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE learner_profiles SET
                 utc_offset_minutes = ?2, pacing_mode = ?3, cursor = ?4, daily_minutes = ?5,
                 avg_review_secs = ?6, avg_new_secs = ?7, avg_link_secs = ?8,
                 consolidation_ratio = ?9, catch_up_ratio = ?10, review_floor = ?11,
                 rebalance_until = ?12, version = version + 1
             WHERE learner_id = ?1 AND version = ?13",
            params![
                p.learner_id,
                p.utc_offset_minutes,
                p.pacing_mode.as_str(),
                p.cursor,
                p.daily_minutes,
                p.averages.review_secs,
                p.averages.new_secs,
                p.averages.link_secs,
                p.thresholds.consolidation_ratio,
                p.thresholds.catch_up_ratio,
                p.thresholds.review_floor,
                p.rebalance_until,
                p.version,
            ],
        )?)
    }

    // --- Review states ---

    pub fn get_review_states(&self, learner_id: &str) -> Result<Vec<VerseReviewState>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REVIEW_COLUMNS} FROM verse_review_states WHERE learner_id = ?1 ORDER BY verse"
        ))?;
        let states = stmt
            .query_map([learner_id], review_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    fn write_review_state(&self, learner_id: &str, s: &VerseReviewState) -> Result<()> {
        let conflict = || {
            format!(
                "verse {} for {learner_id}: stored version is not {}",
                s.verse, s.version
            )
        };
        if s.version == 0 {
            let result = self.conn.execute(
                &format!(
                    "INSERT INTO verse_review_states (learner_id, {REVIEW_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1)"
                ),
                params![
                    learner_id,
                    s.verse,
                    s.station,
                    s.checkpoint,
                    s.interval_minutes,
                    s.interval_days,
                    s.ease,
                    s.repetitions,
                    s.lapses,
                    s.last_grade.map(Grade::as_str),
                    s.last_duration_secs,
                    s.last_reviewed_at,
                    s.next_due,
                ],
            );
            return insert_or_conflict(result, conflict);
        }
        let changed = self.conn.execute(
            "UPDATE verse_review_states SET
                 station = ?3, checkpoint = ?4, interval_minutes = ?5, interval_days = ?6,
                 ease = ?7, repetitions = ?8, lapses = ?9, last_grade = ?10,
                 last_duration_secs = ?11, last_reviewed_at = ?12, next_due = ?13,
                 version = version + 1
             WHERE learner_id = ?1 AND verse = ?2 AND version = ?14",
            params![
                learner_id,
                s.verse,
                s.station,
                s.checkpoint,
                s.interval_minutes,
                s.interval_days,
                s.ease,
                s.repetitions,
                s.lapses,
                s.last_grade.map(Grade::as_str),
                s.last_duration_secs,
                s.last_reviewed_at,
                s.next_due,
                s.version,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(conflict()));
        }
        Ok(())
    }

    // --- Transitions ---

    pub fn get_transitions(&self, learner_id: &str) -> Result<Vec<Transition>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRANSITION_COLUMNS} FROM transitions
             WHERE learner_id = ?1 ORDER BY from_verse, to_verse"
        ))?;
        let all = stmt
            .query_map([learner_id], transition_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(all)
    }

    fn write_transition(&self, learner_id: &str, t: &Transition) -> Result<()> {
        let conflict = || {
            format!(
                "transition {}->{} for {learner_id}: stored version is not {}",
                t.from, t.to, t.version
            )
        };
        if t.version == 0 {
            let result = self.conn.execute(
                &format!(
                    "INSERT INTO transitions (learner_id, {TRANSITION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1)"
                ),
                params![
                    learner_id,
                    t.from,
                    t.to,
                    t.attempts,
                    t.successes,
                    t.failures,
                    t.success_rate,
                    t.last_grade.map(Grade::as_str),
                    t.last_at,
                    t.next_repair_due,
                    t.resolved_at,
                ],
            );
            return insert_or_conflict(result, conflict);
        }
        let changed = self.conn.execute(
            "UPDATE transitions SET
                 attempts = ?4, successes = ?5, failures = ?6, success_rate = ?7,
                 last_grade = ?8, last_at = ?9, next_repair_due = ?10, resolved_at = ?11,
                 version = version + 1
             WHERE learner_id = ?1 AND from_verse = ?2 AND to_verse = ?3 AND version = ?12",
            params![
                learner_id,
                t.from,
                t.to,
                t.attempts,
                t.successes,
                t.failures,
                t.success_rate,
                t.last_grade.map(Grade::as_str),
                t.last_at,
                t.next_repair_due,
                t.resolved_at,
                t.version,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(conflict()));
        }
        Ok(())
    }

    // --- Session plans ---

    fn query_plan(
        &self,
        where_clause: &str,
        args: impl rusqlite::Params,
    ) -> Result<Option<SessionPlan>> {
        let sql = format!("SELECT {PLAN_COLUMNS} FROM session_plans WHERE {where_clause}");
        let plan = self.conn.query_row(&sql, args, plan_from_row).optional()?;
        if let Some(p) = &plan
            && p.stale
        {
            tracing::warn!("session plan {} has an incompatible step document", p.id);
        }
        Ok(plan)
    }

    pub fn get_plan_for_day(&self, learner_id: &str, day: LocalDay) -> Result<Option<SessionPlan>> {
        self.query_plan("learner_id = ?1 AND local_day = ?2", params![learner_id, day.0])
    }

    pub fn get_plan(&self, learner_id: &str, session_id: Uuid) -> Result<Option<SessionPlan>> {
        self.query_plan(
            "id = ?1 AND learner_id = ?2",
            params![session_id.to_string(), learner_id],
        )
    }

    fn insert_plan_row(&self, p: &SessionPlan) -> Result<()> {
        let conflict = || format!("plan for {} on {} already exists", p.learner_id, p.day);
        if p.version != 0 {
            return Err(StoreError::Conflict(conflict()));
        }
        let steps_json =
            encode_steps(&p.steps).map_err(|e| StoreError::InvalidData(e.to_string()))?;
        let result = self.conn.execute(
            &format!(
                "INSERT INTO session_plans ({PLAN_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, 1)"
            ),
            params![
                p.id.to_string(),
                p.learner_id,
                p.day.0,
                p.status.as_str(),
                p.mode.as_str(),
                p.requirements.warmup_required,
                p.requirements.weekly_required,
                p.requirements.new_unlocked,
                i64::from(PLAN_SCHEMA_VERSION),
                steps_json,
                p.warmup_retry_used,
                bool_opt(p.warmup_passed),
                bool_opt(p.weekly_passed),
                p.review_only,
                p.new_range.map(|r| r.start),
                p.new_range.map(|r| r.end),
                p.created_at,
                p.completed_at,
            ],
        );
        insert_or_conflict(result, conflict)
    }

    fn update_plan_row(&self, p: &SessionPlan) -> Result<usize> {
        let steps_json =
            encode_steps(&p.steps).map_err(|e| StoreError::InvalidData(e.to_string()))?;
        Ok(self.conn.execute(
            "UPDATE session_plans SET
                 status = ?2, pacing_mode = ?3,
                 warmup_required = ?4, weekly_required = ?5, new_unlocked = ?6,
                 schema_version = ?7, steps_json = ?8,
                 warmup_retry_used = ?9, warmup_passed = ?10, weekly_passed = ?11,
                 review_only = ?12, new_start = ?13, new_end = ?14, completed_at = ?15,
                 version = version + 1
             WHERE id = ?1 AND version = ?16",
            params![
                p.id.to_string(),
                p.status.as_str(),
                p.mode.as_str(),
                p.requirements.warmup_required,
                p.requirements.weekly_required,
                p.requirements.new_unlocked,
                i64::from(PLAN_SCHEMA_VERSION),
                steps_json,
                p.warmup_retry_used,
                bool_opt(p.warmup_passed),
                bool_opt(p.weekly_passed),
                p.review_only,
                p.new_range.map(|r| r.start),
                p.new_range.map(|r| r.end),
                p.completed_at,
                p.version,
            ],
        )?)
    }

    fn plan_exists(&self, session_id: Uuid) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM session_plans WHERE id = ?1",
                [session_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn latest_completed(
        &self,
        learner_id: &str,
        before: LocalDay,
    ) -> Result<Option<CompletedSessionSummary>> {
        Ok(self
            .conn
            .query_row(
                "SELECT local_day, new_start, new_end, COALESCE(completed_at, created_at)
                 FROM session_plans
                 WHERE learner_id = ?1 AND status = 'COMPLETED' AND local_day < ?2
                 ORDER BY local_day DESC LIMIT 1",
                params![learner_id, before.0],
                |row| {
                    let start: Option<u32> = row.get(1)?;
                    let end: Option<u32> = row.get(2)?;
                    Ok(CompletedSessionSummary {
                        day: LocalDay(row.get(0)?),
                        new_range: start.zip(end).and_then(|(s, e)| VerseRange::new(s, e)),
                        completed_at: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    // --- Event log and audit trail ---

    fn insert_events(
        &self,
        learner_id: &str,
        session_id: Uuid,
        events: &[SessionEvent],
    ) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO session_events
                 (learner_id, session_id, verse, from_verse, to_verse, stage, phase, grade,
                  duration_secs, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        let session = session_id.to_string();
        for event in events {
            let raw = event.to_raw();
            stmt.execute(params![
                learner_id,
                session,
                raw.verse,
                raw.from_verse,
                raw.to_verse,
                raw.stage,
                raw.phase,
                raw.grade,
                event.duration_secs,
                event.at,
            ])?;
        }
        Ok(())
    }

    fn insert_gate_run(&self, run: &QualityGateRun) -> Result<()> {
        self.conn.execute(
            "INSERT INTO quality_gate_runs
                 (learner_id, session_id, kind, result, sample_size, pass_rate, average_score, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.learner_id,
                run.session_id.map(|id| id.to_string()),
                run.kind.as_str(),
                run.result.as_str(),
                run.sample_size as i64,
                run.pass_rate,
                run.average_score,
                run.at,
            ],
        )?;
        Ok(())
    }

    pub fn gate_runs(&self, learner_id: &str) -> Result<Vec<(String, String, Timestamp)>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, result, at FROM quality_gate_runs WHERE learner_id = ?1 ORDER BY at, id",
        )?;
        let runs = stmt
            .query_map([learner_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    pub fn event_count(&self, learner_id: &str) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM session_events WHERE learner_id = ?1",
            [learner_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn latest_gate_run(&self, learner_id: &str, kind: GateKind) -> Result<Option<Timestamp>> {
        Ok(self.conn.query_row(
            "SELECT MAX(at) FROM quality_gate_runs WHERE learner_id = ?1 AND kind = ?2",
            params![learner_id, kind.as_str()],
            |row| row.get(0),
        )?)
    }

    fn grades_since(&self, learner_id: &str, since: Timestamp) -> Result<Vec<Grade>> {
        let mut stmt = self.conn.prepare(
            "SELECT grade FROM session_events
             WHERE learner_id = ?1 AND occurred_at >= ?2 AND grade IS NOT NULL
             ORDER BY occurred_at, id",
        )?;
        let grades = stmt
            .query_map(params![learner_id, since], |row| text_col(row, 0))?
            .collect::<std::result::Result<Vec<Grade>, _>>()?;
        Ok(grades)
    }

    fn insert_browse(&self, learner_id: &str, seconds: u32, at: Timestamp) -> Result<()> {
        self.conn.execute(
            "INSERT INTO browse_activity (learner_id, seconds, at) VALUES (?1, ?2, ?3)",
            params![learner_id, seconds, at],
        )?;
        Ok(())
    }

    fn activity(&self, learner_id: &str, since: Timestamp) -> Result<Vec<ActivityRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT occurred_at, grade IS NOT NULL FROM session_events
             WHERE learner_id = ?1 AND occurred_at >= ?2",
        )?;
        let mut all = stmt
            .query_map(params![learner_id, since], |row| {
                Ok(ActivityRecord {
                    at: row.get(0)?,
                    kind: ActivityKind::Recall { graded: row.get(1)? },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT at, seconds FROM browse_activity WHERE learner_id = ?1 AND at >= ?2",
        )?;
        let browse = stmt
            .query_map(params![learner_id, since], |row| {
                Ok(ActivityRecord {
                    at: row.get(0)?,
                    kind: ActivityKind::Browse { seconds: row.get(1)? },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        all.extend(browse);
        all.sort_by_key(|r| r.at);
        Ok(all)
    }
}

impl SchedulerStore for Store {
    fn begin(&mut self) -> hifz_core::Result<()> {
        Ok(self.begin_tx()?)
    }

    fn commit(&mut self) -> hifz_core::Result<()> {
        Ok(self.finish_tx("COMMIT")?)
    }

    fn rollback(&mut self) -> hifz_core::Result<()> {
        Ok(self.finish_tx("ROLLBACK")?)
    }

    fn load_profile(&self, learner_id: &str) -> hifz_core::Result<Option<LearnerProfile>> {
        Ok(self.get_profile(learner_id)?)
    }

    fn insert_profile(&mut self, profile: &LearnerProfile) -> hifz_core::Result<()> {
        Ok(self.insert_profile_row(profile)?)
    }

    fn update_profile(&mut self, profile: &LearnerProfile) -> hifz_core::Result<()> {
        if self.update_profile_row(profile)? > 0 {
            return Ok(());
        }
        match self.get_profile(&profile.learner_id)? {
            None => Err(EngineError::LearnerNotFound(profile.learner_id.clone())),
            Some(stored) => Err(EngineError::Conflict(format!(
                "profile: expected version {}, found {}",
                profile.version, stored.version
            ))),
        }
    }

    fn load_review_states(&self, learner_id: &str) -> hifz_core::Result<Vec<VerseReviewState>> {
        Ok(self.get_review_states(learner_id)?)
    }

    fn save_review_state(
        &mut self,
        learner_id: &str,
        state: &VerseReviewState,
    ) -> hifz_core::Result<()> {
        Ok(self.write_review_state(learner_id, state)?)
    }

    fn load_transitions(&self, learner_id: &str) -> hifz_core::Result<Vec<Transition>> {
        Ok(self.get_transitions(learner_id)?)
    }

    fn save_transition(
        &mut self,
        learner_id: &str,
        transition: &Transition,
    ) -> hifz_core::Result<()> {
        Ok(self.write_transition(learner_id, transition)?)
    }

    fn last_completed_session(
        &self,
        learner_id: &str,
        before: LocalDay,
    ) -> hifz_core::Result<Option<CompletedSessionSummary>> {
        Ok(self.latest_completed(learner_id, before)?)
    }

    fn last_gate_run(
        &self,
        learner_id: &str,
        kind: GateKind,
    ) -> hifz_core::Result<Option<Timestamp>> {
        Ok(self.latest_gate_run(learner_id, kind)?)
    }

    fn recent_grades(&self, learner_id: &str, since: Timestamp) -> hifz_core::Result<Vec<Grade>> {
        Ok(self.grades_since(learner_id, since)?)
    }

    fn find_plan_for_day(
        &self,
        learner_id: &str,
        day: LocalDay,
    ) -> hifz_core::Result<Option<SessionPlan>> {
        Ok(self.get_plan_for_day(learner_id, day)?)
    }

    fn find_plan(
        &self,
        learner_id: &str,
        session_id: Uuid,
    ) -> hifz_core::Result<Option<SessionPlan>> {
        Ok(self.get_plan(learner_id, session_id)?)
    }

    fn insert_plan(&mut self, plan: &SessionPlan) -> hifz_core::Result<()> {
        Ok(self.insert_plan_row(plan)?)
    }

    fn update_plan(&mut self, plan: &SessionPlan) -> hifz_core::Result<()> {
        if self.update_plan_row(plan)? > 0 {
            return Ok(());
        }
        if self.plan_exists(plan.id)? {
            Err(EngineError::Conflict(format!(
                "session plan {}: stored version is not {}",
                plan.id, plan.version
            )))
        } else {
            Err(EngineError::SessionNotFound(plan.id))
        }
    }

    fn append_events(
        &mut self,
        learner_id: &str,
        session_id: Uuid,
        events: &[SessionEvent],
    ) -> hifz_core::Result<()> {
        Ok(self.insert_events(learner_id, session_id, events)?)
    }

    fn append_gate_run(&mut self, run: &QualityGateRun) -> hifz_core::Result<()> {
        Ok(self.insert_gate_run(run)?)
    }

    fn append_browse(
        &mut self,
        learner_id: &str,
        seconds: u32,
        at: Timestamp,
    ) -> hifz_core::Result<()> {
        Ok(self.insert_browse(learner_id, seconds, at)?)
    }

    fn activity_since(
        &self,
        learner_id: &str,
        since: Timestamp,
    ) -> hifz_core::Result<Vec<ActivityRecord>> {
        Ok(self.activity(learner_id, since)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hifz_core::event::EventTarget;
    use hifz_core::{AyahTask, EngineConfig, GateResult, PacingMode, Phase, Stage, Step};

    const T0: Timestamp = 1_771_632_000;

    fn store_with_learner(id: &str) -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store
            .insert_profile(&LearnerProfile::new(id, &EngineConfig::default()))
            .unwrap();
        store
    }

    fn plan(learner: &str, day: i64) -> SessionPlan {
        SessionPlan {
            id: Uuid::new_v4(),
            learner_id: learner.into(),
            day: LocalDay(day),
            status: PlanStatus::Open,
            mode: PacingMode::Normal,
            requirements: GateRequirements {
                warmup_required: true,
                weekly_required: false,
                new_unlocked: true,
            },
            steps: vec![
                Step::ayah(1, AyahTask::Warmup),
                Step::ayah(2, AyahTask::Expose),
            ],
            warmup_retry_used: false,
            warmup_passed: None,
            weekly_passed: None,
            review_only: false,
            new_range: None,
            created_at: T0,
            completed_at: None,
            version: 0,
            stale: false,
        }
    }

    #[test]
    fn test_profile_roundtrip_and_versioning() {
        let mut store = store_with_learner("amina");
        let mut p = store.load_profile("amina").unwrap().unwrap();
        assert_eq!(p.version, 1);
        assert_eq!(p.cursor, 1);

        p.cursor = 8;
        p.pacing_mode = PacingMode::CatchUp;
        p.rebalance_until = Some(T0 + 100);
        store.update_profile(&p).unwrap();

        let loaded = store.load_profile("amina").unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.cursor, 8);
        assert_eq!(loaded.pacing_mode, PacingMode::CatchUp);
        assert_eq!(loaded.rebalance_until, Some(T0 + 100));

        // Writing from the stale copy conflicts.
        assert!(store.update_profile(&p).unwrap_err().is_conflict());
    }

    #[test]
    fn test_duplicate_enrollment_conflicts() {
        let mut store = store_with_learner("amina");
        let err = store
            .insert_profile(&LearnerProfile::new("amina", &EngineConfig::default()))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_update_missing_profile() {
        let mut store = Store::open_in_memory().unwrap();
        let p = LearnerProfile::new("ghost", &EngineConfig::default());
        let err = store.update_profile(&p).unwrap_err();
        assert!(matches!(err, EngineError::LearnerNotFound(_)));
    }

    #[test]
    fn test_review_state_versioning() {
        let cfg = EngineConfig::default();
        let mut store = store_with_learner("l");
        let mut s = VerseReviewState::seed(5, &cfg.review);
        s.last_grade = Some(Grade::Hard);
        store.save_review_state("l", &s).unwrap();
        assert!(store.save_review_state("l", &s).unwrap_err().is_conflict());

        let mut loaded = store.load_review_states("l").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].version, 1);
        assert_eq!(loaded[0].last_grade, Some(Grade::Hard));

        loaded[0].station = 3;
        store.save_review_state("l", &loaded[0]).unwrap();
        let again = store.load_review_states("l").unwrap();
        assert_eq!(again[0].version, 2);
        assert_eq!(again[0].station, 3);
    }

    #[test]
    fn test_transition_versioning() {
        let mut store = store_with_learner("l");
        let t = Transition::new(1, 2);
        store.save_transition("l", &t).unwrap();
        assert!(store.save_transition("l", &t).unwrap_err().is_conflict());
        let loaded = store.load_transitions("l").unwrap();
        assert_eq!(loaded[0].key(), (1, 2));
        assert_eq!(loaded[0].version, 1);
        store.save_transition("l", &loaded[0]).unwrap();
    }

    #[test]
    fn test_plan_roundtrip() {
        let mut store = store_with_learner("l");
        let p = plan("l", 20_505);
        store.insert_plan(&p).unwrap();

        let loaded = store.find_plan_for_day("l", LocalDay(20_505)).unwrap().unwrap();
        assert_eq!(loaded.id, p.id);
        assert_eq!(loaded.steps, p.steps);
        assert_eq!(loaded.version, 1);
        assert!(!loaded.stale);
        assert_eq!(loaded.warmup_passed, None);

        assert!(store.find_plan("other", p.id).unwrap().is_none());
        assert!(store.find_plan("l", p.id).unwrap().is_some());
    }

    #[test]
    fn test_one_plan_per_day() {
        let mut store = store_with_learner("l");
        store.insert_plan(&plan("l", 20_505)).unwrap();
        let err = store.insert_plan(&plan("l", 20_505)).unwrap_err();
        assert!(err.is_conflict());
        store.insert_plan(&plan("l", 20_506)).unwrap();
    }

    #[test]
    fn test_plan_update_versioning() {
        let mut store = store_with_learner("l");
        let p = plan("l", 20_505);
        store.insert_plan(&p).unwrap();

        let mut loaded = store.find_plan("l", p.id).unwrap().unwrap();
        loaded.status = PlanStatus::Completed;
        loaded.warmup_passed = Some(false);
        loaded.review_only = true;
        loaded.new_range = VerseRange::new(4, 6);
        loaded.completed_at = Some(T0 + 60);
        store.update_plan(&loaded).unwrap();

        let done = store.find_plan("l", p.id).unwrap().unwrap();
        assert!(done.is_completed());
        assert_eq!(done.warmup_passed, Some(false));
        assert_eq!(done.new_range, VerseRange::new(4, 6));
        assert_eq!(done.version, 2);

        assert!(store.update_plan(&loaded).unwrap_err().is_conflict());

        let mut ghost = plan("l", 20_600);
        ghost.version = 1;
        assert!(matches!(
            store.update_plan(&ghost).unwrap_err(),
            EngineError::SessionNotFound(_)
        ));

        let summary = store
            .last_completed_session("l", LocalDay(20_506))
            .unwrap()
            .unwrap();
        assert_eq!(summary.day, LocalDay(20_505));
        assert_eq!(summary.new_range, VerseRange::new(4, 6));
        assert!(store.last_completed_session("l", LocalDay(20_505)).unwrap().is_none());
    }

    #[test]
    fn test_stale_plan_document() {
        let mut store = store_with_learner("l");
        let p = plan("l", 20_505);
        store.insert_plan(&p).unwrap();

        store
            .conn()
            .execute(
                "UPDATE session_plans SET schema_version = 0 WHERE id = ?1",
                [p.id.to_string()],
            )
            .unwrap();
        let loaded = store.find_plan("l", p.id).unwrap().unwrap();
        assert!(loaded.stale);
        assert!(loaded.steps.is_empty());

        store
            .conn()
            .execute(
                "UPDATE session_plans SET schema_version = ?2, steps_json = '{\"version\":1,\"steps\":[{\"kind\":\"mystery\"}]}' WHERE id = ?1",
                params![p.id.to_string(), i64::from(PLAN_SCHEMA_VERSION)],
            )
            .unwrap();
        assert!(store.find_plan("l", p.id).unwrap().unwrap().stale);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let mut store = Store::open_in_memory().unwrap();
        store.begin().unwrap();
        store
            .insert_profile(&LearnerProfile::new("l", &EngineConfig::default()))
            .unwrap();
        store.rollback().unwrap();
        assert!(store.load_profile("l").unwrap().is_none());

        store.begin().unwrap();
        assert!(store.begin().is_err());
        store.commit().unwrap();
        assert!(store.commit().is_err());
    }

    #[test]
    fn test_events_feed_grades_and_activity() {
        let mut store = store_with_learner("l");
        let session = Uuid::new_v4();
        let events = [
            SessionEvent {
                target: EventTarget::Ayah {
                    verse: 1,
                    stage: Stage::New,
                    phase: Phase::Expose,
                },
                grade: None,
                duration_secs: 20,
                at: T0 + 10,
            },
            SessionEvent {
                target: EventTarget::Ayah {
                    verse: 1,
                    stage: Stage::New,
                    phase: Phase::Blind,
                },
                grade: Some(Grade::Good),
                duration_secs: 30,
                at: T0 + 20,
            },
            SessionEvent {
                target: EventTarget::Link {
                    from: 1,
                    to: 2,
                    repair: false,
                },
                grade: Some(Grade::Again),
                duration_secs: 15,
                at: T0 + 30,
            },
        ];
        store.append_events("l", session, &events).unwrap();
        store.append_browse("l", 300, T0 + 5).unwrap();

        assert_eq!(store.event_count("l").unwrap(), 3);
        assert_eq!(
            store.recent_grades("l", T0).unwrap(),
            vec![Grade::Good, Grade::Again]
        );
        assert_eq!(store.recent_grades("l", T0 + 25).unwrap(), vec![Grade::Again]);

        let activity = store.activity_since("l", T0).unwrap();
        assert_eq!(activity.len(), 4);
        assert_eq!(activity[0].kind, ActivityKind::Browse { seconds: 300 });
        assert_eq!(activity[1].kind, ActivityKind::Recall { graded: false });
        assert_eq!(activity[2].kind, ActivityKind::Recall { graded: true });
    }

    #[test]
    fn test_last_gate_run() {
        let mut store = store_with_learner("l");
        assert_eq!(store.last_gate_run("l", GateKind::Weekly).unwrap(), None);
        for at in [T0, T0 + 50] {
            store
                .append_gate_run(&QualityGateRun {
                    learner_id: "l".into(),
                    session_id: None,
                    kind: GateKind::Weekly,
                    result: GateResult::Pass,
                    sample_size: 3,
                    pass_rate: 1.0,
                    average_score: 2.5,
                    at,
                })
                .unwrap();
        }
        assert_eq!(store.last_gate_run("l", GateKind::Weekly).unwrap(), Some(T0 + 50));
        assert_eq!(store.last_gate_run("l", GateKind::Monthly).unwrap(), None);
        assert_eq!(store.gate_runs("l").unwrap().len(), 2);
    }
}
