use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS learner_profiles (
            learner_id          TEXT PRIMARY KEY,
            utc_offset_minutes  INTEGER NOT NULL DEFAULT 0,
            pacing_mode         TEXT NOT NULL DEFAULT 'NORMAL',
            cursor              INTEGER NOT NULL,
            daily_minutes       INTEGER NOT NULL,
            avg_review_secs     REAL NOT NULL,
            avg_new_secs        REAL NOT NULL,
            avg_link_secs       REAL NOT NULL,
            consolidation_ratio REAL NOT NULL,
            catch_up_ratio      REAL NOT NULL,
            review_floor        REAL NOT NULL,
            rebalance_until     INTEGER,
            version             INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS verse_review_states (
            learner_id         TEXT NOT NULL REFERENCES learner_profiles(learner_id),
            verse              INTEGER NOT NULL,
            station            INTEGER NOT NULL,
            checkpoint         INTEGER NOT NULL,
            interval_minutes   INTEGER NOT NULL,
            interval_days      INTEGER NOT NULL,
            ease               REAL NOT NULL,
            repetitions        INTEGER NOT NULL,
            lapses             INTEGER NOT NULL,
            last_grade         TEXT,
            last_duration_secs INTEGER,
            last_reviewed_at   INTEGER,
            next_due           INTEGER NOT NULL,
            version            INTEGER NOT NULL,
            PRIMARY KEY (learner_id, verse)
        );

        CREATE TABLE IF NOT EXISTS transitions (
            learner_id      TEXT NOT NULL REFERENCES learner_profiles(learner_id),
            from_verse      INTEGER NOT NULL,
            to_verse        INTEGER NOT NULL,
            attempts        INTEGER NOT NULL,
            successes       INTEGER NOT NULL,
            failures        INTEGER NOT NULL,
            success_rate    REAL NOT NULL,
            last_grade      TEXT,
            last_at         INTEGER,
            next_repair_due INTEGER,
            resolved_at     INTEGER,
            version         INTEGER NOT NULL,
            PRIMARY KEY (learner_id, from_verse, to_verse)
        );

        CREATE TABLE IF NOT EXISTS session_plans (
            id                TEXT PRIMARY KEY,
            learner_id        TEXT NOT NULL REFERENCES learner_profiles(learner_id),
            local_day         INTEGER NOT NULL,
            status            TEXT NOT NULL,
            pacing_mode       TEXT NOT NULL,
            warmup_required   INTEGER NOT NULL,
            weekly_required   INTEGER NOT NULL,
            new_unlocked      INTEGER NOT NULL,
            schema_version    INTEGER NOT NULL,
            steps_json        TEXT NOT NULL,
            warmup_retry_used INTEGER NOT NULL DEFAULT 0,
            warmup_passed     INTEGER,
            weekly_passed     INTEGER,
            review_only       INTEGER NOT NULL DEFAULT 0,
            new_start         INTEGER,
            new_end           INTEGER,
            created_at        INTEGER NOT NULL,
            completed_at      INTEGER,
            version           INTEGER NOT NULL,
            UNIQUE (learner_id, local_day)
        );

        CREATE TABLE IF NOT EXISTS session_events (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            learner_id    TEXT NOT NULL,
            session_id    TEXT NOT NULL,
            verse         INTEGER,
            from_verse    INTEGER,
            to_verse      INTEGER,
            stage         TEXT NOT NULL,
            phase         TEXT NOT NULL,
            grade         TEXT,
            duration_secs INTEGER NOT NULL DEFAULT 0,
            occurred_at   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS quality_gate_runs (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            learner_id    TEXT NOT NULL,
            session_id    TEXT,
            kind          TEXT NOT NULL,
            result        TEXT NOT NULL,
            sample_size   INTEGER NOT NULL,
            pass_rate     REAL NOT NULL,
            average_score REAL NOT NULL,
            at            INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS browse_activity (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            learner_id TEXT NOT NULL,
            seconds    INTEGER NOT NULL,
            at         INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reviews_due ON verse_review_states(learner_id, next_due);
        CREATE INDEX IF NOT EXISTS idx_plans_status ON session_plans(learner_id, status, local_day);
        CREATE INDEX IF NOT EXISTS idx_events_learner ON session_events(learner_id, occurred_at);
        CREATE INDEX IF NOT EXISTS idx_events_session ON session_events(session_id);
        CREATE INDEX IF NOT EXISTS idx_gate_runs ON quality_gate_runs(learner_id, kind, at);
        CREATE INDEX IF NOT EXISTS idx_browse ON browse_activity(learner_id, at);
        ",
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        for expected in [
            "browse_activity",
            "learner_profiles",
            "metadata",
            "quality_gate_runs",
            "session_events",
            "session_plans",
            "transitions",
            "verse_review_states",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }
}
