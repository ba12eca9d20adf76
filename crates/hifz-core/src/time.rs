//! Lightweight UTC date/time utilities (no chrono dependency).
//!
//! Timestamps are Unix seconds. Learner-local calendar days use a fixed
//! UTC offset and Howard Hinnant's civil date algorithms.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unix seconds.
pub type Timestamp = i64;

pub const SECS_PER_MINUTE: i64 = 60;
pub const SECS_PER_DAY: i64 = 86_400;

/// Current UTC time as Unix seconds.
pub fn now_unix_secs() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Howard Hinnant's civil_from_days: Unix epoch days → (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m as u32, d as u32)
}

/// A learner-local calendar day, counted in days since 1970-01-01.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalDay(pub i64);

impl LocalDay {
    /// The local day containing `ts` for a learner at `utc_offset_minutes`.
    pub fn of(ts: Timestamp, utc_offset_minutes: i32) -> Self {
        let local = ts + i64::from(utc_offset_minutes) * SECS_PER_MINUTE;
        LocalDay(local.div_euclid(SECS_PER_DAY))
    }

    /// Unix timestamp of local midnight at the start of this day.
    pub fn start(self, utc_offset_minutes: i32) -> Timestamp {
        self.0 * SECS_PER_DAY - i64::from(utc_offset_minutes) * SECS_PER_MINUTE
    }

    /// Unix timestamp of local midnight at the end of this day (exclusive).
    pub fn end(self, utc_offset_minutes: i32) -> Timestamp {
        self.start(utc_offset_minutes) + SECS_PER_DAY
    }

    pub fn pred(self) -> Self {
        LocalDay(self.0 - 1)
    }

    pub fn succ(self) -> Self {
        LocalDay(self.0 + 1)
    }

    /// Whole days from `earlier` to `self` (negative if `earlier` is later).
    pub fn days_since(self, earlier: LocalDay) -> i64 {
        self.0 - earlier.0
    }

}

impl fmt::Display for LocalDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (y, m, d) = civil_from_days(self.0);
        write!(f, "{y:04}-{m:02}-{d:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_date() {
        // 2026-02-21T00:00:00Z = 1771632000
        assert_eq!(LocalDay::of(1771632000, 0).to_string(), "2026-02-21");
        assert_eq!(LocalDay(0).to_string(), "1970-01-01");
        assert_eq!(LocalDay(-1).to_string(), "1969-12-31");
    }

    #[test]
    fn test_now_is_recent() {
        let day = LocalDay::of(now_unix_secs(), 0).to_string();
        assert!(day.starts_with("20"), "day should be in 2000s: {day}");
    }

    #[test]
    fn test_local_day_respects_offset() {
        // 2026-02-21T22:30:00Z is already 2026-02-22 at UTC+3.
        let ts = 1771632000 + 22 * 3600 + 30 * 60;
        assert_eq!(LocalDay::of(ts, 0).to_string(), "2026-02-21");
        assert_eq!(LocalDay::of(ts, 180).to_string(), "2026-02-22");
        // And still the 21st at UTC-5.
        assert_eq!(LocalDay::of(ts, -300).to_string(), "2026-02-21");
    }

    #[test]
    fn test_day_bounds_contain_timestamp() {
        let ts = 1771632000 + 5 * 3600;
        for offset in [-600, -300, 0, 180, 330, 840] {
            let day = LocalDay::of(ts, offset);
            assert!(day.start(offset) <= ts && ts < day.end(offset), "offset {offset}");
        }
    }

    #[test]
    fn test_days_since() {
        let a = LocalDay::of(1771632000 - 20 * SECS_PER_DAY, 0);
        let b = LocalDay::of(1771632000 + 8 * SECS_PER_DAY, 0);
        assert_eq!(a.to_string(), "2026-02-01");
        assert_eq!(b.to_string(), "2026-03-01");
        assert_eq!(b.days_since(a), 28);
        assert_eq!(a.succ().pred(), a);
    }
}
