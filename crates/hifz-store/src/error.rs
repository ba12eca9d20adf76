use std::fmt;

use hifz_core::EngineError;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    InvalidData(String),
    /// Optimistic-concurrency or uniqueness violation.
    Conflict(String),
    /// Data directory or database file could not be reached.
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "SQLite error: {e}"),
            StoreError::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            StoreError::Conflict(msg) => write!(f, "conflict: {msg}"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            StoreError::Unavailable(msg) => EngineError::Unavailable(msg),
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, msg))
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                EngineError::Unavailable(msg.unwrap_or_else(|| code.to_string()))
            }
            other => EngineError::Store(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_engine_conflict() {
        let e: EngineError = StoreError::Conflict("verse 3".into()).into();
        assert!(e.is_conflict());
    }

    #[test]
    fn test_unavailable_maps_through() {
        let e: EngineError = StoreError::Unavailable("no dir".into()).into();
        assert!(e.is_unavailable());
        let e: EngineError = StoreError::InvalidData("bad".into()).into();
        assert!(matches!(e, EngineError::Store(_)));
    }
}
