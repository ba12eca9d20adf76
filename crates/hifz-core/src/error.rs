use std::fmt;

use uuid::Uuid;

#[derive(Debug)]
pub enum EngineError {
    /// No backing store is reachable; callers should degrade, not crash.
    Unavailable(String),
    LearnerNotFound(String),
    SessionNotFound(Uuid),
    /// Optimistic-concurrency mismatch or a uniqueness violation.
    Conflict(String),
    InvalidConfig(String),
    Store(String),
}

impl EngineError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, EngineError::Unavailable(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Unavailable(msg) => write!(f, "scheduler unavailable: {msg}"),
            EngineError::LearnerNotFound(id) => write!(f, "learner not found: {id}"),
            EngineError::SessionNotFound(id) => write!(f, "session not found: {id}"),
            EngineError::Conflict(msg) => write!(f, "conflict: {msg}"),
            EngineError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            EngineError::Store(msg) => write!(f, "store error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

pub type Result<T> = std::result::Result<T, EngineError>;
