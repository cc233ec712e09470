use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// Key or record absent.
    NotFound(String),
    /// A lease on the record is younger than the minimum gap.
    Busy(String),
    /// A conditional write lost its race; retryable, never fatal.
    Conflict(String),
    /// Renewal attempted past the trust window.
    Expired,
    /// Validation found a lease token that no longer matches.
    Invalid,
    /// Backend failure, surfaced as-is; not retried here.
    Store(StoreError),
}

impl EngineError {
    /// Lost races are ordinary contention — callers may re-select and retry.
    pub fn is_contention(&self) -> bool {
        matches!(self, EngineError::Busy(_) | EngineError::Conflict(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::Busy(what) => write!(f, "busy: {what}"),
            EngineError::Conflict(what) => write!(f, "conflict: {what}"),
            EngineError::Expired => write!(f, "lease expired before renewal"),
            EngineError::Invalid => write!(f, "lease no longer valid"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PreconditionFailed => {
                EngineError::Conflict("conditional write lost".into())
            }
            other => EngineError::Store(other),
        }
    }
}
