//! Unified error handling for the database layer.

/// Database error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Engine error: {0}")]
    Engine(#[from] canopy_engine::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote rejected request: {0}")]
    Rejected(String),

    #[error("Write to {path} collides with existing entity {existing}")]
    HeritageConflict { path: String, existing: String },

    #[error("No entity exists at {0}")]
    MissingEntity(String),

    #[error("Update below {base} writes outside the existing entity: {unknown}")]
    UnknownKeys { base: String, unknown: String },

    #[error("Database is closed")]
    Closed,

    #[error("No sync client configured")]
    NoSyncClient,

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    /// Whether the operation can be retried after a delay.
    ///
    /// Sync loops keep running through network failures and stop on
    /// everything else.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::Network(_))
    }
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(DbError::Network("timeout".into()).is_retryable());
        assert!(!DbError::Closed.is_retryable());
        assert!(!DbError::Rejected("bad entry".into()).is_retryable());
    }

    #[test]
    fn engine_errors_convert() {
        let engine_error = canopy_engine::Error::MalformedPath("x".into());
        let error: DbError = engine_error.into();
        assert!(matches!(error, DbError::Engine(_)));
    }
}
