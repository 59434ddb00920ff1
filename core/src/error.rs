use thiserror::Error;

/// Failure taxonomy shared by the ledger, the goal synchronizer and the history reader.
#[derive(Debug, Error)]
pub enum TallyError {
    /// Rejected input: bad amounts, inverted or oversized ranges, malformed dates.
    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The store failed; the surrounding transaction has been rolled back.
    #[error("Database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Duplicate identity (email or username already registered).
    #[error("{0}")]
    Conflict(String),

    /// The caller exists but may not act on this record.
    #[error("{0}")]
    Forbidden(String),
}

impl TallyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, TallyError>;
