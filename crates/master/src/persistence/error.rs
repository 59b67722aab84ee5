use thiserror::Error;

/// Failures reported by a DAO.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    /// The datastore did not answer; the call may succeed later.
    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    /// An update addressed a row that was never inserted.
    #[error("no {table} row with id {id}")]
    MissingRow { table: &'static str, id: i64 },
}

impl PersistenceError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    #[must_use]
    pub const fn missing_row(table: &'static str, id: i64) -> Self {
        Self::MissingRow { table, id }
    }

    /// Only an unreachable store is worth retrying; a missing row stays
    /// missing.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_row_names_table_and_id() {
        let err = PersistenceError::missing_row("workflow_instance", 12);
        assert_eq!(err.to_string(), "no workflow_instance row with id 12");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unavailable_is_retryable() {
        assert!(PersistenceError::unavailable("down").is_retryable());
    }
}
