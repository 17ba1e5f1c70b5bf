use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Query execution error: {0}")]
    QueryError(#[from] sqlx::Error),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Integrity constraint violation: {0}")]
    IntegrityError(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl DatabaseError {
    /// Check if this is an integrity constraint violation
    pub fn is_integrity_error(&self) -> bool {
        match self {
            Self::IntegrityError(_) => true,
            Self::QueryError(e) => {
                if let Some(db_error) = e.as_database_error() {
                    // PostgreSQL integrity constraint violation codes
                    matches!(db_error.code().as_deref(),
                        Some("23505") | // unique_violation
                        Some("23503") | // foreign_key_violation
                        Some("23502") | // not_null_violation
                        Some("23514")   // check_violation
                    )
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Check if this error is transient and safe to retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionError(_) => true,
            Self::TransactionError(_) => true,
            Self::QueryError(e) => {
                if let Some(db_error) = e.as_database_error() {
                    matches!(db_error.code().as_deref(),
                        Some("40001") | // serialization_failure
                        Some("40P01")   // deadlock_detected
                    )
                } else {
                    matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
                }
            }
            _ => false,
        }
    }
}

/// Check a raw sqlx error for a unique constraint violation, before it is
/// wrapped into a DatabaseError
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db_error| db_error.code())
        .as_deref()
        == Some("23505")
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
