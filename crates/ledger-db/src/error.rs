//! # Storage and Ledger Errors
//!
//! Two layers:
//!
//! ```text
//! sqlx::Error ──► DbError       storage failure, classified by SQLite message
//!                    │
//! CoreError ─────────┤          rule rejected by ledger-core
//!                    ▼
//!               LedgerError  ──► ErrorKind (NOT_FOUND, ..., INFRASTRUCTURE)
//! ```
//!
//! A `LedgerError::Db` always means the transaction rolled back and no
//! movement was written.

use ledger_core::{CoreError, ErrorKind, ValidationError};
use thiserror::Error;

/// Storage-level failure.
#[derive(Debug, Error)]
pub enum DbError {
    /// A query expected a row and got none.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A UNIQUE index rejected the row. In this schema that is the live
    /// `(org_id, hardware_id)` index.
    #[error("Unique constraint failed on {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A CHECK constraint failed, or a trigger refused to touch
    /// `stock_movements`. Either one points at a writer bug.
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// The write lock stayed taken past `busy_timeout`.
    #[error("Database is busy: {0}")]
    Busy(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// No pooled connection freed up within `connect_timeout`.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A column held something the domain types reject, e.g. an unknown
    /// movement type or unparseable metadata.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Busy and pool timeouts clear on their own; nothing else does.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }

    fn from_sqlite_message(msg: &str) -> Self {
        // SQLite reports constraint failures only as text:
        //   UNIQUE constraint failed: stock_units.org_id, stock_units.hardware_id
        //   FOREIGN KEY constraint failed
        //   CHECK constraint failed: quantity >= 0
        //   database is locked
        if let Some(columns) = msg.strip_prefix("UNIQUE constraint failed: ") {
            DbError::UniqueViolation {
                constraint: columns.to_string(),
            }
        } else if msg.contains("UNIQUE constraint failed") {
            DbError::UniqueViolation {
                constraint: "unknown".to_string(),
            }
        } else if msg.contains("FOREIGN KEY constraint failed") {
            DbError::ForeignKeyViolation {
                message: msg.to_string(),
            }
        } else if msg.contains("CHECK constraint failed") || msg.contains("append-only") {
            DbError::ConstraintViolation {
                message: msg.to_string(),
            }
        } else if msg.contains("database is locked") || msg.contains("database is busy") {
            DbError::Busy(msg.to_string())
        } else {
            DbError::QueryFailed(msg.to_string())
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db_err) => DbError::from_sqlite_message(db_err.message()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool closed".to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::InvalidData(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Error returned by every [`crate::Ledger`] operation.
///
/// `Domain` carries the business taxonomy and is returned as-is.
/// `Db` is infrastructure; retrying may help if
/// [`is_retryable`](Self::is_retryable) says so.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] CoreError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Domain(err) => err.kind(),
            LedgerError::Db(_) => ErrorKind::Infrastructure,
        }
    }

    /// Insufficient stock may clear once other holds are released; busy and
    /// pool timeouts may clear once other writers finish.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Domain(err) => err.kind() == ErrorKind::InsufficientStock,
            LedgerError::Db(err) => err.is_transient(),
        }
    }
}

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        LedgerError::Domain(CoreError::Validation(err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Db(DbError::from(err))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_error_kinds() {
        let err: LedgerError = CoreError::not_found("Reservation", "r-1").into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_retryable());

        let err: LedgerError = ValidationError::Required {
            field: "reason".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let err: LedgerError = DbError::Busy("database is locked".into()).into();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_insufficient_stock_is_retryable() {
        let err: LedgerError = CoreError::InsufficientStock {
            stock_unit_id: "u".into(),
            available: 0,
            requested: 1,
        }
        .into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_sqlite_message_classification() {
        let err = DbError::from_sqlite_message(
            "UNIQUE constraint failed: stock_units.org_id, stock_units.hardware_id",
        );
        assert!(matches!(
            err,
            DbError::UniqueViolation { ref constraint }
                if constraint == "stock_units.org_id, stock_units.hardware_id"
        ));

        let err = DbError::from_sqlite_message("CHECK constraint failed: quantity >= 0");
        assert!(matches!(err, DbError::ConstraintViolation { .. }));

        let err = DbError::from_sqlite_message("database is locked");
        assert!(err.is_transient());

        let err = DbError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, DbError::NotFound { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transparent_display() {
        let err: LedgerError =
            CoreError::invalid_state("Reservation", "r-1", "CANCELLED", "release").into();
        assert_eq!(err.to_string(), "Reservation r-1 is CANCELLED, cannot release");
    }
}
