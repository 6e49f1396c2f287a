//! # Error Types
//!
//! Domain-specific error types for ledger-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  ledger-core errors (this file)                                        │
//! │  ├── CoreError        - Business taxonomy (NotFound, InvalidState,     │
//! │  │                      InsufficientStock, NegativeStock, Validation)  │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  ledger-db errors (separate crate)                                     │
//! │  ├── DbError          - Database operation failures                    │
//! │  └── LedgerError      - What facade callers see (Domain | Db)          │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → LedgerError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Semantics
//! No ledger operation is retried internally. Every failure leaves no
//! partial state, so callers may retry, but only `InsufficientStock` can
//! become true later without new input.

use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

// =============================================================================
// Core Error
// =============================================================================

/// Business errors raised by ledger operations.
///
/// Every variant is raised BEFORE any write is made permanent; the
/// surrounding transaction is rolled back.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stock unit or reservation does not exist in the caller's
    /// organization (or the stock unit is soft-deleted).
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The entity is not in the state the operation requires.
    ///
    /// ## When This Occurs
    /// - confirm / release / extend on a CONFIRMED or CANCELLED reservation
    /// - reserve against a unit that is not AVAILABLE
    /// - retiring a unit that still has ACTIVE reservations
    #[error("{entity} {id} is {state}, cannot {action}")]
    InvalidState {
        entity: String,
        id: String,
        state: String,
        action: String,
    },

    /// Requested quantity exceeds the unreserved quantity.
    ///
    /// ## User Workflow
    /// ```text
    /// reserve(qty: 3) on unit with quantity 5, 3 already reserved
    ///      │
    ///      ▼
    /// available = 5 - 3 = 2
    ///      │
    ///      ▼
    /// InsufficientStock { available: 2, requested: 3 }
    /// ```
    #[error("Insufficient stock for {stock_unit_id}: available {available}, requested {requested}")]
    InsufficientStock {
        stock_unit_id: String,
        available: i64,
        requested: i64,
    },

    /// The change would drive on-hand quantity below zero. Never clamped.
    #[error("Stock for {stock_unit_id} cannot go negative: quantity {quantity_before}, change {quantity_change}")]
    NegativeStock {
        stock_unit_id: String,
        quantity_before: i64,
        quantity_change: i64,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates an InvalidState error.
    pub fn invalid_state(
        entity: impl Into<String>,
        id: impl Into<String>,
        state: impl ToString,
        action: impl ToString,
    ) -> Self {
        CoreError::InvalidState {
            entity: entity.into(),
            id: id.into(),
            state: state.to_string(),
            action: action.to_string(),
        }
    }

    /// Returns the machine-readable category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::InvalidState { .. } => ErrorKind::InvalidState,
            CoreError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            CoreError::NegativeStock { .. } => ErrorKind::NegativeStock,
            CoreError::Validation(_) => ErrorKind::ValidationError,
        }
    }
}

// =============================================================================
// Error Kind
// =============================================================================

/// Error categories exposed to callers.
///
/// ## Serialization
/// ```json
/// "INSUFFICIENT_STOCK"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InsufficientStock,
    NegativeStock,
    ValidationError,
    /// The backing store failed (unreachable, busy, constraint bug).
    Infrastructure,
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before a transaction is opened.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be zero.
    #[error("{field} must not be zero")]
    MustBeNonZero { field: String },

    /// Timestamp must lie in the future.
    #[error("{field} must be in the future")]
    MustBeFuture { field: String },

    /// Invalid format (e.g., hardware identifier with spaces).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., IMEI already in stock).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// A hardware-identified unit would hold something other than 0 or 1.
    #[error("hardware-identified unit {stock_unit_id} must hold 0 or 1, got {quantity}")]
    HardwareQuantity { stock_unit_id: String, quantity: i64 },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            stock_unit_id: "unit-1".to_string(),
            available: 2,
            requested: 3,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for unit-1: available 2, requested 3"
        );

        let err = CoreError::invalid_state("Reservation", "r-1", "CANCELLED", "confirm");
        assert_eq!(err.to_string(), "Reservation r-1 is CANCELLED, cannot confirm");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(CoreError::not_found("StockUnit", "x").kind(), ErrorKind::NotFound);
        let err = CoreError::NegativeStock {
            stock_unit_id: "u".into(),
            quantity_before: 4,
            quantity_change: -10,
        };
        assert_eq!(err.kind(), ErrorKind::NegativeStock);

        let err: CoreError = ValidationError::Required {
            field: "reason".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::InsufficientStock).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_STOCK\"");
    }
}
