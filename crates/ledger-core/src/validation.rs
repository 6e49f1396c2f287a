//! # Validation Module
//!
//! Input validation for ledger operations.
//!
//! Runs before any transaction opens, so a rejected call never touches
//! the database. Checks here are shape only: required ids and reason,
//! quantity bounds, page size, expiry in the future. Availability and
//! reservation state are decided later under the stock unit lock, and the
//! schema's CHECK constraints and movement triggers sit behind both.
//!
//! ## Usage
//! ```rust
//! use ledger_core::validation::{validate_quantity, validate_reason};
//!
//! validate_quantity(5).unwrap();
//! assert_eq!(validate_reason("  stock take ").unwrap(), "stock take");
//! ```

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::types::LedgerContext;
use crate::{
    MAX_IDENTIFIER_LENGTH, MAX_NOTES_LENGTH, MAX_PAGE_SIZE, MAX_QUANTITY, MAX_REASON_LENGTH,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates an opaque identifier (org, actor, unit, reservation, sale).
///
/// ## Rules
/// - Must not be empty or whitespace
/// - At most 128 characters
pub fn validate_identifier(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTIFIER_LENGTH,
        });
    }

    Ok(())
}

/// Validates the organization + actor pair.
pub fn validate_context(ctx: &LedgerContext) -> ValidationResult<()> {
    validate_identifier("org_id", &ctx.org_id)?;
    validate_identifier("actor_id", &ctx.actor_id)
}

/// Validates an IMEI / serial number.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Letters, digits, hyphens and underscores only
///
/// ## Returns
/// The trimmed identifier.
///
/// ## Example
/// ```rust
/// use ledger_core::validation::validate_hardware_id;
///
/// assert!(validate_hardware_id("356938035643809").is_ok());
/// assert!(validate_hardware_id("has space").is_err());
/// ```
pub fn validate_hardware_id(hardware_id: &str) -> ValidationResult<String> {
    let hardware_id = hardware_id.trim();

    if hardware_id.is_empty() {
        return Err(ValidationError::Required {
            field: "hardware_id".to_string(),
        });
    }

    if hardware_id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "hardware_id".to_string(),
            max: 64,
        });
    }

    if !hardware_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "hardware_id".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(hardware_id.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a reservation / intake / stock-out quantity.
///
/// ## Rules
/// - Must be positive (>= 1)
/// - Must not exceed MAX_QUANTITY
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_QUANTITY,
        });
    }

    Ok(())
}

/// Validates an adjustment delta.
///
/// ## Rules
/// - May be negative, must not be zero
/// - Magnitude must not exceed MAX_QUANTITY
pub fn validate_quantity_change(change: i64) -> ValidationResult<()> {
    if change == 0 {
        return Err(ValidationError::MustBeNonZero {
            field: "quantity_change".to_string(),
        });
    }

    if change.unsigned_abs() > MAX_QUANTITY as u64 {
        return Err(ValidationError::OutOfRange {
            field: "quantity_change".to_string(),
            min: -MAX_QUANTITY,
            max: MAX_QUANTITY,
        });
    }

    Ok(())
}

/// Validates paging parameters (1-based page).
pub fn validate_page(page: u32, limit: u32) -> ValidationResult<()> {
    if page == 0 {
        return Err(ValidationError::MustBePositive {
            field: "page".to_string(),
        });
    }

    if limit == 0 || limit > MAX_PAGE_SIZE {
        return Err(ValidationError::OutOfRange {
            field: "limit".to_string(),
            min: 1,
            max: MAX_PAGE_SIZE as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Text Validators
// =============================================================================

/// Validates an adjustment or stock-out reason.
///
/// ## Returns
/// The trimmed reason.
pub fn validate_reason(reason: &str) -> ValidationResult<String> {
    let reason = reason.trim();

    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }

    if reason.chars().count() > MAX_REASON_LENGTH {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_REASON_LENGTH,
        });
    }

    Ok(reason.to_string())
}

/// Validates optional reservation notes. Blank notes become `None`.
pub fn validate_notes(notes: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    if notes.chars().count() > MAX_NOTES_LENGTH {
        return Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: MAX_NOTES_LENGTH,
        });
    }

    Ok(Some(notes.to_string()))
}

// =============================================================================
// Time Validators
// =============================================================================

/// Validates a reservation expiry.
pub fn validate_expiry(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> ValidationResult<()> {
    if expires_at <= now {
        return Err(ValidationError::MustBeFuture {
            field: "expires_at".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("org_id", "org-1").is_ok());
        assert!(validate_identifier("org_id", "").is_err());
        assert!(validate_identifier("org_id", "   ").is_err());
        assert!(validate_identifier("org_id", &"x".repeat(200)).is_err());
    }

    #[test]
    fn test_validate_context() {
        assert!(validate_context(&LedgerContext::new("org", "actor")).is_ok());
        assert!(matches!(
            validate_context(&LedgerContext::new("org", "")),
            Err(ValidationError::Required { field }) if field == "actor_id"
        ));
    }

    #[test]
    fn test_validate_hardware_id() {
        assert_eq!(validate_hardware_id(" 356938035643809 ").unwrap(), "356938035643809");
        assert!(validate_hardware_id("SN-ABC_12").is_ok());
        assert!(validate_hardware_id("").is_err());
        assert!(validate_hardware_id("has space").is_err());
        assert!(validate_hardware_id(&"9".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_QUANTITY).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(MAX_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_quantity_change() {
        assert!(validate_quantity_change(-10).is_ok());
        assert!(validate_quantity_change(20).is_ok());
        assert!(validate_quantity_change(0).is_err());
        assert!(validate_quantity_change(i64::MIN).is_err());
    }

    #[test]
    fn test_validate_page() {
        assert!(validate_page(1, 20).is_ok());
        assert!(validate_page(0, 20).is_err());
        assert!(validate_page(1, 0).is_err());
        assert!(validate_page(1, MAX_PAGE_SIZE + 1).is_err());
    }

    #[test]
    fn test_validate_reason() {
        assert_eq!(validate_reason(" stock take ").unwrap(), "stock take");
        assert!(validate_reason("").is_err());
        assert!(validate_reason("   ").is_err());
        assert!(validate_reason(&"r".repeat(MAX_REASON_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_notes() {
        assert_eq!(validate_notes(None).unwrap(), None);
        assert_eq!(validate_notes(Some("  ")).unwrap(), None);
        assert_eq!(validate_notes(Some(" hold for Ana ")).unwrap().as_deref(), Some("hold for Ana"));
        assert!(validate_notes(Some(&"n".repeat(MAX_NOTES_LENGTH + 1))).is_err());
    }

    #[test]
    fn test_validate_expiry() {
        let now = Utc::now();
        assert!(validate_expiry(now + Duration::minutes(15), now).is_ok());
        assert!(validate_expiry(now, now).is_err());
        assert!(validate_expiry(now - Duration::seconds(1), now).is_err());
    }
}
