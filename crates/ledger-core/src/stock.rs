//! # Stock Quantity Planning
//!
//! Every quantity-changing operation first asks this module for a plan:
//! the before/after quantities and the resulting status. A plan is only
//! produced when all invariants hold, so the caller can write it as-is.
//!
//! ## Invariants Enforced Here
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. quantity_after >= 0                     else NegativeStock         │
//! │  2. hardware unit: quantity_after ∈ {0, 1}  else ValidationError       │
//! │  3. quantity_after >= Σ ACTIVE reservations else InsufficientStock     │
//! │     (adjust and stock-out must not eat into reserved units)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Operation → Plan
//! | Operation   | Function              | Movement |
//! |-------------|-----------------------|----------|
//! | new unit    | [`plan_new_unit`]     | IN       |
//! | intake      | [`plan_intake`]       | IN       |
//! | adjust      | [`plan_adjustment`]   | ADJUST   |
//! | confirm     | [`plan_confirm`]      | SOLD     |
//! | stock out   | [`plan_stock_out`]    | OUT      |

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{NewStockUnit, StockStatus, StockUnit};

// =============================================================================
// Quantity Change
// =============================================================================

/// Before / after pair recorded on a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityChange {
    pub before: i64,
    pub after: i64,
}

impl QuantityChange {
    #[inline]
    pub const fn new(before: i64, after: i64) -> Self {
        QuantityChange { before, after }
    }

    /// A change that leaves the quantity where it is (RESERVE / RELEASE).
    #[inline]
    pub const fn unchanged(quantity: i64) -> Self {
        QuantityChange {
            before: quantity,
            after: quantity,
        }
    }

    /// `after - before`.
    #[inline]
    pub const fn delta(&self) -> i64 {
        self.after - self.before
    }
}

/// The outcome of a quantity-changing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockPlan {
    pub change: QuantityChange,
    pub status: StockStatus,
}

// =============================================================================
// Planning Functions
// =============================================================================

/// Plans the IN movement of a freshly created unit.
///
/// Hardware-identified units are always created with quantity 1.
pub fn plan_new_unit(new_unit: &NewStockUnit, quantity: i64) -> CoreResult<QuantityChange> {
    if let Some(hardware_id) = &new_unit.hardware_id {
        if quantity != 1 {
            return Err(ValidationError::HardwareQuantity {
                stock_unit_id: hardware_id.clone(),
                quantity,
            }
            .into());
        }
    }

    Ok(QuantityChange::new(0, quantity))
}

/// Plans an intake into an existing unit.
///
/// A hardware unit coming back from 0 to 1 (e.g. a return) is AVAILABLE
/// again; every other intake keeps the status.
pub fn plan_intake(unit: &StockUnit, quantity: i64) -> CoreResult<StockPlan> {
    ensure_live(unit)?;

    let after = checked_after(unit, quantity)?;
    ensure_hardware_bounds(unit, after)?;

    let status = if unit.is_hardware_tracked() && unit.quantity == 0 {
        StockStatus::Available
    } else {
        unit.status
    };

    Ok(StockPlan {
        change: QuantityChange::new(unit.quantity, after),
        status,
    })
}

/// Plans a manual stock-take correction.
///
/// ## Example
/// ```text
/// quantity 4, change -10  ──► NegativeStock (nothing written)
/// quantity 4, change +20  ──► 4 → 24
/// quantity 4, 3 reserved, change -2 ──► InsufficientStock (would leave 2 < 3)
/// ```
pub fn plan_adjustment(unit: &StockUnit, change: i64, reserved: i64) -> CoreResult<StockPlan> {
    ensure_live(unit)?;

    let after = checked_after(unit, change)?;
    if after < 0 {
        return Err(CoreError::NegativeStock {
            stock_unit_id: unit.id.clone(),
            quantity_before: unit.quantity,
            quantity_change: change,
        });
    }

    ensure_hardware_bounds(unit, after)?;

    if after < reserved {
        return Err(CoreError::InsufficientStock {
            stock_unit_id: unit.id.clone(),
            available: (unit.quantity - reserved).max(0),
            requested: -change,
        });
    }

    Ok(StockPlan {
        change: QuantityChange::new(unit.quantity, after),
        status: unit.status,
    })
}

/// Plans the stock deduction of a confirmed reservation.
///
/// The reservation was counted in availability when it was created, so
/// this only re-checks non-negativity.
pub fn plan_confirm(unit: &StockUnit, reservation_quantity: i64) -> CoreResult<StockPlan> {
    let after = unit.quantity - reservation_quantity;
    if after < 0 {
        return Err(CoreError::NegativeStock {
            stock_unit_id: unit.id.clone(),
            quantity_before: unit.quantity,
            quantity_change: -reservation_quantity,
        });
    }

    Ok(StockPlan {
        change: QuantityChange::new(unit.quantity, after),
        status: sold_when_empty(unit, after),
    })
}

/// Plans a direct removal of unreserved stock.
pub fn plan_stock_out(unit: &StockUnit, quantity: i64, reserved: i64) -> CoreResult<StockPlan> {
    ensure_live(unit)?;

    let after = unit.quantity - quantity;
    if after < 0 {
        return Err(CoreError::NegativeStock {
            stock_unit_id: unit.id.clone(),
            quantity_before: unit.quantity,
            quantity_change: -quantity,
        });
    }

    let available = unit.quantity - reserved;
    if quantity > available {
        return Err(CoreError::InsufficientStock {
            stock_unit_id: unit.id.clone(),
            available: available.max(0),
            requested: quantity,
        });
    }

    Ok(StockPlan {
        change: QuantityChange::new(unit.quantity, after),
        status: sold_when_empty(unit, after),
    })
}

// =============================================================================
// Helpers
// =============================================================================

fn ensure_live(unit: &StockUnit) -> CoreResult<()> {
    if unit.is_deleted() {
        return Err(CoreError::not_found("StockUnit", &unit.id));
    }
    Ok(())
}

fn checked_after(unit: &StockUnit, change: i64) -> CoreResult<i64> {
    unit.quantity.checked_add(change).ok_or_else(|| {
        ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 0,
            max: i64::MAX,
        }
        .into()
    })
}

fn ensure_hardware_bounds(unit: &StockUnit, after: i64) -> CoreResult<()> {
    if unit.is_hardware_tracked() && !(0..=1).contains(&after) {
        return Err(ValidationError::HardwareQuantity {
            stock_unit_id: unit.id.clone(),
            quantity: after,
        }
        .into());
    }
    Ok(())
}

fn sold_when_empty(unit: &StockUnit, after: i64) -> StockStatus {
    if unit.is_hardware_tracked() && after == 0 {
        StockStatus::Sold
    } else {
        unit.status
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::Utc;

    fn bulk(quantity: i64) -> StockUnit {
        let now = Utc::now();
        StockUnit {
            id: "unit-1".into(),
            org_id: "org-1".into(),
            catalog_item_id: "item-1".into(),
            hardware_id: None,
            quantity,
            status: StockStatus::Available,
            version: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn imei(quantity: i64) -> StockUnit {
        StockUnit {
            hardware_id: Some("356938035643809".into()),
            ..bulk(quantity)
        }
    }

    #[test]
    fn test_adjust_rejects_negative_result() {
        let err = plan_adjustment(&bulk(4), -10, 0).unwrap_err();
        assert!(matches!(
            err,
            CoreError::NegativeStock { quantity_before: 4, quantity_change: -10, .. }
        ));
    }

    #[test]
    fn test_adjust_stock_take_increase() {
        let plan = plan_adjustment(&bulk(4), 20, 0).unwrap();
        assert_eq!(plan.change, QuantityChange::new(4, 24));
        assert_eq!(plan.change.delta(), 20);
        assert_eq!(plan.status, StockStatus::Available);
    }

    #[test]
    fn test_adjust_cannot_eat_reserved_units() {
        let err = plan_adjustment(&bulk(4), -2, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);

        // Down to exactly the reserved amount is fine.
        let plan = plan_adjustment(&bulk(4), -1, 3).unwrap();
        assert_eq!(plan.change.after, 3);
    }

    #[test]
    fn test_adjust_hardware_bounds() {
        let err = plan_adjustment(&imei(1), 1, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let plan = plan_adjustment(&imei(1), -1, 0).unwrap();
        assert_eq!(plan.change.after, 0);
    }

    #[test]
    fn test_confirm_imei_marks_sold() {
        let plan = plan_confirm(&imei(1), 1).unwrap();
        assert_eq!(plan.change, QuantityChange::new(1, 0));
        assert_eq!(plan.status, StockStatus::Sold);
    }

    #[test]
    fn test_confirm_bulk_keeps_status() {
        let plan = plan_confirm(&bulk(5), 5).unwrap();
        assert_eq!(plan.change.after, 0);
        assert_eq!(plan.status, StockStatus::Available);
    }

    #[test]
    fn test_confirm_never_goes_negative() {
        let err = plan_confirm(&bulk(1), 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NegativeStock);
    }

    #[test]
    fn test_new_unit() {
        assert_eq!(
            plan_new_unit(&NewStockUnit::bulk("item"), 12).unwrap(),
            QuantityChange::new(0, 12)
        );
        assert!(plan_new_unit(&NewStockUnit::serialized("item", "IMEI1"), 1).is_ok());
        assert!(plan_new_unit(&NewStockUnit::serialized("item", "IMEI1"), 2).is_err());
    }

    #[test]
    fn test_intake_existing() {
        let plan = plan_intake(&bulk(3), 7).unwrap();
        assert_eq!(plan.change, QuantityChange::new(3, 10));

        let mut returned = imei(0);
        returned.status = StockStatus::Sold;
        let plan = plan_intake(&returned, 1).unwrap();
        assert_eq!(plan.change.after, 1);
        assert_eq!(plan.status, StockStatus::Available);

        assert!(plan_intake(&imei(1), 1).is_err());
    }

    #[test]
    fn test_intake_into_deleted_unit() {
        let mut unit = bulk(3);
        unit.deleted_at = Some(Utc::now());
        assert_eq!(plan_intake(&unit, 1).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_stock_out() {
        let plan = plan_stock_out(&bulk(5), 2, 3).unwrap();
        assert_eq!(plan.change, QuantityChange::new(5, 3));

        let err = plan_stock_out(&bulk(5), 3, 3).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InsufficientStock { available: 2, requested: 3, .. }
        ));

        assert_eq!(
            plan_stock_out(&bulk(1), 2, 0).unwrap_err().kind(),
            ErrorKind::NegativeStock
        );

        let plan = plan_stock_out(&imei(1), 1, 0).unwrap();
        assert_eq!(plan.status, StockStatus::Sold);
    }
}
