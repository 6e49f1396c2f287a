//! # Domain Types
//!
//! Core domain types used throughout the stock ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   StockUnit     │◄──│  Reservation    │   │  StockMovement  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  stock_unit_id  │──►│  stock_unit_id  │       │
//! │  │  quantity >= 0  │   │  quantity > 0   │   │  type           │       │
//! │  │  status         │   │  status         │   │  before / after │       │
//! │  │  hardware_id?   │   │  expires_at?    │   │  (append-only)  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  StockStatus    │   │ReservationStatus│   │  MovementType   │       │
//! │  │  AVAILABLE      │   │  ACTIVE         │   │  IN  OUT ADJUST │       │
//! │  │  SOLD  DAMAGED  │   │  CONFIRMED      │   │  RESERVE        │       │
//! │  │  RETURNED       │   │  CANCELLED      │   │  RELEASE  SOLD  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tenancy
//! Every entity carries `org_id`. The ledger never reads or writes a row
//! without filtering on it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::metadata::MovementMetadata;
use crate::stock::QuantityChange;

// =============================================================================
// Ledger Context
// =============================================================================

/// The already-authorized organization + actor pair every ledger operation
/// runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LedgerContext {
    /// Tenant the operation is scoped to.
    pub org_id: String,
    /// User or system process performing the operation.
    pub actor_id: String,
}

impl LedgerContext {
    pub fn new(org_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        LedgerContext {
            org_id: org_id.into(),
            actor_id: actor_id.into(),
        }
    }
}

// =============================================================================
// Stock Status
// =============================================================================

/// Informational status of a stock unit.
///
/// Only `Available` gates anything: a new reservation requires it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    #[default]
    Available,
    Sold,
    Damaged,
    Returned,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Available => "AVAILABLE",
            StockStatus::Sold => "SOLD",
            StockStatus::Damaged => "DAMAGED",
            StockStatus::Returned => "RETURNED",
        }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Reservation Status
// =============================================================================

/// Reservation state machine.
///
/// ```text
///            ┌──────────► CONFIRMED (terminal, stock deducted)
///  ACTIVE ───┤
///            └──────────► CANCELLED (terminal, stock untouched)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    #[default]
    Active,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    /// Returns true for CONFIRMED and CANCELLED.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    /// Returns true if `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Active, ReservationStatus::Confirmed)
                | (ReservationStatus::Active, ReservationStatus::Cancelled)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Movement Type
// =============================================================================

/// Kind of event recorded in the movement log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Stock intake.
    In,
    /// Direct removal of unreserved stock.
    Out,
    /// Manual stock-take correction.
    Adjust,
    /// Reservation created (annotative).
    Reserve,
    /// Reservation released (annotative).
    Release,
    /// Reservation confirmed into a sale.
    Sold,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Adjust => "ADJUST",
            MovementType::Reserve => "RESERVE",
            MovementType::Release => "RELEASE",
            MovementType::Sold => "SOLD",
        }
    }

    /// RESERVE and RELEASE describe holds, not quantity changes:
    /// `quantity_before == quantity_after` for them.
    pub fn is_annotative(&self) -> bool {
        matches!(self, MovementType::Reserve | MovementType::Release)
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Stock Unit
// =============================================================================

/// A purchasable inventory line.
///
/// Either a single hardware-identified unit (IMEI/serial, quantity 0 or 1)
/// or a bulk-counted unit (quantity N).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StockUnit {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Tenant this unit belongs to.
    pub org_id: String,

    /// Catalog item this unit is a physical instance of.
    pub catalog_item_id: String,

    /// IMEI / serial number. When present the quantity is always 0 or 1.
    pub hardware_id: Option<String>,

    /// Current on-hand quantity. Never negative.
    pub quantity: i64,

    /// Informational status.
    pub status: StockStatus,

    /// Incremented by every write; the write itself is what locks the row.
    pub version: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker.
    #[ts(as = "Option<String>")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StockUnit {
    /// Returns true if the unit carries an IMEI / serial number.
    #[inline]
    pub fn is_hardware_tracked(&self) -> bool {
        self.hardware_id.is_some()
    }

    /// Returns true if the unit has been soft-deleted.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Specification for a unit created by intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewStockUnit {
    pub catalog_item_id: String,
    pub hardware_id: Option<String>,
}

impl NewStockUnit {
    /// A bulk-counted unit.
    pub fn bulk(catalog_item_id: impl Into<String>) -> Self {
        NewStockUnit {
            catalog_item_id: catalog_item_id.into(),
            hardware_id: None,
        }
    }

    /// A single hardware-identified unit.
    pub fn serialized(catalog_item_id: impl Into<String>, hardware_id: impl Into<String>) -> Self {
        NewStockUnit {
            catalog_item_id: catalog_item_id.into(),
            hardware_id: Some(hardware_id.into()),
        }
    }
}

/// What an intake adds stock to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntakeTarget {
    /// Increase an existing unit's quantity.
    Existing(String),
    /// Create a new unit.
    New(NewStockUnit),
}

// =============================================================================
// Reservation
// =============================================================================

/// A temporary hold against a stock unit's quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub org_id: String,
    pub stock_unit_id: String,
    /// Units held. Always positive.
    pub quantity: i64,
    pub status: ReservationStatus,
    /// Advisory expiry, reconciled by the sweeper.
    #[ts(as = "Option<String>")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Downstream sale this hold belongs to.
    pub linked_sale_id: Option<String>,
    pub notes: Option<String>,
    /// Actor who created the reservation.
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Returns true if `expires_at` is set and not after `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Optional reservation attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReserveOptions {
    #[ts(as = "Option<String>")]
    pub expires_at: Option<DateTime<Utc>>,
    pub linked_sale_id: Option<String>,
    pub notes: Option<String>,
}

// =============================================================================
// Stock Movement
// =============================================================================

/// One immutable entry of the movement log.
///
/// `quantity` is always `quantity_after - quantity_before`; it is zero for
/// the annotative RESERVE / RELEASE types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    pub id: String,
    pub org_id: String,
    pub stock_unit_id: String,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub quantity: i64,
    pub reason: Option<String>,
    pub reservation_id: Option<String>,
    pub linked_sale_id: Option<String>,
    pub actor_id: String,
    #[ts(type = "Record<string, unknown> | null")]
    pub metadata: Option<MovementMetadata>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Starts a movement for `unit` describing `change`.
    ///
    /// ## Example
    /// ```rust
    /// use chrono::Utc;
    /// use ledger_core::{LedgerContext, MovementType, QuantityChange, StockMovement};
    ///
    /// let ctx = LedgerContext::new("org-1", "user-1");
    /// let movement = StockMovement::record(&ctx, "unit-1", MovementType::Adjust, QuantityChange::new(4, 24), Utc::now())
    ///     .with_reason("stock take");
    ///
    /// assert_eq!(movement.quantity, 20);
    /// ```
    pub fn record(
        ctx: &LedgerContext,
        stock_unit_id: impl Into<String>,
        movement_type: MovementType,
        change: QuantityChange,
        now: DateTime<Utc>,
    ) -> Self {
        StockMovement {
            id: uuid::Uuid::new_v4().to_string(),
            org_id: ctx.org_id.clone(),
            stock_unit_id: stock_unit_id.into(),
            movement_type,
            quantity_before: change.before,
            quantity_after: change.after,
            quantity: change.delta(),
            reason: None,
            reservation_id: None,
            linked_sale_id: None,
            actor_id: ctx.actor_id.clone(),
            metadata: None,
            created_at: now,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_reservation(mut self, reservation_id: impl Into<String>) -> Self {
        self.reservation_id = Some(reservation_id.into());
        self
    }

    pub fn with_linked_sale(mut self, linked_sale_id: Option<String>) -> Self {
        self.linked_sale_id = linked_sale_id;
        self
    }

    pub fn with_metadata(mut self, metadata: MovementMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// =============================================================================
// Read Models
// =============================================================================

/// On-hand, reserved and available quantity of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub on_hand: i64,
    pub reserved: i64,
    pub available: i64,
}

/// One page of a newest-first listing. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
}

impl<T> Page<T> {
    /// Returns true if another page follows this one.
    pub fn has_more(&self) -> bool {
        (self.page as i64) * (self.limit as i64) < self.total
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_transitions() {
        use ReservationStatus::*;
        assert!(Active.can_transition_to(Confirmed));
        assert!(Active.can_transition_to(Cancelled));
        assert!(!Active.can_transition_to(Active));
        assert!(!Confirmed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(Confirmed.is_terminal());
        assert!(!Active.is_terminal());
    }

    #[test]
    fn test_annotative_types() {
        assert!(MovementType::Reserve.is_annotative());
        assert!(MovementType::Release.is_annotative());
        assert!(!MovementType::Sold.is_annotative());
        assert!(!MovementType::Adjust.is_annotative());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&StockStatus::Available).unwrap(), "\"AVAILABLE\"");
        assert_eq!(serde_json::to_string(&MovementType::In).unwrap(), "\"IN\"");
        assert_eq!(
            serde_json::from_str::<ReservationStatus>("\"CANCELLED\"").unwrap(),
            ReservationStatus::Cancelled
        );
    }

    #[test]
    fn test_movement_record() {
        let ctx = LedgerContext::new("org-1", "user-1");
        let movement = StockMovement::record(
            &ctx,
            "unit-1",
            MovementType::Sold,
            QuantityChange::new(1, 0),
            Utc::now(),
        )
        .with_reservation("res-1")
        .with_linked_sale(Some("sale-1".into()));

        assert_eq!(movement.quantity, -1);
        assert_eq!(movement.org_id, "org-1");
        assert_eq!(movement.actor_id, "user-1");
        assert_eq!(movement.reservation_id.as_deref(), Some("res-1"));
        assert_eq!(movement.linked_sale_id.as_deref(), Some("sale-1"));

        let json = serde_json::to_value(&movement).unwrap();
        assert_eq!(json["type"], "SOLD");
        assert_eq!(json["quantityBefore"], 1);
    }

    #[test]
    fn test_page_has_more() {
        let page = Page::<i32> {
            items: vec![1, 2],
            page: 1,
            limit: 2,
            total: 3,
        };
        assert!(page.has_more());

        let last = Page::<i32> {
            items: vec![3],
            page: 2,
            limit: 2,
            total: 3,
        };
        assert!(!last.has_more());
    }

    #[test]
    fn test_reservation_expiry() {
        let now = Utc::now();
        let reservation = Reservation {
            id: "r".into(),
            org_id: "o".into(),
            stock_unit_id: "u".into(),
            quantity: 1,
            status: ReservationStatus::Active,
            expires_at: Some(now),
            linked_sale_id: None,
            notes: None,
            created_by: "a".into(),
            created_at: now,
            updated_at: now,
        };
        assert!(reservation.is_expired_at(now));
        assert!(!reservation.is_expired_at(now - chrono::Duration::seconds(1)));
    }
}
