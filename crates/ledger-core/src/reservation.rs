//! # Reservation Rules
//!
//! The reservation state machine and the available-quantity gate.
//!
//! ## Available Quantity
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  available(unit) = unit.quantity - Σ quantity of ACTIVE reservations   │
//! │                                                                         │
//! │  on hand: 5        ACTIVE holds: [3]         available: 2              │
//! │                                                                         │
//! │  reserve(3) ──► 3 > 2 ──► InsufficientStock                            │
//! │  reserve(2) ──► 2 <= 2 ──► ACTIVE, available becomes 0                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The holds passed in must be read inside the same transaction that
//! writes the reservation, after the stock unit row has been locked.
//! Computing availability anywhere else reintroduces a check-then-act race.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{Availability, Reservation, ReservationStatus, StockStatus, StockUnit};

// =============================================================================
// Expiry Policy
// =============================================================================

/// Whether expired-but-still-ACTIVE reservations count against availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// Every ACTIVE reservation holds stock until it is released.
    #[default]
    StatusOnly,
    /// ACTIVE reservations whose `expires_at` has passed are ignored.
    ExcludeExpired,
}

impl fmt::Display for ExpiryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpiryPolicy::StatusOnly => write!(f, "status_only"),
            ExpiryPolicy::ExcludeExpired => write!(f, "exclude_expired"),
        }
    }
}

impl FromStr for ExpiryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "status_only" | "status" => Ok(ExpiryPolicy::StatusOnly),
            "exclude_expired" | "expiry" => Ok(ExpiryPolicy::ExcludeExpired),
            _ => Err(format!("Unknown expiry policy: {}", s)),
        }
    }
}

// =============================================================================
// Holds & Availability
// =============================================================================

/// The part of an ACTIVE reservation that matters for availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ReservationHold {
    pub quantity: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ReservationHold {
    pub fn new(quantity: i64, expires_at: Option<DateTime<Utc>>) -> Self {
        ReservationHold {
            quantity,
            expires_at,
        }
    }

    /// Returns true if this hold still reduces availability at `now`.
    pub fn counts_at(&self, now: DateTime<Utc>, policy: ExpiryPolicy) -> bool {
        match policy {
            ExpiryPolicy::StatusOnly => true,
            ExpiryPolicy::ExcludeExpired => self.expires_at.map_or(true, |at| at > now),
        }
    }
}

/// Computes on-hand / reserved / available for one unit.
///
/// `holds` must be the unit's ACTIVE reservations only.
pub fn available_quantity(
    on_hand: i64,
    holds: &[ReservationHold],
    now: DateTime<Utc>,
    policy: ExpiryPolicy,
) -> Availability {
    let reserved: i64 = holds
        .iter()
        .filter(|hold| hold.counts_at(now, policy))
        .map(|hold| hold.quantity)
        .sum();

    Availability {
        on_hand,
        reserved,
        available: on_hand - reserved,
    }
}

/// Checks that `requested` units may be reserved on `unit`.
///
/// ## Rules
/// 1. Unit must not be soft-deleted (NotFound)
/// 2. Unit must be AVAILABLE (InvalidState)
/// 3. `requested <= available` (InsufficientStock)
pub fn check_reservable(
    unit: &StockUnit,
    requested: i64,
    availability: &Availability,
) -> CoreResult<()> {
    if unit.is_deleted() {
        return Err(CoreError::not_found("StockUnit", &unit.id));
    }

    if unit.status != StockStatus::Available {
        return Err(CoreError::invalid_state(
            "StockUnit",
            &unit.id,
            unit.status,
            "reserve",
        ));
    }

    if requested > availability.available {
        return Err(CoreError::InsufficientStock {
            stock_unit_id: unit.id.clone(),
            available: availability.available.max(0),
            requested,
        });
    }

    Ok(())
}

// =============================================================================
// State Machine
// =============================================================================

/// Operations that act on an existing reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationAction {
    Confirm,
    Release,
    Extend,
}

impl ReservationAction {
    /// Status the reservation has after the action succeeds.
    pub fn target_status(&self) -> ReservationStatus {
        match self {
            ReservationAction::Confirm => ReservationStatus::Confirmed,
            ReservationAction::Release => ReservationStatus::Cancelled,
            ReservationAction::Extend => ReservationStatus::Active,
        }
    }
}

impl fmt::Display for ReservationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationAction::Confirm => write!(f, "confirm"),
            ReservationAction::Release => write!(f, "release"),
            ReservationAction::Extend => write!(f, "extend"),
        }
    }
}

/// Checks that `action` may be applied to `reservation`.
///
/// Every action requires ACTIVE; CONFIRMED and CANCELLED are terminal.
/// Releasing twice is an error, not a no-op.
///
/// ## Returns
/// The status the reservation moves to.
pub fn ensure_transition(
    reservation: &Reservation,
    action: ReservationAction,
) -> CoreResult<ReservationStatus> {
    let target = action.target_status();

    let allowed = match action {
        ReservationAction::Extend => reservation.is_active(),
        _ => reservation.status.can_transition_to(target),
    };

    if !allowed {
        return Err(CoreError::invalid_state(
            "Reservation",
            &reservation.id,
            reservation.status,
            action,
        ));
    }

    Ok(target)
}

/// Checks that an ACTIVE reservation still holds its stock at `now`.
///
/// Under `ExcludeExpired` an expired hold no longer counts against
/// availability, so its units may already belong to a newer reservation.
/// Confirming or extending it would oversell; the only way out is release.
pub fn ensure_still_held(
    reservation: &Reservation,
    action: ReservationAction,
    now: DateTime<Utc>,
    policy: ExpiryPolicy,
) -> CoreResult<()> {
    if policy == ExpiryPolicy::ExcludeExpired && reservation.is_expired_at(now) {
        return Err(CoreError::invalid_state(
            "Reservation",
            &reservation.id,
            "EXPIRED",
            action,
        ));
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
