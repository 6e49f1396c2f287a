//! # Movement Log Replay
//!
//! The movement log is the audit trail. Folding it from the first entry
//! must land on the quantity stored on the stock unit.
//!
//! ```text
//!  seq  type     before  after
//!  ───  ───────  ──────  ─────
//!   1   IN          0      5     ┐
//!   2   RESERVE     5      5     │ each `before` equals the previous `after`
//!   3   SOLD        5      2     │
//!   4   ADJUST      2      6     ┘ last `after` == stock_units.quantity
//! ```
//!
//! Movements must be passed oldest first.

use serde::Serialize;
use ts_rs::TS;

use crate::types::StockMovement;

/// A movement whose `quantity_before` does not continue the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ChainBreak {
    pub movement_id: String,
    /// `quantity_after` of the previous movement (0 for the first).
    pub expected_before: i64,
    pub actual_before: i64,
}

/// Result of auditing one unit's movement log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub stock_unit_id: String,
    pub movement_count: usize,
    pub stored_quantity: i64,
    /// `None` when the unit has no movements.
    pub replayed_quantity: Option<i64>,
    pub chain_breaks: Vec<ChainBreak>,
    /// Movements whose recorded delta disagrees with their before/after, or
    /// annotative movements that changed the quantity.
    pub malformed_movements: Vec<String>,
    pub consistent: bool,
}

/// Quantity the log says the unit should hold: the last `quantity_after`.
pub fn replay_quantity(movements: &[StockMovement]) -> Option<i64> {
    movements.last().map(|m| m.quantity_after)
}

/// Audits `movements` against the quantity stored on the unit.
pub fn audit(stock_unit_id: &str, stored_quantity: i64, movements: &[StockMovement]) -> AuditReport {
    let mut chain_breaks = Vec::new();
    let mut malformed_movements = Vec::new();
    let mut expected_before = 0;

    for movement in movements {
        if movement.quantity_before != expected_before {
            chain_breaks.push(ChainBreak {
                movement_id: movement.id.clone(),
                expected_before,
                actual_before: movement.quantity_before,
            });
        }

        let delta = movement.quantity_after - movement.quantity_before;
        if movement.quantity != delta || (movement.movement_type.is_annotative() && delta != 0) {
            malformed_movements.push(movement.id.clone());
        }

        expected_before = movement.quantity_after;
    }

    let replayed_quantity = replay_quantity(movements);
    let consistent = chain_breaks.is_empty()
        && malformed_movements.is_empty()
        && replayed_quantity.unwrap_or(0) == stored_quantity;

    AuditReport {
        stock_unit_id: stock_unit_id.to_string(),
        movement_count: movements.len(),
        stored_quantity,
        replayed_quantity,
        chain_breaks,
        malformed_movements,
        consistent,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
