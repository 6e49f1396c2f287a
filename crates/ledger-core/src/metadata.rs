//! # Movement Metadata
//!
//! Structured context attached to a movement.
//!
//! ## Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  MovementMetadata (untagged)                                            │
//! │                                                                         │
//! │  ├── Known(KnownMetadata)  ← tagged by "kind", one shape per type      │
//! │  │     { "kind": "sale", "reservationQuantity": 1, "statusAfter": ... }│
//! │  │                                                                      │
//! │  └── Open(map)             ← anything else, kept verbatim              │
//! │        { "source": "legacy-import", "batch": 7 }                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows written by newer producers with kinds this build does not know
//! still deserialize (as `Open`) instead of failing the whole listing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MovementType, StockStatus};

/// Metadata stored with a movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MovementMetadata {
    Known(KnownMetadata),
    Open(BTreeMap<String, serde_json::Value>),
}

/// Metadata shapes the ledger itself writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum KnownMetadata {
    /// IN movement.
    Intake { new_unit: bool },
    /// RESERVE movement.
    Reservation {
        reservation_quantity: i64,
        available_after: i64,
        expires_at: Option<DateTime<Utc>>,
    },
    /// RELEASE movement.
    Release {
        reservation_quantity: i64,
        /// Released by the expiry sweep rather than a caller.
        expired: bool,
    },
    /// SOLD movement.
    Sale {
        reservation_quantity: i64,
        status_after: StockStatus,
    },
    /// ADJUST movement.
    Adjustment { reserved_at_adjustment: i64 },
    /// OUT movement.
    StockOut { status_after: StockStatus },
}

impl KnownMetadata {
    /// The movement type this shape belongs to.
    pub fn movement_type(&self) -> MovementType {
        match self {
            KnownMetadata::Intake { .. } => MovementType::In,
            KnownMetadata::Reservation { .. } => MovementType::Reserve,
            KnownMetadata::Release { .. } => MovementType::Release,
            KnownMetadata::Sale { .. } => MovementType::Sold,
            KnownMetadata::Adjustment { .. } => MovementType::Adjust,
            KnownMetadata::StockOut { .. } => MovementType::Out,
        }
    }
}

impl From<KnownMetadata> for MovementMetadata {
    fn from(known: KnownMetadata) -> Self {
        MovementMetadata::Known(known)
    }
}

impl MovementMetadata {
    /// Returns the typed shape, if this is one the ledger knows.
    pub fn known(&self) -> Option<&KnownMetadata> {
        match self {
            MovementMetadata::Known(known) => Some(known),
            MovementMetadata::Open(_) => None,
        }
    }

    /// Returns false only when a known shape is attached to the wrong type.
    pub fn matches_type(&self, movement_type: MovementType) -> bool {
        self.known()
            .map_or(true, |known| known.movement_type() == movement_type)
    }

    /// Serializes to the JSON text stored in the database.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses the JSON text stored in the database.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_shape_wire_format() {
        let meta: MovementMetadata = KnownMetadata::Sale {
            reservation_quantity: 1,
            status_after: StockStatus::Sold,
        }
        .into();

        let json: serde_json::Value = serde_json::from_str(&meta.to_json().unwrap()).unwrap();
        assert_eq!(json["kind"], "sale");
        assert_eq!(json["reservationQuantity"], 1);
        assert_eq!(json["statusAfter"], "SOLD");
    }

    #[test]
    fn test_known_shape_parses_back() {
        let meta = MovementMetadata::from_json(
            r#"{"kind":"release","reservationQuantity":3,"expired":true}"#,
        )
        .unwrap();

        assert_eq!(
            meta.known(),
            Some(&KnownMetadata::Release {
                reservation_quantity: 3,
                expired: true
            })
        );
        assert!(meta.matches_type(MovementType::Release));
        assert!(!meta.matches_type(MovementType::Sold));
    }

    #[test]
    fn test_unknown_kind_falls_back_to_open_map() {
        let meta = MovementMetadata::from_json(r#"{"kind":"transfer","toLocation":"B-2"}"#).unwrap();

        match &meta {
            MovementMetadata::Open(map) => {
                assert_eq!(map["kind"], "transfer");
                assert_eq!(map["toLocation"], "B-2");
            }
            other => panic!("expected open metadata, got {other:?}"),
        }
        assert!(meta.matches_type(MovementType::Adjust));
    }
}
