//! # ledger-core: Pure Business Logic for the Stock Ledger
//!
//! This crate is the **heart** of the stock ledger. It contains every rule
//! that decides whether a quantity change is allowed, as pure functions with
//! zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stock Ledger Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Callers (sale flow, stock intake, stock-take UI)       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ reserve / release / confirm / adjust   │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                ledger-db: Ledger facade (transactions)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ "is this change allowed?"              │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ ledger-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌─────────────┐  ┌─────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ reservation │  │  stock  │  │  replay   │  │   │
//! │  │   │ StockUnit │  │ state mach. │  │  plans  │  │  audit    │  │   │
//! │  │   │ Movement  │  │ availability│  │ adjust  │  │  fold     │  │   │
//! │  │   └───────────┘  └─────────────┘  └─────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (StockUnit, Reservation, StockMovement, etc.)
//! - [`metadata`] - Typed movement metadata with an open fallback
//! - [`error`] - Domain error taxonomy
//! - [`validation`] - Input validation
//! - [`reservation`] - Reservation state machine and availability math
//! - [`stock`] - Quantity planning for intake, adjust, confirm, stock-out
//! - [`replay`] - Movement log replay and audit
//!
//! ## Example Usage
//!
//! ```rust
//! use ledger_core::reservation::{available_quantity, ExpiryPolicy, ReservationHold};
//! use chrono::Utc;
//!
//! let holds = [ReservationHold::new(3, None)];
//! let availability = available_quantity(5, &holds, Utc::now(), ExpiryPolicy::StatusOnly);
//!
//! assert_eq!(availability.reserved, 3);
//! assert_eq!(availability.available, 2);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod metadata;
pub mod replay;
pub mod reservation;
pub mod stock;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use metadata::{KnownMetadata, MovementMetadata};
pub use replay::{AuditReport, ChainBreak};
pub use reservation::{ExpiryPolicy, ReservationAction, ReservationHold};
pub use stock::QuantityChange;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest quantity accepted for a single reservation, intake or adjustment.
///
/// Keeps sums of reservations comfortably inside `i64` and catches
/// fat-finger input (an extra few zeros on a stock-take screen).
pub const MAX_QUANTITY: i64 = 1_000_000;

/// Maximum page size for movement and reservation listings.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Maximum length of an adjustment / stock-out reason.
pub const MAX_REASON_LENGTH: usize = 500;

/// Maximum length of reservation notes.
pub const MAX_NOTES_LENGTH: usize = 1000;

/// Maximum length of an opaque identifier (org, actor, unit, sale ids).
pub const MAX_IDENTIFIER_LENGTH: usize = 128;
