//! # Repository Module
//!
//! Database access for the three ledger tables.
//!
//! ## Two Kinds of Access
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Read side (pub)                     Write side (pub(crate))           │
//! │  ─────────────────                   ──────────────────────            │
//! │  StockUnitRepository                 stock_unit::lock(conn, ...)       │
//! │  ReservationRepository               reservation::insert(conn, ...)    │
//! │  MovementRepository                  movement::append(conn, ...)       │
//! │       │                                      │                          │
//! │       │ own the pool                         │ take the caller's        │
//! │       │ one statement = one read             │ transaction connection   │
//! │       ▼                                      ▼                          │
//! │  callers, sweeper, seed              Ledger facade ONLY                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock can only change through [`crate::Ledger`]: every write statement
//! lives in a `pub(crate)` function that runs on the facade's transaction.
//!
//! ## Available Repositories
//!
//! - [`StockUnitRepository`] - Stock unit lookups
//! - [`ReservationRepository`] - Reservation lookups and expiry scan
//! - [`MovementRepository`] - Paged movement history

pub mod movement;
pub mod reservation;
pub mod stock_unit;

pub use movement::MovementRepository;
pub use reservation::ReservationRepository;
pub use stock_unit::StockUnitRepository;
