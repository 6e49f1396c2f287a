//! # ledger-db: Persistence and Ledger Facade
//!
//! SQLite storage for stock units, reservations and the append-only
//! movement log, plus the [`Ledger`] facade that is the only way stock
//! quantities change.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stock Ledger Data Flow                           │
//! │                                                                         │
//! │  POS checkout / stock take / expiry sweeper                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     ledger-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │    Ledger     │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │  (ledger.rs)  │───►│ stock_unit    │    │  (embedded)  │  │   │
//! │  │   │               │    │ reservation   │    │              │  │   │
//! │  │   │ reserve       │    │ movement      │    │ 001_stock_   │  │   │
//! │  │   │ confirm ...   │    │               │    │  ledger.sql  │  │   │
//! │  │   └───────┬───────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │ rules                                             │   │
//! │  │           ▼                                                   │   │
//! │  │   ledger-core (availability, plans, transitions, replay)      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database and ledger error types
//! - [`repository`] - Read-side repositories and transaction statements
//! - [`ledger`] - The transactional facade
//! - [`sweeper`] - Background release of expired reservations
//! - [`config`] - `ledger.toml` + environment configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledger_db::{Database, DbConfig};
//! use ledger_core::{ExpiryPolicy, IntakeTarget, LedgerContext, NewStockUnit, ReserveOptions};
//!
//! let db = Database::new(DbConfig::new("ledger.db")).await?;
//! let ledger = db.ledger(ExpiryPolicy::StatusOnly);
//! let ctx = LedgerContext::new("org-1", "cashier-7");
//!
//! let unit = ledger
//!     .intake(&ctx, IntakeTarget::New(NewStockUnit::bulk("usb-c-cable")), 10)
//!     .await?;
//! let hold = ledger.reserve(&ctx, &unit.id, 2, ReserveOptions::default()).await?;
//! ledger.confirm(&ctx, &hold.id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod ledger;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod sweeper;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, LedgerConfig};
pub use error::{DbError, DbResult, LedgerError, LedgerResult};
pub use ledger::Ledger;
pub use migrations::MigrationStatus;
pub use pool::{Database, DbConfig};
pub use sweeper::{ExpirySweeper, SweepReport};

// Repository re-exports for convenience
pub use repository::movement::MovementRepository;
pub use repository::reservation::ReservationRepository;
pub use repository::stock_unit::StockUnitRepository;
