//! # Schema Migrations
//!
//! The ledger schema ships inside the binary via `sqlx::migrate!`.
//!
//! ```text
//! migrations/sqlite/
//! └── 001_stock_ledger.sql
//!       stock_units       quantity >= 0, IMEI units in {0, 1}, live-IMEI unique
//!       reservations      quantity > 0, ACTIVE | CONFIRMED | CANCELLED
//!       stock_movements   seq-ordered, quantity = after - before,
//!                         UPDATE / DELETE aborted by triggers
//! ```
//!
//! New schema goes in a new `NNN_name.sql` file. Applied files are
//! checksummed by sqlx and must not be edited.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Triggers that keep `stock_movements` append-only.
const APPEND_ONLY_TRIGGERS: [&str; 2] = [
    "trg_stock_movements_no_update",
    "trg_stock_movements_no_delete",
];

/// Applied vs. embedded migration counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub embedded: usize,
    pub applied: usize,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.applied >= self.embedded
    }
}

/// Applies every pending migration. Re-running is a no-op.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    MIGRATOR.run(pool).await?;

    let status = migration_status(pool).await?;
    info!(applied = status.applied, "Ledger schema up to date");

    if !append_only_guard_installed(pool).await? {
        warn!("stock_movements append-only triggers are missing");
    }

    Ok(())
}

/// Counts embedded and applied migrations.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<MigrationStatus> {
    let applied: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;

    Ok(MigrationStatus {
        embedded: MIGRATOR.migrations.len(),
        applied: applied as usize,
    })
}

/// True when both movement-log triggers exist.
pub async fn append_only_guard_installed(pool: &SqlitePool) -> DbResult<bool> {
    let found: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger' AND name IN (?1, ?2)",
    )
    .bind(APPEND_ONLY_TRIGGERS[0])
    .bind(APPEND_ONLY_TRIGGERS[1])
    .fetch_one(pool)
    .await?;

    Ok(found as usize == APPEND_ONLY_TRIGGERS.len())
}
