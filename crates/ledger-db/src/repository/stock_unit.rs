//! # Stock Unit Repository
//!
//! Database operations for stock units.
//!
//! ## Locking
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SQLite has no SELECT ... FOR UPDATE. The first statement of every     │
//! │  mutating ledger transaction is a write instead:                       │
//! │                                                                         │
//! │    UPDATE stock_units SET version = version + 1, updated_at = ?        │
//! │     WHERE id = ? AND org_id = ? AND deleted_at IS NULL                 │
//! │    RETURNING *                                                         │
//! │                                                                         │
//! │  The write takes the database write lock and holds it until commit.    │
//! │  A concurrent ledger call blocks on its own first statement (busy      │
//! │  timeout), then reads the row as the first call committed it.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use ledger_core::{StockStatus, StockUnit};

/// Repository for stock unit reads.
#[derive(Debug, Clone)]
pub struct StockUnitRepository {
    pool: SqlitePool,
}

impl StockUnitRepository {
    /// Creates a new StockUnitRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockUnitRepository { pool }
    }

    /// Gets a live (not soft-deleted) stock unit.
    pub async fn get_by_id(&self, org_id: &str, id: &str) -> DbResult<Option<StockUnit>> {
        let unit = sqlx::query_as::<_, StockUnit>(
            r#"
            SELECT * FROM stock_units
            WHERE id = ?1 AND org_id = ?2 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(unit)
    }

    /// Gets a stock unit whether or not it has been soft-deleted.
    ///
    /// Only for history views; never for stock decisions.
    pub async fn get_including_deleted(
        &self,
        org_id: &str,
        id: &str,
    ) -> DbResult<Option<StockUnit>> {
        fetch_including_deleted(&self.pool, org_id, id).await
    }

    /// Finds the live unit carrying an IMEI / serial number.
    pub async fn find_by_hardware_id(
        &self,
        org_id: &str,
        hardware_id: &str,
    ) -> DbResult<Option<StockUnit>> {
        let unit = sqlx::query_as::<_, StockUnit>(
            r#"
            SELECT * FROM stock_units
            WHERE org_id = ?1 AND hardware_id = ?2 AND deleted_at IS NULL
            "#,
        )
        .bind(org_id)
        .bind(hardware_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(unit)
    }

    /// Lists the live units of one catalog item, oldest first.
    pub async fn list_by_catalog_item(
        &self,
        org_id: &str,
        catalog_item_id: &str,
    ) -> DbResult<Vec<StockUnit>> {
        let units = sqlx::query_as::<_, StockUnit>(
            r#"
            SELECT * FROM stock_units
            WHERE org_id = ?1 AND catalog_item_id = ?2 AND deleted_at IS NULL
            ORDER BY created_at, rowid
            "#,
        )
        .bind(org_id)
        .bind(catalog_item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(units)
    }

    /// Counts the live units of an organization.
    pub async fn count(&self, org_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stock_units WHERE org_id = ?1 AND deleted_at IS NULL",
        )
        .bind(org_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

// =============================================================================
// Transaction Statements (Ledger facade only)
// =============================================================================

pub(crate) async fn fetch_including_deleted<'e, E>(
    executor: E,
    org_id: &str,
    id: &str,
) -> DbResult<Option<StockUnit>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let unit = sqlx::query_as::<_, StockUnit>(
        "SELECT * FROM stock_units WHERE id = ?1 AND org_id = ?2",
    )
    .bind(id)
    .bind(org_id)
    .fetch_optional(executor)
    .await?;

    Ok(unit)
}

/// Locks a live unit for the rest of the transaction and returns it.
pub(crate) async fn lock(
    conn: &mut SqliteConnection,
    org_id: &str,
    id: &str,
    now: DateTime<Utc>,
) -> DbResult<Option<StockUnit>> {
    debug!(org_id, stock_unit_id = id, "Locking stock unit");

    let unit = sqlx::query_as::<_, StockUnit>(
        r#"
        UPDATE stock_units
        SET version = version + 1, updated_at = ?1
        WHERE id = ?2 AND org_id = ?3 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(now)
    .bind(id)
    .bind(org_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(unit)
}

/// Locks the unit a reservation points at.
///
/// Does not filter on `deleted_at`: a terminal reservation on a retired
/// unit must still report InvalidState rather than NotFound.
pub(crate) async fn lock_by_reservation(
    conn: &mut SqliteConnection,
    org_id: &str,
    reservation_id: &str,
    now: DateTime<Utc>,
) -> DbResult<Option<StockUnit>> {
    debug!(org_id, reservation_id, "Locking stock unit of reservation");

    let unit = sqlx::query_as::<_, StockUnit>(
        r#"
        UPDATE stock_units
        SET version = version + 1, updated_at = ?1
        WHERE org_id = ?2
          AND id = (SELECT stock_unit_id FROM reservations WHERE id = ?3 AND org_id = ?2)
        RETURNING *
        "#,
    )
    .bind(now)
    .bind(org_id)
    .bind(reservation_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(unit)
}

pub(crate) async fn insert(conn: &mut SqliteConnection, unit: &StockUnit) -> DbResult<()> {
    debug!(
        org_id = %unit.org_id,
        stock_unit_id = %unit.id,
        hardware_id = ?unit.hardware_id,
        "Inserting stock unit"
    );

    sqlx::query(
        r#"
        INSERT INTO stock_units (
            id, org_id, catalog_item_id, hardware_id,
            quantity, status, version,
            created_at, updated_at, deleted_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&unit.id)
    .bind(&unit.org_id)
    .bind(&unit.catalog_item_id)
    .bind(&unit.hardware_id)
    .bind(unit.quantity)
    .bind(unit.status)
    .bind(unit.version)
    .bind(unit.created_at)
    .bind(unit.updated_at)
    .bind(unit.deleted_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Adds `delta` to the quantity and sets `status`.
///
/// The statement itself refuses to go below zero: `None` means the
/// precondition no longer held and nothing was written.
pub(crate) async fn apply_change(
    conn: &mut SqliteConnection,
    org_id: &str,
    id: &str,
    delta: i64,
    status: StockStatus,
    now: DateTime<Utc>,
) -> DbResult<Option<StockUnit>> {
    debug!(org_id, stock_unit_id = id, delta, %status, "Applying quantity change");

    let unit = sqlx::query_as::<_, StockUnit>(
        r#"
        UPDATE stock_units
        SET quantity = quantity + ?1, status = ?2, updated_at = ?3
        WHERE id = ?4 AND org_id = ?5 AND quantity + ?1 >= 0
        RETURNING *
        "#,
    )
    .bind(delta)
    .bind(status)
    .bind(now)
    .bind(id)
    .bind(org_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(unit)
}

pub(crate) async fn soft_delete(
    conn: &mut SqliteConnection,
    org_id: &str,
    id: &str,
    now: DateTime<Utc>,
) -> DbResult<Option<StockUnit>> {
    debug!(org_id, stock_unit_id = id, "Soft-deleting stock unit");

    let unit = sqlx::query_as::<_, StockUnit>(
        r#"
        UPDATE stock_units
        SET deleted_at = ?1, updated_at = ?1
        WHERE id = ?2 AND org_id = ?3 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(now)
    .bind(id)
    .bind(org_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(unit)
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use ledger_core::{ExpiryPolicy, IntakeTarget, LedgerContext, NewStockUnit};

    const IMEI: &str = "356938035643815";

    #[tokio::test]
    async fn test_reads_scoped_to_org_and_live_units() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = db.ledger(ExpiryPolicy::StatusOnly);
        let ctx = LedgerContext::new("org-1", "stock-room");
        let unit = ledger
            .intake(
                &ctx,
                IntakeTarget::New(NewStockUnit::serialized("handset-s24", IMEI)),
                1,
            )
            .await
            .unwrap();

        let repo = db.stock_units();
        assert_eq!(repo.get_by_id("org-1", &unit.id).await.unwrap().unwrap().id, unit.id);
        assert!(repo.get_by_id("org-2", &unit.id).await.unwrap().is_none());

        let found = repo.find_by_hardware_id("org-1", IMEI).await.unwrap().unwrap();
        assert_eq!(found.id, unit.id);
        assert!(repo.find_by_hardware_id("org-2", IMEI).await.unwrap().is_none());

        ledger.retire(&ctx, &unit.id).await.unwrap();

        assert!(repo.get_by_id("org-1", &unit.id).await.unwrap().is_none());
        assert!(repo.find_by_hardware_id("org-1", IMEI).await.unwrap().is_none());
        assert_eq!(repo.count("org-1").await.unwrap(), 0);

        let retired = repo
            .get_including_deleted("org-1", &unit.id)
            .await
            .unwrap()
            .unwrap();
        assert!(retired.is_deleted());
        assert!(repo
            .get_including_deleted("org-2", &unit.id)
            .await
            .unwrap()
            .is_none());
    }
}
