//! # Movement Repository
//!
//! The append-only movement log.
//!
//! ## Ordering
//! `seq` (INTEGER PRIMARY KEY AUTOINCREMENT) is the creation order.
//! Listings are newest first (`seq DESC`); replay is oldest first
//! (`seq ASC`). Timestamps are never used to order the log.
//!
//! There is no update or delete here. The table's triggers abort any
//! attempt from outside this crate as well.

use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use ledger_core::{MovementMetadata, MovementType, Page, StockMovement};

/// Raw `stock_movements` row; metadata is JSON text.
#[derive(Debug, FromRow)]
struct MovementRow {
    id: String,
    org_id: String,
    stock_unit_id: String,
    movement_type: MovementType,
    quantity_before: i64,
    quantity_after: i64,
    quantity: i64,
    reason: Option<String>,
    reservation_id: Option<String>,
    linked_sale_id: Option<String>,
    actor_id: String,
    metadata: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = DbError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let metadata = row
            .metadata
            .as_deref()
            .map(MovementMetadata::from_json)
            .transpose()?;

        Ok(StockMovement {
            id: row.id,
            org_id: row.org_id,
            stock_unit_id: row.stock_unit_id,
            movement_type: row.movement_type,
            quantity_before: row.quantity_before,
            quantity_after: row.quantity_after,
            quantity: row.quantity,
            reason: row.reason,
            reservation_id: row.reservation_id,
            linked_sale_id: row.linked_sale_id,
            actor_id: row.actor_id,
            metadata,
            created_at: row.created_at,
        })
    }
}

fn into_movements(rows: Vec<MovementRow>) -> DbResult<Vec<StockMovement>> {
    rows.into_iter().map(StockMovement::try_from).collect()
}

/// Repository for movement history.
#[derive(Debug, Clone)]
pub struct MovementRepository {
    pool: SqlitePool,
}

impl MovementRepository {
    /// Creates a new MovementRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MovementRepository { pool }
    }

    /// One page of a unit's movements, newest first. `page` is 1-based.
    pub async fn list_for_unit(
        &self,
        org_id: &str,
        stock_unit_id: &str,
        page: u32,
        limit: u32,
    ) -> DbResult<Page<StockMovement>> {
        let total = self.count_for_unit(org_id, stock_unit_id).await?;
        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);

        let rows = sqlx::query_as::<_, MovementRow>(
            r#"
            SELECT * FROM stock_movements
            WHERE org_id = ?1 AND stock_unit_id = ?2
            ORDER BY seq DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(org_id)
        .bind(stock_unit_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: into_movements(rows)?,
            page,
            limit,
            total,
        })
    }

    /// Number of movements recorded for a unit.
    pub async fn count_for_unit(&self, org_id: &str, stock_unit_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stock_movements WHERE org_id = ?1 AND stock_unit_id = ?2",
        )
        .bind(org_id)
        .bind(stock_unit_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Every movement of a unit, oldest first.
    pub async fn history(&self, org_id: &str, stock_unit_id: &str) -> DbResult<Vec<StockMovement>> {
        fetch_history(&self.pool, org_id, stock_unit_id).await
    }
}

// =============================================================================
// Transaction Statements (Ledger facade only)
// =============================================================================

pub(crate) async fn fetch_history<'e, E>(
    executor: E,
    org_id: &str,
    stock_unit_id: &str,
) -> DbResult<Vec<StockMovement>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, MovementRow>(
        r#"
        SELECT * FROM stock_movements
        WHERE org_id = ?1 AND stock_unit_id = ?2
        ORDER BY seq ASC
        "#,
    )
    .bind(org_id)
    .bind(stock_unit_id)
    .fetch_all(executor)
    .await?;

    into_movements(rows)
}

pub(crate) async fn append(conn: &mut SqliteConnection, movement: &StockMovement) -> DbResult<()> {
    debug!(
        org_id = %movement.org_id,
        stock_unit_id = %movement.stock_unit_id,
        movement_type = %movement.movement_type,
        quantity_before = movement.quantity_before,
        quantity_after = movement.quantity_after,
        "Appending movement"
    );

    let metadata = movement
        .metadata
        .as_ref()
        .map(MovementMetadata::to_json)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, org_id, stock_unit_id, movement_type,
            quantity_before, quantity_after, quantity,
            reason, reservation_id, linked_sale_id,
            actor_id, metadata, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(&movement.id)
    .bind(&movement.org_id)
    .bind(&movement.stock_unit_id)
    .bind(movement.movement_type)
    .bind(movement.quantity_before)
    .bind(movement.quantity_after)
    .bind(movement.quantity)
    .bind(&movement.reason)
    .bind(&movement.reservation_id)
    .bind(&movement.linked_sale_id)
    .bind(&movement.actor_id)
    .bind(metadata)
    .bind(movement.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
