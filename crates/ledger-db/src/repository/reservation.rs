//! # Reservation Repository
//!
//! Database operations for reservations.
//!
//! Status changes are conditional on the row still being ACTIVE, so a
//! transition can never overwrite a terminal status even if the caller's
//! earlier read is stale.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use ledger_core::{Reservation, ReservationHold, ReservationStatus};

/// Repository for reservation reads.
#[derive(Debug, Clone)]
pub struct ReservationRepository {
    pool: SqlitePool,
}

impl ReservationRepository {
    /// Creates a new ReservationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReservationRepository { pool }
    }

    /// Gets a reservation by ID.
    pub async fn get_by_id(&self, org_id: &str, id: &str) -> DbResult<Option<Reservation>> {
        fetch(&self.pool, org_id, id).await
    }

    /// Lists a unit's reservations, newest first, optionally by status.
    pub async fn list_for_unit(
        &self,
        org_id: &str,
        stock_unit_id: &str,
        status: Option<ReservationStatus>,
    ) -> DbResult<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE org_id = ?1 AND stock_unit_id = ?2
              AND (?3 IS NULL OR status = ?3)
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(org_id)
        .bind(stock_unit_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(reservations)
    }

    /// Finds ACTIVE reservations whose expiry has passed, across all
    /// organizations, earliest expiry first.
    pub async fn find_expired(&self, now: DateTime<Utc>, limit: u32) -> DbResult<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE status = ?1
              AND expires_at IS NOT NULL
              AND expires_at <= ?2
            ORDER BY expires_at, rowid
            LIMIT ?3
            "#,
        )
        .bind(ReservationStatus::Active)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(reservations)
    }

    /// Returns the ACTIVE holds against a unit.
    pub async fn active_holds(
        &self,
        org_id: &str,
        stock_unit_id: &str,
    ) -> DbResult<Vec<ReservationHold>> {
        fetch_active_holds(&self.pool, org_id, stock_unit_id).await
    }
}

// =============================================================================
// Transaction Statements (Ledger facade only)
// =============================================================================

pub(crate) async fn fetch<'e, E>(executor: E, org_id: &str, id: &str) -> DbResult<Option<Reservation>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let reservation = sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations WHERE id = ?1 AND org_id = ?2",
    )
    .bind(id)
    .bind(org_id)
    .fetch_optional(executor)
    .await?;

    Ok(reservation)
}

pub(crate) async fn fetch_active_holds<'e, E>(
    executor: E,
    org_id: &str,
    stock_unit_id: &str,
) -> DbResult<Vec<ReservationHold>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let holds = sqlx::query_as::<_, ReservationHold>(
        r#"
        SELECT quantity, expires_at FROM reservations
        WHERE org_id = ?1 AND stock_unit_id = ?2 AND status = ?3
        "#,
    )
    .bind(org_id)
    .bind(stock_unit_id)
    .bind(ReservationStatus::Active)
    .fetch_all(executor)
    .await?;

    Ok(holds)
}

pub(crate) async fn count_active<'e, E>(executor: E, org_id: &str, stock_unit_id: &str) -> DbResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM reservations
        WHERE org_id = ?1 AND stock_unit_id = ?2 AND status = ?3
        "#,
    )
    .bind(org_id)
    .bind(stock_unit_id)
    .bind(ReservationStatus::Active)
    .fetch_one(executor)
    .await?;

    Ok(count)
}

pub(crate) async fn insert(conn: &mut SqliteConnection, reservation: &Reservation) -> DbResult<()> {
    debug!(
        org_id = %reservation.org_id,
        reservation_id = %reservation.id,
        stock_unit_id = %reservation.stock_unit_id,
        quantity = reservation.quantity,
        "Inserting reservation"
    );

    sqlx::query(
        r#"
        INSERT INTO reservations (
            id, org_id, stock_unit_id, quantity, status,
            expires_at, linked_sale_id, notes, created_by,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&reservation.id)
    .bind(&reservation.org_id)
    .bind(&reservation.stock_unit_id)
    .bind(reservation.quantity)
    .bind(reservation.status)
    .bind(reservation.expires_at)
    .bind(&reservation.linked_sale_id)
    .bind(&reservation.notes)
    .bind(&reservation.created_by)
    .bind(reservation.created_at)
    .bind(reservation.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Moves an ACTIVE reservation to `status`. `None` if it was not ACTIVE.
pub(crate) async fn finish(
    conn: &mut SqliteConnection,
    org_id: &str,
    id: &str,
    status: ReservationStatus,
    now: DateTime<Utc>,
) -> DbResult<Option<Reservation>> {
    debug!(org_id, reservation_id = id, %status, "Finishing reservation");

    let reservation = sqlx::query_as::<_, Reservation>(
        r#"
        UPDATE reservations
        SET status = ?1, updated_at = ?2
        WHERE id = ?3 AND org_id = ?4 AND status = ?5
        RETURNING *
        "#,
    )
    .bind(status)
    .bind(now)
    .bind(id)
    .bind(org_id)
    .bind(ReservationStatus::Active)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(reservation)
}

/// Moves the expiry of an ACTIVE reservation. `None` if it was not ACTIVE
/// or does not exist.
pub(crate) async fn set_expiry(
    conn: &mut SqliteConnection,
    org_id: &str,
    id: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DbResult<Option<Reservation>> {
    debug!(org_id, reservation_id = id, %expires_at, "Extending reservation");

    let reservation = sqlx::query_as::<_, Reservation>(
        r#"
        UPDATE reservations
        SET expires_at = ?1, updated_at = ?2
        WHERE id = ?3 AND org_id = ?4 AND status = ?5
        RETURNING *
        "#,
    )
    .bind(expires_at)
    .bind(now)
    .bind(id)
    .bind(org_id)
    .bind(ReservationStatus::Active)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(reservation)
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use chrono::{Duration, Utc};
    use ledger_core::{
        ExpiryPolicy, IntakeTarget, LedgerContext, NewStockUnit, ReservationHold, ReserveOptions,
    };

    #[tokio::test]
    async fn test_get_and_active_holds() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = db.ledger(ExpiryPolicy::StatusOnly);
        let ctx = LedgerContext::new("org-1", "cashier-1");
        let unit = ledger
            .intake(&ctx, IntakeTarget::New(NewStockUnit::bulk("wall-charger")), 10)
            .await
            .unwrap();

        let expires_at = Utc::now() + Duration::minutes(30);
        let timed = ledger
            .reserve(&ctx, &unit.id, 2, ReserveOptions {
                expires_at: Some(expires_at),
                ..ReserveOptions::default()
            })
            .await
            .unwrap();
        let released = ledger
            .reserve(&ctx, &unit.id, 3, ReserveOptions::default())
            .await
            .unwrap();
        ledger.release(&ctx, &released.id).await.unwrap();

        let repo = db.reservations();
        let fetched = repo.get_by_id("org-1", &timed.id).await.unwrap().unwrap();
        assert_eq!(fetched.quantity, 2);
        assert!(repo.get_by_id("org-2", &timed.id).await.unwrap().is_none());

        let holds = repo.active_holds("org-1", &unit.id).await.unwrap();
        assert_eq!(holds, vec![ReservationHold::new(2, Some(expires_at))]);
        assert!(repo.active_holds("org-2", &unit.id).await.unwrap().is_empty());
    }
}
