//! # Ledger Facade
//!
//! The single entry point for every stock change.
//!
//! ## Transaction Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate input (ledger-core::validation)    ← no transaction yet      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN                                                                  │
//! │  1. lock: UPDATE stock_units SET version = version + 1 ... RETURNING * │
//! │  2. read: ACTIVE reservation holds (same transaction)                  │
//! │  3. plan: ledger-core decides; any CoreError → ROLLBACK                │
//! │  4. write: stock unit / reservation                                    │
//! │  5. append: one stock_movements row                                    │
//! │  COMMIT                                                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  info!(org_id, stock_unit_id, quantity_before, quantity_after)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A transaction dropped without `commit()` rolls back, so every early
//! return via `?` leaves no partial state.
//!
//! ## Operations
//! | Operation          | Movement | Changes quantity |
//! |--------------------|----------|------------------|
//! | `reserve`          | RESERVE  | no               |
//! | `release`          | RELEASE  | no               |
//! | `confirm`          | SOLD     | yes (down)       |
//! | `adjust`           | ADJUST   | yes (±)          |
//! | `intake`           | IN       | yes (up)         |
//! | `stock_out`        | OUT      | yes (down)       |
//! | `extend`, `retire` | none     | no               |

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use ledger_core::replay::{self, AuditReport};
use ledger_core::reservation::{
    available_quantity, check_reservable, ensure_still_held, ensure_transition,
};
use ledger_core::stock::{
    plan_adjustment, plan_confirm, plan_intake, plan_new_unit, plan_stock_out, QuantityChange,
};
use ledger_core::validation::{
    validate_context, validate_expiry, validate_hardware_id, validate_identifier, validate_notes,
    validate_page, validate_quantity, validate_quantity_change, validate_reason,
};
use ledger_core::{
    Availability, CoreError, ExpiryPolicy, IntakeTarget, KnownMetadata, LedgerContext,
    MovementType, NewStockUnit, Page, Reservation, ReservationAction, ReservationStatus,
    ReserveOptions, StockMovement, StockStatus, StockUnit, ValidationError,
};

use crate::error::{DbError, LedgerError, LedgerResult};
use crate::repository::{
    movement, reservation, stock_unit, MovementRepository, ReservationRepository,
};

const STOCK_UNIT: &str = "StockUnit";
const RESERVATION: &str = "Reservation";

/// Transactional stock ledger.
///
/// Cheap to clone; every clone shares the pool.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
    policy: ExpiryPolicy,
}

impl Ledger {
    pub fn new(pool: SqlitePool, policy: ExpiryPolicy) -> Self {
        Ledger { pool, policy }
    }

    /// Whether expired ACTIVE reservations still hold stock.
    pub fn expiry_policy(&self) -> ExpiryPolicy {
        self.policy
    }

    // =========================================================================
    // Reservations
    // =========================================================================

    /// Holds `quantity` units of a stock unit.
    ///
    /// ## Errors
    /// - `NotFound` - unit missing, in another org, or soft-deleted
    /// - `InvalidState` - unit status is not AVAILABLE
    /// - `InsufficientStock` - `quantity` exceeds the unreserved quantity
    /// - `ValidationError` - quantity < 1, expiry not in the future
    pub async fn reserve(
        &self,
        ctx: &LedgerContext,
        stock_unit_id: &str,
        quantity: i64,
        opts: ReserveOptions,
    ) -> LedgerResult<Reservation> {
        let now = Utc::now();
        validate_context(ctx)?;
        validate_identifier("stock_unit_id", stock_unit_id)?;
        validate_quantity(quantity)?;
        if let Some(expires_at) = opts.expires_at {
            validate_expiry(expires_at, now)?;
        }
        if let Some(linked_sale_id) = &opts.linked_sale_id {
            validate_identifier("linked_sale_id", linked_sale_id)?;
        }
        let notes = validate_notes(opts.notes.as_deref())?;

        let mut tx = self.pool.begin().await?;

        let unit = stock_unit::lock(&mut tx, &ctx.org_id, stock_unit_id, now)
            .await?
            .ok_or_else(|| CoreError::not_found(STOCK_UNIT, stock_unit_id))?;

        let holds = reservation::fetch_active_holds(&mut *tx, &ctx.org_id, &unit.id).await?;
        let availability = available_quantity(unit.quantity, &holds, now, self.policy);
        check_reservable(&unit, quantity, &availability)?;

        let created = Reservation {
            id: Uuid::new_v4().to_string(),
            org_id: ctx.org_id.clone(),
            stock_unit_id: unit.id.clone(),
            quantity,
            status: ReservationStatus::Active,
            expires_at: opts.expires_at,
            linked_sale_id: opts.linked_sale_id,
            notes,
            created_by: ctx.actor_id.clone(),
            created_at: now,
            updated_at: now,
        };
        reservation::insert(&mut tx, &created).await?;

        let metadata = KnownMetadata::Reservation {
            reservation_quantity: quantity,
            available_after: availability.available - quantity,
            expires_at: created.expires_at,
        };
        let entry = StockMovement::record(
            ctx,
            &unit.id,
            MovementType::Reserve,
            QuantityChange::unchanged(unit.quantity),
            now,
        )
        .with_reservation(&created.id)
        .with_linked_sale(created.linked_sale_id.clone())
        .with_metadata(metadata.into());
        movement::append(&mut tx, &entry).await?;

        tx.commit().await?;

        info!(
            org_id = %ctx.org_id,
            stock_unit_id = %unit.id,
            reservation_id = %created.id,
            quantity,
            available_after = availability.available - quantity,
            "Reservation created"
        );

        Ok(created)
    }

    /// Cancels an ACTIVE reservation, freeing its quantity.
    ///
    /// Releasing an already released (or confirmed) reservation fails with
    /// `InvalidState`.
    pub async fn release(&self, ctx: &LedgerContext, reservation_id: &str) -> LedgerResult<Reservation> {
        self.release_reservation(ctx, reservation_id, None).await
    }

    /// Release path shared with the expiry sweeper.
    ///
    /// With `expired_as_of`, the reservation must still be expired at that
    /// instant once locked; one extended since the sweeper's scan is left
    /// alone (`InvalidState`).
    pub(crate) async fn release_reservation(
        &self,
        ctx: &LedgerContext,
        reservation_id: &str,
        expired_as_of: Option<DateTime<Utc>>,
    ) -> LedgerResult<Reservation> {
        let expired = expired_as_of.is_some();
        let now = Utc::now();
        validate_context(ctx)?;
        validate_identifier("reservation_id", reservation_id)?;

        let mut tx = self.pool.begin().await?;

        let (unit, current) = self
            .lock_reservation(&mut tx, ctx, reservation_id, now)
            .await?;
        ensure_transition(&current, ReservationAction::Release)?;
        if let Some(as_of) = expired_as_of {
            if !current.is_expired_at(as_of) {
                return Err(
                    CoreError::invalid_state(RESERVATION, &current.id, "not expired", "expire").into(),
                );
            }
        }

        let released = self
            .finish_reservation(&mut tx, ctx, &current, ReservationStatus::Cancelled, now)
            .await?;

        let metadata = KnownMetadata::Release {
            reservation_quantity: released.quantity,
            expired,
        };
        let entry = StockMovement::record(
            ctx,
            &unit.id,
            MovementType::Release,
            QuantityChange::unchanged(unit.quantity),
            now,
        )
        .with_reservation(&released.id)
        .with_linked_sale(released.linked_sale_id.clone())
        .with_metadata(metadata.into());
        movement::append(&mut tx, &entry).await?;

        tx.commit().await?;

        info!(
            org_id = %ctx.org_id,
            stock_unit_id = %unit.id,
            reservation_id = %released.id,
            quantity = released.quantity,
            expired,
            "Reservation released"
        );

        Ok(released)
    }

    /// Converts an ACTIVE reservation into a permanent stock deduction.
    ///
    /// A hardware-identified unit reaching 0 becomes SOLD. Under
    /// `ExcludeExpired` a lapsed hold is `InvalidState`.
    pub async fn confirm(&self, ctx: &LedgerContext, reservation_id: &str) -> LedgerResult<Reservation> {
        let now = Utc::now();
        validate_context(ctx)?;
        validate_identifier("reservation_id", reservation_id)?;

        let mut tx = self.pool.begin().await?;

        let (unit, current) = self
            .lock_reservation(&mut tx, ctx, reservation_id, now)
            .await?;
        ensure_transition(&current, ReservationAction::Confirm)?;
        ensure_still_held(&current, ReservationAction::Confirm, now, self.policy)?;

        let plan = plan_confirm(&unit, current.quantity)?;
        let updated = apply_plan(&mut tx, ctx, &unit, plan.change, plan.status, now).await?;

        let confirmed = self
            .finish_reservation(&mut tx, ctx, &current, ReservationStatus::Confirmed, now)
            .await?;

        let metadata = KnownMetadata::Sale {
            reservation_quantity: confirmed.quantity,
            status_after: updated.status,
        };
        let entry = StockMovement::record(ctx, &unit.id, MovementType::Sold, plan.change, now)
            .with_reservation(&confirmed.id)
            .with_linked_sale(confirmed.linked_sale_id.clone())
            .with_metadata(metadata.into());
        movement::append(&mut tx, &entry).await?;

        tx.commit().await?;

        info!(
            org_id = %ctx.org_id,
            stock_unit_id = %unit.id,
            reservation_id = %confirmed.id,
            quantity_before = plan.change.before,
            quantity_after = plan.change.after,
            status = %updated.status,
            "Reservation confirmed"
        );

        Ok(confirmed)
    }

    /// Moves the expiry of an ACTIVE reservation. No movement is written.
    ///
    /// Under `ExcludeExpired` a hold that has already lapsed cannot be
    /// revived; release it and reserve again.
    pub async fn extend(
        &self,
        ctx: &LedgerContext,
        reservation_id: &str,
        expires_at: DateTime<Utc>,
    ) -> LedgerResult<Reservation> {
        let now = Utc::now();
        validate_context(ctx)?;
        validate_identifier("reservation_id", reservation_id)?;
        validate_expiry(expires_at, now)?;

        let mut tx = self.pool.begin().await?;

        let (_unit, current) = self
            .lock_reservation(&mut tx, ctx, reservation_id, now)
            .await?;
        ensure_transition(&current, ReservationAction::Extend)?;
        ensure_still_held(&current, ReservationAction::Extend, now, self.policy)?;

        let extended = reservation::set_expiry(&mut tx, &ctx.org_id, &current.id, expires_at, now)
            .await?
            .ok_or_else(|| stale_reservation(&current))?;

        tx.commit().await?;

        info!(
            org_id = %ctx.org_id,
            stock_unit_id = %extended.stock_unit_id,
            reservation_id = %extended.id,
            %expires_at,
            "Reservation extended"
        );

        Ok(extended)
    }

    // =========================================================================
    // Direct Stock Changes
    // =========================================================================

    /// Applies a manual stock-take correction.
    ///
    /// ## Errors
    /// - `NegativeStock` - the result would be below zero (nothing written)
    /// - `InsufficientStock` - the result would be below the reserved quantity
    /// - `ValidationError` - zero change, empty reason, hardware unit outside {0, 1}
    pub async fn adjust(
        &self,
        ctx: &LedgerContext,
        stock_unit_id: &str,
        quantity_change: i64,
        reason: &str,
    ) -> LedgerResult<StockUnit> {
        let now = Utc::now();
        validate_context(ctx)?;
        validate_identifier("stock_unit_id", stock_unit_id)?;
        validate_quantity_change(quantity_change)?;
        let reason = validate_reason(reason)?;

        let mut tx = self.pool.begin().await?;

        let unit = stock_unit::lock(&mut tx, &ctx.org_id, stock_unit_id, now)
            .await?
            .ok_or_else(|| CoreError::not_found(STOCK_UNIT, stock_unit_id))?;

        let holds = reservation::fetch_active_holds(&mut *tx, &ctx.org_id, &unit.id).await?;
        let availability = available_quantity(unit.quantity, &holds, now, self.policy);

        let plan = plan_adjustment(&unit, quantity_change, availability.reserved)?;
        let updated = apply_plan(&mut tx, ctx, &unit, plan.change, plan.status, now).await?;

        let metadata = KnownMetadata::Adjustment {
            reserved_at_adjustment: availability.reserved,
        };
        let entry = StockMovement::record(ctx, &unit.id, MovementType::Adjust, plan.change, now)
            .with_reason(reason)
            .with_metadata(metadata.into());
        movement::append(&mut tx, &entry).await?;

        tx.commit().await?;

        info!(
            org_id = %ctx.org_id,
            stock_unit_id = %unit.id,
            quantity_before = plan.change.before,
            quantity_after = plan.change.after,
            "Stock adjusted"
        );

        Ok(updated)
    }

    /// Receives stock into an existing unit or a new one.
    pub async fn intake(
        &self,
        ctx: &LedgerContext,
        target: IntakeTarget,
        quantity: i64,
    ) -> LedgerResult<StockUnit> {
        validate_context(ctx)?;
        validate_quantity(quantity)?;

        match target {
            IntakeTarget::Existing(stock_unit_id) => {
                self.intake_existing(ctx, &stock_unit_id, quantity).await
            }
            IntakeTarget::New(new_unit) => self.intake_new(ctx, new_unit, quantity).await,
        }
    }

    async fn intake_existing(
        &self,
        ctx: &LedgerContext,
        stock_unit_id: &str,
        quantity: i64,
    ) -> LedgerResult<StockUnit> {
        let now = Utc::now();
        validate_identifier("stock_unit_id", stock_unit_id)?;

        let mut tx = self.pool.begin().await?;

        let unit = stock_unit::lock(&mut tx, &ctx.org_id, stock_unit_id, now)
            .await?
            .ok_or_else(|| CoreError::not_found(STOCK_UNIT, stock_unit_id))?;

        let plan = plan_intake(&unit, quantity)?;
        let updated = apply_plan(&mut tx, ctx, &unit, plan.change, plan.status, now).await?;

        let entry = StockMovement::record(ctx, &unit.id, MovementType::In, plan.change, now)
            .with_metadata(KnownMetadata::Intake { new_unit: false }.into());
        movement::append(&mut tx, &entry).await?;

        tx.commit().await?;

        info!(
            org_id = %ctx.org_id,
            stock_unit_id = %unit.id,
            quantity_before = plan.change.before,
            quantity_after = plan.change.after,
            "Stock received"
        );

        Ok(updated)
    }

    async fn intake_new(
        &self,
        ctx: &LedgerContext,
        new_unit: NewStockUnit,
        quantity: i64,
    ) -> LedgerResult<StockUnit> {
        let now = Utc::now();
        validate_identifier("catalog_item_id", &new_unit.catalog_item_id)?;
        let hardware_id = new_unit
            .hardware_id
            .as_deref()
            .map(validate_hardware_id)
            .transpose()?;
        let new_unit = NewStockUnit {
            hardware_id,
            ..new_unit
        };

        let change = plan_new_unit(&new_unit, quantity)?;

        let unit = StockUnit {
            id: Uuid::new_v4().to_string(),
            org_id: ctx.org_id.clone(),
            catalog_item_id: new_unit.catalog_item_id,
            hardware_id: new_unit.hardware_id,
            quantity: change.after,
            status: StockStatus::Available,
            version: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut tx = self.pool.begin().await?;

        stock_unit::insert(&mut tx, &unit)
            .await
            .map_err(|err| match (err, &unit.hardware_id) {
                (DbError::UniqueViolation { .. }, Some(hardware_id)) => {
                    LedgerError::from(ValidationError::Duplicate {
                        field: "hardware_id".to_string(),
                        value: hardware_id.clone(),
                    })
                }
                (err, _) => LedgerError::Db(err),
            })?;

        let entry = StockMovement::record(ctx, &unit.id, MovementType::In, change, now)
            .with_metadata(KnownMetadata::Intake { new_unit: true }.into());
        movement::append(&mut tx, &entry).await?;

        tx.commit().await?;

        info!(
            org_id = %ctx.org_id,
            stock_unit_id = %unit.id,
            catalog_item_id = %unit.catalog_item_id,
            quantity_before = change.before,
            quantity_after = change.after,
            "Stock unit created"
        );

        Ok(unit)
    }

    /// Removes unreserved stock (write-off, walk-in sale without a hold).
    pub async fn stock_out(
        &self,
        ctx: &LedgerContext,
        stock_unit_id: &str,
        quantity: i64,
        reason: &str,
        linked_sale_id: Option<String>,
    ) -> LedgerResult<StockUnit> {
        let now = Utc::now();
        validate_context(ctx)?;
        validate_identifier("stock_unit_id", stock_unit_id)?;
        validate_quantity(quantity)?;
        let reason = validate_reason(reason)?;
        if let Some(linked_sale_id) = &linked_sale_id {
            validate_identifier("linked_sale_id", linked_sale_id)?;
        }

        let mut tx = self.pool.begin().await?;

        let unit = stock_unit::lock(&mut tx, &ctx.org_id, stock_unit_id, now)
            .await?
            .ok_or_else(|| CoreError::not_found(STOCK_UNIT, stock_unit_id))?;

        let holds = reservation::fetch_active_holds(&mut *tx, &ctx.org_id, &unit.id).await?;
        let availability = available_quantity(unit.quantity, &holds, now, self.policy);

        let plan = plan_stock_out(&unit, quantity, availability.reserved)?;
        let updated = apply_plan(&mut tx, ctx, &unit, plan.change, plan.status, now).await?;

        let metadata = KnownMetadata::StockOut {
            status_after: updated.status,
        };
        let entry = StockMovement::record(ctx, &unit.id, MovementType::Out, plan.change, now)
            .with_reason(reason)
            .with_linked_sale(linked_sale_id)
            .with_metadata(metadata.into());
        movement::append(&mut tx, &entry).await?;

        tx.commit().await?;

        info!(
            org_id = %ctx.org_id,
            stock_unit_id = %unit.id,
            quantity_before = plan.change.before,
            quantity_after = plan.change.after,
            status = %updated.status,
            "Stock removed"
        );

        Ok(updated)
    }

    /// Soft-deletes a unit with no ACTIVE reservations.
    pub async fn retire(&self, ctx: &LedgerContext, stock_unit_id: &str) -> LedgerResult<StockUnit> {
        let now = Utc::now();
        validate_context(ctx)?;
        validate_identifier("stock_unit_id", stock_unit_id)?;

        let mut tx = self.pool.begin().await?;

        let unit = stock_unit::lock(&mut tx, &ctx.org_id, stock_unit_id, now)
            .await?
            .ok_or_else(|| CoreError::not_found(STOCK_UNIT, stock_unit_id))?;

        let active = reservation::count_active(&mut *tx, &ctx.org_id, &unit.id).await?;
        if active > 0 {
            return Err(CoreError::invalid_state(
                STOCK_UNIT,
                &unit.id,
                format!("held by {} active reservation(s)", active),
                "retire",
            )
            .into());
        }

        let retired = stock_unit::soft_delete(&mut tx, &ctx.org_id, &unit.id, now)
            .await?
            .ok_or_else(|| CoreError::not_found(STOCK_UNIT, &unit.id))?;

        tx.commit().await?;

        info!(
            org_id = %ctx.org_id,
            stock_unit_id = %retired.id,
            quantity = retired.quantity,
            "Stock unit retired"
        );

        Ok(retired)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// On-hand, reserved and available quantity of a live unit.
    pub async fn availability(&self, ctx: &LedgerContext, stock_unit_id: &str) -> LedgerResult<Availability> {
        self.availability_at(ctx, stock_unit_id, Utc::now()).await
    }

    /// Same as [`Ledger::availability`], evaluating expiry at `now`.
    pub async fn availability_at(
        &self,
        ctx: &LedgerContext,
        stock_unit_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<Availability> {
        validate_context(ctx)?;
        let unit = self.get_stock_unit(ctx, stock_unit_id).await?;
        let holds = reservation::fetch_active_holds(&self.pool, &ctx.org_id, &unit.id).await?;

        Ok(available_quantity(unit.quantity, &holds, now, self.policy))
    }

    /// Gets a live stock unit.
    pub async fn get_stock_unit(&self, ctx: &LedgerContext, stock_unit_id: &str) -> LedgerResult<StockUnit> {
        stock_unit::fetch_including_deleted(&self.pool, &ctx.org_id, stock_unit_id)
            .await?
            .filter(|unit| !unit.is_deleted())
            .ok_or_else(|| CoreError::not_found(STOCK_UNIT, stock_unit_id).into())
    }

    /// Gets a reservation in any status.
    pub async fn get_reservation(&self, ctx: &LedgerContext, reservation_id: &str) -> LedgerResult<Reservation> {
        reservation::fetch(&self.pool, &ctx.org_id, reservation_id)
            .await?
            .ok_or_else(|| CoreError::not_found(RESERVATION, reservation_id).into())
    }

    /// Lists a unit's reservations, newest first.
    pub async fn list_reservations(
        &self,
        ctx: &LedgerContext,
        stock_unit_id: &str,
        status: Option<ReservationStatus>,
    ) -> LedgerResult<Vec<Reservation>> {
        self.ensure_unit_known(ctx, stock_unit_id).await?;

        let repository = ReservationRepository::new(self.pool.clone());
        Ok(repository.list_for_unit(&ctx.org_id, stock_unit_id, status).await?)
    }

    /// One page of a unit's movements, newest first. `page` is 1-based.
    ///
    /// History of retired units stays readable.
    pub async fn list_movements(
        &self,
        ctx: &LedgerContext,
        stock_unit_id: &str,
        page: u32,
        limit: u32,
    ) -> LedgerResult<Page<StockMovement>> {
        validate_page(page, limit)?;
        self.ensure_unit_known(ctx, stock_unit_id).await?;

        let repository = MovementRepository::new(self.pool.clone());
        Ok(repository
            .list_for_unit(&ctx.org_id, stock_unit_id, page, limit)
            .await?)
    }

    /// Replays a unit's movement log against its stored quantity.
    pub async fn audit(&self, ctx: &LedgerContext, stock_unit_id: &str) -> LedgerResult<AuditReport> {
        // Both reads in one transaction so they see the same snapshot.
        let mut tx = self.pool.begin().await?;

        let unit = stock_unit::fetch_including_deleted(&mut *tx, &ctx.org_id, stock_unit_id)
            .await?
            .ok_or_else(|| CoreError::not_found(STOCK_UNIT, stock_unit_id))?;
        let history = movement::fetch_history(&mut *tx, &ctx.org_id, &unit.id).await?;

        tx.commit().await?;

        let report = replay::audit(&unit.id, unit.quantity, &history);
        if !report.consistent {
            warn!(
                org_id = %ctx.org_id,
                stock_unit_id = %unit.id,
                stored_quantity = report.stored_quantity,
                replayed_quantity = ?report.replayed_quantity,
                chain_breaks = report.chain_breaks.len(),
                "Movement log does not reproduce stored quantity"
            );
        }

        Ok(report)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// NotFound unless the unit exists in the org (soft-deleted included).
    async fn ensure_unit_known(&self, ctx: &LedgerContext, stock_unit_id: &str) -> LedgerResult<()> {
        validate_context(ctx)?;
        stock_unit::fetch_including_deleted(&self.pool, &ctx.org_id, stock_unit_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(STOCK_UNIT, stock_unit_id).into())
    }

    /// Locks the reservation's unit, then reads the reservation.
    async fn lock_reservation(
        &self,
        conn: &mut sqlx::SqliteConnection,
        ctx: &LedgerContext,
        reservation_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<(StockUnit, Reservation)> {
        let unit = stock_unit::lock_by_reservation(conn, &ctx.org_id, reservation_id, now).await?;

        let current = reservation::fetch(&mut *conn, &ctx.org_id, reservation_id)
            .await?
            .ok_or_else(|| CoreError::not_found(RESERVATION, reservation_id))?;

        let unit = unit.ok_or_else(|| CoreError::not_found(STOCK_UNIT, &current.stock_unit_id))?;

        Ok((unit, current))
    }

    async fn finish_reservation(
        &self,
        conn: &mut sqlx::SqliteConnection,
        ctx: &LedgerContext,
        current: &Reservation,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> LedgerResult<Reservation> {
        reservation::finish(conn, &ctx.org_id, &current.id, status, now)
            .await?
            .ok_or_else(|| stale_reservation(current))
    }
}

/// Writes a planned quantity change; the conditional UPDATE is the last
/// line of defence against going negative.
async fn apply_plan(
    conn: &mut sqlx::SqliteConnection,
    ctx: &LedgerContext,
    unit: &StockUnit,
    change: QuantityChange,
    status: StockStatus,
    now: DateTime<Utc>,
) -> LedgerResult<StockUnit> {
    stock_unit::apply_change(conn, &ctx.org_id, &unit.id, change.delta(), status, now)
        .await?
        .ok_or_else(|| {
            CoreError::NegativeStock {
                stock_unit_id: unit.id.clone(),
                quantity_before: change.before,
                quantity_change: change.delta(),
            }
            .into()
        })
}

/// The row changed status between our read and our write.
fn stale_reservation(current: &Reservation) -> LedgerError {
    CoreError::invalid_state(RESERVATION, &current.id, current.status, "update").into()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::Duration;
    use ledger_core::ErrorKind;

    async fn setup() -> (Database, Ledger, LedgerContext) {
        setup_with(ExpiryPolicy::StatusOnly).await
    }

    async fn setup_with(policy: ExpiryPolicy) -> (Database, Ledger, LedgerContext) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = db.ledger(policy);
        let ctx = LedgerContext::new("org-1", "cashier-1");
        (db, ledger, ctx)
    }

    async fn bulk_unit(ledger: &Ledger, ctx: &LedgerContext, quantity: i64) -> StockUnit {
        ledger
            .intake(ctx, IntakeTarget::New(NewStockUnit::bulk("usb-c-cable")), quantity)
            .await
            .unwrap()
    }

    async fn imei_unit(ledger: &Ledger, ctx: &LedgerContext, imei: &str) -> StockUnit {
        ledger
            .intake(
                ctx,
                IntakeTarget::New(NewStockUnit::serialized("handset-s24", imei)),
                1,
            )
            .await
            .unwrap()
    }

    async fn movement_count(ledger: &Ledger, ctx: &LedgerContext, unit_id: &str) -> i64 {
        ledger.list_movements(ctx, unit_id, 1, 1).await.unwrap().total
    }

    fn kind_of<T: std::fmt::Debug>(result: LedgerResult<T>) -> ErrorKind {
        result.unwrap_err().kind()
    }

    // -------------------------------------------------------------------------
    // Reserve / release / confirm
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_reserve_then_release_restores_availability() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 5).await;

        let first = ledger
            .reserve(&ctx, &unit.id, 3, ReserveOptions::default())
            .await
            .unwrap();
        assert_eq!(first.status, ReservationStatus::Active);
        assert_eq!(first.quantity, 3);
        assert_eq!(first.created_by, "cashier-1");

        let availability = ledger.availability(&ctx, &unit.id).await.unwrap();
        assert_eq!(availability.available, 2);

        let second = ledger
            .reserve(&ctx, &unit.id, 3, ReserveOptions::default())
            .await;
        assert_eq!(kind_of(second), ErrorKind::InsufficientStock);

        let released = ledger.release(&ctx, &first.id).await.unwrap();
        assert_eq!(released.status, ReservationStatus::Cancelled);

        let availability = ledger.availability(&ctx, &unit.id).await.unwrap();
        assert_eq!(availability.available, 5);
        assert_eq!(availability.reserved, 0);

        // Reservations never change on-hand quantity
        let unit = ledger.get_stock_unit(&ctx, &unit.id).await.unwrap();
        assert_eq!(unit.quantity, 5);
    }

    #[tokio::test]
    async fn test_confirm_sells_hardware_unit() {
        let (_db, ledger, ctx) = setup().await;
        let unit = imei_unit(&ledger, &ctx, "356938035643809").await;

        let reservation = ledger
            .reserve(&ctx, &unit.id, 1, ReserveOptions {
                linked_sale_id: Some("sale-1".into()),
                ..ReserveOptions::default()
            })
            .await
            .unwrap();
        let confirmed = ledger.confirm(&ctx, &reservation.id).await.unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);

        let unit = ledger.get_stock_unit(&ctx, &unit.id).await.unwrap();
        assert_eq!(unit.quantity, 0);
        assert_eq!(unit.status, StockStatus::Sold);

        let page = ledger.list_movements(&ctx, &unit.id, 1, 10).await.unwrap();
        let sold = &page.items[0];
        assert_eq!(sold.movement_type, MovementType::Sold);
        assert_eq!(sold.quantity_before, 1);
        assert_eq!(sold.quantity_after, 0);
        assert_eq!(sold.quantity, -1);
        assert_eq!(sold.reservation_id.as_deref(), Some(reservation.id.as_str()));
        assert_eq!(sold.linked_sale_id.as_deref(), Some("sale-1"));
    }

    #[tokio::test]
    async fn test_reserve_writes_annotative_movement() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 5).await;

        let reservation = ledger
            .reserve(&ctx, &unit.id, 2, ReserveOptions::default())
            .await
            .unwrap();

        let page = ledger.list_movements(&ctx, &unit.id, 1, 10).await.unwrap();
        let reserve = &page.items[0];
        assert_eq!(reserve.movement_type, MovementType::Reserve);
        assert_eq!(reserve.quantity_before, 5);
        assert_eq!(reserve.quantity_after, 5);
        assert_eq!(reserve.quantity, 0);
        assert_eq!(reserve.reservation_id.as_deref(), Some(reservation.id.as_str()));
        assert_eq!(
            reserve.metadata.as_ref().and_then(|m| m.known()),
            Some(&KnownMetadata::Reservation {
                reservation_quantity: 2,
                available_after: 3,
                expires_at: None,
            })
        );
    }

    #[tokio::test]
    async fn test_terminal_reservations_reject_every_action() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 10).await;

        let confirmed = ledger
            .reserve(&ctx, &unit.id, 2, ReserveOptions::default())
            .await
            .unwrap();
        ledger.confirm(&ctx, &confirmed.id).await.unwrap();

        let cancelled = ledger
            .reserve(&ctx, &unit.id, 1, ReserveOptions::default())
            .await
            .unwrap();
        ledger.release(&ctx, &cancelled.id).await.unwrap();

        let before = movement_count(&ledger, &ctx, &unit.id).await;
        let later = Utc::now() + Duration::hours(1);

        for id in [&confirmed.id, &cancelled.id] {
            assert_eq!(kind_of(ledger.confirm(&ctx, id).await), ErrorKind::InvalidState);
            assert_eq!(kind_of(ledger.release(&ctx, id).await), ErrorKind::InvalidState);
            assert_eq!(
                kind_of(ledger.extend(&ctx, id, later).await),
                ErrorKind::InvalidState
            );
        }

        let unit = ledger.get_stock_unit(&ctx, &unit.id).await.unwrap();
        assert_eq!(unit.quantity, 8);
        assert_eq!(movement_count(&ledger, &ctx, &unit.id).await, before);
    }

    #[tokio::test]
    async fn test_failed_reserve_writes_nothing() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 5).await;

        let result = ledger
            .reserve(&ctx, &unit.id, 6, ReserveOptions::default())
            .await;
        match result.unwrap_err() {
            LedgerError::Domain(CoreError::InsufficientStock {
                available,
                requested,
                ..
            }) => {
                assert_eq!(available, 5);
                assert_eq!(requested, 6);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let reservations = ledger.list_reservations(&ctx, &unit.id, None).await.unwrap();
        assert!(reservations.is_empty());
        assert_eq!(movement_count(&ledger, &ctx, &unit.id).await, 1);
    }

    #[tokio::test]
    async fn test_reserve_validation() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 5).await;

        let zero = ledger.reserve(&ctx, &unit.id, 0, ReserveOptions::default()).await;
        assert_eq!(kind_of(zero), ErrorKind::ValidationError);

        let past = ledger
            .reserve(&ctx, &unit.id, 1, ReserveOptions {
                expires_at: Some(Utc::now() - Duration::minutes(1)),
                ..ReserveOptions::default()
            })
            .await;
        assert_eq!(kind_of(past), ErrorKind::ValidationError);

        let missing = ledger
            .reserve(&ctx, "no-such-unit", 1, ReserveOptions::default())
            .await;
        assert_eq!(kind_of(missing), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_reserve_sold_unit_is_invalid_state() {
        let (_db, ledger, ctx) = setup().await;
        let unit = imei_unit(&ledger, &ctx, "356938035643810").await;
        ledger
            .stock_out(&ctx, &unit.id, 1, "walk-in sale", None)
            .await
            .unwrap();

        let result = ledger.reserve(&ctx, &unit.id, 1, ReserveOptions::default()).await;
        assert_eq!(kind_of(result), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_extend_moves_expiry() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 3).await;
        let reservation = ledger
            .reserve(&ctx, &unit.id, 1, ReserveOptions {
                expires_at: Some(Utc::now() + Duration::minutes(10)),
                ..ReserveOptions::default()
            })
            .await
            .unwrap();
        let before = movement_count(&ledger, &ctx, &unit.id).await;

        let new_expiry = Utc::now() + Duration::hours(2);
        let extended = ledger.extend(&ctx, &reservation.id, new_expiry).await.unwrap();
        assert_eq!(extended.expires_at, Some(new_expiry));
        assert_eq!(extended.status, ReservationStatus::Active);
        assert_eq!(movement_count(&ledger, &ctx, &unit.id).await, before);

        let past = ledger
            .extend(&ctx, &reservation.id, Utc::now() - Duration::minutes(1))
            .await;
        assert_eq!(kind_of(past), ErrorKind::ValidationError);

        let missing = ledger.extend(&ctx, "no-such-reservation", new_expiry).await;
        assert_eq!(kind_of(missing), ErrorKind::NotFound);
    }

    // -------------------------------------------------------------------------
    // Adjust / intake / stock out
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_adjust_below_zero_rejected() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 4).await;

        let result = ledger.adjust(&ctx, &unit.id, -10, "stock take").await;
        assert_eq!(kind_of(result), ErrorKind::NegativeStock);

        let unit = ledger.get_stock_unit(&ctx, &unit.id).await.unwrap();
        assert_eq!(unit.quantity, 4);
        assert_eq!(movement_count(&ledger, &ctx, &unit.id).await, 1);
    }

    #[tokio::test]
    async fn test_adjust_records_movement() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 4).await;

        let updated = ledger.adjust(&ctx, &unit.id, 20, "stock take").await.unwrap();
        assert_eq!(updated.quantity, 24);

        let page = ledger.list_movements(&ctx, &unit.id, 1, 10).await.unwrap();
        assert_eq!(page.total, 2);
        let adjust = &page.items[0];
        assert_eq!(adjust.movement_type, MovementType::Adjust);
        assert_eq!(adjust.quantity_before, 4);
        assert_eq!(adjust.quantity_after, 24);
        assert_eq!(adjust.reason.as_deref(), Some("stock take"));
    }

    #[tokio::test]
    async fn test_adjust_cannot_undercut_reservations() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 4).await;
        ledger
            .reserve(&ctx, &unit.id, 3, ReserveOptions::default())
            .await
            .unwrap();

        let result = ledger.adjust(&ctx, &unit.id, -2, "damaged").await;
        assert_eq!(kind_of(result), ErrorKind::InsufficientStock);

        let updated = ledger.adjust(&ctx, &unit.id, -1, "damaged").await.unwrap();
        assert_eq!(updated.quantity, 3);
    }

    #[tokio::test]
    async fn test_adjust_validation() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 4).await;

        assert_eq!(
            kind_of(ledger.adjust(&ctx, &unit.id, 0, "noop").await),
            ErrorKind::ValidationError
        );
        assert_eq!(
            kind_of(ledger.adjust(&ctx, &unit.id, 1, "   ").await),
            ErrorKind::ValidationError
        );

        let imei = imei_unit(&ledger, &ctx, "356938035643811").await;
        assert_eq!(
            kind_of(ledger.adjust(&ctx, &imei.id, 1, "found another").await),
            ErrorKind::ValidationError
        );
    }

    #[tokio::test]
    async fn test_intake_existing_and_returned_handset() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 2).await;

        let updated = ledger
            .intake(&ctx, IntakeTarget::Existing(unit.id.clone()), 8)
            .await
            .unwrap();
        assert_eq!(updated.quantity, 10);

        let handset = imei_unit(&ledger, &ctx, "356938035643812").await;
        ledger
            .stock_out(&ctx, &handset.id, 1, "sold", Some("sale-9".into()))
            .await
            .unwrap();

        // Customer return
        let returned = ledger
            .intake(&ctx, IntakeTarget::Existing(handset.id.clone()), 1)
            .await
            .unwrap();
        assert_eq!(returned.quantity, 1);
        assert_eq!(returned.status, StockStatus::Available);

        let result = ledger
            .intake(&ctx, IntakeTarget::Existing(handset.id.clone()), 1)
            .await;
        assert_eq!(kind_of(result), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_new_hardware_unit_quantity_must_be_one() {
        let (_db, ledger, ctx) = setup().await;

        let result = ledger
            .intake(
                &ctx,
                IntakeTarget::New(NewStockUnit::serialized("handset-s24", "356938035643813")),
                2,
            )
            .await;
        assert_eq!(kind_of(result), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_duplicate_hardware_id_rejected() {
        let (_db, ledger, ctx) = setup().await;
        let first = imei_unit(&ledger, &ctx, "356938035643814").await;

        let duplicate = ledger
            .intake(
                &ctx,
                IntakeTarget::New(NewStockUnit::serialized("handset-s24", "356938035643814")),
                1,
            )
            .await;
        assert!(matches!(
            duplicate,
            Err(LedgerError::Domain(CoreError::Validation(
                ValidationError::Duplicate { .. }
            )))
        ));

        // Same IMEI in another organization is a different device record
        let other = LedgerContext::new("org-2", "cashier-9");
        imei_unit(&ledger, &other, "356938035643814").await;

        // A retired unit frees its IMEI
        ledger.stock_out(&ctx, &first.id, 1, "sold", None).await.unwrap();
        ledger.retire(&ctx, &first.id).await.unwrap();
        imei_unit(&ledger, &ctx, "356938035643814").await;
    }

    #[tokio::test]
    async fn test_stock_out_respects_reservations() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 5).await;
        ledger
            .reserve(&ctx, &unit.id, 4, ReserveOptions::default())
            .await
            .unwrap();

        let result = ledger.stock_out(&ctx, &unit.id, 2, "write-off", None).await;
        assert_eq!(kind_of(result), ErrorKind::InsufficientStock);

        let updated = ledger
            .stock_out(&ctx, &unit.id, 1, "write-off", None)
            .await
            .unwrap();
        assert_eq!(updated.quantity, 4);
        assert_eq!(updated.status, StockStatus::Available);

        let page = ledger.list_movements(&ctx, &unit.id, 1, 1).await.unwrap();
        assert_eq!(page.items[0].movement_type, MovementType::Out);
        assert_eq!(page.items[0].quantity, -1);
    }

    // -------------------------------------------------------------------------
    // Retire / isolation / history
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_retire_requires_no_active_reservations() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 3).await;
        let reservation = ledger
            .reserve(&ctx, &unit.id, 1, ReserveOptions::default())
            .await
            .unwrap();

        assert_eq!(
            kind_of(ledger.retire(&ctx, &unit.id).await),
            ErrorKind::InvalidState
        );

        ledger.release(&ctx, &reservation.id).await.unwrap();
        let retired = ledger.retire(&ctx, &unit.id).await.unwrap();
        assert!(retired.is_deleted());

        assert_eq!(
            kind_of(ledger.get_stock_unit(&ctx, &unit.id).await),
            ErrorKind::NotFound
        );
        assert_eq!(
            kind_of(ledger.reserve(&ctx, &unit.id, 1, ReserveOptions::default()).await),
            ErrorKind::NotFound
        );
        assert_eq!(
            kind_of(ledger.adjust(&ctx, &unit.id, 1, "late count").await),
            ErrorKind::NotFound
        );

        // History stays readable
        let page = ledger.list_movements(&ctx, &unit.id, 1, 10).await.unwrap();
        assert_eq!(page.total, 3);
        assert!(ledger.audit(&ctx, &unit.id).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_other_org_sees_nothing() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 5).await;
        let reservation = ledger
            .reserve(&ctx, &unit.id, 1, ReserveOptions::default())
            .await
            .unwrap();

        let other = LedgerContext::new("org-2", "cashier-2");
        assert_eq!(
            kind_of(ledger.get_stock_unit(&other, &unit.id).await),
            ErrorKind::NotFound
        );
        assert_eq!(
            kind_of(ledger.reserve(&other, &unit.id, 1, ReserveOptions::default()).await),
            ErrorKind::NotFound
        );
        assert_eq!(
            kind_of(ledger.confirm(&other, &reservation.id).await),
            ErrorKind::NotFound
        );
        assert_eq!(
            kind_of(ledger.list_movements(&other, &unit.id, 1, 10).await),
            ErrorKind::NotFound
        );

        let reservation = ledger.get_reservation(&ctx, &reservation.id).await.unwrap();
        assert_eq!(reservation.status, ReservationStatus::Active);
    }

    #[tokio::test]
    async fn test_list_movements_pages_newest_first() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 1).await;
        for i in 0..4 {
            ledger
                .adjust(&ctx, &unit.id, 1, &format!("count {}", i))
                .await
                .unwrap();
        }

        let first = ledger.list_movements(&ctx, &unit.id, 1, 2).await.unwrap();
        assert_eq!(first.total, 5);
        assert!(first.has_more());
        assert_eq!(first.items[0].quantity_after, 5);
        assert_eq!(first.items[1].quantity_after, 4);

        let last = ledger.list_movements(&ctx, &unit.id, 3, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(!last.has_more());
        assert_eq!(last.items[0].movement_type, MovementType::In);

        assert_eq!(
            kind_of(ledger.list_movements(&ctx, &unit.id, 0, 2).await),
            ErrorKind::ValidationError
        );
        assert_eq!(
            kind_of(ledger.list_movements(&ctx, &unit.id, 1, 0).await),
            ErrorKind::ValidationError
        );
    }

    #[tokio::test]
    async fn test_list_reservations_by_status() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 5).await;
        let kept = ledger
            .reserve(&ctx, &unit.id, 1, ReserveOptions::default())
            .await
            .unwrap();
        let dropped = ledger
            .reserve(&ctx, &unit.id, 1, ReserveOptions::default())
            .await
            .unwrap();
        ledger.release(&ctx, &dropped.id).await.unwrap();

        let all = ledger.list_reservations(&ctx, &unit.id, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let active = ledger
            .list_reservations(&ctx, &unit.id, Some(ReservationStatus::Active))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, kept.id);
    }

    // -------------------------------------------------------------------------
    // Log integrity
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_audit_replays_mixed_operations() {
        let (_db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 10).await;

        let a = ledger
            .reserve(&ctx, &unit.id, 3, ReserveOptions::default())
            .await
            .unwrap();
        let b = ledger
            .reserve(&ctx, &unit.id, 2, ReserveOptions::default())
            .await
            .unwrap();
        ledger.confirm(&ctx, &a.id).await.unwrap();
        ledger.release(&ctx, &b.id).await.unwrap();
        ledger.adjust(&ctx, &unit.id, -1, "breakage").await.unwrap();
        ledger
            .intake(&ctx, IntakeTarget::Existing(unit.id.clone()), 6)
            .await
            .unwrap();
        ledger
            .stock_out(&ctx, &unit.id, 2, "display models", None)
            .await
            .unwrap();

        let report = ledger.audit(&ctx, &unit.id).await.unwrap();
        assert!(report.consistent, "{report:?}");
        assert_eq!(report.movement_count, 8);
        assert_eq!(report.stored_quantity, 10);
        assert_eq!(report.replayed_quantity, Some(10));
    }

    #[tokio::test]
    async fn test_audit_detects_out_of_band_write() {
        let (db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 10).await;

        sqlx::query("UPDATE stock_units SET quantity = 99 WHERE id = ?1")
            .bind(&unit.id)
            .execute(db.pool())
            .await
            .unwrap();

        let report = ledger.audit(&ctx, &unit.id).await.unwrap();
        assert!(!report.consistent);
        assert_eq!(report.stored_quantity, 99);
        assert_eq!(report.replayed_quantity, Some(10));
    }

    #[tokio::test]
    async fn test_movements_are_append_only() {
        let (db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 10).await;

        let update = sqlx::query("UPDATE stock_movements SET quantity_after = 0")
            .execute(db.pool())
            .await;
        assert!(matches!(
            update.map_err(DbError::from),
            Err(DbError::ConstraintViolation { .. })
        ));

        let delete = sqlx::query("DELETE FROM stock_movements")
            .execute(db.pool())
            .await;
        assert!(delete.is_err());

        assert_eq!(movement_count(&ledger, &ctx, &unit.id).await, 1);
    }

    // -------------------------------------------------------------------------
    // Expiry policy
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_expiry_policy_controls_availability() {
        for (policy, expected) in [(ExpiryPolicy::StatusOnly, 3), (ExpiryPolicy::ExcludeExpired, 5)] {
            let (_db, ledger, ctx) = setup_with(policy).await;
            let unit = bulk_unit(&ledger, &ctx, 5).await;
            ledger
                .reserve(&ctx, &unit.id, 2, ReserveOptions {
                    expires_at: Some(Utc::now() + Duration::minutes(5)),
                    ..ReserveOptions::default()
                })
                .await
                .unwrap();

            let later = Utc::now() + Duration::hours(1);
            let availability = ledger.availability_at(&ctx, &unit.id, later).await.unwrap();
            assert_eq!(availability.available, expected, "{policy}");
        }
    }

    /// Moves an ACTIVE hold's expiry into the past without waiting for it.
    async fn lapse(db: &Database, reservation_id: &str) {
        sqlx::query("UPDATE reservations SET expires_at = ?1 WHERE id = ?2")
            .bind(Utc::now() - Duration::minutes(1))
            .bind(reservation_id)
            .execute(db.pool())
            .await
            .unwrap();
    }

    fn expiring_soon() -> ReserveOptions {
        ReserveOptions {
            expires_at: Some(Utc::now() + Duration::minutes(5)),
            ..ReserveOptions::default()
        }
    }

    #[tokio::test]
    async fn test_lapsed_hold_cannot_be_confirmed_after_resale() {
        let (db, ledger, ctx) = setup_with(ExpiryPolicy::ExcludeExpired).await;
        let unit = imei_unit(&ledger, &ctx, "356938035643815").await;

        let first = ledger.reserve(&ctx, &unit.id, 1, expiring_soon()).await.unwrap();
        lapse(&db, &first.id).await;

        // The lapsed hold no longer blocks a second buyer.
        let second = ledger
            .reserve(&ctx, &unit.id, 1, ReserveOptions::default())
            .await
            .unwrap();

        let before = movement_count(&ledger, &ctx, &unit.id).await;
        assert_eq!(
            kind_of(ledger.confirm(&ctx, &first.id).await),
            ErrorKind::InvalidState
        );
        assert_eq!(movement_count(&ledger, &ctx, &unit.id).await, before);

        let confirmed = ledger.confirm(&ctx, &second.id).await.unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);

        let released = ledger.release(&ctx, &first.id).await.unwrap();
        assert_eq!(released.status, ReservationStatus::Cancelled);

        let unit = ledger.get_stock_unit(&ctx, &unit.id).await.unwrap();
        assert_eq!(unit.quantity, 0);
        assert_eq!(unit.status, StockStatus::Sold);
        assert!(ledger.audit(&ctx, &unit.id).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_lapsed_hold_cannot_be_extended() {
        let (db, ledger, ctx) = setup_with(ExpiryPolicy::ExcludeExpired).await;
        let unit = bulk_unit(&ledger, &ctx, 1).await;
        let held = ledger.reserve(&ctx, &unit.id, 1, expiring_soon()).await.unwrap();
        lapse(&db, &held.id).await;

        let lapsed_at = ledger.get_reservation(&ctx, &held.id).await.unwrap().expires_at;
        let result = ledger
            .extend(&ctx, &held.id, Utc::now() + Duration::hours(1))
            .await;
        assert_eq!(kind_of(result), ErrorKind::InvalidState);

        let current = ledger.get_reservation(&ctx, &held.id).await.unwrap();
        assert_eq!(current.expires_at, lapsed_at);
        assert_eq!(current.status, ReservationStatus::Active);

        let availability = ledger.availability(&ctx, &unit.id).await.unwrap();
        assert_eq!(availability.available, 1);
    }

    #[tokio::test]
    async fn test_status_only_keeps_lapsed_hold_usable() {
        let (db, ledger, ctx) = setup().await;
        let unit = bulk_unit(&ledger, &ctx, 2).await;
        let held = ledger.reserve(&ctx, &unit.id, 2, expiring_soon()).await.unwrap();
        lapse(&db, &held.id).await;

        assert_eq!(
            kind_of(ledger.reserve(&ctx, &unit.id, 1, ReserveOptions::default()).await),
            ErrorKind::InsufficientStock
        );

        let new_expiry = Utc::now() + Duration::hours(1);
        let extended = ledger.extend(&ctx, &held.id, new_expiry).await.unwrap();
        assert_eq!(extended.expires_at, Some(new_expiry));

        ledger.confirm(&ctx, &held.id).await.unwrap();
        assert_eq!(ledger.get_stock_unit(&ctx, &unit.id).await.unwrap().quantity, 0);
    }

    #[tokio::test]
    async fn test_adjust_ignores_lapsed_hold_when_excluded() {
        for (policy, allowed) in [(ExpiryPolicy::StatusOnly, false), (ExpiryPolicy::ExcludeExpired, true)] {
            let (db, ledger, ctx) = setup_with(policy).await;
            let unit = bulk_unit(&ledger, &ctx, 5).await;
            let held = ledger.reserve(&ctx, &unit.id, 3, expiring_soon()).await.unwrap();
            lapse(&db, &held.id).await;

            let result = ledger.adjust(&ctx, &unit.id, -4, "shrinkage").await;
            if !allowed {
                assert_eq!(kind_of(result), ErrorKind::InsufficientStock, "{policy}");
                continue;
            }

            assert_eq!(result.unwrap().quantity, 1, "{policy}");
            // The shrunk stock can no longer cover the lapsed hold.
            assert_eq!(
                kind_of(ledger.confirm(&ctx, &held.id).await),
                ErrorKind::InvalidState
            );
            assert_eq!(ledger.get_stock_unit(&ctx, &unit.id).await.unwrap().quantity, 1);
            assert!(ledger.audit(&ctx, &unit.id).await.unwrap().consistent);
        }
    }

    // -------------------------------------------------------------------------
    // Concurrency
    // -------------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reserves_never_oversell() {
        let path = std::env::temp_dir().join(format!("ledger-race-{}.db", Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(4))
            .await
            .unwrap();
        let ledger = db.ledger(ExpiryPolicy::StatusOnly);
        let ctx = LedgerContext::new("org-1", "stock-room");
        let unit = imei_unit(&ledger, &ctx, "356938035643815").await;

        let mut handles = Vec::new();
        for cashier in 0..4 {
            let ledger = ledger.clone();
            let unit_id = unit.id.clone();
            handles.push(tokio::spawn(async move {
                let ctx = LedgerContext::new("org-1", format!("cashier-{}", cashier));
                ledger
                    .reserve(&ctx, &unit_id, 1, ReserveOptions::default())
                    .await
            }));
        }

        let mut won = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(err) => assert_eq!(err.kind(), ErrorKind::InsufficientStock),
            }
        }
        assert_eq!(won, 1);

        let availability = ledger.availability(&ctx, &unit.id).await.unwrap();
        assert_eq!(availability.reserved, 1);
        assert_eq!(availability.available, 0);

        db.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adjust_and_confirm_lose_no_update() {
        let path = std::env::temp_dir().join(format!("ledger-race-{}.db", Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(4))
            .await
            .unwrap();
        let ledger = db.ledger(ExpiryPolicy::StatusOnly);
        let ctx = LedgerContext::new("org-1", "stock-room");
        let unit = bulk_unit(&ledger, &ctx, 10).await;

        let mut reservation_ids = Vec::new();
        for _ in 0..5 {
            let reservation = ledger
                .reserve(&ctx, &unit.id, 1, ReserveOptions::default())
                .await
                .unwrap();
            reservation_ids.push(reservation.id);
        }

        // Available stays at 5 whatever the interleaving, so every call succeeds.
        let mut handles: Vec<tokio::task::JoinHandle<LedgerResult<()>>> = Vec::new();
        for (n, reservation_id) in reservation_ids.into_iter().enumerate() {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let ctx = LedgerContext::new("org-1", format!("cashier-{}", n));
                ledger.confirm(&ctx, &reservation_id).await.map(|_| ())
            }));
        }
        for (n, delta) in [-3_i64, 4].into_iter().enumerate() {
            let ledger = ledger.clone();
            let unit_id = unit.id.clone();
            handles.push(tokio::spawn(async move {
                let ctx = LedgerContext::new("org-1", format!("counter-{}", n));
                ledger.adjust(&ctx, &unit_id, delta, "stock take").await.map(|_| ())
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let current = ledger.get_stock_unit(&ctx, &unit.id).await.unwrap();
        assert_eq!(current.quantity, 10 - 5 - 3 + 4);

        let report = ledger.audit(&ctx, &unit.id).await.unwrap();
        assert!(report.consistent);
        assert_eq!(report.movement_count, 1 + 5 + 5 + 2);

        let availability = ledger.availability(&ctx, &unit.id).await.unwrap();
        assert_eq!(availability.reserved, 0);
        assert_eq!(availability.available, 6);

        db.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
