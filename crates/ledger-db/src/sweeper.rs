//! # Expiry Sweeper
//!
//! Releases ACTIVE reservations whose `expires_at` has passed.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  every interval_secs                                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  find_expired(now, batch_size)      ← one read, all organizations      │
//! │       │                                                                 │
//! │       ▼  for each reservation                                           │
//! │  Ledger::release (expired = true)   ← own transaction, own lock        │
//! │       │                                                                 │
//! │       ├── Ok               → released                                  │
//! │       ├── InvalidState     → skipped (confirmed/released/extended)     │
//! │       └── other error      → failed, logged, next reservation          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each release is an ordinary ledger transaction, so a sweep racing a
//! cashier's confirm resolves the same way two cashiers would: whoever
//! locks the unit first wins, the other sees a terminal status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use ledger_core::{ErrorKind, LedgerContext};

use crate::config::SweeperSettings;
use crate::error::LedgerResult;
use crate::ledger::Ledger;
use crate::repository::ReservationRepository;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub scanned: usize,
    pub released: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    /// True when the batch was full and more expired reservations may remain.
    pub fn is_saturated(&self, batch_size: u32) -> bool {
        self.scanned >= batch_size as usize
    }
}

/// Background releaser for expired reservations.
#[derive(Debug, Clone)]
pub struct ExpirySweeper {
    ledger: Ledger,
    reservations: ReservationRepository,
    actor_id: String,
    batch_size: u32,
}

impl ExpirySweeper {
    pub fn new(
        ledger: Ledger,
        reservations: ReservationRepository,
        actor_id: impl Into<String>,
        batch_size: u32,
    ) -> Self {
        ExpirySweeper {
            ledger,
            reservations,
            actor_id: actor_id.into(),
            batch_size,
        }
    }

    /// Builds a sweeper from the `[sweeper]` config section.
    pub fn from_settings(
        ledger: Ledger,
        reservations: ReservationRepository,
        settings: &SweeperSettings,
    ) -> Self {
        Self::new(
            ledger,
            reservations,
            settings.actor_id.clone(),
            settings.batch_size,
        )
    }

    /// Releases up to `batch_size` reservations expired as of `now`.
    ///
    /// Only the initial scan can fail the sweep; per-reservation errors
    /// are counted and logged.
    pub async fn release_expired(&self, now: DateTime<Utc>) -> LedgerResult<SweepReport> {
        let expired = self.reservations.find_expired(now, self.batch_size).await?;

        let mut report = SweepReport {
            scanned: expired.len(),
            ..SweepReport::default()
        };

        for reservation in expired {
            let ctx = LedgerContext::new(reservation.org_id.clone(), self.actor_id.clone());

            match self
                .ledger
                .release_reservation(&ctx, &reservation.id, Some(now))
                .await
            {
                Ok(_) => report.released += 1,
                Err(err) if matches!(err.kind(), ErrorKind::InvalidState | ErrorKind::NotFound) => {
                    warn!(
                        org_id = %reservation.org_id,
                        reservation_id = %reservation.id,
                        reason = %err,
                        "Skipping reservation changed since scan"
                    );
                    report.skipped += 1;
                }
                Err(err) => {
                    warn!(
                        org_id = %reservation.org_id,
                        reservation_id = %reservation.id,
                        error = %err,
                        retryable = err.is_retryable(),
                        "Failed to release expired reservation"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                released = report.released,
                skipped = report.skipped,
                failed = report.failed,
                "Expiry sweep complete"
            );
        }

        Ok(report)
    }

    /// One sweep at the current time.
    pub async fn run_once(&self) -> LedgerResult<SweepReport> {
        self.release_expired(Utc::now()).await
    }

    /// Sweeps every `period` until `shutdown` turns true or its sender drops.
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = period.as_secs(),
            batch_size = self.batch_size,
            policy = %self.ledger.expiry_policy(),
            "Expiry sweeper started"
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        // A full batch means there is a backlog; keep going.
                        Ok(report) if report.is_saturated(self.batch_size) && report.released > 0 => {
                            ticker.reset_immediately();
                        }
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "Expiry sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Expiry sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
