//! # Stock Ledger Sweeper
//!
//! Releases ACTIVE reservations whose expiry has passed, so abandoned
//! carts stop holding stock.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. init_tracing()            RUST_LOG or "info,ledger=debug,sqlx=warn" │
//! │  2. LedgerConfig::load()      defaults → ledger.toml → STOCK_LEDGER_*   │
//! │  3. Database::new()           pool + migrations                         │
//! │  4. ExpirySweeper::run()      until Ctrl+C / SIGTERM                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```bash
//! ledger-sweeper                        # run until stopped
//! ledger-sweeper --once                 # single sweep, then exit
//! ledger-sweeper --config ./ledger.toml
//! ```

use std::env;
use std::path::PathBuf;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ledger_db::{Database, ExpirySweeper, LedgerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut once = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--once" => once = true,
            "--help" | "-h" => {
                println!("Stock Ledger Expiry Sweeper");
                println!();
                println!("Usage: ledger-sweeper [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: platform config dir/ledger.toml)");
                println!("      --once           Run a single sweep and exit");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!("Starting stock ledger sweeper...");

    // Load configuration
    let config = LedgerConfig::load(config_path)?;
    info!(
        db_path = %config.database.path.display(),
        policy = %config.expiry_policy(),
        interval_secs = config.sweeper.interval_secs,
        "Configuration loaded"
    );

    // Connect to database (runs migrations)
    let db = Database::new(config.db_config()).await?;

    let ledger = db.ledger(config.expiry_policy());
    let sweeper = ExpirySweeper::from_settings(ledger, db.reservations(), &config.sweeper);

    if once {
        let report = sweeper.run_once().await?;
        info!(
            scanned = report.scanned,
            released = report.released,
            skipped = report.skipped,
            failed = report.failed,
            "Single sweep finished"
        );
        db.close().await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    sweeper.run(config.sweep_interval(), shutdown_rx).await;

    db.close().await;
    info!("Sweeper shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug logs
/// - `RUST_LOG=ledger=trace` - Show trace for ledger crates only
/// - Default: INFO, DEBUG for ledger crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ledger=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed, that signal is logged and ignored
/// rather than stopping the sweeper.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping sweeper...");
}
