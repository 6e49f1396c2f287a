//! # Seed Data Generator
//!
//! Populates a ledger database with demo stock for development.
//!
//! ## Usage
//! ```bash
//! # 200 stock units for org "demo-org" (default)
//! cargo run -p ledger-db --bin seed
//!
//! # Custom amount / organization
//! cargo run -p ledger-db --bin seed -- --units 1000 --org shop-42
//!
//! # Specify database path
//! cargo run -p ledger-db --bin seed -- --db ./data/ledger.db
//! ```
//!
//! ## Generated Stock
//! Every unit goes through `Ledger::intake`, so the movement log replays
//! cleanly from the first row:
//! - Bulk accessories (cables, cases, chargers): 0 - 60 on hand
//! - Serialized handsets: one unit per IMEI, quantity 1
//! - Every 7th bulk unit gets an open reservation, every 11th handset a
//!   reservation expiring in an hour

use chrono::{Duration, Utc};
use std::env;

use ledger_core::{ExpiryPolicy, IntakeTarget, LedgerContext, NewStockUnit, ReserveOptions};
use ledger_db::{Database, DbConfig};

/// Bulk catalog items (tracked by quantity)
const ACCESSORIES: &[&str] = &[
    "usb-c-cable-1m",
    "usb-c-cable-2m",
    "lightning-cable",
    "silicone-case-s",
    "silicone-case-m",
    "leather-wallet-case",
    "screen-protector",
    "privacy-glass",
    "wall-charger-20w",
    "wall-charger-65w",
    "car-charger",
    "wireless-pad",
    "power-bank-10k",
    "power-bank-20k",
    "earbuds-wired",
];

/// Serialized catalog items (one stock unit per IMEI)
const HANDSETS: &[&str] = &["handset-a15", "handset-s24", "handset-px8", "handset-ip15"];

const SEED_ACTOR: &str = "system:seed";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut units: usize = 200;
    let mut db_path = String::from("./stock_ledger_dev.db");
    let mut org_id = String::from("demo-org");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--units" | "-u" => {
                if i + 1 < args.len() {
                    units = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--org" | "-o" => {
                if i + 1 < args.len() {
                    org_id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stock Ledger Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -u, --units <N>    Number of stock units to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./stock_ledger_dev.db)");
                println!("  -o, --org <ID>     Organization to seed (default: demo-org)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Stock Ledger Seed Data Generator");
    println!("===================================");
    println!("Database:     {}", db_path);
    println!("Organization: {}", org_id);
    println!("Stock units:  {}", units);
    println!();

    // Connect to database
    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    // Check existing stock
    let existing = db.stock_units().count(&org_id).await?;
    if existing > 0 {
        println!("⚠ Organization already has {} stock units", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let ledger = db.ledger(ExpiryPolicy::StatusOnly);
    let ctx = LedgerContext::new(org_id.clone(), SEED_ACTOR);

    println!();
    println!("Receiving stock...");

    let mut generated = 0;
    let mut reserved = 0;
    let start = std::time::Instant::now();

    for seed in 0..units {
        // Roughly one handset for every four units
        let result = if seed % 4 == 3 {
            seed_handset(&ledger, &ctx, seed).await
        } else {
            seed_accessory(&ledger, &ctx, seed).await
        };

        match result {
            Ok(held) => {
                generated += 1;
                if held {
                    reserved += 1;
                }
            }
            Err(e) => {
                eprintln!("Failed to seed unit {}: {}", seed, e);
                continue;
            }
        }

        if generated % 50 == 0 {
            println!("  Received {} stock units...", generated);
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("✓ Received {} stock units in {:?}", generated, elapsed);
    println!("✓ Created {} reservations", reserved);
    println!(
        "  Rate: {:.0} units/second",
        generated as f64 / elapsed.as_secs_f64()
    );

    // Verify the movement log of the first seeded unit
    println!();
    println!("Auditing movement log...");
    if let Some(first) = db
        .stock_units()
        .list_by_catalog_item(&org_id, ACCESSORIES[0])
        .await?
        .first()
    {
        let report = ledger.audit(&ctx, &first.id).await?;
        println!(
            "  {}: {} movements, consistent = {}",
            first.catalog_item_id, report.movement_count, report.consistent
        );
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}

/// Receives a bulk accessory; returns whether a reservation was placed.
async fn seed_accessory(
    ledger: &ledger_db::Ledger,
    ctx: &LedgerContext,
    seed: usize,
) -> Result<bool, ledger_db::LedgerError> {
    let catalog_item = ACCESSORIES[seed % ACCESSORIES.len()];
    let quantity = 1 + ((seed * 17) % 60) as i64;

    let unit = ledger
        .intake(ctx, IntakeTarget::New(NewStockUnit::bulk(catalog_item)), quantity)
        .await?;

    if seed % 7 == 0 && unit.quantity > 1 {
        let opts = ReserveOptions {
            notes: Some("seeded hold".to_string()),
            ..ReserveOptions::default()
        };
        ledger.reserve(ctx, &unit.id, 1, opts).await?;
        return Ok(true);
    }

    Ok(false)
}

/// Receives one serialized handset; returns whether a reservation was placed.
async fn seed_handset(
    ledger: &ledger_db::Ledger,
    ctx: &LedgerContext,
    seed: usize,
) -> Result<bool, ledger_db::LedgerError> {
    let catalog_item = HANDSETS[seed % HANDSETS.len()];

    // 15 digits, not a valid Luhn checksum
    let imei = format!("35{:013}", seed);

    let unit = ledger
        .intake(
            ctx,
            IntakeTarget::New(NewStockUnit::serialized(catalog_item, imei)),
            1,
        )
        .await?;

    if seed % 11 == 0 {
        let opts = ReserveOptions {
            expires_at: Some(Utc::now() + Duration::hours(1)),
            ..ReserveOptions::default()
        };
        ledger.reserve(ctx, &unit.id, 1, opts).await?;
        return Ok(true);
    }

    Ok(false)
}
