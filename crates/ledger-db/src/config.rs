//! # Ledger Configuration
//!
//! Configuration for the database, the reservation expiry policy and the
//! expiry sweeper.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCK_LEDGER_DATABASE_PATH=/var/lib/ledger/ledger.db               │
//! │     STOCK_LEDGER_EXPIRY_POLICY=exclude_expired                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stock-ledger/ledger.toml (Linux)                         │
//! │     ~/Library/Application Support/com.stock-ledger.ledger/... (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/ledger/ledger.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [reservations]
//! expiry_policy = "status_only"  # status_only | exclude_expired
//!
//! [sweeper]
//! interval_secs = 60
//! batch_size = 100
//! actor_id = "system:expiry-sweeper"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use ledger_core::ExpiryPolicy;

use crate::pool::DbConfig;

const ENV_DATABASE_PATH: &str = "STOCK_LEDGER_DATABASE_PATH";
const ENV_MAX_CONNECTIONS: &str = "STOCK_LEDGER_MAX_CONNECTIONS";
const ENV_BUSY_TIMEOUT_MS: &str = "STOCK_LEDGER_BUSY_TIMEOUT_MS";
const ENV_EXPIRY_POLICY: &str = "STOCK_LEDGER_EXPIRY_POLICY";
const ENV_SWEEP_INTERVAL_SECS: &str = "STOCK_LEDGER_SWEEP_INTERVAL_SECS";
const ENV_SWEEP_BATCH_SIZE: &str = "STOCK_LEDGER_SWEEP_BATCH_SIZE";

// =============================================================================
// Errors
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Sections
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. `:memory:` for a private in-memory database.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long a writer waits for a concurrent writer (milliseconds).
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("com", "stock-ledger", "ledger")
        .map(|dirs| dirs.data_dir().join("ledger.db"))
        .unwrap_or_else(|| PathBuf::from("./stock_ledger.db"))
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// `[reservations]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReservationSettings {
    /// Whether expired-but-ACTIVE reservations still hold stock.
    #[serde(default)]
    pub expiry_policy: ExpiryPolicy,
}

/// `[sweeper]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperSettings {
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// Maximum reservations released per sweep.
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: u32,

    /// Actor recorded on RELEASE movements written by the sweeper.
    #[serde(default = "default_sweeper_actor")]
    pub actor_id: String,
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_sweep_batch_size() -> u32 {
    100
}

fn default_sweeper_actor() -> String {
    "system:expiry-sweeper".to_string()
}

impl Default for SweeperSettings {
    fn default() -> Self {
        SweeperSettings {
            interval_secs: default_sweep_interval(),
            batch_size: default_sweep_batch_size(),
            actor_id: default_sweeper_actor(),
        }
    }
}

// =============================================================================
// Ledger Configuration
// =============================================================================

/// Complete ledger configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub reservations: ReservationSettings,

    #[serde(default)]
    pub sweeper: SweeperSettings,
}

impl LedgerConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (ledger.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                config = Self::from_file(&path)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid(
                "database.min_connections must not exceed max_connections".into(),
            ));
        }

        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweeper.interval_secs must be greater than 0".into(),
            ));
        }

        if self.sweeper.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "sweeper.batch_size must be greater than 0".into(),
            ));
        }

        if self.sweeper.actor_id.trim().is_empty() {
            return Err(ConfigError::Invalid("sweeper.actor_id is required".into()));
        }

        Ok(())
    }

    /// Applies environment variable overrides read through `lookup`.
    fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(value) = lookup(ENV_MAX_CONNECTIONS) {
            self.database.max_connections = parse_env(ENV_MAX_CONNECTIONS, &value)?;
        }

        if let Some(value) = lookup(ENV_BUSY_TIMEOUT_MS) {
            self.database.busy_timeout_ms = parse_env(ENV_BUSY_TIMEOUT_MS, &value)?;
        }

        if let Some(value) = lookup(ENV_EXPIRY_POLICY) {
            debug!(policy = %value, "Overriding expiry policy from environment");
            self.reservations.expiry_policy = parse_env(ENV_EXPIRY_POLICY, &value)?;
        }

        if let Some(value) = lookup(ENV_SWEEP_INTERVAL_SECS) {
            self.sweeper.interval_secs = parse_env(ENV_SWEEP_INTERVAL_SECS, &value)?;
        }

        if let Some(value) = lookup(ENV_SWEEP_BATCH_SIZE) {
            self.sweeper.batch_size = parse_env(ENV_SWEEP_BATCH_SIZE, &value)?;
        }

        Ok(())
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stock-ledger", "ledger")
            .map(|dirs| dirs.config_dir().join("ledger.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Builds the pool configuration.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .min_connections(self.database.min_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    /// Returns the expiry policy.
    pub fn expiry_policy(&self) -> ExpiryPolicy {
        self.reservations.expiry_policy
    }

    /// Returns the sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper.interval_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

// =============================================================================
// Unit Tests
// =============================================================================
