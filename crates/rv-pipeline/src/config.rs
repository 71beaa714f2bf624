//! Pipeline configuration
//!
//! Loaded from the environment (with `.env` support) over named defaults,
//! then validated before any unit runs. Business-rule thresholds live here
//! rather than inline in the quality checks so they can be tested and tuned.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::graph::RetryPolicy;

// ============================================================================
// Defaults
// ============================================================================

/// Record source stamped on every vault row.
pub const DEFAULT_RECORD_SOURCE: &str = "UCI Online Retail II";

/// Customer id imputed when the source has none.
pub const DEFAULT_UNKNOWN_CUSTOMER_ID: u64 = 0;

/// Quantity above which a sale line is flagged as a data-entry anomaly.
pub const DEFAULT_QUANTITY_ANOMALY_THRESHOLD: i64 = 1000;

/// Prefix marking credit notes in invoice numbers.
pub const DEFAULT_CREDIT_NOTE_MARKER: &str = "C";

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/retail_vault";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;
pub const DEFAULT_EXTRACT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_EXTRACT_RETRY_DELAY_SECS: u64 = 10;

pub const DEFAULT_MAX_PARALLEL_UNITS: usize = 4;

// ============================================================================
// Types
// ============================================================================

/// Which analytical store backs the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for WarehouseBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(WarehouseBackend::Memory),
            "postgres" | "postgresql" | "pg" => Ok(WarehouseBackend::Postgres),
            _ => Err(anyhow::anyhow!("Invalid warehouse backend: {}", s)),
        }
    }
}

/// How satellites treat a changed payload for a hub key they already hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SatellitePolicy {
    /// Insert snapshots only for hub keys the satellite has never seen;
    /// later payload changes are dropped
    #[default]
    FirstSeen,
    /// Insert a new version whenever the payload hash-diff differs from the
    /// latest stored version
    Versioned,
}

impl FromStr for SatellitePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "first_seen" | "insert_new" => Ok(SatellitePolicy::FirstSeen),
            "versioned" | "scd2" => Ok(SatellitePolicy::Versioned),
            _ => Err(anyhow::anyhow!("Invalid satellite policy: {}", s)),
        }
    }
}

/// Data rules applied by staging and the quality checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessRules {
    pub unknown_customer_id: u64,
    pub quantity_anomaly_threshold: i64,
    pub credit_note_marker: String,
    /// Upper-case invoice numbers and stock codes before deriving keys
    pub uppercase_business_keys: bool,
    pub satellite_policy: SatellitePolicy,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            unknown_customer_id: DEFAULT_UNKNOWN_CUSTOMER_ID,
            quantity_anomaly_threshold: DEFAULT_QUANTITY_ANOMALY_THRESHOLD,
            credit_note_marker: DEFAULT_CREDIT_NOTE_MARKER.to_string(),
            uppercase_business_keys: true,
            satellite_policy: SatellitePolicy::FirstSeen,
        }
    }
}

/// Connection settings for the PostgreSQL warehouse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Bounded retry settings for one class of units
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_secs: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_secs(self.delay_secs))
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// CSV export to extract; `None` keeps the current raw table
    pub source_path: Option<PathBuf>,
    pub record_source: String,
    pub warehouse: WarehouseBackend,
    pub database: DatabaseConfig,
    pub rules: BusinessRules,
    pub retry: RetryConfig,
    pub extract_retry: RetryConfig,
    pub max_parallel_units: usize,
    /// Prometheus Pushgateway base URL; metrics are only logged when unset
    pub pushgateway_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_path: None,
            record_source: DEFAULT_RECORD_SOURCE.to_string(),
            warehouse: WarehouseBackend::Memory,
            database: DatabaseConfig::default(),
            rules: BusinessRules::default(),
            retry: RetryConfig {
                attempts: DEFAULT_RETRY_ATTEMPTS,
                delay_secs: DEFAULT_RETRY_DELAY_SECS,
            },
            extract_retry: RetryConfig {
                attempts: DEFAULT_EXTRACT_RETRY_ATTEMPTS,
                delay_secs: DEFAULT_EXTRACT_RETRY_DELAY_SECS,
            },
            max_parallel_units: DEFAULT_MAX_PARALLEL_UNITS,
            pushgateway_url: None,
        }
    }
}

/// Parse an environment variable, falling back to `default` when unset
fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, raw, e)),
        _ => Ok(default),
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl PipelineConfig {
    /// Load `.env` (if present), read the environment, and validate
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from environment variables over the defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            source_path: env_opt("RV_SOURCE_PATH").map(PathBuf::from),
            record_source: env_opt("RV_RECORD_SOURCE").unwrap_or(defaults.record_source),
            warehouse: env_parse("RV_WAREHOUSE", defaults.warehouse)?,
            database: DatabaseConfig {
                url: env_opt("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    defaults.database.connect_timeout_secs,
                )?,
            },
            rules: BusinessRules {
                unknown_customer_id: env_parse(
                    "RV_UNKNOWN_CUSTOMER_ID",
                    defaults.rules.unknown_customer_id,
                )?,
                quantity_anomaly_threshold: env_parse(
                    "RV_QUANTITY_ANOMALY_THRESHOLD",
                    defaults.rules.quantity_anomaly_threshold,
                )?,
                credit_note_marker: env_opt("RV_CREDIT_NOTE_MARKER")
                    .unwrap_or(defaults.rules.credit_note_marker),
                uppercase_business_keys: env_parse(
                    "RV_UPPERCASE_BUSINESS_KEYS",
                    defaults.rules.uppercase_business_keys,
                )?,
                satellite_policy: env_parse(
                    "RV_SATELLITE_POLICY",
                    defaults.rules.satellite_policy,
                )?,
            },
            retry: RetryConfig {
                attempts: env_parse("RV_RETRY_ATTEMPTS", defaults.retry.attempts)?,
                delay_secs: env_parse("RV_RETRY_DELAY_SECS", defaults.retry.delay_secs)?,
            },
            extract_retry: RetryConfig {
                attempts: env_parse("RV_EXTRACT_RETRY_ATTEMPTS", defaults.extract_retry.attempts)?,
                delay_secs: env_parse(
                    "RV_EXTRACT_RETRY_DELAY_SECS",
                    defaults.extract_retry.delay_secs,
                )?,
            },
            max_parallel_units: env_parse("RV_MAX_PARALLEL_UNITS", defaults.max_parallel_units)?,
            pushgateway_url: env_opt("PUSHGATEWAY_URL"),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.record_source.trim().is_empty() {
            anyhow::bail!("RV_RECORD_SOURCE cannot be empty");
        }
        if self.rules.credit_note_marker.is_empty() {
            anyhow::bail!("RV_CREDIT_NOTE_MARKER cannot be empty");
        }
        if self.rules.quantity_anomaly_threshold <= 0 {
            anyhow::bail!("RV_QUANTITY_ANOMALY_THRESHOLD must be greater than 0");
        }
        if self.retry.attempts == 0 || self.extract_retry.attempts == 0 {
            anyhow::bail!("Retry attempts must be at least 1 (1 = no retry)");
        }
        if self.max_parallel_units == 0 {
            anyhow::bail!("RV_MAX_PARALLEL_UNITS must be greater than 0");
        }
        if self.warehouse == WarehouseBackend::Postgres {
            if self.database.url.is_empty() {
                anyhow::bail!("DATABASE_URL cannot be empty for the postgres warehouse");
            }
            if self.database.max_connections == 0 {
                anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
            }
        }
        if let Some(path) = &self.source_path {
            if !path.exists() {
                tracing::warn!(path = %path.display(), "Source file does not exist yet");
            }
        }
        Ok(())
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_rules(mut self, rules: BusinessRules) -> Self {
        self.rules = rules;
        self
    }
}
