//! Engine configuration.
//!
//! Values come from `Default`, then `RETAILDWH_*` environment variables, then
//! whatever the caller overrides (the CLI applies its flags last).

use crate::error::{EngineError, EngineResult};
use retaildwh_core::PartitionLayout;
use std::str::FromStr;
use std::time::Duration;

/// Connection string of the warehouse database.
pub const DATABASE_URL_VAR: &str = "RETAILDWH_DATABASE_URL";
/// Pool size.
pub const MAX_CONNECTIONS_VAR: &str = "RETAILDWH_MAX_CONNECTIONS";
/// Seconds to wait for a pooled connection.
pub const ACQUIRE_TIMEOUT_VAR: &str = "RETAILDWH_ACQUIRE_TIMEOUT_SECS";
/// Fact records per commit.
pub const FACT_BATCH_SIZE_VAR: &str = "RETAILDWH_FACT_BATCH_SIZE";
/// Comma separated partition years.
pub const PARTITION_YEARS_VAR: &str = "RETAILDWH_PARTITION_YEARS";
/// Source identifier used for run names and lineage.
pub const SOURCE_TABLE_VAR: &str = "RETAILDWH_SOURCE_TABLE";

/// Configuration for warehouse setup and loads.
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseConfig {
    /// Database connection URL
    pub database_url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// How long to wait for a pooled connection
    pub acquire_timeout: Duration,
    /// Fact records inserted per commit
    pub fact_batch_size: usize,
    /// Years that get one partition per month
    pub partition_years: Vec<i32>,
    /// Name of the source the cleaned batch came from
    pub source_table: String,
    /// Completeness below this percentage fails the check
    pub completeness_threshold: f64,
    /// Uniqueness below this percentage fails the check
    pub uniqueness_threshold: f64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            fact_batch_size: 1000,
            partition_years: vec![2023, 2024, 2025],
            source_table: "online_retail".to_string(),
            completeness_threshold: 95.0,
            uniqueness_threshold: 98.0,
        }
    }
}

impl WarehouseConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`. Blank values are ignored.
    pub fn from_lookup<F>(lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get(DATABASE_URL_VAR) {
            config.database_url = Some(url);
        }
        if let Some(raw) = get(MAX_CONNECTIONS_VAR) {
            config.max_connections = parse_number(MAX_CONNECTIONS_VAR, &raw)?;
        }
        if let Some(raw) = get(ACQUIRE_TIMEOUT_VAR) {
            config.acquire_timeout = Duration::from_secs(parse_number(ACQUIRE_TIMEOUT_VAR, &raw)?);
        }
        if let Some(raw) = get(FACT_BATCH_SIZE_VAR) {
            config.fact_batch_size = parse_number(FACT_BATCH_SIZE_VAR, &raw)?;
        }
        if let Some(raw) = get(PARTITION_YEARS_VAR) {
            config.partition_years = parse_years(&raw)?;
        }
        if let Some(source) = get(SOURCE_TABLE_VAR) {
            config.source_table = source.trim().to_string();
        }
        Ok(config)
    }

    /// Reject settings no load could run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.fact_batch_size == 0 {
            return Err(EngineError::config("fact batch size must be at least 1"));
        }
        if self.max_connections == 0 {
            return Err(EngineError::config("max connections must be at least 1"));
        }
        if self.partition_years.is_empty() {
            return Err(EngineError::config("at least one partition year is required"));
        }
        if self.source_table.trim().is_empty() {
            return Err(EngineError::config("source table must not be empty"));
        }
        for threshold in [self.completeness_threshold, self.uniqueness_threshold] {
            if !threshold.is_finite() {
                return Err(EngineError::config(format!(
                    "quality threshold {threshold} is not a finite number"
                )));
            }
        }
        self.partition_layout().map(|_| ())
    }

    /// Month partitions for the configured years.
    pub fn partition_layout(&self) -> EngineResult<PartitionLayout> {
        PartitionLayout::for_years(&self.partition_years)
            .map_err(|e| EngineError::config(format!("invalid partition years: {e}")))
    }

    /// The database URL, required by anything that connects.
    pub fn require_database_url(&self) -> EngineResult<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| EngineError::config(format!("{DATABASE_URL_VAR} is not set")))
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> EngineResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| EngineError::config(format!("{key}: {raw:?} is not a valid number")))
}

/// Parse `2023, 2024,2025` into years.
pub fn parse_years(raw: &str) -> EngineResult<Vec<i32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_number(PARTITION_YEARS_VAR, part))
        .collect()
}
