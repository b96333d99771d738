//! Fixtures for PostgreSQL integration tests.
//!
//! Tests return early unless `RETAILDWH_TEST_DSN` points at a disposable
//! database; every fixture drops and recreates both warehouse schemas.

use anyhow::Result;
use retaildwh_core::{PartitionStore, SchemaStore};
use retaildwh_postgres::{connect, PgSession};
use sqlx::postgres::PgPool;
use std::time::Duration;

pub const TEST_DSN_VAR: &str = "RETAILDWH_TEST_DSN";

/// DSN of the test database, if configured.
pub fn test_dsn() -> Option<String> {
    std::env::var(TEST_DSN_VAR).ok().filter(|dsn| !dsn.trim().is_empty())
}

/// Connect and reset both schemas. `None` when no test database is configured.
pub async fn fresh_session() -> Result<Option<(PgPool, PgSession)>> {
    let Some(dsn) = test_dsn() else {
        eprintln!("{TEST_DSN_VAR} not set, skipping");
        return Ok(None);
    };
    let pool = connect(&dsn, 2, Duration::from_secs(10)).await?;
    sqlx::raw_sql("DROP SCHEMA IF EXISTS dwh CASCADE; DROP SCHEMA IF EXISTS dwh_metadata CASCADE;")
        .execute(&pool)
        .await?;

    let mut session = PgSession::acquire(&pool).await?;
    session.ensure_metadata_schema().await?;
    session.ensure_warehouse_schema().await?;
    session.create_partitioned_fact_table().await?;
    Ok(Some((pool, session)))
}
