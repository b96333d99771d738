//! retaildwh-postgres
//!
//! PostgreSQL backend for the retail warehouse engine.
//!
//! `PgSession` holds one pooled connection and implements every store trait
//! from `retaildwh-core`. The engine drives transaction scopes on it
//! explicitly, so one session carries a whole load.
//!
//! # Schemas
//!
//! - `dwh_metadata`: `dwh_objects`, `column_definitions`, `etl_runs`,
//!   `data_lineage`, `data_quality`
//! - `dwh`: `fact_sales`, `fact_sales_partitioned` with one `sales_YYYY_MM`
//!   partition per month plus `sales_default`, the four `dim_*` tables and
//!   `data_quality_logs`
//!
//! # Key Design Decisions
//!
//! ## Get-or-create in one statement
//! Dimension rows are resolved with
//! ```sql
//! INSERT INTO dwh.dim_location (country_name) VALUES ($1)
//! ON CONFLICT (country_name) DO UPDATE SET country_name = EXCLUDED.country_name
//! RETURNING country_id;
//! ```
//! so concurrent loads can never create two rows for one natural key.
//!
//! ## Savepoint per fact row
//! Inside a scope each fact insert runs under `SAVEPOINT fact_insert`. A
//! failing row is rolled back to the savepoint and the batch continues.
//!
//! ## Guarded run completion
//! Completion updates carry `WHERE status = 'RUNNING'`, so a run reaches a
//! terminal state at most once.
//!
//! # Usage Example
//!
//! ```ignore
//! use retaildwh_postgres::{connect, PgSession};
//! use std::time::Duration;
//!
//! let pool = connect("postgres://etl@localhost/retail", 5, Duration::from_secs(30)).await?;
//! let mut session = PgSession::acquire(&pool).await?;
//! session.ensure_metadata_schema().await?;
//! ```

pub mod catalog;
pub mod ddl;
pub mod rows;
pub mod runs;
pub mod session;
pub mod staging;
pub mod warehouse;

pub use session::{connect, map_db_error, PgSession};
pub use staging::fetch_cleaned_batch;
