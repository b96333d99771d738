//! One PostgreSQL connection with explicit transaction scopes.

use crate::ddl::{METADATA_SCHEMA_DDL, WAREHOUSE_SCHEMA_DDL};
use async_trait::async_trait;
use retaildwh_core::{SchemaStore, Session, StoreError, StoreResult};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Boxed `Send` future returned by the session's internal helpers.
pub(crate) type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Open a connection pool.
///
/// # Example
///
/// ```ignore
/// let pool = connect("postgres://etl@localhost/retail", 5, Duration::from_secs(30)).await?;
/// let mut session = PgSession::acquire(&pool).await?;
/// ```
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> StoreResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))
}

/// Translate a driver error into a `StoreError`.
///
/// Unique, foreign-key and check violations become `Constraint`; an undefined
/// relation becomes `NotFound`; statements rejected inside an aborted
/// transaction become `Transaction`.
pub fn map_db_error(context: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation() =>
        {
            StoreError::Constraint(format!("{context}: {db}"))
        }
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("42P01") => StoreError::NotFound(format!("{context}: {db}")),
            Some("25P02") => StoreError::Transaction(format!("{context}: {db}")),
            _ => StoreError::Database(format!("{context}: {db}")),
        },
        sqlx::Error::RowNotFound => StoreError::NotFound(context.to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Connection(format!("{context}: {err}"))
        }
        _ => StoreError::Database(format!("{context}: {err}")),
    }
}

/// A pooled connection implementing every warehouse store trait.
///
/// Transaction scopes are plain `BEGIN`/`COMMIT`/`ROLLBACK` statements on the
/// held connection, so one session can open and close many scopes during a
/// load. Outside a scope every statement autocommits.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
    in_transaction: bool,
}

impl PgSession {
    /// Take one connection from the pool for the lifetime of the session.
    pub async fn acquire(pool: &PgPool) -> StoreResult<Self> {
        let conn = pool
            .acquire()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(PgSession::new(conn))
    }

    /// Wrap an already acquired connection.
    pub fn new(conn: PoolConnection<Postgres>) -> Self {
        PgSession {
            conn,
            in_transaction: false,
        }
    }

    pub(crate) fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    fn control<'a>(&'a mut self, statement: &'static str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            Executor::execute(self.conn(), sqlx::raw_sql(statement))
                .await
                .map_err(|e| StoreError::transaction(format!("{statement}: {e}")))?;
            Ok(())
        })
    }

    pub(crate) fn execute_script<'a>(
        &'a mut self,
        context: &'a str,
        script: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            Executor::execute(self.conn(), sqlx::raw_sql(script))
                .await
                .map_err(|e| map_db_error(context, e))?;
            Ok(())
        })
    }
}

#[async_trait]
impl Session for PgSession {
    async fn begin(&mut self) -> StoreResult<()> {
        if self.in_transaction {
            return Err(StoreError::transaction("a transaction is already in progress"));
        }
        self.control("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        if !self.in_transaction {
            return Err(StoreError::transaction("there is no transaction in progress"));
        }
        // The scope is over whether or not COMMIT succeeds.
        self.in_transaction = false;
        self.control("COMMIT").await
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        if let Err(e) = self.control("ROLLBACK").await {
            warn!(error = %e, "Rollback failed");
            return Err(e);
        }
        debug!("Transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

#[async_trait]
impl SchemaStore for PgSession {
    async fn ensure_metadata_schema(&mut self) -> StoreResult<()> {
        self.execute_script("create metadata schema", METADATA_SCHEMA_DDL)
            .await
    }

    async fn ensure_warehouse_schema(&mut self) -> StoreResult<()> {
        self.execute_script("create warehouse schema", WAREHOUSE_SCHEMA_DDL)
            .await
    }
}
