//! Reading an already cleaned staging table as a `CleanedBatch`.
//!
//! Cleansing happens upstream; this only selects the eight contract columns,
//! casting each to the type the batch expects.

use crate::session::{map_db_error, PgSession};
use chrono::NaiveDateTime;
use retaildwh_core::{CleanedBatch, QualifiedName, SourceRow, StoreResult};
use rust_decimal::Decimal;
use sqlx::FromRow;
use tracing::info;

#[derive(Debug, FromRow)]
struct StagingRow {
    invoiceno: String,
    stockcode: String,
    description: Option<String>,
    quantity: i64,
    invoicedate: NaiveDateTime,
    unitprice: Decimal,
    customerid: Option<i64>,
    country: Option<String>,
}

impl From<StagingRow> for SourceRow {
    fn from(row: StagingRow) -> Self {
        SourceRow {
            invoiceno: row.invoiceno,
            stockcode: row.stockcode,
            description: row.description,
            quantity: row.quantity,
            invoicedate: row.invoicedate,
            unitprice: row.unitprice,
            customerid: row.customerid,
            country: row.country,
        }
    }
}

/// The SELECT issued for a staging table.
pub fn staging_query(table: &QualifiedName) -> String {
    format!(
        "SELECT invoiceno::text AS invoiceno, \
                stockcode::text AS stockcode, \
                description::text AS description, \
                quantity::bigint AS quantity, \
                invoicedate::timestamp AS invoicedate, \
                unitprice::numeric AS unitprice, \
                customerid::numeric::bigint AS customerid, \
                country::text AS country \
         FROM {}",
        table.quoted()
    )
}

/// Load every row of `table`.
pub async fn fetch_cleaned_batch(
    session: &mut PgSession,
    table: &QualifiedName,
) -> StoreResult<CleanedBatch> {
    let sql = staging_query(table);
    let rows: Vec<StagingRow> = sqlx::query_as(&sql)
        .fetch_all(session.conn())
        .await
        .map_err(|e| map_db_error(&format!("read staging table {table}"), e))?;
    info!(table = %table, rows = rows.len(), "Read cleaned batch from staging table");
    Ok(rows.into_iter().map(SourceRow::from).collect())
}
