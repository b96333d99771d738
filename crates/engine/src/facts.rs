//! Fact loader.
//!
//! Every row of the batch ends in exactly one `RecordOutcome`. Rows that
//! cannot be mapped to dimension keys, or whose measures break the fact
//! invariants, are rejected before touching the database. Inserted rows are
//! committed every `batch_size` records; a failing insert is undone on its own
//! and loading continues.

use crate::dimensions::DimensionMappings;
use crate::error::{EngineError, EngineResult};
use crate::scope;
use chrono::NaiveDate;
use retaildwh_core::{CleanedBatch, FactRecord, FactStore, RunId, SourceRow, StoreError};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Why a row was not turned into a fact record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingCustomerId,
    UnknownCustomer(i64),
    UnknownProduct(String),
    UnknownSaleDate(NaiveDate),
    NonPositiveQuantity(i64),
    QuantityOutOfRange(i64),
    NegativeUnitPrice(Decimal),
    RevenueOverflow,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingCustomerId => write!(f, "missing customer id"),
            RejectReason::UnknownCustomer(id) => write!(f, "customer {id} has no dimension key"),
            RejectReason::UnknownProduct(code) => write!(f, "stock code {code} has no product key"),
            RejectReason::UnknownSaleDate(date) => write!(f, "date {date} has no time key"),
            RejectReason::NonPositiveQuantity(q) => write!(f, "quantity {q} is not positive"),
            RejectReason::QuantityOutOfRange(q) => write!(f, "quantity {q} does not fit the fact column"),
            RejectReason::NegativeUnitPrice(p) => write!(f, "unit price {p} is negative"),
            RejectReason::RevenueOverflow => write!(f, "revenue overflows a decimal"),
        }
    }
}

/// What happened to one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Inserted,
    Rejected(RejectReason),
    Failed(StoreError),
}

/// Aggregated outcomes of one fact load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FactLoadSummary {
    /// Rows seen
    pub processed: usize,
    /// Rows inserted
    pub inserted: usize,
    /// Rows refused before insertion
    pub invalid: usize,
    /// Rows whose insert failed
    pub failed: usize,
    /// Commits issued, including the final one
    pub commits: usize,
}

impl FactLoadSummary {
    /// Every row that was not inserted.
    pub fn rejected(&self) -> usize {
        self.processed - self.inserted
    }

    /// What is left of an interrupted load of `batch_len` rows: only the
    /// `committed` inserts are durable, every other row counts as rejected.
    fn interrupted(mut self, batch_len: usize, committed: usize) -> Self {
        self.processed = batch_len;
        self.inserted = committed;
        self
    }

    fn record(&mut self, outcome: &RecordOutcome) {
        self.processed += 1;
        match outcome {
            RecordOutcome::Inserted => self.inserted += 1,
            RecordOutcome::Rejected(_) => self.invalid += 1,
            RecordOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Build the fact record for `row`, or say why it cannot be loaded.
pub fn prepare_fact(row: &SourceRow, mappings: &DimensionMappings) -> Result<FactRecord, RejectReason> {
    let customer = row.customerid.ok_or(RejectReason::MissingCustomerId)?;
    let product_id = *mappings
        .products
        .get(&row.stockcode)
        .ok_or_else(|| RejectReason::UnknownProduct(row.stockcode.clone()))?;
    let customer_id = *mappings
        .customers
        .get(&customer)
        .ok_or(RejectReason::UnknownCustomer(customer))?;
    if !mappings.dates.contains_key(&row.sale_date()) {
        return Err(RejectReason::UnknownSaleDate(row.sale_date()));
    }

    if row.quantity <= 0 {
        return Err(RejectReason::NonPositiveQuantity(row.quantity));
    }
    let quantity_sold =
        i32::try_from(row.quantity).map_err(|_| RejectReason::QuantityOutOfRange(row.quantity))?;
    if row.unitprice < Decimal::ZERO {
        return Err(RejectReason::NegativeUnitPrice(row.unitprice));
    }
    let revenue = Decimal::from(quantity_sold)
        .checked_mul(row.unitprice)
        .ok_or(RejectReason::RevenueOverflow)?;

    Ok(FactRecord {
        product_id,
        customer_id,
        quantity_sold,
        sale_date: row.invoicedate,
        revenue,
    })
}

/// Whether an insert error only concerns the record itself. Connection and
/// transaction failures leave the scope unusable and end the load.
fn is_record_level(err: &StoreError) -> bool {
    !matches!(err, StoreError::Connection(_) | StoreError::Transaction(_))
}

pub struct FactLoader<'a, S> {
    store: &'a mut S,
    batch_size: usize,
    run_id: Option<RunId>,
}

impl<'a, S: FactStore> FactLoader<'a, S> {
    /// A loader committing every `batch_size` inserted records (at least 1).
    pub fn new(store: &'a mut S, batch_size: usize) -> Self {
        FactLoader {
            store,
            batch_size: batch_size.max(1),
            run_id: None,
        }
    }

    /// Attribute rejections to a run in the metric log.
    pub fn for_run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Load every row of `batch`. Records committed before a fatal error stay
    /// committed, and the returned `EngineError::FactLoad` counts them.
    pub async fn load(
        &mut self,
        batch: &CleanedBatch,
        mappings: &DimensionMappings,
    ) -> EngineResult<FactLoadSummary> {
        let mut summary = FactLoadSummary::default();
        let mut committed = 0;
        let result = match self.store.begin().await {
            Ok(()) => {
                let rows = self
                    .load_rows(batch.rows(), mappings, &mut summary, &mut committed)
                    .await;
                scope::finish(self.store, rows).await
            }
            Err(err) => Err(err.into()),
        };
        if let Err(source) = result {
            let partial = summary.interrupted(batch.len(), committed);
            warn!(
                committed = partial.inserted,
                rejected = partial.rejected(),
                error = %source,
                "Fact load interrupted"
            );
            return Err(EngineError::FactLoad {
                summary: partial,
                source: Box::new(source),
            });
        }
        summary.commits += 1;
        info!(
            processed = summary.processed,
            inserted = summary.inserted,
            rejected = summary.rejected(),
            "Loaded fact table"
        );
        Ok(summary)
    }

    async fn load_rows(
        &mut self,
        rows: &[SourceRow],
        mappings: &DimensionMappings,
        summary: &mut FactLoadSummary,
        committed: &mut usize,
    ) -> EngineResult<()> {
        for (index, row) in rows.iter().enumerate() {
            let outcome = self.load_row(row, mappings).await;
            summary.record(&outcome);
            match outcome {
                RecordOutcome::Inserted => {
                    if summary.inserted % self.batch_size == 0 {
                        self.store.commit().await?;
                        summary.commits += 1;
                        *committed = summary.inserted;
                        debug!(inserted = summary.inserted, "Committed fact batch");
                        self.store.begin().await?;
                    }
                }
                RecordOutcome::Rejected(reason) => self.report(index, &reason.to_string()),
                RecordOutcome::Failed(err) => {
                    if !is_record_level(&err) {
                        return Err(err.into());
                    }
                    warn!(row = index, error = %err, "Fact insert failed");
                    self.report(index, &err.to_string());
                }
            }
        }
        Ok(())
    }

    async fn load_row(&mut self, row: &SourceRow, mappings: &DimensionMappings) -> RecordOutcome {
        let fact = match prepare_fact(row, mappings) {
            Ok(fact) => fact,
            Err(reason) => return RecordOutcome::Rejected(reason),
        };
        match self.store.insert_fact(&fact).await {
            Ok(()) => RecordOutcome::Inserted,
            Err(err) => RecordOutcome::Failed(err),
        }
    }

    fn report(&self, row: usize, reason: &str) {
        match self.run_id {
            Some(run_id) => retaildwh_observability::record_rejected_record(run_id, row, reason),
            None => warn!(row, reason, "Fact record rejected"),
        }
    }
}
