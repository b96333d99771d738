//! Partition manager: range partitions, indexes and the sales invariant scan.

use crate::audit::AuditRecorder;
use crate::error::EngineResult;
use crate::scope;
use retaildwh_core::{AuditStore, PartitionLayout, PartitionStore, FACT_SALES, STAR_SCHEMA_INDEXES};
use tracing::{info, warn};

/// Check type logged for rows breaking the sales invariants.
pub const INVALID_VALUES_CHECK: &str = "Invalid Values";

/// Check type of the summary issue logged alongside every invalid-values issue.
pub const AUTO_CHECK: &str = "Auto Check";

pub struct PartitionManager<'a, S> {
    store: &'a mut S,
}

impl<'a, S: PartitionStore + AuditStore> PartitionManager<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        PartitionManager { store }
    }

    /// Create the range-partitioned fact table if absent.
    pub async fn ensure_partitioned_fact_table(&mut self) -> EngineResult<()> {
        self.store.begin().await?;
        let result = self
            .store
            .create_partitioned_fact_table()
            .await
            .map_err(Into::into);
        scope::finish(self.store, result).await
    }

    /// Create every month partition of `layout` plus the default partition.
    ///
    /// All partitions are created in one scope; returns how many were declared
    /// including the default.
    pub async fn declare_month_ranges(&mut self, layout: &PartitionLayout) -> EngineResult<usize> {
        self.store.begin().await?;
        let result = self.create_partitions(layout).await;
        let declared = scope::finish(self.store, result).await?;
        info!(partitions = declared, "Declared fact table partitions");
        Ok(declared)
    }

    async fn create_partitions(&mut self, layout: &PartitionLayout) -> EngineResult<usize> {
        for month in layout.months() {
            self.store.create_month_partition(month).await?;
        }
        self.store.create_default_partition().await?;
        Ok(layout.len() + 1)
    }

    /// Create the secondary indexes of the star schema if absent.
    pub async fn ensure_indexes(&mut self) -> EngineResult<usize> {
        self.store.begin().await?;
        let result = self.create_indexes().await;
        let created = scope::finish(self.store, result).await?;
        info!(indexes = created, "Ensured star schema indexes");
        Ok(created)
    }

    async fn create_indexes(&mut self) -> EngineResult<usize> {
        for index in &STAR_SCHEMA_INDEXES {
            self.store.create_index(index).await?;
        }
        Ok(STAR_SCHEMA_INDEXES.len())
    }

    /// Count rows of the unpartitioned fact table with a non-positive
    /// quantity, a negative revenue or no sale date. When there are any, an
    /// invalid-values issue and an automated-check issue are logged. Nothing
    /// is repaired.
    pub async fn check_sales_invariants(&mut self) -> EngineResult<i64> {
        let issue_count = self.store.count_invalid_sales().await?;
        if issue_count > 0 {
            warn!(table = FACT_SALES, issue_count, "Sales rows violate fact invariants");
            let mut audit = AuditRecorder::new(&mut *self.store);
            audit
                .log_quality_issue(
                    INVALID_VALUES_CHECK,
                    FACT_SALES,
                    &format!("{issue_count} invalid records found"),
                )
                .await?;
            audit
                .log_quality_issue(
                    AUTO_CHECK,
                    FACT_SALES,
                    "Automated data quality check detected issues",
                )
                .await?;
        }
        Ok(issue_count)
    }
}
