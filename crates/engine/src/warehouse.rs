//! Warehouse orchestrator.
//!
//! `setup` builds both schemas and the catalog; `load_into_dwh` runs one load
//! end to end and reports through its run row instead of returning errors.
//! Every operation takes the connection it works on as `&mut S`.

use crate::audit::AuditRecorder;
use crate::catalog::CatalogRegistry;
use crate::config::WarehouseConfig;
use crate::dimensions::DimensionResolver;
use crate::error::{EngineError, EngineResult};
use crate::facts::{FactLoadSummary, FactLoader};
use crate::partitions::PartitionManager;
use crate::quality::{self, MetricReading};
use crate::runs::{CompletionOutcome, RunTracker};
use crate::scope;
use chrono::{Local, NaiveDate};
use retaildwh_core::{
    CleanedBatch, DimensionKind, ObjectDescription, ObjectId, PartitionLayout, RunCompletion,
    RunCounters, RunId, RunStatus, WarehouseStore, FACT_SALES_PARTITIONED, WAREHOUSE_SCHEMA,
};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// What `setup` created or found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    /// Month partitions plus the default partition
    pub partitions: usize,
    pub indexes: usize,
    /// Objects registered by the schema scan
    pub objects_scanned: usize,
    /// Rows of the unpartitioned fact table breaking the fact invariants
    pub invalid_sales: i64,
}

/// Outcome of one load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    /// `None` when the run could not even be started
    pub run_id: Option<RunId>,
    pub source_name: String,
    /// Terminal status written for the run; `None` if nothing was written
    pub status: Option<RunStatus>,
    pub counters: RunCounters,
    pub facts: Option<FactLoadSummary>,
    pub error: Option<String>,
    /// The run was left RUNNING because no completion could be written
    pub orphaned: bool,
}

impl LoadReport {
    /// True only when the run was recorded as SUCCESS.
    pub fn succeeded(&self) -> bool {
        self.status == Some(RunStatus::Success)
    }
}

/// Catalog ids a load writes metadata against.
struct LoadTargets {
    fact: ObjectId,
    dimensions: Vec<ObjectId>,
}

/// Run name for a load from `source_table` on `day`.
pub fn run_source_name(source_table: &str, day: NaiveDate) -> String {
    format!("{}_{}", source_table, day.format("%Y%m%d"))
}

/// Composes the engine components into setup and load operations.
#[derive(Debug, Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    layout: PartitionLayout,
}

impl Warehouse {
    /// Validate `config` and derive the partition layout.
    pub fn new(config: WarehouseConfig) -> EngineResult<Self> {
        config.validate()?;
        let layout = config.partition_layout()?;
        Ok(Warehouse { config, layout })
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Create schemas, partitions and indexes, populate the catalog and run
    /// the sales invariant check. Errors propagate.
    pub async fn setup<S: WarehouseStore>(&self, store: &mut S) -> EngineResult<SetupReport> {
        info!("Setting up warehouse");
        store.ensure_metadata_schema().await?;
        store.ensure_warehouse_schema().await?;

        let mut partitions = PartitionManager::new(&mut *store);
        partitions.ensure_partitioned_fact_table().await?;
        let declared = partitions.declare_month_ranges(&self.layout).await?;
        let indexes = partitions.ensure_indexes().await?;

        let mut catalog = CatalogRegistry::new(&mut *store);
        let objects_scanned = catalog.scan_objects(WAREHOUSE_SCHEMA).await?;
        catalog.register_star_schema().await?;

        let invalid_sales = PartitionManager::new(&mut *store)
            .check_sales_invariants()
            .await?;

        let report = SetupReport {
            partitions: declared,
            indexes,
            objects_scanned,
            invalid_sales,
        };
        info!(?report, "Warehouse setup complete");
        Ok(report)
    }

    /// Load a cleaned batch. Returns whether the run ended in SUCCESS; all
    /// failures are recorded on the run row and in the log.
    pub async fn load_into_dwh<S: WarehouseStore>(
        &self,
        store: &mut S,
        batch: &CleanedBatch,
    ) -> bool {
        self.load(store, batch).await.succeeded()
    }

    /// Load a cleaned batch and describe what happened.
    pub async fn load<S: WarehouseStore>(&self, store: &mut S, batch: &CleanedBatch) -> LoadReport {
        let started = Instant::now();
        let source_name = run_source_name(&self.config.source_table, Local::now().date_naive());
        let mut report = LoadReport {
            run_id: None,
            source_name,
            status: None,
            counters: RunCounters::for_batch(batch.len()),
            facts: None,
            error: None,
            orphaned: false,
        };

        let run_id = match RunTracker::new(&mut *store).start(&report.source_name).await {
            Ok(run_id) => run_id,
            Err(err) => {
                error!(source = %report.source_name, error = %err, "Could not start ETL run");
                report.error = Some(err.to_string());
                return report;
            }
        };
        report.run_id = Some(run_id);

        let completion = match self.run_stages(store, batch, run_id, &mut report).await {
            Ok(()) => RunCompletion {
                status: RunStatus::Success,
                counters: report.counters,
                error_message: None,
            },
            Err(err) => {
                scope::abandon(store).await;
                error!(run_id, error = %err, "Load failed");
                retaildwh_observability::record_load_failure(run_id, &err.to_string());
                report.error = Some(err.to_string());
                RunCompletion {
                    status: RunStatus::Failed,
                    counters: report.counters,
                    error_message: Some(err.to_string()),
                }
            }
        };

        match RunTracker::new(&mut *store).complete(run_id, &completion).await {
            Ok(outcome) => {
                if let CompletionOutcome::FellBack { error } = &outcome {
                    report.error.get_or_insert_with(|| error.clone());
                }
                report.status = Some(outcome.status());
            }
            Err(err) => {
                report.orphaned = matches!(err, EngineError::OrphanedRun { .. });
                report.error.get_or_insert_with(|| err.to_string());
            }
        }

        if report.succeeded() {
            retaildwh_observability::record_load_summary(
                run_id,
                report.counters.processed as u64,
                report.counters.inserted as u64,
                report.counters.rejected as u64,
                started.elapsed(),
            );
        }
        report
    }

    async fn run_stages<S: WarehouseStore>(
        &self,
        store: &mut S,
        batch: &CleanedBatch,
        run_id: RunId,
        report: &mut LoadReport,
    ) -> EngineResult<()> {
        let targets = self.lookup_targets(store).await?;

        let stage = Instant::now();
        let mappings = DimensionResolver::new(&mut *store).resolve_all(batch).await?;
        retaildwh_observability::record_stage_latency(run_id, "dimensions", stage.elapsed());

        let stage = Instant::now();
        let loaded = FactLoader::new(&mut *store, self.config.fact_batch_size)
            .for_run(run_id)
            .load(batch, &mappings)
            .await;
        let summary = match loaded {
            Ok(summary) => summary,
            Err(err) => {
                // Earlier fact batches are already committed.
                if let EngineError::FactLoad { summary, .. } = &err {
                    report.counters.set_inserted(summary.inserted);
                    report.facts = Some(*summary);
                }
                return Err(err);
            }
        };
        retaildwh_observability::record_stage_latency(run_id, "facts", stage.elapsed());
        report.counters.set_inserted(summary.inserted);
        report.facts = Some(summary);

        let source = self.config.source_table.as_str();
        let note = format!("Transformed from source table {source} via ETL process");
        AuditRecorder::new(&mut *store)
            .record_lineage(targets.fact, source, run_id, Some(&note))
            .await?;

        let mut catalog = CatalogRegistry::new(&mut *store);
        for object_id in std::iter::once(targets.fact).chain(targets.dimensions.iter().copied()) {
            catalog.update_row_count(object_id).await?;
        }

        let readings = [
            quality::completeness(batch, self.config.completeness_threshold),
            quality::uniqueness(batch, self.config.uniqueness_threshold),
        ];
        for reading in &readings {
            self.record_metric(store, targets.fact, reading).await?;
        }
        Ok(())
    }

    async fn lookup_targets<S: WarehouseStore>(&self, store: &mut S) -> EngineResult<LoadTargets> {
        let mut catalog = CatalogRegistry::new(store);
        let fact = catalog
            .lookup_object(WAREHOUSE_SCHEMA, FACT_SALES_PARTITIONED)
            .await?;
        let mut dimensions = Vec::with_capacity(DimensionKind::ALL.len());
        for kind in DimensionKind::ALL {
            dimensions.push(catalog.lookup_object(WAREHOUSE_SCHEMA, kind.table_name()).await?);
        }
        Ok(LoadTargets { fact, dimensions })
    }

    /// NaN metrics are skipped; any other failure ends the load.
    async fn record_metric<S: WarehouseStore>(
        &self,
        store: &mut S,
        object_id: ObjectId,
        reading: &MetricReading,
    ) -> EngineResult<()> {
        let recorded = AuditRecorder::new(store)
            .record_quality(
                object_id,
                reading.name,
                reading.value,
                Some(reading.threshold),
                Some(&reading.details),
            )
            .await;
        match recorded {
            Ok(metric) => {
                info!(
                    metric = reading.name,
                    value = reading.value,
                    verdict = metric.verdict.as_str(),
                    "Recorded quality metric"
                );
                Ok(())
            }
            Err(EngineError::InvalidMetric { metric }) => {
                warn!(metric, "Skipped quality metric without a value");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Catalog view of one object, `None` when unregistered.
    pub async fn describe<S: WarehouseStore>(
        &self,
        store: &mut S,
        schema: &str,
        name: &str,
    ) -> EngineResult<Option<ObjectDescription>> {
        CatalogRegistry::new(store).describe_object(schema, name).await
    }

    /// Close runs left RUNNING for longer than `older_than`.
    pub async fn reap_stale_runs<S: WarehouseStore>(
        &self,
        store: &mut S,
        older_than: Duration,
    ) -> EngineResult<u64> {
        RunTracker::new(store).reap_stale(older_than).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_source_name_uses_calendar_day() {
        let day = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        assert_eq!(run_source_name("online_retail", day), "online_retail_20241201");
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = WarehouseConfig {
            fact_batch_size: 0,
            ..Default::default()
        };
        assert!(Warehouse::new(config).is_err());
        assert_eq!(Warehouse::new(WarehouseConfig::default()).unwrap().layout().len(), 36);
    }
}
