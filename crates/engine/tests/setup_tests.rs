//! Warehouse setup and the metadata components on their own.

mod fixtures;

use anyhow::Result;
use fixtures::{at, ready_default};
use retaildwh_core::mocks::{FailPoint, LegacySale, MemoryWarehouse};
use retaildwh_core::{
    QualityVerdict, RunCompletion, RunCounters, RunStatus, DATA_QUALITY_LOGS, DEFAULT_PARTITION,
    FACT_SALES, FACT_SALES_PARTITIONED, WAREHOUSE_SCHEMA,
};
use retaildwh_engine::{
    AuditRecorder, CatalogRegistry, EngineError, RunTracker, Warehouse, WarehouseConfig,
};

#[tokio::test]
async fn test_setup_declares_partitions_and_indexes() -> Result<()> {
    let warehouse = Warehouse::new(WarehouseConfig::default())?;
    let mut store = MemoryWarehouse::new();

    let report = warehouse.setup(&mut store).await?;

    assert_eq!(report.partitions, 37);
    assert_eq!(report.indexes, 12);
    assert_eq!(report.invalid_sales, 0);
    // Six base relations, the partitioned table and its 37 partitions.
    assert_eq!(report.objects_scanned, 44);

    let partitions = store.partition_names();
    assert_eq!(partitions.len(), 37);
    assert!(partitions.contains(&"sales_2023_01".to_string()));
    assert!(partitions.contains(&"sales_2025_12".to_string()));
    assert!(partitions.contains(&DEFAULT_PARTITION.to_string()));
    assert_eq!(store.index_names().len(), 12);
    Ok(())
}

#[tokio::test]
async fn test_setup_is_repeatable() -> Result<()> {
    let (warehouse, mut store) = ready_default().await?;
    let objects = store.objects().len();

    let again = warehouse.setup(&mut store).await?;

    assert_eq!(again.partitions, 37);
    assert_eq!(store.partition_names().len(), 37);
    assert_eq!(store.objects().len(), objects);
    Ok(())
}

#[tokio::test]
async fn test_setup_applies_curated_catalog() -> Result<()> {
    let (warehouse, mut store) = ready_default().await?;

    let fact = warehouse
        .describe(&mut store, WAREHOUSE_SCHEMA, FACT_SALES_PARTITIONED)
        .await?
        .expect("fact table registered");
    assert_eq!(fact.object.object_type, "TABLE");
    assert!(fact.object.description.is_some());
    assert_eq!(fact.object.row_count, Some(0));

    let product_column = fact
        .columns
        .iter()
        .find(|c| c.column_name == "product_id")
        .expect("product_id column");
    assert!(product_column.is_foreign_key);
    assert_eq!(product_column.references_table.as_deref(), Some("dwh.dim_product"));
    assert_eq!(product_column.references_column.as_deref(), Some("product_id"));

    for dimension in ["dim_product", "dim_customer", "dim_time", "dim_location"] {
        let described = warehouse
            .describe(&mut store, WAREHOUSE_SCHEMA, dimension)
            .await?
            .expect("dimension registered");
        assert!(described.object.description.is_some(), "{dimension}");
        assert!(described.columns.iter().any(|c| c.is_primary_key), "{dimension}");
    }

    assert!(warehouse
        .describe(&mut store, WAREHOUSE_SCHEMA, DATA_QUALITY_LOGS)
        .await?
        .is_some());
    assert!(warehouse
        .describe(&mut store, WAREHOUSE_SCHEMA, "no_such_table")
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn test_invalid_legacy_sales_are_logged() -> Result<()> {
    let warehouse = Warehouse::new(WarehouseConfig::default())?;
    let mut store = MemoryWarehouse::new();
    store.seed_legacy_sale(LegacySale {
        quantity_sold: Some(-2),
        sale_date: Some(at(2024, 3, 5)),
        ..Default::default()
    });
    store.seed_legacy_sale(LegacySale {
        quantity_sold: Some(1),
        sale_date: None,
        ..Default::default()
    });
    store.seed_legacy_sale(LegacySale {
        quantity_sold: Some(3),
        sale_date: Some(at(2024, 3, 5)),
        ..Default::default()
    });

    let report = warehouse.setup(&mut store).await?;

    assert_eq!(report.invalid_sales, 2);
    let issues = store.quality_issues();
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].check_type, "Invalid Values");
    assert_eq!(issues[0].table_name, FACT_SALES);
    assert_eq!(issues[0].issue_description, "2 invalid records found");
    assert_eq!(issues[1].check_type, "Auto Check");
    assert_eq!(issues[1].table_name, FACT_SALES);
    assert_eq!(
        issues[1].issue_description,
        "Automated data quality check detected issues"
    );
    Ok(())
}

#[tokio::test]
async fn test_setup_failure_propagates() -> Result<()> {
    let warehouse = Warehouse::new(WarehouseConfig::default())?;
    let mut store = MemoryWarehouse::new();
    store.fail_next(FailPoint::CreatePartition, 1);

    let err = warehouse.setup(&mut store).await.unwrap_err();

    assert!(matches!(err, EngineError::Store(_)));
    assert!(store.partition_names().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_row_count_of_unknown_object() -> Result<()> {
    let (_, mut store) = ready_default().await?;

    let err = CatalogRegistry::new(&mut store)
        .update_row_count(9_999)
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::UnknownObject(9_999));
    Ok(())
}

#[tokio::test]
async fn test_lookup_of_unregistered_object() -> Result<()> {
    let (_, mut store) = ready_default().await?;

    let err = CatalogRegistry::new(&mut store)
        .lookup_object("staging", "online_retail")
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::UnregisteredObject { .. }));
    Ok(())
}

#[tokio::test]
async fn test_quality_verdicts() -> Result<()> {
    let (_, mut store) = ready_default().await?;
    let fact = CatalogRegistry::new(&mut store)
        .lookup_object(WAREHOUSE_SCHEMA, FACT_SALES_PARTITIONED)
        .await?;
    let mut audit = AuditRecorder::new(&mut store);

    let below = audit
        .record_quality(fact, "Completeness", 90.0, Some(95.0), None)
        .await?;
    let equal = audit
        .record_quality(fact, "Completeness", 95.0, Some(95.0), None)
        .await?;
    let unbounded = audit
        .record_quality(fact, "Row Count", 0.0, None, None)
        .await?;
    let nan = audit
        .record_quality(fact, "Uniqueness", f64::NAN, Some(98.0), None)
        .await;

    assert_eq!(below.verdict, QualityVerdict::Fail);
    assert_eq!(equal.verdict, QualityVerdict::Pass);
    assert_eq!(unbounded.verdict, QualityVerdict::Pass);
    assert!(matches!(nan, Err(EngineError::InvalidMetric { .. })));
    assert_eq!(store.quality_metrics().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_run_completes_once() -> Result<()> {
    let (_, mut store) = ready_default().await?;
    let mut runs = RunTracker::new(&mut store);
    let run_id = runs.start("online_retail_20241201").await?;
    let completion = RunCompletion {
        status: RunStatus::Success,
        counters: RunCounters {
            processed: 3,
            inserted: 2,
            updated: 0,
            rejected: 1,
        },
        error_message: None,
    };

    runs.complete(run_id, &completion).await?;
    let again = runs.complete(run_id, &completion).await;

    assert_eq!(again, Err(EngineError::RunNotRunning(run_id)));
    let run = runs.fetch(run_id).await?.expect("run exists");
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.records_rejected, Some(1));
    Ok(())
}

#[tokio::test]
async fn test_failed_write_rolls_back_scope() -> Result<()> {
    let (_, mut store) = ready_default().await?;
    let rollbacks = store.rollback_count();
    store.fail_next(FailPoint::InsertRun, 1);

    let started = RunTracker::new(&mut store).start("online_retail_20241201").await;

    assert!(started.is_err());
    assert_eq!(store.rollback_count(), rollbacks + 1);
    // The connection is usable again afterwards.
    let run_id = RunTracker::new(&mut store).start("online_retail_20241201").await?;
    assert_eq!(store.runs().len(), 1);
    assert_eq!(store.runs()[0].run_id, run_id);
    Ok(())
}
