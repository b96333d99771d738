//! Store behavior against a live PostgreSQL.
//!
//! Run with: RETAILDWH_TEST_DSN=postgres://... cargo test --test store_integration_tests

mod fixtures;

use anyhow::Result;
use chrono::NaiveDate;
use fixtures::fresh_session;
use retaildwh_postgres::PgSession;
use retaildwh_core::{
    CatalogStore, CustomerRow, DimensionStore, FactRecord, FactStore, MonthPartition,
    ObjectRegistration, PartitionStore, ProductRow, QualifiedName, RunCompletion, RunCounters,
    RunStatus, RunStore, Session, StoreError, TimeRow, UNKNOWN_CATEGORY,
};
use rust_decimal::Decimal;
use serial_test::serial;
use std::time::Duration;

fn sale(product_id: i64, customer_id: i64, year: i32, month: u32) -> FactRecord {
    FactRecord {
        product_id,
        customer_id,
        quantity_sold: 6,
        sale_date: NaiveDate::from_ymd_opt(year, month, 1)
            .unwrap()
            .and_hms_opt(8, 26, 0)
            .unwrap(),
        revenue: Decimal::new(1530, 2),
    }
}

#[tokio::test]
#[serial]
async fn test_dimension_upserts_return_existing_keys() -> Result<()> {
    let Some((_pool, mut session)) = fresh_session().await? else {
        return Ok(());
    };

    let product = ProductRow {
        product_name: "WHITE METAL LANTERN".to_string(),
        category: UNKNOWN_CATEGORY.to_string(),
    };
    let first = session.upsert_product(&product).await?;
    assert_eq!(session.upsert_product(&product).await?, first);

    let customer = CustomerRow {
        customer_id: 17850,
        location: Some("United Kingdom".to_string()),
    };
    assert_eq!(session.upsert_customer(&customer).await?, 17850);
    let moved = CustomerRow {
        customer_id: 17850,
        location: Some("France".to_string()),
    };
    assert_eq!(session.upsert_customer(&moved).await?, 17850);

    let day = TimeRow::from_date(NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
    let time_id = session.upsert_time(&day).await?;
    assert_eq!(session.upsert_time(&day).await?, time_id);

    let country = session.upsert_location("United Kingdom").await?;
    assert_eq!(session.upsert_location("United Kingdom").await?, country);
    Ok(())
}

/// Two connections resolving the same new natural keys at once
#[tokio::test]
#[serial]
async fn test_concurrent_upserts_share_one_key() -> Result<()> {
    let Some((pool, mut first)) = fresh_session().await? else {
        return Ok(());
    };
    let mut second = PgSession::acquire(&pool).await?;

    let names = ["WHITE METAL LANTERN", "REGENCY CAKESTAND 3 TIER", "PARTY BUNTING"];
    for name in names {
        let product = ProductRow {
            product_name: name.to_string(),
            category: UNKNOWN_CATEGORY.to_string(),
        };
        let (a, b) = tokio::join!(first.upsert_product(&product), second.upsert_product(&product));
        assert_eq!(a?, b?, "product {name}");
    }

    let countries = ["United Kingdom", "France", "EIRE"];
    for country in countries {
        let (a, b) = tokio::join!(first.upsert_location(country), second.upsert_location(country));
        assert_eq!(a?, b?, "location {country}");
    }

    let products = QualifiedName::parse("dwh", "dim_product")?;
    let locations = QualifiedName::parse("dwh", "dim_location")?;
    assert_eq!(first.count_rows(&products).await?, names.len() as i64);
    assert_eq!(first.count_rows(&locations).await?, countries.len() as i64);
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_facts_route_to_month_or_default_partition() -> Result<()> {
    let Some((_pool, mut session)) = fresh_session().await? else {
        return Ok(());
    };
    session
        .create_month_partition(&MonthPartition::new(2024, 12)?)
        .await?;
    session.create_default_partition().await?;

    session.insert_fact(&sale(1, 17850, 2024, 12)).await?;
    session.insert_fact(&sale(1, 17850, 2010, 12)).await?;

    let december = QualifiedName::parse("dwh", "sales_2024_12")?;
    let default = QualifiedName::parse("dwh", "sales_default")?;
    assert_eq!(session.count_rows(&december).await?, 1);
    assert_eq!(session.count_rows(&default).await?, 1);
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_failed_fact_insert_keeps_scope_usable() -> Result<()> {
    let Some((_pool, mut session)) = fresh_session().await? else {
        return Ok(());
    };
    session
        .create_month_partition(&MonthPartition::new(2024, 12)?)
        .await?;

    session.begin().await?;
    session.insert_fact(&sale(1, 17850, 2024, 12)).await?;
    // No partition covers 2010 until the default partition exists.
    let err = session.insert_fact(&sale(1, 17850, 2010, 12)).await.unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)), "{err}");
    session.insert_fact(&sale(2, 17850, 2024, 12)).await?;
    session.commit().await?;

    let december = QualifiedName::parse("dwh", "sales_2024_12")?;
    assert_eq!(session.count_rows(&december).await?, 2);
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_run_completion_is_guarded() -> Result<()> {
    let Some((_pool, mut session)) = fresh_session().await? else {
        return Ok(());
    };
    let run_id = session.insert_run("online_retail_20241201").await?;
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

    assert!(session.finish_run(run_id, &completion).await?);
    assert!(!session.finish_run(run_id, &completion).await?);

    let run = session.fetch_run(run_id).await?.expect("run exists");
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.records_inserted, Some(2));
    assert!(run.end_time.is_some());
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_stale_runs_are_reaped() -> Result<()> {
    let Some((_pool, mut session)) = fresh_session().await? else {
        return Ok(());
    };
    session.insert_run("online_retail_20241201").await?;

    assert_eq!(
        session
            .fail_stale_runs(Duration::from_secs(3600), "stale")
            .await?,
        0
    );
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(
        session
            .fail_stale_runs(Duration::from_secs(1), "stale")
            .await?,
        1
    );
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_rollback_discards_scope() -> Result<()> {
    let Some((_pool, mut session)) = fresh_session().await? else {
        return Ok(());
    };
    let registration = ObjectRegistration::new("dwh", "dim_product", "TABLE");

    session.begin().await?;
    assert!(session.in_transaction());
    session.upsert_object(&registration).await?;
    session.rollback().await?;

    assert!(!session.in_transaction());
    assert!(session.find_object("dwh", "dim_product").await?.is_none());
    Ok(())
}
