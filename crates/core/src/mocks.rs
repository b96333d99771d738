//! In-memory warehouse for testing.
//!
//! `MemoryWarehouse` implements every store trait against plain collections
//! and behaves like one PostgreSQL connection where it matters to the engine:
//! uniqueness on natural keys, transaction scopes restored on rollback, a
//! scope that is poisoned by a failed statement until rolled back, sequences
//! that are not rolled back, and range routing of fact rows. Failures can be
//! injected per operation.

use crate::error::{StoreError, StoreResult};
use crate::ident::{QualifiedName, SqlIdent};
use crate::model::{
    CatalogObject, ColumnDefinition, ColumnId, ColumnRegistration, CustomerRow,
    DataQualityMetric, EtlRun, FactRecord, IntrospectedColumn, IntrospectedObject, LineageEntry,
    LineageRecord, NewLineage, NewQualityMetric, ObjectId, ObjectRegistration, ProductRow,
    QualityIssue, RunCompletion, RunId, RunStatus, SurrogateKey, TimeRow, DATA_QUALITY_LOGS,
    FACT_SALES, FACT_SALES_PARTITIONED, METADATA_SCHEMA, WAREHOUSE_SCHEMA,
};
use crate::partition::{IndexSpec, MonthPartition, PartitionLayout, PartitionTarget, DEFAULT_PARTITION};
use crate::traits::{
    AuditStore, CatalogStore, DimensionStore, FactStore, PartitionStore, RunStore, SchemaStore,
    Session,
};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

/// Operations whose next invocation(s) can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    Commit,
    UpsertObject,
    UpsertColumn,
    CountRows,
    SetRowCount,
    Introspect,
    CreatePartition,
    CreateIndex,
    CountInvalidSales,
    UpsertProduct,
    UpsertCustomer,
    UpsertTime,
    UpsertLocation,
    InsertFact,
    InsertRun,
    FinishRun,
    InsertLineage,
    InsertQuality,
    InsertQualityIssue,
}

/// A row of the unpartitioned `dwh.fact_sales` table. Columns are nullable
/// there, so every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacySale {
    pub product_id: Option<SurrogateKey>,
    pub customer_id: Option<SurrogateKey>,
    pub quantity_sold: Option<i32>,
    pub sale_date: Option<NaiveDateTime>,
    pub revenue: Option<Decimal>,
}

impl LegacySale {
    // Mirrors the SQL predicate, where NULL comparisons are not true.
    fn is_invalid(&self) -> bool {
        self.quantity_sold.is_some_and(|q| q <= 0)
            || self.revenue.is_some_and(|r| r < Decimal::ZERO)
            || self.sale_date.is_none()
    }
}

/// A fact row stored in the partitioned table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFact {
    pub id: i64,
    /// Name of the partition the row was routed to
    pub partition: String,
    pub fact: FactRecord,
}

/// A dimension row of `dwh.dim_time` with its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredTime {
    pub time_id: SurrogateKey,
    pub row: TimeRow,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    metadata_schema: bool,
    warehouse_schema: bool,
    objects: BTreeMap<ObjectId, CatalogObject>,
    columns: BTreeMap<ColumnId, ColumnDefinition>,
    runs: BTreeMap<RunId, EtlRun>,
    lineage: Vec<LineageRecord>,
    quality: Vec<DataQualityMetric>,
    issues: Vec<QualityIssue>,
    products: BTreeMap<SurrogateKey, ProductRow>,
    customers: BTreeMap<i64, Option<String>>,
    times: BTreeMap<SurrogateKey, TimeRow>,
    locations: BTreeMap<SurrogateKey, String>,
    legacy_sales: Vec<LegacySale>,
    partitioned_table: bool,
    partitions: BTreeSet<MonthPartition>,
    default_partition: bool,
    facts: Vec<StoredFact>,
    indexes: BTreeSet<&'static str>,
}

impl Tables {
    fn require_metadata(&self, relation: &str) -> StoreResult<()> {
        if self.metadata_schema {
            Ok(())
        } else {
            Err(StoreError::not_found(format!("relation {METADATA_SCHEMA}.{relation}")))
        }
    }

    fn require_warehouse(&self, relation: &str) -> StoreResult<()> {
        if self.warehouse_schema {
            Ok(())
        } else {
            Err(StoreError::not_found(format!("relation {WAREHOUSE_SCHEMA}.{relation}")))
        }
    }

    fn relation_rows(&self, schema: &str, name: &str) -> Option<usize> {
        match (schema, name) {
            (METADATA_SCHEMA, _) if !self.metadata_schema => None,
            (METADATA_SCHEMA, "dwh_objects") => Some(self.objects.len()),
            (METADATA_SCHEMA, "column_definitions") => Some(self.columns.len()),
            (METADATA_SCHEMA, "etl_runs") => Some(self.runs.len()),
            (METADATA_SCHEMA, "data_lineage") => Some(self.lineage.len()),
            (METADATA_SCHEMA, "data_quality") => Some(self.quality.len()),
            (WAREHOUSE_SCHEMA, _) if !self.warehouse_schema => None,
            (WAREHOUSE_SCHEMA, FACT_SALES) => Some(self.legacy_sales.len()),
            (WAREHOUSE_SCHEMA, "dim_product") => Some(self.products.len()),
            (WAREHOUSE_SCHEMA, "dim_customer") => Some(self.customers.len()),
            (WAREHOUSE_SCHEMA, "dim_time") => Some(self.times.len()),
            (WAREHOUSE_SCHEMA, "dim_location") => Some(self.locations.len()),
            (WAREHOUSE_SCHEMA, DATA_QUALITY_LOGS) => Some(self.issues.len()),
            (WAREHOUSE_SCHEMA, FACT_SALES_PARTITIONED) if self.partitioned_table => {
                Some(self.facts.len())
            }
            (WAREHOUSE_SCHEMA, partition) if self.has_partition(partition) => {
                Some(self.facts.iter().filter(|f| f.partition == partition).count())
            }
            _ => None,
        }
    }

    fn has_partition(&self, name: &str) -> bool {
        (name == DEFAULT_PARTITION && self.default_partition)
            || self.partitions.iter().any(|m| m.to_string() == name)
    }
}

/// Relation layout reported by introspection, as `(name, data_type, nullable, pk)`.
type ColumnShape = (&'static str, &'static str, bool, bool);

const FACT_COLUMNS: &[ColumnShape] = &[
    ("id", "bigint", false, true),
    ("product_id", "bigint", true, false),
    ("customer_id", "bigint", true, false),
    ("quantity_sold", "integer", true, false),
    ("sale_date", "timestamp without time zone", true, false),
    ("revenue", "numeric", true, false),
];

const PARTITIONED_FACT_COLUMNS: &[ColumnShape] = &[
    ("id", "bigint", false, false),
    ("product_id", "bigint", false, false),
    ("customer_id", "bigint", false, false),
    ("quantity_sold", "integer", false, false),
    ("sale_date", "timestamp without time zone", false, false),
    ("revenue", "numeric", false, false),
];

const WAREHOUSE_RELATIONS: &[(&str, &[ColumnShape])] = &[
    (FACT_SALES, FACT_COLUMNS),
    (
        "dim_product",
        &[
            ("product_id", "bigint", false, true),
            ("product_name", "text", false, false),
            ("category", "text", true, false),
        ],
    ),
    (
        "dim_customer",
        &[
            ("customer_id", "bigint", false, true),
            ("location", "text", true, false),
        ],
    ),
    (
        "dim_time",
        &[
            ("time_id", "bigint", false, true),
            ("full_date", "date", false, false),
            ("day", "integer", true, false),
            ("month", "integer", true, false),
            ("quarter", "integer", true, false),
            ("year", "integer", true, false),
        ],
    ),
    (
        "dim_location",
        &[
            ("country_id", "bigint", false, true),
            ("country_name", "text", false, false),
        ],
    ),
    (
        DATA_QUALITY_LOGS,
        &[
            ("id", "bigint", false, true),
            ("check_type", "character varying", true, false),
            ("table_name", "character varying", true, false),
            ("issue_description", "text", true, false),
            ("detected_at", "timestamp without time zone", true, false),
        ],
    ),
];

fn introspected(name: &str, shape: &[ColumnShape]) -> IntrospectedObject {
    IntrospectedObject {
        name: name.to_string(),
        table_type: "BASE TABLE".to_string(),
        columns: shape
            .iter()
            .map(|&(name, data_type, is_nullable, is_primary_key)| IntrospectedColumn {
                name: name.to_string(),
                data_type: data_type.to_string(),
                is_nullable,
                is_primary_key,
            })
            .collect(),
    }
}

/// Sequences survive rollbacks, as in PostgreSQL.
#[derive(Debug, Default)]
struct Sequences(HashMap<&'static str, i64>);

impl Sequences {
    fn next(&mut self, name: &'static str) -> i64 {
        let value = self.0.entry(name).or_insert(0);
        *value += 1;
        *value
    }
}

/// A pending failure: `skip` successful calls, then `remaining` failures
/// (`None` for unlimited).
#[derive(Debug, Clone, Copy)]
struct Injection {
    skip: usize,
    remaining: Option<usize>,
}

/// In-memory implementation of every warehouse store trait.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: Tables,
    snapshot: Option<Tables>,
    aborted: bool,
    sequences: Sequences,
    failures: HashMap<FailPoint, Injection>,
    failing_quantities: HashSet<i32>,
    commits: usize,
    rollbacks: usize,
}

impl MemoryWarehouse {
    /// Create an empty warehouse with no schemas.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` invocations of `point`.
    pub fn fail_next(&mut self, point: FailPoint, times: usize) {
        self.fail_after(point, 0, times);
    }

    /// Let `skip` invocations of `point` succeed, then fail the next `times`.
    pub fn fail_after(&mut self, point: FailPoint, skip: usize, times: usize) {
        if times > 0 {
            self.failures.insert(
                point,
                Injection {
                    skip,
                    remaining: Some(times),
                },
            );
        }
    }

    /// Fail every invocation of `point` until cleared.
    pub fn fail_always(&mut self, point: FailPoint) {
        self.failures.insert(
            point,
            Injection {
                skip: 0,
                remaining: None,
            },
        );
    }

    /// Remove every injected failure.
    pub fn clear_failures(&mut self) {
        self.failures.clear();
        self.failing_quantities.clear();
    }

    /// Fail fact inserts whose quantity equals `quantity`.
    pub fn fail_facts_with_quantity(&mut self, quantity: i32) {
        self.failing_quantities.insert(quantity);
    }

    /// Append a row to the unpartitioned fact table.
    pub fn seed_legacy_sale(&mut self, sale: LegacySale) {
        self.tables.legacy_sales.push(sale);
    }

    /// Move the start time of a run into the past.
    pub fn backdate_run(&mut self, run_id: RunId, start_time: NaiveDateTime) {
        if let Some(run) = self.tables.runs.get_mut(&run_id) {
            run.start_time = start_time;
        }
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }

    pub fn rollback_count(&self) -> usize {
        self.rollbacks
    }

    /// Product rows keyed by surrogate key.
    pub fn products(&self) -> &BTreeMap<SurrogateKey, ProductRow> {
        &self.tables.products
    }

    /// Customer locations keyed by customer id.
    pub fn customers(&self) -> &BTreeMap<i64, Option<String>> {
        &self.tables.customers
    }

    pub fn time_rows(&self) -> Vec<StoredTime> {
        self.tables
            .times
            .iter()
            .map(|(&time_id, &row)| StoredTime { time_id, row })
            .collect()
    }

    /// Country names keyed by surrogate key.
    pub fn locations(&self) -> &BTreeMap<SurrogateKey, String> {
        &self.tables.locations
    }

    pub fn facts(&self) -> &[StoredFact] {
        &self.tables.facts
    }

    /// Facts routed to the named partition.
    pub fn facts_in(&self, partition: &str) -> Vec<&StoredFact> {
        self.tables
            .facts
            .iter()
            .filter(|f| f.partition == partition)
            .collect()
    }

    pub fn runs(&self) -> Vec<&EtlRun> {
        self.tables.runs.values().collect()
    }

    pub fn lineage(&self) -> &[LineageRecord] {
        &self.tables.lineage
    }

    pub fn quality_metrics(&self) -> &[DataQualityMetric] {
        &self.tables.quality
    }

    pub fn quality_issues(&self) -> &[QualityIssue] {
        &self.tables.issues
    }

    pub fn objects(&self) -> Vec<&CatalogObject> {
        self.tables.objects.values().collect()
    }

    pub fn columns_of(&self, object_id: ObjectId) -> Vec<&ColumnDefinition> {
        self.tables
            .columns
            .values()
            .filter(|c| c.object_id == object_id)
            .collect()
    }

    /// Names of every partition created so far, the default one included.
    pub fn partition_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.partitions.iter().map(|m| m.to_string()).collect();
        if self.tables.default_partition {
            names.push(DEFAULT_PARTITION.to_string());
        }
        names
    }

    pub fn index_names(&self) -> Vec<&'static str> {
        self.tables.indexes.iter().copied().collect()
    }

    fn now() -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn take_failure(&mut self, point: FailPoint) -> Option<StoreError> {
        let injection = self.failures.get_mut(&point)?;
        if injection.skip > 0 {
            injection.skip -= 1;
            return None;
        }
        let exhausted = match injection.remaining.as_mut() {
            None => false,
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
        };
        if exhausted {
            self.failures.remove(&point);
        }
        Some(StoreError::Injected(format!("{point:?}")))
    }

    fn check_aborted(&self) -> StoreResult<()> {
        if self.aborted {
            return Err(StoreError::transaction(
                "current transaction is aborted, commands ignored until end of transaction block",
            ));
        }
        Ok(())
    }

    /// Run one statement; a failure inside an open scope poisons it.
    fn exec<T>(
        &mut self,
        point: FailPoint,
        statement: impl FnOnce(&mut Tables, &mut Sequences, NaiveDateTime) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.check_aborted()?;
        let result = match self.take_failure(point) {
            Some(err) => Err(err),
            None => statement(&mut self.tables, &mut self.sequences, Self::now()),
        };
        if result.is_err() && self.snapshot.is_some() {
            self.aborted = true;
        }
        result
    }
}

#[async_trait]
impl Session for MemoryWarehouse {
    async fn begin(&mut self) -> StoreResult<()> {
        if self.snapshot.is_some() {
            return Err(StoreError::transaction("a transaction is already in progress"));
        }
        if let Some(err) = self.take_failure(FailPoint::Begin) {
            return Err(err);
        }
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let Some(snapshot) = self.snapshot.take() else {
            return Err(StoreError::transaction("there is no transaction in progress"));
        };
        if self.aborted {
            self.tables = snapshot;
            self.aborted = false;
            return Err(StoreError::transaction("transaction was aborted and has been rolled back"));
        }
        if let Some(err) = self.take_failure(FailPoint::Commit) {
            self.tables = snapshot;
            return Err(err);
        }
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.tables = snapshot;
            self.rollbacks += 1;
        }
        self.aborted = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }
}

#[async_trait]
impl SchemaStore for MemoryWarehouse {
    async fn ensure_metadata_schema(&mut self) -> StoreResult<()> {
        self.check_aborted()?;
        self.tables.metadata_schema = true;
        Ok(())
    }

    async fn ensure_warehouse_schema(&mut self) -> StoreResult<()> {
        self.check_aborted()?;
        self.tables.warehouse_schema = true;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryWarehouse {
    async fn upsert_object(&mut self, registration: &ObjectRegistration) -> StoreResult<ObjectId> {
        self.exec(FailPoint::UpsertObject, |t, seq, now| {
            t.require_metadata("dwh_objects")?;
            let existing = t.objects.values_mut().find(|o| {
                o.schema_name == registration.schema_name && o.object_name == registration.object_name
            });
            if let Some(object) = existing {
                object.last_modified = now;
                object.description = registration.description.clone();
                return Ok(object.object_id);
            }
            let object_id = seq.next("dwh_objects");
            t.objects.insert(
                object_id,
                CatalogObject {
                    object_id,
                    schema_name: registration.schema_name.clone(),
                    object_name: registration.object_name.clone(),
                    object_type: registration.object_type.clone(),
                    created_at: now,
                    last_modified: now,
                    description: registration.description.clone(),
                    row_count: None,
                },
            );
            Ok(object_id)
        })
    }

    async fn upsert_column(
        &mut self,
        object_id: ObjectId,
        registration: &ColumnRegistration,
    ) -> StoreResult<ColumnId> {
        self.exec(FailPoint::UpsertColumn, |t, seq, _| {
            t.require_metadata("column_definitions")?;
            if !t.objects.contains_key(&object_id) {
                return Err(StoreError::constraint(format!(
                    "object_id {object_id} is not present in dwh_objects"
                )));
            }
            let existing = t
                .columns
                .values()
                .find(|c| c.object_id == object_id && c.column_name == registration.column_name)
                .map(|c| c.column_id);
            let column_id = existing.unwrap_or_else(|| seq.next("column_definitions"));
            t.columns.insert(
                column_id,
                ColumnDefinition {
                    column_id,
                    object_id,
                    column_name: registration.column_name.clone(),
                    data_type: registration.data_type.clone(),
                    is_nullable: registration.is_nullable,
                    is_primary_key: registration.is_primary_key,
                    is_foreign_key: registration.is_foreign_key,
                    references_table: registration.references_table.clone(),
                    references_column: registration.references_column.clone(),
                    description: registration.description.clone(),
                },
            );
            Ok(column_id)
        })
    }

    async fn find_object(&mut self, schema: &str, name: &str) -> StoreResult<Option<CatalogObject>> {
        self.check_aborted()?;
        self.tables.require_metadata("dwh_objects")?;
        Ok(self
            .tables
            .objects
            .values()
            .find(|o| o.schema_name == schema && o.object_name == name)
            .cloned())
    }

    async fn object_by_id(&mut self, object_id: ObjectId) -> StoreResult<Option<CatalogObject>> {
        self.check_aborted()?;
        self.tables.require_metadata("dwh_objects")?;
        Ok(self.tables.objects.get(&object_id).cloned())
    }

    async fn count_rows(&mut self, relation: &QualifiedName) -> StoreResult<i64> {
        self.exec(FailPoint::CountRows, |t, _, _| {
            t.relation_rows(relation.schema.as_str(), relation.name.as_str())
                .map(|n| n as i64)
                .ok_or_else(|| StoreError::not_found(format!("relation {relation}")))
        })
    }

    async fn set_row_count(&mut self, object_id: ObjectId, row_count: i64) -> StoreResult<()> {
        self.exec(FailPoint::SetRowCount, |t, _, now| {
            let object = t
                .objects
                .get_mut(&object_id)
                .ok_or_else(|| StoreError::not_found(format!("object_id {object_id}")))?;
            object.row_count = Some(row_count);
            object.last_modified = now;
            Ok(())
        })
    }

    async fn introspect_schema(&mut self, schema: &SqlIdent) -> StoreResult<Vec<IntrospectedObject>> {
        self.exec(FailPoint::Introspect, |t, _, _| {
            if schema.as_str() != WAREHOUSE_SCHEMA || !t.warehouse_schema {
                return Ok(Vec::new());
            }
            let mut objects: Vec<IntrospectedObject> = WAREHOUSE_RELATIONS
                .iter()
                .map(|(name, shape)| introspected(name, shape))
                .collect();
            if t.partitioned_table {
                objects.push(introspected(FACT_SALES_PARTITIONED, PARTITIONED_FACT_COLUMNS));
            }
            for month in &t.partitions {
                objects.push(introspected(&month.to_string(), PARTITIONED_FACT_COLUMNS));
            }
            if t.default_partition {
                objects.push(introspected(DEFAULT_PARTITION, PARTITIONED_FACT_COLUMNS));
            }
            objects.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(objects)
        })
    }

    async fn list_columns(&mut self, object_id: ObjectId) -> StoreResult<Vec<ColumnDefinition>> {
        self.check_aborted()?;
        Ok(self.columns_of(object_id).into_iter().cloned().collect())
    }

    async fn list_lineage(&mut self, object_id: ObjectId) -> StoreResult<Vec<LineageEntry>> {
        self.check_aborted()?;
        let mut records: Vec<&LineageRecord> = self
            .tables
            .lineage
            .iter()
            .filter(|l| l.target_object_id == object_id)
            .collect();
        records.sort_by(|a, b| (b.last_updated, b.lineage_id).cmp(&(a.last_updated, a.lineage_id)));
        Ok(records
            .into_iter()
            .filter_map(|l| {
                let run = self.tables.runs.get(&l.etl_run_id?)?;
                Some(LineageEntry {
                    source_object: l.source_object.clone(),
                    transformation_logic: l.transformation_logic.clone(),
                    etl_start_time: run.start_time,
                    records_processed: run.records_processed,
                })
            })
            .collect())
    }

    async fn recent_quality(
        &mut self,
        object_id: ObjectId,
        limit: i64,
    ) -> StoreResult<Vec<DataQualityMetric>> {
        self.check_aborted()?;
        let mut metrics: Vec<DataQualityMetric> = self
            .tables
            .quality
            .iter()
            .filter(|m| m.object_id == object_id)
            .cloned()
            .collect();
        metrics.sort_by(|a, b| (b.check_date, b.quality_id).cmp(&(a.check_date, a.quality_id)));
        metrics.truncate(limit.max(0) as usize);
        Ok(metrics)
    }
}

#[async_trait]
impl PartitionStore for MemoryWarehouse {
    async fn create_partitioned_fact_table(&mut self) -> StoreResult<()> {
        self.exec(FailPoint::CreatePartition, |t, _, _| {
            t.require_warehouse(FACT_SALES_PARTITIONED)?;
            t.partitioned_table = true;
            Ok(())
        })
    }

    async fn create_month_partition(&mut self, month: &MonthPartition) -> StoreResult<()> {
        self.exec(FailPoint::CreatePartition, |t, _, _| {
            if !t.partitioned_table {
                return Err(StoreError::not_found(format!(
                    "relation {WAREHOUSE_SCHEMA}.{FACT_SALES_PARTITIONED}"
                )));
            }
            t.partitions.insert(*month);
            Ok(())
        })
    }

    async fn create_default_partition(&mut self) -> StoreResult<()> {
        self.exec(FailPoint::CreatePartition, |t, _, _| {
            if !t.partitioned_table {
                return Err(StoreError::not_found(format!(
                    "relation {WAREHOUSE_SCHEMA}.{FACT_SALES_PARTITIONED}"
                )));
            }
            t.default_partition = true;
            Ok(())
        })
    }

    async fn create_index(&mut self, index: &IndexSpec) -> StoreResult<()> {
        self.exec(FailPoint::CreateIndex, |t, _, _| {
            if t.relation_rows(WAREHOUSE_SCHEMA, index.table).is_none() {
                return Err(StoreError::not_found(format!(
                    "relation {WAREHOUSE_SCHEMA}.{}",
                    index.table
                )));
            }
            t.indexes.insert(index.name);
            Ok(())
        })
    }

    async fn count_invalid_sales(&mut self) -> StoreResult<i64> {
        self.exec(FailPoint::CountInvalidSales, |t, _, _| {
            t.require_warehouse(FACT_SALES)?;
            Ok(t.legacy_sales.iter().filter(|s| s.is_invalid()).count() as i64)
        })
    }
}

#[async_trait]
impl DimensionStore for MemoryWarehouse {
    async fn upsert_product(&mut self, row: &ProductRow) -> StoreResult<SurrogateKey> {
        self.exec(FailPoint::UpsertProduct, |t, seq, _| {
            t.require_warehouse("dim_product")?;
            if let Some((&id, _)) = t.products.iter().find(|(_, p)| p.product_name == row.product_name) {
                return Ok(id);
            }
            let id = seq.next("dim_product");
            t.products.insert(id, row.clone());
            Ok(id)
        })
    }

    async fn upsert_customer(&mut self, row: &CustomerRow) -> StoreResult<SurrogateKey> {
        self.exec(FailPoint::UpsertCustomer, |t, _, _| {
            t.require_warehouse("dim_customer")?;
            t.customers
                .entry(row.customer_id)
                .or_insert_with(|| row.location.clone());
            Ok(row.customer_id)
        })
    }

    async fn upsert_time(&mut self, row: &TimeRow) -> StoreResult<SurrogateKey> {
        self.exec(FailPoint::UpsertTime, |t, seq, _| {
            t.require_warehouse("dim_time")?;
            if let Some((&id, _)) = t.times.iter().find(|(_, r)| r.full_date == row.full_date) {
                return Ok(id);
            }
            let id = seq.next("dim_time");
            t.times.insert(id, *row);
            Ok(id)
        })
    }

    async fn upsert_location(&mut self, country_name: &str) -> StoreResult<SurrogateKey> {
        self.exec(FailPoint::UpsertLocation, |t, seq, _| {
            t.require_warehouse("dim_location")?;
            if let Some((&id, _)) = t.locations.iter().find(|(_, name)| *name == country_name) {
                return Ok(id);
            }
            let id = seq.next("dim_location");
            t.locations.insert(id, country_name.to_string());
            Ok(id)
        })
    }
}

#[async_trait]
impl FactStore for MemoryWarehouse {
    async fn insert_fact(&mut self, fact: &FactRecord) -> StoreResult<()> {
        // Isolated like a savepoint: failures here never poison the scope.
        self.check_aborted()?;
        if let Some(err) = self.take_failure(FailPoint::InsertFact) {
            return Err(err);
        }
        if self.failing_quantities.contains(&fact.quantity_sold) {
            return Err(StoreError::Injected(format!(
                "fact with quantity {}",
                fact.quantity_sold
            )));
        }
        let t = &mut self.tables;
        if !t.partitioned_table {
            return Err(StoreError::not_found(format!(
                "relation {WAREHOUSE_SCHEMA}.{FACT_SALES_PARTITIONED}"
            )));
        }
        let layout = PartitionLayout::new(t.partitions.iter().copied().collect())
            .map_err(|err| StoreError::constraint(err.to_string()))?;
        let partition = match layout.route(fact.sale_date) {
            PartitionTarget::Default if !t.default_partition => {
                return Err(StoreError::constraint(format!(
                    "no partition of relation \"{FACT_SALES_PARTITIONED}\" found for row"
                )))
            }
            target => target.name(),
        };
        let id = self.sequences.next(FACT_SALES_PARTITIONED);
        t.facts.push(StoredFact {
            id,
            partition,
            fact: fact.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl RunStore for MemoryWarehouse {
    async fn insert_run(&mut self, source_name: &str) -> StoreResult<RunId> {
        self.exec(FailPoint::InsertRun, |t, seq, now| {
            t.require_metadata("etl_runs")?;
            let run_id = seq.next("etl_runs");
            t.runs.insert(
                run_id,
                EtlRun {
                    run_id,
                    source_name: source_name.to_string(),
                    start_time: now,
                    end_time: None,
                    status: RunStatus::Running,
                    records_processed: None,
                    records_inserted: None,
                    records_updated: None,
                    records_rejected: None,
                    error_message: None,
                },
            );
            Ok(run_id)
        })
    }

    async fn finish_run(&mut self, run_id: RunId, completion: &RunCompletion) -> StoreResult<bool> {
        self.exec(FailPoint::FinishRun, |t, _, now| {
            t.require_metadata("etl_runs")?;
            let Some(run) = t
                .runs
                .get_mut(&run_id)
                .filter(|run| run.status == RunStatus::Running)
            else {
                return Ok(false);
            };
            run.status = completion.status;
            run.end_time = Some(now);
            run.records_processed = Some(completion.counters.processed);
            run.records_inserted = Some(completion.counters.inserted);
            run.records_updated = Some(completion.counters.updated);
            run.records_rejected = Some(completion.counters.rejected);
            run.error_message = completion.error_message.clone();
            Ok(true)
        })
    }

    async fn fetch_run(&mut self, run_id: RunId) -> StoreResult<Option<EtlRun>> {
        self.check_aborted()?;
        self.tables.require_metadata("etl_runs")?;
        Ok(self.tables.runs.get(&run_id).cloned())
    }

    async fn fail_stale_runs(&mut self, older_than: Duration, message: &str) -> StoreResult<u64> {
        self.exec(FailPoint::FinishRun, |t, _, now| {
            t.require_metadata("etl_runs")?;
            let cutoff = chrono::Duration::from_std(older_than)
                .ok()
                .and_then(|age| now.checked_sub_signed(age));
            let Some(cutoff) = cutoff else {
                return Ok(0);
            };
            let mut reaped = 0;
            for run in t.runs.values_mut() {
                if run.status == RunStatus::Running && run.start_time < cutoff {
                    run.status = RunStatus::Failed;
                    run.end_time = Some(now);
                    run.error_message = Some(message.to_string());
                    reaped += 1;
                }
            }
            Ok(reaped)
        })
    }
}

#[async_trait]
impl AuditStore for MemoryWarehouse {
    async fn insert_lineage(&mut self, lineage: &NewLineage) -> StoreResult<i64> {
        self.exec(FailPoint::InsertLineage, |t, seq, now| {
            t.require_metadata("data_lineage")?;
            if !t.objects.contains_key(&lineage.target_object_id) {
                return Err(StoreError::constraint("data_lineage.target_object_id"));
            }
            if !t.runs.contains_key(&lineage.etl_run_id) {
                return Err(StoreError::constraint("data_lineage.etl_run_id"));
            }
            let lineage_id = seq.next("data_lineage");
            t.lineage.push(LineageRecord {
                lineage_id,
                target_object_id: lineage.target_object_id,
                source_object: lineage.source_object.clone(),
                etl_run_id: Some(lineage.etl_run_id),
                transformation_logic: lineage.transformation_logic.clone(),
                last_updated: now,
            });
            Ok(lineage_id)
        })
    }

    async fn insert_quality(&mut self, metric: &NewQualityMetric) -> StoreResult<i64> {
        self.exec(FailPoint::InsertQuality, |t, seq, now| {
            t.require_metadata("data_quality")?;
            if !t.objects.contains_key(&metric.object_id) {
                return Err(StoreError::constraint("data_quality.object_id"));
            }
            let quality_id = seq.next("data_quality");
            t.quality.push(DataQualityMetric {
                quality_id,
                object_id: metric.object_id,
                check_date: now,
                metric_name: metric.metric_name.clone(),
                metric_value: Some(metric.metric_value),
                threshold: metric.threshold,
                pass_fail: metric.pass_fail,
                details: metric.details.clone(),
            });
            Ok(quality_id)
        })
    }

    async fn insert_quality_issue(&mut self, issue: &QualityIssue) -> StoreResult<i64> {
        self.exec(FailPoint::InsertQualityIssue, |t, seq, _| {
            t.require_warehouse(DATA_QUALITY_LOGS)?;
            t.issues.push(issue.clone());
            Ok(seq.next(DATA_QUALITY_LOGS))
        })
    }
}
