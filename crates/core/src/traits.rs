//! Persistence seams of the warehouse engine.
//!
//! Every engine component talks to the database through these traits, which
//! lets the PostgreSQL backend and the in-memory mock be swapped freely. One
//! implementation value represents one connection: components receive it as
//! `&mut` for the duration of a call and must leave no transaction open when
//! they return.
//!
//! Statements issued outside `begin`/`commit` take effect immediately.

use crate::error::StoreResult;
use crate::ident::{QualifiedName, SqlIdent};
use crate::model::{
    CatalogObject, ColumnDefinition, ColumnId, ColumnRegistration, CustomerRow,
    DataQualityMetric, EtlRun, FactRecord, IntrospectedObject, LineageEntry, NewLineage,
    NewQualityMetric, ObjectId, ObjectRegistration, ProductRow, QualityIssue, RunCompletion,
    RunId, SurrogateKey, TimeRow,
};
use crate::partition::{IndexSpec, MonthPartition};
use async_trait::async_trait;
use std::time::Duration;

/// Transaction control on the underlying connection.
///
/// # Scenarios
///
/// **Nested begin:** Returns `StoreError::Transaction`; scopes never nest.
///
/// **Rollback without begin:** No-op, so error paths can always roll back.
///
/// **Statement failure inside a scope:** The scope is poisoned until rolled
/// back; every further statement fails.
#[async_trait]
pub trait Session: Send {
    /// Open a transaction scope.
    async fn begin(&mut self) -> StoreResult<()>;

    /// Commit the open scope.
    async fn commit(&mut self) -> StoreResult<()>;

    /// Discard the open scope, if any.
    async fn rollback(&mut self) -> StoreResult<()>;

    /// Whether a scope is open.
    fn in_transaction(&self) -> bool;
}

/// Creation of the metadata and warehouse schemas.
#[async_trait]
pub trait SchemaStore: Session {
    /// Create `dwh_metadata` and its five tables if absent.
    async fn ensure_metadata_schema(&mut self) -> StoreResult<()>;

    /// Create `dwh`, the unpartitioned fact table, the four dimension tables
    /// and the quality log table if absent.
    async fn ensure_warehouse_schema(&mut self) -> StoreResult<()>;
}

/// Catalog of warehouse objects and their columns.
#[async_trait]
pub trait CatalogStore: Session {
    /// Upsert by `(schema_name, object_name)`.
    ///
    /// On conflict only `last_modified` and `description` are refreshed and the
    /// existing id is returned.
    async fn upsert_object(&mut self, registration: &ObjectRegistration) -> StoreResult<ObjectId>;

    /// Upsert by `(object_id, column_name)`, refreshing every attribute.
    ///
    /// **Unknown object:** Returns `StoreError::Constraint` (foreign key).
    async fn upsert_column(
        &mut self,
        object_id: ObjectId,
        registration: &ColumnRegistration,
    ) -> StoreResult<ColumnId>;

    /// Look an object up by name.
    async fn find_object(&mut self, schema: &str, name: &str) -> StoreResult<Option<CatalogObject>>;

    /// Look an object up by id.
    async fn object_by_id(&mut self, object_id: ObjectId) -> StoreResult<Option<CatalogObject>>;

    /// Count the live rows of a relation.
    ///
    /// **Missing relation:** Returns `StoreError::NotFound`.
    async fn count_rows(&mut self, relation: &QualifiedName) -> StoreResult<i64>;

    /// Persist a row count and refresh `last_modified`.
    ///
    /// **Unknown object:** Returns `StoreError::NotFound`.
    async fn set_row_count(&mut self, object_id: ObjectId, row_count: i64) -> StoreResult<()>;

    /// Tables and views of a schema with their columns.
    async fn introspect_schema(&mut self, schema: &SqlIdent) -> StoreResult<Vec<IntrospectedObject>>;

    /// Columns of an object ordered by `column_id`.
    async fn list_columns(&mut self, object_id: ObjectId) -> StoreResult<Vec<ColumnDefinition>>;

    /// Lineage of an object joined with its producing run, newest first.
    async fn list_lineage(&mut self, object_id: ObjectId) -> StoreResult<Vec<LineageEntry>>;

    /// The `limit` most recent quality metrics of an object, newest first.
    async fn recent_quality(
        &mut self,
        object_id: ObjectId,
        limit: i64,
    ) -> StoreResult<Vec<DataQualityMetric>>;
}

/// Range partitions and indexes of the fact storage.
#[async_trait]
pub trait PartitionStore: Session {
    /// Create `dwh.fact_sales_partitioned` if absent.
    async fn create_partitioned_fact_table(&mut self) -> StoreResult<()>;

    /// Create one month partition if absent.
    async fn create_month_partition(&mut self, month: &MonthPartition) -> StoreResult<()>;

    /// Create the catch-all partition if absent.
    async fn create_default_partition(&mut self) -> StoreResult<()>;

    /// Create a secondary index if absent.
    async fn create_index(&mut self, index: &IndexSpec) -> StoreResult<()>;

    /// Rows of `dwh.fact_sales` with a non-positive quantity, a negative
    /// revenue or a missing sale date.
    async fn count_invalid_sales(&mut self) -> StoreResult<i64>;
}

/// Get-or-create of dimension rows.
///
/// Each method is a single conflict-aware statement: insert the natural key,
/// or on conflict return the surrogate key already assigned to it.
#[async_trait]
pub trait DimensionStore: Session {
    /// Keyed by `product_name`.
    async fn upsert_product(&mut self, row: &ProductRow) -> StoreResult<SurrogateKey>;

    /// Keyed by `customer_id`; an existing customer keeps its location.
    async fn upsert_customer(&mut self, row: &CustomerRow) -> StoreResult<SurrogateKey>;

    /// Keyed by `full_date`.
    async fn upsert_time(&mut self, row: &TimeRow) -> StoreResult<SurrogateKey>;

    /// Keyed by `country_name`.
    async fn upsert_location(&mut self, country_name: &str) -> StoreResult<SurrogateKey>;
}

/// Insertion into the partitioned fact table.
#[async_trait]
pub trait FactStore: Session {
    /// Insert one fact row into the open scope.
    ///
    /// The insert is isolated: when it fails its own effects are undone and
    /// the enclosing scope stays usable for the next record.
    async fn insert_fact(&mut self, fact: &FactRecord) -> StoreResult<()>;
}

/// ETL run lifecycle rows.
#[async_trait]
pub trait RunStore: Session {
    /// Insert a RUNNING run started now.
    async fn insert_run(&mut self, source_name: &str) -> StoreResult<RunId>;

    /// Move a RUNNING run to a terminal state, stamping `end_time`.
    ///
    /// Returns `false` when the run does not exist or is no longer RUNNING;
    /// nothing is written in that case.
    async fn finish_run(&mut self, run_id: RunId, completion: &RunCompletion) -> StoreResult<bool>;

    async fn fetch_run(&mut self, run_id: RunId) -> StoreResult<Option<EtlRun>>;

    /// Mark RUNNING runs started more than `older_than` ago as FAILED.
    async fn fail_stale_runs(&mut self, older_than: Duration, message: &str) -> StoreResult<u64>;
}

/// Append-only lineage and quality records.
#[async_trait]
pub trait AuditStore: Session {
    async fn insert_lineage(&mut self, lineage: &NewLineage) -> StoreResult<i64>;

    async fn insert_quality(&mut self, metric: &NewQualityMetric) -> StoreResult<i64>;

    /// Append to `dwh.data_quality_logs`.
    async fn insert_quality_issue(&mut self, issue: &QualityIssue) -> StoreResult<i64>;
}

/// Everything the orchestrator needs from one connection.
pub trait WarehouseStore:
    SchemaStore + CatalogStore + PartitionStore + DimensionStore + FactStore + RunStore + AuditStore
{
}

impl<T> WarehouseStore for T where
    T: SchemaStore
        + CatalogStore
        + PartitionStore
        + DimensionStore
        + FactStore
        + RunStore
        + AuditStore
{
}
