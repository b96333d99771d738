//! Warehouse domain records.
//!
//! These types mirror the persisted catalog, run, lineage and quality tables
//! plus the dimension and fact rows of the star schema. Backends map their
//! rows into these; the engine never sees driver types.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Surrogate key of a catalog object.
pub type ObjectId = i64;
/// Surrogate key of a catalog column.
pub type ColumnId = i64;
/// Identifier of an ETL run.
pub type RunId = i64;
/// Surrogate key of a dimension row.
pub type SurrogateKey = i64;

/// Category stored for every product; the extract carries none.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Schema holding the star schema.
pub const WAREHOUSE_SCHEMA: &str = "dwh";
/// Schema holding the catalog, run, lineage and quality tables.
pub const METADATA_SCHEMA: &str = "dwh_metadata";
/// Unpartitioned fact table, scanned by the sales invariant check.
pub const FACT_SALES: &str = "fact_sales";
/// Range-partitioned fact table that loads write into.
pub const FACT_SALES_PARTITIONED: &str = "fact_sales_partitioned";
/// Append-only log of invariant-check findings.
pub const DATA_QUALITY_LOGS: &str = "data_quality_logs";

/// The four dimensions of the star schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimensionKind {
    /// Products keyed by name
    Product,
    /// Customers keyed by customer id
    Customer,
    /// Calendar days keyed by date
    Time,
    /// Countries keyed by name
    Location,
}

impl DimensionKind {
    /// All dimensions in resolution order.
    pub const ALL: [DimensionKind; 4] = [
        DimensionKind::Product,
        DimensionKind::Customer,
        DimensionKind::Time,
        DimensionKind::Location,
    ];

    /// Table name inside the warehouse schema.
    pub fn table_name(&self) -> &'static str {
        match self {
            DimensionKind::Product => "dim_product",
            DimensionKind::Customer => "dim_customer",
            DimensionKind::Time => "dim_time",
            DimensionKind::Location => "dim_location",
        }
    }
}

impl fmt::Display for DimensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DimensionKind::Product => "product",
            DimensionKind::Customer => "customer",
            DimensionKind::Time => "time",
            DimensionKind::Location => "location",
        };
        f.write_str(name)
    }
}

/// Input for registering (or refreshing) a catalog object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRegistration {
    /// Schema the object lives in
    pub schema_name: String,
    /// Object name, unique per schema
    pub object_name: String,
    /// `TABLE`, `VIEW`, ...
    pub object_type: String,
    /// Free-text description
    pub description: Option<String>,
}

impl ObjectRegistration {
    /// Registration without a description.
    pub fn new(
        schema_name: impl Into<String>,
        object_name: impl Into<String>,
        object_type: impl Into<String>,
    ) -> Self {
        ObjectRegistration {
            schema_name: schema_name.into(),
            object_name: object_name.into(),
            object_type: object_type.into(),
            description: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Input for registering (or refreshing) a column of a catalog object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRegistration {
    /// Column name, unique per object
    pub column_name: String,
    /// SQL data type as reported by the database
    pub data_type: String,
    /// Whether NULL is allowed
    pub is_nullable: bool,
    /// Member of the primary key
    pub is_primary_key: bool,
    /// References another table
    pub is_foreign_key: bool,
    /// Referenced table (`schema.table`)
    pub references_table: Option<String>,
    /// Referenced column
    pub references_column: Option<String>,
    /// Free-text description
    pub description: Option<String>,
}

impl ColumnRegistration {
    /// A plain column with no key metadata.
    pub fn new(column_name: impl Into<String>, data_type: impl Into<String>, is_nullable: bool) -> Self {
        ColumnRegistration {
            column_name: column_name.into(),
            data_type: data_type.into(),
            is_nullable,
            is_primary_key: false,
            is_foreign_key: false,
            references_table: None,
            references_column: None,
            description: None,
        }
    }

    /// Mark as (part of) the primary key.
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    /// Mark as a foreign key to `table.column`.
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.is_foreign_key = true;
        self.references_table = Some(table.into());
        self.references_column = Some(column.into());
        self
    }

    /// Attach a description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A registered warehouse object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogObject {
    pub object_id: ObjectId,
    pub schema_name: String,
    pub object_name: String,
    pub object_type: String,
    pub created_at: NaiveDateTime,
    pub last_modified: NaiveDateTime,
    pub description: Option<String>,
    pub row_count: Option<i64>,
}

/// A registered column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub column_id: ColumnId,
    pub object_id: ObjectId,
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub references_table: Option<String>,
    pub references_column: Option<String>,
    pub description: Option<String>,
}

/// A relation discovered by schema introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectedObject {
    /// Relation name
    pub name: String,
    /// `information_schema.tables.table_type` value
    pub table_type: String,
    /// Columns in ordinal order
    pub columns: Vec<IntrospectedColumn>,
}

/// A column discovered by schema introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectedColumn {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
}

/// Lifecycle state of an ETL run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Load in progress
    Running,
    /// Load finished
    Success,
    /// Load aborted or completion could not be recorded
    Failed,
}

impl RunStatus {
    /// Persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
        }
    }

    /// Parse the persisted representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RUNNING" => Some(RunStatus::Running),
            "SUCCESS" => Some(RunStatus::Success),
            "FAILED" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    /// SUCCESS and FAILED are terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run record counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub processed: i64,
    pub inserted: i64,
    pub updated: i64,
    pub rejected: i64,
}

impl RunCounters {
    /// Counters for a batch of `processed` rows before anything was loaded.
    pub fn for_batch(processed: usize) -> Self {
        RunCounters {
            processed: processed as i64,
            ..Default::default()
        }
    }

    /// Record the number of inserted rows; everything else counts as rejected.
    pub fn set_inserted(&mut self, inserted: usize) {
        self.inserted = inserted as i64;
        self.rejected = self.processed - self.inserted;
    }
}

/// The terminal write for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub counters: RunCounters,
    pub error_message: Option<String>,
}

/// A persisted ETL run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtlRun {
    pub run_id: RunId,
    pub source_name: String,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub status: RunStatus,
    pub records_processed: Option<i64>,
    pub records_inserted: Option<i64>,
    pub records_updated: Option<i64>,
    pub records_rejected: Option<i64>,
    pub error_message: Option<String>,
}

/// A lineage edge to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLineage {
    pub target_object_id: ObjectId,
    pub source_object: String,
    pub etl_run_id: RunId,
    pub transformation_logic: Option<String>,
}

/// A persisted lineage edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageRecord {
    pub lineage_id: i64,
    pub target_object_id: ObjectId,
    pub source_object: String,
    pub etl_run_id: Option<RunId>,
    pub transformation_logic: Option<String>,
    pub last_updated: NaiveDateTime,
}

/// Lineage of an object joined with the run that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub source_object: String,
    pub transformation_logic: Option<String>,
    pub etl_start_time: NaiveDateTime,
    pub records_processed: Option<i64>,
}

/// Outcome of comparing a metric with its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityVerdict {
    Pass,
    Fail,
}

impl QualityVerdict {
    /// FAIL iff a threshold is given and the value is below it.
    pub fn judge(value: f64, threshold: Option<f64>) -> Self {
        match threshold {
            Some(limit) if value < limit => QualityVerdict::Fail,
            _ => QualityVerdict::Pass,
        }
    }

    /// Persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityVerdict::Pass => "PASS",
            QualityVerdict::Fail => "FAIL",
        }
    }

    /// Parse the persisted representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PASS" => Some(QualityVerdict::Pass),
            "FAIL" => Some(QualityVerdict::Fail),
            _ => None,
        }
    }
}

/// A quality metric to append. Only the recorder builds these.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQualityMetric {
    pub object_id: ObjectId,
    pub metric_name: String,
    pub metric_value: f64,
    pub threshold: Option<f64>,
    pub pass_fail: QualityVerdict,
    pub details: Option<String>,
}

/// A persisted quality metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityMetric {
    pub quality_id: i64,
    pub object_id: ObjectId,
    pub check_date: NaiveDateTime,
    pub metric_name: String,
    pub metric_value: Option<f64>,
    pub threshold: Option<f64>,
    pub pass_fail: QualityVerdict,
    pub details: Option<String>,
}

/// An invariant-check finding for `dwh.data_quality_logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub check_type: String,
    pub table_name: String,
    pub issue_description: String,
}

/// Everything the catalog knows about one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescription {
    pub object: CatalogObject,
    pub columns: Vec<ColumnDefinition>,
    pub lineage: Vec<LineageEntry>,
    pub quality: Vec<DataQualityMetric>,
}

/// Natural key and attributes of a new product row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProductRow {
    pub product_name: String,
    pub category: String,
}

/// Natural key and attributes of a new customer row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomerRow {
    pub customer_id: i64,
    pub location: Option<String>,
}

/// A calendar day of the time dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRow {
    pub full_date: NaiveDate,
    pub day: i32,
    pub month: i32,
    pub quarter: i32,
    pub year: i32,
}

impl TimeRow {
    /// Derive day, month, quarter and year from a date.
    pub fn from_date(full_date: NaiveDate) -> Self {
        let month = full_date.month() as i32;
        TimeRow {
            full_date,
            day: full_date.day() as i32,
            month,
            quarter: (month - 1) / 3 + 1,
            year: full_date.year(),
        }
    }
}

/// A fact row ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactRecord {
    pub product_id: SurrogateKey,
    pub customer_id: SurrogateKey,
    pub quantity_sold: i32,
    pub sale_date: NaiveDateTime,
    pub revenue: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarter_derivation() {
        let quarters: Vec<i32> = (1..=12)
            .map(|m| TimeRow::from_date(NaiveDate::from_ymd_opt(2024, m, 15).unwrap()).quarter)
            .collect();
        assert_eq!(quarters, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]);
    }

    #[test]
    fn test_time_row_attributes() {
        let row = TimeRow::from_date(NaiveDate::from_ymd_opt(2011, 2, 28).unwrap());
        assert_eq!((row.day, row.month, row.quarter, row.year), (28, 2, 1, 2011));
    }

    #[test]
    fn test_verdict_rule() {
        assert_eq!(QualityVerdict::judge(94.9, Some(95.0)), QualityVerdict::Fail);
        assert_eq!(QualityVerdict::judge(95.0, Some(95.0)), QualityVerdict::Pass);
        assert_eq!(QualityVerdict::judge(-1.0, None), QualityVerdict::Pass);
    }

    #[test]
    fn test_run_status_round_trip_and_terminality() {
        for status in [RunStatus::Running, RunStatus::Success, RunStatus::Failed] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("Failed"), None);
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_counters_derive_rejected() {
        let mut counters = RunCounters::for_batch(3);
        counters.set_inserted(2);
        assert_eq!(counters.rejected, 1);
        assert_eq!(counters.inserted + counters.rejected, counters.processed);
    }

    #[test]
    fn test_column_builder() {
        let col = ColumnRegistration::new("product_id", "bigint", false)
            .references("dwh.dim_product", "product_id")
            .describe("Reference to product dimension");
        assert!(col.is_foreign_key);
        assert!(!col.is_primary_key);
        assert_eq!(col.references_column.as_deref(), Some("product_id"));
    }
}
