//! Row types decoded from PostgreSQL and their conversion into domain records.

use chrono::NaiveDateTime;
use retaildwh_core::{
    CatalogObject, ColumnDefinition, DataQualityMetric, EtlRun, LineageEntry, QualityVerdict,
    RunStatus, StoreError, StoreResult,
};
use sqlx::FromRow;

/// A row of `dwh_metadata.dwh_objects`.
#[derive(Debug, Clone, FromRow)]
pub struct ObjectRow {
    pub object_id: i64,
    pub schema_name: String,
    pub object_name: String,
    pub object_type: String,
    pub created_date: NaiveDateTime,
    pub last_modified: NaiveDateTime,
    pub description: Option<String>,
    pub row_count: Option<i64>,
}

impl From<ObjectRow> for CatalogObject {
    fn from(row: ObjectRow) -> Self {
        CatalogObject {
            object_id: row.object_id,
            schema_name: row.schema_name,
            object_name: row.object_name,
            object_type: row.object_type,
            created_at: row.created_date,
            last_modified: row.last_modified,
            description: row.description,
            row_count: row.row_count,
        }
    }
}

/// A row of `dwh_metadata.column_definitions`.
#[derive(Debug, Clone, FromRow)]
pub struct ColumnRow {
    pub column_id: i64,
    pub object_id: i64,
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub references_table: Option<String>,
    pub references_column: Option<String>,
    pub description: Option<String>,
}

impl From<ColumnRow> for ColumnDefinition {
    fn from(row: ColumnRow) -> Self {
        ColumnDefinition {
            column_id: row.column_id,
            object_id: row.object_id,
            column_name: row.column_name,
            data_type: row.data_type,
            is_nullable: row.is_nullable,
            is_primary_key: row.is_primary_key,
            is_foreign_key: row.is_foreign_key,
            references_table: row.references_table,
            references_column: row.references_column,
            description: row.description,
        }
    }
}

/// A row of `dwh_metadata.etl_runs`.
#[derive(Debug, Clone, FromRow)]
pub struct RunRow {
    pub run_id: i64,
    pub source_name: String,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub status: String,
    pub records_processed: Option<i64>,
    pub records_inserted: Option<i64>,
    pub records_updated: Option<i64>,
    pub records_rejected: Option<i64>,
    pub error_message: Option<String>,
}

impl TryFrom<RunRow> for EtlRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> StoreResult<Self> {
        let status = RunStatus::parse(&row.status).ok_or_else(|| {
            StoreError::database(format!("run {} has unknown status {:?}", row.run_id, row.status))
        })?;
        Ok(EtlRun {
            run_id: row.run_id,
            source_name: row.source_name,
            start_time: row.start_time,
            end_time: row.end_time,
            status,
            records_processed: row.records_processed,
            records_inserted: row.records_inserted,
            records_updated: row.records_updated,
            records_rejected: row.records_rejected,
            error_message: row.error_message,
        })
    }
}

/// Lineage joined with `etl_runs`.
#[derive(Debug, Clone, FromRow)]
pub struct LineageRow {
    pub source_object: String,
    pub transformation_logic: Option<String>,
    pub etl_start_time: NaiveDateTime,
    pub records_processed: Option<i64>,
}

impl From<LineageRow> for LineageEntry {
    fn from(row: LineageRow) -> Self {
        LineageEntry {
            source_object: row.source_object,
            transformation_logic: row.transformation_logic,
            etl_start_time: row.etl_start_time,
            records_processed: row.records_processed,
        }
    }
}

/// A row of `dwh_metadata.data_quality`, NUMERIC columns read as float8.
#[derive(Debug, Clone, FromRow)]
pub struct QualityRow {
    pub quality_id: i64,
    pub object_id: i64,
    pub check_date: NaiveDateTime,
    pub metric_name: String,
    pub metric_value: Option<f64>,
    pub threshold: Option<f64>,
    pub pass_fail: String,
    pub details: Option<String>,
}

impl TryFrom<QualityRow> for DataQualityMetric {
    type Error = StoreError;

    fn try_from(row: QualityRow) -> StoreResult<Self> {
        let pass_fail = QualityVerdict::parse(&row.pass_fail).ok_or_else(|| {
            StoreError::database(format!(
                "quality metric {} has unknown verdict {:?}",
                row.quality_id, row.pass_fail
            ))
        })?;
        Ok(DataQualityMetric {
            quality_id: row.quality_id,
            object_id: row.object_id,
            check_date: row.check_date,
            metric_name: row.metric_name,
            metric_value: row.metric_value,
            threshold: row.threshold,
            pass_fail,
            details: row.details,
        })
    }
}

/// One column reported by `information_schema`.
#[derive(Debug, Clone, FromRow)]
pub struct IntrospectedColumnRow {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
}

/// One relation reported by `information_schema.tables`.
#[derive(Debug, Clone, FromRow)]
pub struct IntrospectedTableRow {
    pub table_name: String,
    pub table_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn run_row(status: &str) -> RunRow {
        RunRow {
            run_id: 7,
            source_name: "online_retail_20240501".to_string(),
            start_time: at(),
            end_time: None,
            status: status.to_string(),
            records_processed: None,
            records_inserted: None,
            records_updated: None,
            records_rejected: None,
            error_message: None,
        }
    }

    #[test]
    fn test_run_row_status_decoding() {
        let run = EtlRun::try_from(run_row("RUNNING")).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(EtlRun::try_from(run_row("DONE")).is_err());
    }

    #[test]
    fn test_quality_row_verdict_decoding() {
        let row = QualityRow {
            quality_id: 1,
            object_id: 2,
            check_date: at(),
            metric_name: "Completeness".to_string(),
            metric_value: Some(99.5),
            threshold: Some(95.0),
            pass_fail: "PASS".to_string(),
            details: None,
        };
        let metric = DataQualityMetric::try_from(row).unwrap();
        assert_eq!(metric.pass_fail, QualityVerdict::Pass);
    }
}
