//! ETL run lifecycle and the append-only audit tables.

use crate::rows::RunRow;
use crate::session::{map_db_error, PgSession};
use async_trait::async_trait;
use retaildwh_core::{
    AuditStore, EtlRun, NewLineage, NewQualityMetric, QualityIssue, RunCompletion, RunId,
    RunStatus, RunStore, StoreResult,
};
use std::time::Duration;

#[async_trait]
impl RunStore for PgSession {
    async fn insert_run(&mut self, source_name: &str) -> StoreResult<RunId> {
        sqlx::query_scalar(
            "INSERT INTO dwh_metadata.etl_runs (source_name, start_time, status) \
             VALUES ($1, LOCALTIMESTAMP, $2) RETURNING run_id",
        )
        .bind(source_name)
        .bind(RunStatus::Running.as_str())
        .fetch_one(self.conn())
        .await
        .map_err(|e| map_db_error("start run", e))
    }

    async fn finish_run(&mut self, run_id: RunId, completion: &RunCompletion) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE dwh_metadata.etl_runs
            SET end_time = LOCALTIMESTAMP,
                status = $1,
                records_processed = $2,
                records_inserted = $3,
                records_updated = $4,
                records_rejected = $5,
                error_message = $6
            WHERE run_id = $7 AND status = 'RUNNING'
            "#,
        )
        .bind(completion.status.as_str())
        .bind(completion.counters.processed)
        .bind(completion.counters.inserted)
        .bind(completion.counters.updated)
        .bind(completion.counters.rejected)
        .bind(&completion.error_message)
        .bind(run_id)
        .execute(self.conn())
        .await
        .map_err(|e| map_db_error("complete run", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch_run(&mut self, run_id: RunId) -> StoreResult<Option<EtlRun>> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT run_id, source_name, start_time, end_time, status, records_processed,
                   records_inserted, records_updated, records_rejected, error_message
            FROM dwh_metadata.etl_runs
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(self.conn())
        .await
        .map_err(|e| map_db_error("fetch run", e))?;
        row.map(EtlRun::try_from).transpose()
    }

    async fn fail_stale_runs(&mut self, older_than: Duration, message: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE dwh_metadata.etl_runs
            SET status = 'FAILED', end_time = LOCALTIMESTAMP, error_message = $1
            WHERE status = 'RUNNING'
              AND start_time < LOCALTIMESTAMP - make_interval(secs => $2)
            "#,
        )
        .bind(message)
        .bind(older_than.as_secs_f64())
        .execute(self.conn())
        .await
        .map_err(|e| map_db_error("reap stale runs", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditStore for PgSession {
    async fn insert_lineage(&mut self, lineage: &NewLineage) -> StoreResult<i64> {
        sqlx::query_scalar(
            r#"
            INSERT INTO dwh_metadata.data_lineage
                (target_object_id, source_object, etl_run_id, transformation_logic)
            VALUES ($1, $2, $3, $4)
            RETURNING lineage_id
            "#,
        )
        .bind(lineage.target_object_id)
        .bind(&lineage.source_object)
        .bind(lineage.etl_run_id)
        .bind(&lineage.transformation_logic)
        .fetch_one(self.conn())
        .await
        .map_err(|e| map_db_error("record lineage", e))
    }

    async fn insert_quality(&mut self, metric: &NewQualityMetric) -> StoreResult<i64> {
        sqlx::query_scalar(
            r#"
            INSERT INTO dwh_metadata.data_quality
                (object_id, metric_name, metric_value, threshold, pass_fail, details)
            VALUES ($1, $2, $3::float8, $4::float8, $5, $6)
            RETURNING quality_id
            "#,
        )
        .bind(metric.object_id)
        .bind(&metric.metric_name)
        .bind(metric.metric_value)
        .bind(metric.threshold)
        .bind(metric.pass_fail.as_str())
        .bind(&metric.details)
        .fetch_one(self.conn())
        .await
        .map_err(|e| map_db_error("record quality metric", e))
    }

    async fn insert_quality_issue(&mut self, issue: &QualityIssue) -> StoreResult<i64> {
        sqlx::query_scalar(
            r#"
            INSERT INTO dwh.data_quality_logs (check_type, table_name, issue_description)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(&issue.check_type)
        .bind(&issue.table_name)
        .bind(&issue.issue_description)
        .fetch_one(self.conn())
        .await
        .map_err(|e| map_db_error("log quality issue", e))
    }
}
