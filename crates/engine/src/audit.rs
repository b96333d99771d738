//! Lineage and quality recorder.
//!
//! Lineage edges, quality metrics and invariant findings are append-only;
//! each call writes exactly one row in its own scope.

use crate::error::{EngineError, EngineResult};
use crate::scope;
use retaildwh_core::{
    AuditStore, NewLineage, NewQualityMetric, ObjectId, QualityIssue, QualityVerdict, RunId,
};
use tracing::{debug, warn};

/// A recorded quality metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedMetric {
    pub quality_id: i64,
    pub verdict: QualityVerdict,
}

pub struct AuditRecorder<'a, S> {
    store: &'a mut S,
}

impl<'a, S: AuditStore> AuditRecorder<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        AuditRecorder { store }
    }

    /// Append a lineage edge `source -> target` produced by `run_id`.
    pub async fn record_lineage(
        &mut self,
        target_object_id: ObjectId,
        source_object: &str,
        run_id: RunId,
        transformation_logic: Option<&str>,
    ) -> EngineResult<i64> {
        let lineage = NewLineage {
            target_object_id,
            source_object: source_object.to_string(),
            etl_run_id: run_id,
            transformation_logic: transformation_logic.map(str::to_string),
        };
        self.store.begin().await?;
        let result = self.store.insert_lineage(&lineage).await.map_err(Into::into);
        let lineage_id = scope::finish(self.store, result).await?;
        debug!(lineage_id, target_object_id, source_object, run_id, "Recorded lineage");
        Ok(lineage_id)
    }

    /// Append a quality metric judged against `threshold`.
    ///
    /// A NaN value is refused with `EngineError::InvalidMetric` and nothing is
    /// written.
    pub async fn record_quality(
        &mut self,
        object_id: ObjectId,
        metric_name: &str,
        metric_value: f64,
        threshold: Option<f64>,
        details: Option<&str>,
    ) -> EngineResult<RecordedMetric> {
        if metric_value.is_nan() {
            warn!(object_id, metric = metric_name, "Refusing to record a NaN metric");
            return Err(EngineError::InvalidMetric {
                metric: metric_name.to_string(),
            });
        }
        let metric = NewQualityMetric {
            object_id,
            metric_name: metric_name.to_string(),
            metric_value,
            threshold,
            pass_fail: QualityVerdict::judge(metric_value, threshold),
            details: details.map(str::to_string),
        };
        self.store.begin().await?;
        let result = self.store.insert_quality(&metric).await.map_err(Into::into);
        let quality_id = scope::finish(self.store, result).await?;
        debug!(
            quality_id,
            object_id,
            metric = metric_name,
            value = metric_value,
            verdict = metric.pass_fail.as_str(),
            "Recorded quality metric"
        );
        Ok(RecordedMetric {
            quality_id,
            verdict: metric.pass_fail,
        })
    }

    /// Append an invariant-check finding to the warehouse quality log.
    pub async fn log_quality_issue(
        &mut self,
        check_type: &str,
        table_name: &str,
        issue_description: &str,
    ) -> EngineResult<i64> {
        let issue = QualityIssue {
            check_type: check_type.to_string(),
            table_name: table_name.to_string(),
            issue_description: issue_description.to_string(),
        };
        self.store.begin().await?;
        let result = self.store.insert_quality_issue(&issue).await.map_err(Into::into);
        scope::finish(self.store, result).await
    }
}
