//! Error types for warehouse engine operations.

use crate::facts::FactLoadSummary;
use retaildwh_core::{DescriptorError, ObjectId, RunId, StoreError};
use thiserror::Error;

/// Errors that can occur while setting up or loading the warehouse.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Persistence operation failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A partition or identifier descriptor could not be built
    #[error("Invalid descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    /// The catalog has no entry for a relation the load depends on
    #[error("Object {schema}.{name} is not registered in the catalog")]
    UnregisteredObject {
        /// Schema of the missing object
        schema: String,
        /// Name of the missing object
        name: String,
    },

    /// An object id that the catalog does not know
    #[error("Catalog object {0} does not exist")]
    UnknownObject(ObjectId),

    /// A quality metric value that cannot be recorded
    #[error("Metric {metric} has no numeric value")]
    InvalidMetric {
        /// Name of the rejected metric
        metric: String,
    },

    /// Completion was attempted on a run that already reached a terminal state
    #[error("Run {0} is not RUNNING")]
    RunNotRunning(RunId),

    /// Neither the completion write nor the fallback write succeeded
    #[error("Run {run_id} was left RUNNING: {reason}")]
    OrphanedRun {
        /// The run that stays RUNNING
        run_id: RunId,
        /// Error of the fallback write
        reason: String,
    },

    /// The fact load stopped part-way; `summary` counts only committed records
    #[error("Fact load stopped after {} committed records: {source}", .summary.inserted)]
    FactLoad {
        /// Progress that survived the failure
        summary: FactLoadSummary,
        /// The error that ended the load
        #[source]
        source: Box<EngineError>,
    },

    /// Configuration or input error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_display_unchanged() {
        let err: EngineError = StoreError::constraint("duplicate key").into();
        assert_eq!(err.to_string(), "Constraint violation: duplicate key");
    }

    #[test]
    fn test_unregistered_object_names_relation() {
        let err = EngineError::UnregisteredObject {
            schema: "dwh".to_string(),
            name: "fact_sales_partitioned".to_string(),
        };
        assert!(err.to_string().contains("dwh.fact_sales_partitioned"));
    }

    #[test]
    fn test_fact_load_error_keeps_cause() {
        let err = EngineError::FactLoad {
            summary: FactLoadSummary {
                processed: 3,
                inserted: 1,
                ..Default::default()
            },
            source: Box::new(StoreError::Connection("connection reset".to_string()).into()),
        };
        let message = err.to_string();
        assert!(message.contains("after 1 committed records"), "{message}");
        assert!(message.contains("connection reset"), "{message}");
    }
}
