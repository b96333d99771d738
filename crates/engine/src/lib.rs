//! Retail warehouse load and metadata engine.
//!
//! Loads a cleaned retail batch into a star schema while keeping a catalog of
//! warehouse objects, lineage edges, quality metrics and a per-load run row.
//! The engine is written against the store traits of `retaildwh-core`, so it
//! runs the same on PostgreSQL and on the in-memory mock.
//!
//! Components, leaves first: [`CatalogRegistry`], [`PartitionManager`],
//! [`DimensionResolver`], [`FactLoader`], [`AuditRecorder`], [`RunTracker`],
//! composed by [`Warehouse`].

pub mod audit;
pub mod catalog;
pub mod config;
pub mod dimensions;
pub mod error;
pub mod facts;
pub mod partitions;
pub mod quality;
pub mod runs;
mod scope;
pub mod warehouse;

pub use audit::{AuditRecorder, RecordedMetric};
pub use catalog::CatalogRegistry;
pub use config::WarehouseConfig;
pub use dimensions::{DimensionMappings, DimensionResolver};
pub use error::{EngineError, EngineResult};
pub use facts::{prepare_fact, FactLoadSummary, FactLoader, RecordOutcome, RejectReason};
pub use partitions::PartitionManager;
pub use runs::{CompletionOutcome, RunTracker};
pub use warehouse::{LoadReport, SetupReport, Warehouse};
