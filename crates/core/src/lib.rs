//! retaildwh-core
//!
//! Domain model, cleaned-batch contract, validated descriptors and the
//! persistence traits of the retail warehouse engine.

pub mod batch;
pub mod error;
pub mod ident;
pub mod mocks;
pub mod model;
pub mod partition;
pub mod traits;

pub use batch::{CleanedBatch, SourceRow, BATCH_COLUMNS};
pub use error::{DescriptorError, StoreError, StoreResult};
pub use ident::{QualifiedName, SqlIdent};
pub use model::*;
pub use partition::{
    IndexSpec, MonthPartition, PartitionLayout, PartitionTarget, DEFAULT_PARTITION,
    STAR_SCHEMA_INDEXES,
};
pub use traits::{
    AuditStore, CatalogStore, DimensionStore, FactStore, PartitionStore, RunStore, SchemaStore,
    Session, WarehouseStore,
};
