//! Error types shared by the warehouse domain and its persistence backends.
//!
//! **Error Hierarchy:**
//! - `StoreError` (persistence operations, returned by every store trait)
//! - `DescriptorError` (construction of validated partition/identifier descriptors)
//!
//! Engine-level errors wrap `StoreError` through `From`, so backends never need
//! to know about the components that call them.

use thiserror::Error;

/// Result type for persistence operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the warehouse database.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Connection could not be established or was lost
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Statement execution failed
    #[error("Database error: {0}")]
    Database(String),

    /// A uniqueness, foreign-key or check constraint rejected the statement
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Transaction control failed (begin/commit/rollback/savepoint)
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A referenced relation or row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failure injected by a test double
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl StoreError {
    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction(message.into())
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a constraint violation error
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint(message.into())
    }
}

/// Errors raised when building a descriptor from unvalidated input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// Month outside 1..=12
    #[error("Invalid month {0}: expected 1-12")]
    InvalidMonth(u32),

    /// Year outside the supported partition range
    #[error("Invalid partition year {0}: expected 1900-9999")]
    InvalidYear(i32),

    /// Two declared ranges share at least one instant
    #[error("Partition ranges overlap: {first} and {second}")]
    OverlappingRanges {
        /// Name of the earlier range
        first: String,
        /// Name of the overlapping range
        second: String,
    },

    /// Text that is not a plain SQL identifier
    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),
}
