//! Error types for partitioning operations.

use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised by partitioning operations.
///
/// These are fatal preconditions: when one is returned the operation never
/// started, so nothing needs to be rolled back. Expected short-circuits
/// (object already exists, destination rolled back) are not errors; they are
/// reported through [`Outcome::Skipped`].
#[derive(Debug, Error)]
pub enum Error {
    /// The operation must run on its own connection, outside a transaction.
    #[error("{operation} can not be run inside a transaction")]
    TransactionOpen {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// The source table has no primary key to carry into the partitioned copy.
    #[error("primary key not defined for {table}")]
    MissingPrimaryKey {
        /// The table that was inspected.
        table: String,
    },

    /// The requested column does not exist on the table.
    #[error("partition column {column} does not exist on {table}")]
    MissingColumn {
        /// The table that was inspected.
        table: String,
        /// The missing column.
        column: String,
    },

    /// The named sequence does not exist.
    #[error("sequence {sequence} does not exist")]
    MissingSequence {
        /// The missing sequence.
        sequence: String,
    },

    /// The date range does not describe at least one month of partitions.
    #[error("max_date {max_date} must be greater than min_date {min_date}")]
    InvalidDateRange {
        /// Inclusive lower bound of the range.
        min_date: NaiveDate,
        /// Exclusive upper bound of the range.
        max_date: NaiveDate,
    },

    /// A table asserted to exist was not found in the catalog.
    #[error("could not find partitioned table for {table}")]
    TableNotFound {
        /// The table that was expected.
        table: String,
    },

    /// Structurally identical indexes were found where the caller assumed
    /// definitions were unique.
    #[error("duplicate indexes found on {table}: {names:?}")]
    DuplicateIndexes {
        /// The table carrying the duplicates.
        table: String,
        /// The colliding index names.
        names: Vec<String>,
    },

    /// A lock could not be acquired within the configured timeout.
    #[error("lock timeout while executing: {statement}")]
    LockTimeout {
        /// The statement that timed out.
        statement: String,
    },

    /// The job ledger rejected a completion record.
    #[error("failed to update tracking record for {class_name}")]
    LedgerUpdateFailed {
        /// Identity of the unit of work.
        class_name: String,
    },

    /// Database error surfaced by the executor or catalog client.
    #[error("database error: {0}")]
    Sql(String),
}

/// Result of an idempotent DDL operation.
///
/// Operations that find their work already done return [`Outcome::Skipped`]
/// with the reason, after logging a warning. This is an expected, frequent
/// path (aborted migrations get retried), not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome {
    /// The operation ran and changed the catalog.
    Applied,
    /// The operation found nothing to do and returned early.
    Skipped(String),
}

impl Outcome {
    /// Whether the operation performed its work.
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }

    /// Whether the operation short-circuited.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }
}

/// A per-field validation failure for declarative records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// The field that failed validation.
    pub field: &'static str,
    /// Human-readable description of the failure.
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
