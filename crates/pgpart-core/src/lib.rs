//! Online partitioning migrations for PostgreSQL tables.
//!
//! Converts a live, non-partitioned table into a monthly range-partitioned
//! replacement without blocking reads or writes:
//!
//! - [`TableManager`] creates the partitioned sibling and keeps it in sync
//!   through a dual-write trigger
//! - [`Backfill`] and [`BulkCopy`] move existing rows over in paced,
//!   idempotent batches
//! - [`IndexHelpers`], [`ForeignKeyHelpers`] and [`UniquenessHelpers`]
//!   rebuild indexes and constraints concurrently on the new table
//! - [`Cutover`] swaps the sibling into place, and can roll the swap back
//!
//! Every operation talks to the database through the [`CatalogClient`] and
//! [`SqlExecutor`] traits, and is safe to re-run: finding its work already
//! done is an expected outcome ([`Outcome::Skipped`]), not an error.

pub mod catalog;
pub mod constraint;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod migration;
pub mod naming;
pub mod partition;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{CatalogClient, ColumnDef, FkAction, ForeignKeyDef, IndexDef};
pub use constraint::{
    concurrent_foreign_key_name, ForeignKeyHelpers, IndexHelpers, PartitionedForeignKey,
    UniquenessHelpers, Validator,
};
pub use error::{Error, FieldError, Outcome};
pub use executor::{Pacer, SqlExecutor, TokioPacer};
pub use ledger::JobLedger;
pub use migration::{
    Backfill, BackfillConfig, BackfillOutcome, BackfillRange, BulkCopy, BACKFILL_JOB_CLASS,
};
pub use partition::{Cutover, TableManager};
pub use retry::{default_timings, LockRetries, RetryTiming};
