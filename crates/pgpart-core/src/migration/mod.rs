//! Data movement into the partitioned sibling.
//!
//! - [`BulkCopy`] - idempotent range copy between two tables
//! - [`Backfill`] - drives the copy across an id range in paced sub-batches
//!
//! The external scheduler may run many backfill jobs in parallel over
//! disjoint (or, after retries, overlapping) ranges; everything here is safe
//! under that parallelism because the copy ignores primary-key conflicts.

mod backfill;
mod bulk_copy;

pub use backfill::{
    Backfill, BackfillConfig, BackfillOutcome, BackfillRange, BACKFILL_JOB_CLASS,
};
pub use bulk_copy::BulkCopy;
