//! Job-completion ledger.
//!
//! The external scheduler enqueues backfill ranges and re-enqueues them on
//! failure. The ledger is how a completed range tells the scheduler not to
//! come back: one record keyed by (class identity, arguments), flipped to
//! succeeded exactly once.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;

/// Tracks background-job completion for the external scheduler.
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Mark the job identified by `(class_name, arguments)` as succeeded.
    ///
    /// Returns the number of tracking records updated. Zero means the
    /// scheduler has no record of the job; callers decide whether that is
    /// fatal.
    async fn mark_succeeded(&self, class_name: &str, arguments: &Value) -> Result<u64, Error>;

    /// Argument lists of jobs not yet marked succeeded for this class.
    async fn pending_jobs(&self, class_name: &str) -> Result<Vec<Value>, Error>;
}
