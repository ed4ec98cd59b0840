//! Paced, sub-batched backfill of a partitioned table.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::bulk_copy::BulkCopy;
use crate::catalog::CatalogClient;
use crate::error::Error;
use crate::executor::{Pacer, SqlExecutor};
use crate::ledger::JobLedger;

/// Ledger identity under which backfill completions are recorded.
pub const BACKFILL_JOB_CLASS: &str = "BackfillPartitionedTable";

/// One unit of backfill work handed out by the external scheduler.
///
/// Ranges are never mutated; a retried range is simply performed again,
/// which is safe because the underlying copy is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillRange {
    /// Inclusive lower bound of the id range.
    pub start_id: i64,
    /// Inclusive upper bound of the id range.
    pub stop_id: i64,
    /// Table rows are copied from.
    pub source_table: String,
    /// Partitioned table rows are copied into.
    pub destination_table: String,
    /// Id column the range is expressed over.
    pub source_column: String,
}

impl BackfillRange {
    /// Build a range.
    pub fn new(
        start_id: i64,
        stop_id: i64,
        source_table: impl Into<String>,
        destination_table: impl Into<String>,
        source_column: impl Into<String>,
    ) -> Self {
        Self {
            start_id,
            stop_id,
            source_table: source_table.into(),
            destination_table: destination_table.into(),
            source_column: source_column.into(),
        }
    }

    /// The positional argument list this range is ledgered under.
    pub fn arguments(&self) -> Value {
        json!([
            self.start_id,
            self.stop_id,
            self.source_table,
            self.destination_table,
            self.source_column,
        ])
    }

    /// Parse a range back out of a ledgered argument list.
    pub fn from_arguments(arguments: &Value) -> Option<Self> {
        let args = arguments.as_array()?;
        Some(Self {
            start_id: args.first()?.as_i64()?,
            stop_id: args.get(1)?.as_i64()?,
            source_table: args.get(2)?.as_str()?.to_string(),
            destination_table: args.get(3)?.as_str()?.to_string(),
            source_column: args.get(4)?.as_str()?.to_string(),
        })
    }
}

/// Tuning for the backfill loop.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Rows copied per sub-batch.
    pub sub_batch_size: usize,
    /// Pause after each sub-batch, bounding sustained write load.
    pub pause: Duration,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            sub_batch_size: 2_500,
            pause: Duration::from_millis(250),
        }
    }
}

/// How a backfill invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum BackfillOutcome {
    /// The range was copied and its completion recorded.
    Completed {
        /// Sub-batches issued.
        sub_batches: usize,
        /// Tracking records flipped to succeeded (zero means the scheduler
        /// had no record of this range).
        ledger_updates: u64,
    },
    /// Nothing was copied; the destination table is gone.
    Skipped(String),
}

impl BackfillOutcome {
    /// Whether the invocation short-circuited.
    pub fn is_skipped(&self) -> bool {
        matches!(self, BackfillOutcome::Skipped(_))
    }
}

/// Drives [`BulkCopy`] across an id range in small paced sub-batches.
///
/// Each sub-batch commits independently, so a killed job leaves consistent
/// partial progress and the retry re-runs the whole range paying only the
/// conflict-check cost for rows already moved. The whole range runs outside
/// any transaction by design; holding one open for the full id span would
/// defeat the batching.
pub struct Backfill {
    catalog: Arc<dyn CatalogClient>,
    executor: Arc<dyn SqlExecutor>,
    ledger: Arc<dyn JobLedger>,
    pacer: Arc<dyn Pacer>,
    config: BackfillConfig,
}

impl Backfill {
    /// Create a backfill runner.
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        executor: Arc<dyn SqlExecutor>,
        ledger: Arc<dyn JobLedger>,
        pacer: Arc<dyn Pacer>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            catalog,
            executor,
            ledger,
            pacer,
            config,
        }
    }

    /// Copy one range and record its completion in the ledger.
    ///
    /// A missing destination table is a non-fatal skip: the partitioning
    /// migration was presumably rolled back after this job was enqueued, and
    /// there is nothing left to copy into. Any error during a sub-batch
    /// propagates without touching the ledger, so the scheduler's retry
    /// policy re-runs the whole range.
    pub async fn perform(&self, range: &BackfillRange) -> Result<BackfillOutcome, Error> {
        if self.executor.in_transaction().await? {
            return Err(Error::TransactionOpen {
                operation: "backfill of partitioned table",
            });
        }

        if !self.catalog.table_exists(&range.destination_table).await? {
            let reason = format!(
                "destination table {} does not exist",
                range.destination_table
            );
            warn!(
                source = %range.source_table,
                destination = %range.destination_table,
                "Backfill skipped: destination table does not exist \
                 (the partitioning migration may have been rolled back)"
            );
            return Ok(BackfillOutcome::Skipped(reason));
        }

        let copier = BulkCopy::new(
            self.catalog.clone(),
            self.executor.clone(),
            range.source_table.clone(),
            range.destination_table.clone(),
            range.source_column.clone(),
        );

        let mut sub_batches = 0;
        let mut from_id = range.start_id;
        while let Some((batch_start, batch_stop)) = self
            .catalog
            .next_batch_range(
                &range.source_table,
                &range.source_column,
                from_id,
                range.stop_id,
                self.config.sub_batch_size,
            )
            .await?
        {
            copier.copy_between(batch_start, batch_stop).await?;
            sub_batches += 1;
            self.pacer.pause(self.config.pause).await;
            from_id = batch_stop + 1;
        }

        let ledger_updates = self
            .ledger
            .mark_succeeded(BACKFILL_JOB_CLASS, &range.arguments())
            .await?;

        info!(
            source = %range.source_table,
            destination = %range.destination_table,
            start_id = range.start_id,
            stop_id = range.stop_id,
            sub_batches,
            "Backfill range completed"
        );

        Ok(BackfillOutcome::Completed {
            sub_batches,
            ledger_updates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDef;
    use crate::testing::{FakeCatalog, FakeLedger, RecordingExecutor, RecordingPacer};

    fn setup() -> (
        Arc<FakeCatalog>,
        Arc<RecordingExecutor>,
        Arc<FakeLedger>,
        Arc<RecordingPacer>,
        Backfill,
    ) {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_table(
            "events",
            vec![
                ColumnDef::new("id", "bigint").not_null(),
                ColumnDef::new("created_at", "timestamp without time zone"),
            ],
            &["id"],
        );
        catalog.add_table("events_part", vec![], &["id", "created_at"]);
        let executor = Arc::new(RecordingExecutor::new());
        let ledger = Arc::new(FakeLedger::new());
        let pacer = Arc::new(RecordingPacer::new());
        let backfill = Backfill::new(
            catalog.clone(),
            executor.clone(),
            ledger.clone(),
            pacer.clone(),
            BackfillConfig::default(),
        );
        (catalog, executor, ledger, pacer, backfill)
    }

    fn range() -> BackfillRange {
        BackfillRange::new(1, 6_000, "events", "events_part", "id")
    }

    #[tokio::test]
    async fn test_splits_range_into_paced_sub_batches() {
        let (catalog, executor, ledger, pacer, backfill) = setup();
        catalog.set_row_ids("events", (1..=6_000).collect());

        let outcome = backfill.perform(&range()).await.unwrap();
        assert_eq!(
            outcome,
            BackfillOutcome::Completed {
                sub_batches: 3,
                ledger_updates: 1
            }
        );

        let copies: Vec<String> = executor
            .statements()
            .into_iter()
            .filter(|s| s.starts_with("INSERT INTO"))
            .collect();
        assert_eq!(copies.len(), 3);
        assert!(copies[0].contains("WHERE id BETWEEN 1 AND 2500"));
        assert!(copies[1].contains("WHERE id BETWEEN 2501 AND 5000"));
        assert!(copies[2].contains("WHERE id BETWEEN 5001 AND 6000"));

        assert_eq!(pacer.pauses(), vec![Duration::from_millis(250); 3]);

        let succeeded = ledger.succeeded();
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].0, BACKFILL_JOB_CLASS);
        assert_eq!(succeeded[0].1, range().arguments());
    }

    #[tokio::test]
    async fn test_sub_batches_use_actual_ids_with_gaps() {
        let (catalog, executor, _, _, backfill) = setup();
        // Sparse ids: 10, 20, ..., 60000.
        catalog.set_row_ids("events", (1..=6_000).map(|n| n * 10).collect());

        let outcome = backfill
            .perform(&BackfillRange::new(1, 60_000, "events", "events_part", "id"))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            BackfillOutcome::Completed { sub_batches: 3, .. }
        ));

        let copies: Vec<String> = executor
            .statements()
            .into_iter()
            .filter(|s| s.starts_with("INSERT INTO"))
            .collect();
        assert!(copies[0].contains("WHERE id BETWEEN 10 AND 25000"));
        assert!(copies[1].contains("WHERE id BETWEEN 25010 AND 50000"));
        assert!(copies[2].contains("WHERE id BETWEEN 50010 AND 60000"));
    }

    #[tokio::test]
    async fn test_fails_inside_transaction() {
        let (catalog, executor, ledger, _, backfill) = setup();
        catalog.set_row_ids("events", (1..=100).collect());
        executor.set_in_transaction(true);

        let err = backfill.perform(&range()).await.unwrap_err();
        assert!(matches!(err, Error::TransactionOpen { .. }));
        assert!(ledger.succeeded().is_empty());
    }

    #[tokio::test]
    async fn test_skips_when_destination_missing() {
        let (catalog, executor, ledger, _, backfill) = setup();
        catalog.drop_table("events_part");

        let outcome = backfill.perform(&range()).await.unwrap();
        assert!(outcome.is_skipped());
        assert!(executor.statements().is_empty());
        assert!(ledger.succeeded().is_empty());
    }

    #[tokio::test]
    async fn test_error_during_sub_batch_leaves_ledger_untouched() {
        let (catalog, executor, ledger, _, backfill) = setup();
        catalog.set_row_ids("events", (1..=100).collect());
        executor.fail_hard(
            "INSERT INTO events_part (id, created_at) \
             SELECT id, created_at \
             FROM events \
             WHERE id BETWEEN 1 AND 100 \
             FOR UPDATE \
             ON CONFLICT (id, created_at) DO NOTHING",
            "connection reset",
        );

        let err = backfill.perform(&range()).await.unwrap_err();
        assert!(matches!(err, Error::Sql(_)));
        assert!(ledger.succeeded().is_empty());
    }

    #[tokio::test]
    async fn test_rerunning_a_completed_range_is_harmless() {
        let (catalog, executor, ledger, _, backfill) = setup();
        catalog.set_row_ids("events", (1..=100).collect());

        let first = backfill.perform(&range()).await.unwrap();
        let second = backfill.perform(&range()).await.unwrap();
        assert!(!first.is_skipped());
        assert!(!second.is_skipped());

        let copies: Vec<String> = executor
            .statements()
            .into_iter()
            .filter(|s| s.starts_with("INSERT INTO"))
            .collect();
        assert_eq!(copies[0], copies[1]);
        assert_eq!(ledger.succeeded().len(), 2);
    }

    #[test]
    fn test_range_arguments_round_trip() {
        let original = range();
        let parsed = BackfillRange::from_arguments(&original.arguments()).unwrap();
        assert_eq!(parsed, original);
        assert!(BackfillRange::from_arguments(&json!(["nope"])).is_none());
    }

    #[test]
    fn test_config_defaults() {
        let config = BackfillConfig::default();
        assert_eq!(config.sub_batch_size, 2_500);
        assert_eq!(config.pause, Duration::from_millis(250));
    }
}
