//! Cutover: swapping the partitioned sibling into place, rolling the swap
//! back, and finishing the migration.

use std::sync::Arc;

use tracing::{info, warn};

use super::table::TableManager;
use crate::catalog::CatalogClient;
use crate::constraint::IndexHelpers;
use crate::error::Error;
use crate::executor::{Pacer, SqlExecutor};
use crate::ledger::JobLedger;
use crate::migration::{Backfill, BackfillConfig, BackfillOutcome, BackfillRange, BACKFILL_JOB_CLASS};
use crate::naming;
use crate::retry::LockRetries;

/// Swaps a table with its partitioned sibling and finalizes the migration.
///
/// The swap itself is a handful of renames plus sequence rewiring, all
/// metadata-only. Dual-write continues across the swap, just reversed: after
/// cutover the trigger on the live (now partitioned) table mirrors writes
/// into the archived copy, which is what keeps
/// [`rollback_replace_with_partitioned_table`](Cutover::rollback_replace_with_partitioned_table)
/// lossless.
pub struct Cutover {
    catalog: Arc<dyn CatalogClient>,
    executor: Arc<dyn SqlExecutor>,
    ledger: Arc<dyn JobLedger>,
    pacer: Arc<dyn Pacer>,
    retry: LockRetries,
    tables: TableManager,
    indexes: IndexHelpers,
    backfill_config: BackfillConfig,
}

impl Cutover {
    /// Create a cutover driver over one connection.
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        executor: Arc<dyn SqlExecutor>,
        ledger: Arc<dyn JobLedger>,
        pacer: Arc<dyn Pacer>,
        retry: LockRetries,
    ) -> Self {
        let tables = TableManager::new(catalog.clone(), executor.clone(), retry.clone());
        let indexes = IndexHelpers::new(catalog.clone(), executor.clone(), retry.clone());
        Self {
            catalog,
            executor,
            ledger,
            pacer,
            retry,
            tables,
            indexes,
            backfill_config: BackfillConfig::default(),
        }
    }

    /// Override the backfill tuning used while finalizing.
    pub fn with_backfill_config(mut self, config: BackfillConfig) -> Self {
        self.backfill_config = config;
        self
    }

    /// Make the partitioned sibling the live table.
    ///
    /// `<table>` becomes `<table>_archived`, `<table>_part` takes over the
    /// original name, and the sync trigger is re-pointed so writes to the
    /// now-live partitioned table keep flowing into the archived copy.
    pub async fn replace_with_partitioned_table(&self, table: &str) -> Result<(), Error> {
        let partitioned_table = naming::partitioned_table_name(table);
        let archived_table = naming::archived_table_name(table);

        self.assert_exists(table, &partitioned_table).await?;
        let columns = self.catalog.columns(table).await?;
        let primary_key = self.primary_key(table).await?;

        self.tables.drop_sync_trigger(table).await?;
        self.replace_table(table, &partitioned_table, &archived_table).await?;
        self.tables
            .create_trigger_to_sync_tables(table, &archived_table, &columns, &primary_key)
            .await?;

        // The live table inherits the old table's index names so nothing
        // downstream has to learn the sibling's temporary ones.
        self.indexes
            .rename_indexes_for_table(&archived_table, table)
            .await?;

        info!(table, archived_table = %archived_table, "Replaced table with partitioned sibling");
        Ok(())
    }

    /// Undo [`replace_with_partitioned_table`](Self::replace_with_partitioned_table):
    /// the archived original becomes live again and the partitioned table
    /// goes back to `<table>_part`, with the sync trigger re-pointed at it.
    pub async fn rollback_replace_with_partitioned_table(&self, table: &str) -> Result<(), Error> {
        let partitioned_table = naming::partitioned_table_name(table);
        let archived_table = naming::archived_table_name(table);

        self.assert_exists(table, &archived_table).await?;
        let columns = self.catalog.columns(table).await?;
        let primary_key = self.primary_key(table).await?;

        self.tables.drop_sync_trigger(table).await?;
        self.replace_table(table, &archived_table, &partitioned_table).await?;
        self.tables
            .create_trigger_to_sync_tables(table, &partitioned_table, &columns, &primary_key)
            .await?;

        info!(table, partitioned_table = %partitioned_table, "Rolled back table replacement");
        Ok(())
    }

    /// Drop the archived original and the sync trigger, once the cutover is
    /// deemed permanent. Not reversible.
    pub async fn drop_nonpartitioned_archive_table(&self, table: &str) -> Result<(), Error> {
        let archived_table = naming::archived_table_name(table);

        self.tables.drop_sync_trigger(table).await?;
        self.retry
            .run(&format!("DROP TABLE IF EXISTS {}", archived_table))
            .await?;

        info!(table, archived_table = %archived_table, "Dropped archived table");
        Ok(())
    }

    /// Finish the backfill inline: re-run every pending ledger range for
    /// `table` on this connection, then freeze the partitioned table's
    /// statistics.
    ///
    /// A pending range whose completion the ledger refuses to record is an
    /// error: the migration would otherwise report done while the scheduler
    /// still considers work outstanding.
    pub async fn finalize_backfilling_partitioned_table(&self, table: &str) -> Result<(), Error> {
        if self.executor.in_transaction().await? {
            return Err(Error::TransactionOpen {
                operation: "finalize_backfilling_partitioned_table",
            });
        }

        let partitioned_table = naming::partitioned_table_name(table);
        if !self.catalog.table_exists(&partitioned_table).await? {
            return Err(Error::TableNotFound {
                table: table.to_string(),
            });
        }

        let backfill = Backfill::new(
            self.catalog.clone(),
            self.executor.clone(),
            self.ledger.clone(),
            self.pacer.clone(),
            self.backfill_config.clone(),
        );

        for arguments in self.ledger.pending_jobs(BACKFILL_JOB_CLASS).await? {
            let Some(range) = BackfillRange::from_arguments(&arguments) else {
                warn!(%arguments, "Ignoring pending job with malformed arguments");
                continue;
            };
            if range.source_table != table {
                continue;
            }

            if let BackfillOutcome::Completed { ledger_updates: 0, .. } =
                backfill.perform(&range).await?
            {
                return Err(Error::LedgerUpdateFailed {
                    class_name: BACKFILL_JOB_CLASS.to_string(),
                });
            }
        }

        // The backfilled rows are all older than any xid wraparound horizon
        // the autovacuum has seen for this table; freeze them now and give
        // the planner fresh statistics in the same pass.
        self.executor.execute("SET statement_timeout TO 0").await?;
        let vacuumed = self
            .executor
            .execute(&format!("VACUUM FREEZE ANALYZE {}", partitioned_table))
            .await;
        self.executor.execute("RESET statement_timeout").await?;
        vacuumed?;

        info!(table, partitioned_table = %partitioned_table, "Finalized backfill");
        Ok(())
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>, Error> {
        let primary_key = self.catalog.primary_key_columns(table).await?;
        if primary_key.is_empty() {
            return Err(Error::MissingPrimaryKey {
                table: table.to_string(),
            });
        }
        Ok(primary_key)
    }

    async fn assert_exists(&self, table: &str, replacement: &str) -> Result<(), Error> {
        if !self.catalog.table_exists(replacement).await? {
            return Err(Error::TableNotFound {
                table: table.to_string(),
            });
        }
        Ok(())
    }

    /// Swap `replacement` into `original`'s name, parking the displaced
    /// table under `replaced`, and move the id sequence to the new live
    /// table.
    async fn replace_table(
        &self,
        original: &str,
        replacement: &str,
        replaced: &str,
    ) -> Result<(), Error> {
        let sequence = format!("{}_id_seq", original);

        let statements = [
            format!("ALTER TABLE {original} RENAME TO {replaced}"),
            format!("ALTER TABLE {replacement} RENAME TO {original}"),
            format!("ALTER TABLE {replaced} RENAME CONSTRAINT {original}_pkey TO {replaced}_pkey"),
            format!(
                "ALTER TABLE {original} RENAME CONSTRAINT {replacement}_pkey TO {original}_pkey"
            ),
            format!("ALTER SEQUENCE {sequence} OWNED BY {original}.id"),
            format!(
                "ALTER TABLE {original} ALTER COLUMN id SET DEFAULT nextval('{sequence}'::regclass)"
            ),
            format!("ALTER TABLE {replaced} ALTER COLUMN id DROP DEFAULT"),
        ];
        for statement in &statements {
            self.retry.run(statement).await?;
        }
        Ok(())
    }
}
