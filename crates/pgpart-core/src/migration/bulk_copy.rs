//! Idempotent bulk copy between two tables.

use std::sync::Arc;

use crate::catalog::CatalogClient;
use crate::error::Error;
use crate::executor::SqlExecutor;

/// Copies rows from a source table into a destination table.
///
/// The column list and conflict target are derived from catalog metadata, so
/// the copy stays correct even when source and destination column order
/// differ. Source rows are locked `FOR UPDATE` for the duration of the
/// statement, and primary-key collisions at the destination are silently
/// skipped: a row already moved by an earlier attempt, or written through
/// the dual-write trigger, is never an error.
pub struct BulkCopy {
    catalog: Arc<dyn CatalogClient>,
    executor: Arc<dyn SqlExecutor>,
    source_table: String,
    destination_table: String,
    source_column: String,
}

impl BulkCopy {
    /// Create a copier between two tables keyed by `source_column`.
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        executor: Arc<dyn SqlExecutor>,
        source_table: impl Into<String>,
        destination_table: impl Into<String>,
        source_column: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            executor,
            source_table: source_table.into(),
            destination_table: destination_table.into(),
            source_column: source_column.into(),
        }
    }

    /// Copy all rows whose key is between `start_id` and `stop_id` inclusive.
    ///
    /// Idempotent: replaying the same range copies nothing new.
    pub async fn copy_between(&self, start_id: i64, stop_id: i64) -> Result<u64, Error> {
        self.copy_relation(&format!(
            "{} BETWEEN {} AND {}",
            self.source_column, start_id, stop_id
        ))
        .await
    }

    /// Copy all rows matching an arbitrary `WHERE` condition.
    pub async fn copy_relation(&self, condition: &str) -> Result<u64, Error> {
        let columns = self.catalog.columns(&self.source_table).await?;
        let column_listing = columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let conflict_targets = self
            .catalog
            .primary_key_columns(&self.destination_table)
            .await?
            .join(", ");

        let sql = format!(
            "INSERT INTO {destination} ({columns}) \
             SELECT {columns} \
             FROM {source} \
             WHERE {condition} \
             FOR UPDATE \
             ON CONFLICT ({conflict}) DO NOTHING",
            destination = self.destination_table,
            columns = column_listing,
            source = self.source_table,
            condition = condition,
            conflict = conflict_targets,
        );

        self.executor.execute(&sql).await
    }
}
