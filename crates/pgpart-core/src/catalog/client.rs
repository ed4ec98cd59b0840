//! The catalog introspection trait.

use async_trait::async_trait;

use super::types::{ColumnDef, ForeignKeyDef, IndexDef};
use crate::error::Error;

/// Read-only access to table/column/index/constraint metadata.
///
/// Every operation in this crate resolves schema facts through this trait
/// rather than issuing its own catalog queries, so the engine can be
/// exercised against an in-memory fake.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Whether a relation with this name exists.
    async fn table_exists(&self, table: &str) -> Result<bool, Error>;

    /// All columns of a table, in ordinal order.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>, Error>;

    /// Primary key columns, in key order. Empty when no primary key exists.
    async fn primary_key_columns(&self, table: &str) -> Result<Vec<String>, Error>;

    /// Whether an index with this exact name exists on the table.
    async fn index_exists_by_name(&self, table: &str, name: &str) -> Result<bool, Error>;

    /// All indexes on a table.
    async fn indexes(&self, table: &str) -> Result<Vec<IndexDef>, Error>;

    /// All foreign keys whose source is the given table.
    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>, Error>;

    /// Whether a trigger with this name exists on the table.
    async fn trigger_exists(&self, table: &str, name: &str) -> Result<bool, Error>;

    /// Child partitions of a partitioned table, ordered by name.
    ///
    /// Ordering by name is load-bearing: callers iterate partitions and the
    /// resulting DDL must be deterministic across retries.
    async fn partitions_of(&self, table: &str) -> Result<Vec<String>, Error>;

    /// Whether the named sequence exists.
    async fn sequence_exists(&self, name: &str) -> Result<bool, Error>;

    /// Min and max of `column` over the next batch of at most `limit` rows
    /// with `column` between `from_id` and `stop_id`, ordered by `column`.
    ///
    /// Returns `None` when the scope is exhausted.
    async fn next_batch_range(
        &self,
        table: &str,
        column: &str,
        from_id: i64,
        stop_id: i64,
        limit: usize,
    ) -> Result<Option<(i64, i64)>, Error>;

    /// A single column by name.
    async fn column(&self, table: &str, name: &str) -> Result<Option<ColumnDef>, Error> {
        Ok(self
            .columns(table)
            .await?
            .into_iter()
            .find(|c| c.name == name))
    }
}
