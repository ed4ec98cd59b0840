//! Concurrent index management across a partitioned table.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::CatalogClient;
use crate::error::{Error, Outcome};
use crate::executor::SqlExecutor;
use crate::retry::LockRetries;

/// Builds and removes indexes on a partitioned table without blocking
/// concurrent reads and writes.
///
/// An index on a partitioned parent cannot be built concurrently in one
/// statement, so the build runs bottom-up: one `CREATE INDEX CONCURRENTLY`
/// per partition, then a metadata-only parent attach that adopts the
/// already-built partition indexes instead of re-scanning data.
pub struct IndexHelpers {
    catalog: Arc<dyn CatalogClient>,
    executor: Arc<dyn SqlExecutor>,
    retry: LockRetries,
}

impl IndexHelpers {
    /// Create index helpers over one connection.
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        executor: Arc<dyn SqlExecutor>,
        retry: LockRetries,
    ) -> Self {
        Self {
            catalog,
            executor,
            retry,
        }
    }

    /// Concurrently build `name` on every partition of `table`, then attach
    /// it to the parent under lock retry.
    ///
    /// The name is required (not generated) because the per-partition names
    /// are derived from it and must come out the same on every invocation:
    /// a crashed build resumes by skipping the partitions that already have
    /// their index.
    pub async fn add_concurrent_partitioned_index(
        &self,
        table: &str,
        columns: &[&str],
        name: &str,
    ) -> Result<Outcome, Error> {
        if self.executor.in_transaction().await? {
            return Err(Error::TransactionOpen {
                operation: "add_concurrent_partitioned_index",
            });
        }

        if !self.catalog.table_exists(table).await? {
            return Err(Error::TableNotFound {
                table: table.to_string(),
            });
        }

        if self.catalog.index_exists_by_name(table, name).await? {
            let reason = format!("index {} already exists on {}", name, table);
            warn!(table, index = name,
                "Index not created because it already exists \
                 (this may be due to an aborted migration or similar)");
            return Ok(Outcome::Skipped(reason));
        }

        let column_list = columns.join(", ");
        for partition in self.catalog.partitions_of(table).await? {
            let partition_index = partition_index_name(name, &partition);
            if self
                .catalog
                .index_exists_by_name(&partition, &partition_index)
                .await?
            {
                continue;
            }
            self.executor
                .execute(&format!(
                    "CREATE INDEX CONCURRENTLY {} ON {} ({})",
                    partition_index, partition, column_list
                ))
                .await?;
        }

        // With every partition index in place and valid, the parent create
        // adopts them without scanning any data.
        self.retry
            .run(&format!(
                "CREATE INDEX {} ON {} ({})",
                name, table, column_list
            ))
            .await?;

        info!(table, index = name, "Created partitioned index");
        Ok(Outcome::Applied)
    }

    /// Drop `name` at the parent level; removal cascades to partitions.
    ///
    /// There is no concurrent drop path for partitioned indexes, but a
    /// plain drop is a fast catalog change.
    pub async fn remove_concurrent_partitioned_index_by_name(
        &self,
        table: &str,
        name: &str,
    ) -> Result<Outcome, Error> {
        if self.executor.in_transaction().await? {
            return Err(Error::TransactionOpen {
                operation: "remove_concurrent_partitioned_index_by_name",
            });
        }

        if !self.catalog.index_exists_by_name(table, name).await? {
            let reason = format!("index {} does not exist on {}", name, table);
            warn!(table, index = name,
                "Index not removed because it does not exist \
                 (this may be due to an aborted migration or similar)");
            return Ok(Outcome::Skipped(reason));
        }

        self.retry.run(&format!("DROP INDEX {}", name)).await?;

        info!(table, index = name, "Removed partitioned index");
        Ok(Outcome::Applied)
    }

    /// Index names keyed by structurally normalized definition.
    ///
    /// Fails with [`Error::DuplicateIndexes`] when two indexes share a
    /// definition: callers use this map to match indexes across tables, and
    /// a duplicate would make the match ambiguous.
    pub async fn indexes_by_definition_for_table(
        &self,
        table: &str,
    ) -> Result<HashMap<String, String>, Error> {
        let mut by_definition = HashMap::new();
        for index in self.catalog.indexes(table).await? {
            let definition = cross_table_definition(&index.definition, &index.name, table);
            if let Some(existing) = by_definition.insert(definition, index.name.clone()) {
                return Err(Error::DuplicateIndexes {
                    table: table.to_string(),
                    names: vec![existing, index.name],
                });
            }
        }
        Ok(by_definition)
    }

    /// Groups of index names sharing a normalized definition.
    pub async fn find_duplicate_indexes(&self, table: &str) -> Result<Vec<Vec<String>>, Error> {
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for index in self.catalog.indexes(table).await? {
            groups
                .entry(index.normalized_definition())
                .or_default()
                .push(index.name);
        }

        let mut duplicates: Vec<Vec<String>> = groups
            .into_values()
            .filter(|names| names.len() > 1)
            .collect();
        duplicates.iter_mut().for_each(|names| names.sort());
        duplicates.sort();
        Ok(duplicates)
    }

    /// Give `new_table`'s indexes the names the structurally matching
    /// indexes carry on `old_table`.
    ///
    /// Used at cutover: after the table swap the replacement inherits
    /// recognizable index names. The displaced old index is renamed aside
    /// first since index names are unique database-wide.
    pub async fn rename_indexes_for_table(
        &self,
        old_table: &str,
        new_table: &str,
    ) -> Result<(), Error> {
        let old_by_definition = self.indexes_by_definition_for_table(old_table).await?;

        for index in self.catalog.indexes(new_table).await? {
            let definition = cross_table_definition(&index.definition, &index.name, new_table);
            let Some(old_name) = old_by_definition.get(&definition) else {
                continue;
            };
            if *old_name == index.name {
                continue;
            }

            self.retry
                .run(&format!(
                    "ALTER INDEX {} RENAME TO {}_archived",
                    old_name, old_name
                ))
                .await?;
            self.retry
                .run(&format!(
                    "ALTER INDEX {} RENAME TO {}",
                    index.name, old_name
                ))
                .await?;
        }

        Ok(())
    }
}

/// Deterministic per-partition index name: the parent index name plus the
/// partition's suffix.
fn partition_index_name(index_name: &str, partition: &str) -> String {
    let suffix = partition.rsplit('_').next().unwrap_or(partition);
    format!("{}_{}", index_name, suffix)
}

/// Normalize a definition for comparison across two tables: blank out both
/// the index name and the table reference.
fn cross_table_definition(definition: &str, index_name: &str, table: &str) -> String {
    crate::catalog::IndexDef {
        name: index_name.to_string(),
        definition: definition.to_string(),
    }
    .normalized_definition()
    .replace(&format!(" ON public.{} ", table), " ON ")
    .replace(&format!(" ON {} ", table), " ON ")
}
