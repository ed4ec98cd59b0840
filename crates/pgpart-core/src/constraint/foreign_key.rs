//! Foreign keys on partitioned tables, added without long blocking locks.

use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::{CatalogClient, FkAction};
use crate::error::{Error, Outcome};
use crate::executor::SqlExecutor;
use crate::naming::hashed_identifier;
use crate::retry::LockRetries;

/// Deterministic constraint name for a single-column foreign key.
///
/// Derived from the table and column alone, so every invocation (including
/// a retry after a crash) arrives at the same name.
pub fn concurrent_foreign_key_name(table: &str, column: &str) -> String {
    format!("fk_{}", hashed_identifier(&format!("{}_{}_fk", table, column)))
}

/// Adds, validates, renames and swaps foreign keys across a partitioned
/// table and its partitions.
///
/// Postgres rejects `NOT VALID` constraints on a partitioned parent, so the
/// non-blocking two-phase recipe (add unvalidated, validate later) runs per
/// partition; the parent-level constraint is attached only once every
/// partition already holds a validated copy, which makes the attach a pure
/// metadata change.
pub struct ForeignKeyHelpers {
    catalog: Arc<dyn CatalogClient>,
    executor: Arc<dyn SqlExecutor>,
    retry: LockRetries,
}

impl ForeignKeyHelpers {
    /// Create foreign key helpers over one connection.
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

    /// Add a foreign key from `source.column` to `target`'s primary key,
    /// partition by partition.
    ///
    /// Each partition gets the constraint `NOT VALID` (cheap lock, enforced
    /// for new writes immediately). With `validate` set, each partition is
    /// then `VALIDATE CONSTRAINT`-scanned without blocking writes and the
    /// parent-level constraint is attached at the end; without it, the
    /// partitions keep their unvalidated copies for a later
    /// [`validate_partitioned_foreign_key`](Self::validate_partitioned_foreign_key)
    /// pass.
    pub async fn add_concurrent_partitioned_foreign_key(
        &self,
        source: &str,
        column: &str,
        target: &str,
        on_delete: FkAction,
        name: Option<&str>,
        validate: bool,
    ) -> Result<Outcome, Error> {
        if self.executor.in_transaction().await? {
            return Err(Error::TransactionOpen {
                operation: "add_concurrent_partitioned_foreign_key",
            });
        }

        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| concurrent_foreign_key_name(source, column));

        let existing = self.catalog.foreign_keys(source).await?;
        if existing
            .iter()
            .any(|fk| fk.matches(target, column, &name, on_delete))
        {
            let reason = format!("foreign key {} already exists on {}", name, source);
            warn!(table = source, constraint = %name,
                "Foreign key not created because it exists already \
                 (this may be due to an aborted migration or similar)");
            return Ok(Outcome::Skipped(reason));
        }

        let target_key = self.referenced_columns(target).await?;

        for partition in self.catalog.partitions_of(source).await? {
            let partition_keys = self.catalog.foreign_keys(&partition).await?;
            if partition_keys
                .iter()
                .any(|fk| fk.matches(target, column, &name, on_delete))
            {
                continue;
            }

            self.retry
                .run(&format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) \
                     REFERENCES {} ({}) ON DELETE {} NOT VALID",
                    partition,
                    name,
                    column,
                    target,
                    target_key,
                    on_delete.as_sql()
                ))
                .await?;

            if validate {
                self.validate_constraint(&partition, &name).await?;
            }
        }

        if validate {
            // Every partition holds a validated copy, so the parent attach
            // does not scan any rows.
            self.retry
                .run(&format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) \
                     REFERENCES {} ({}) ON DELETE {}",
                    source,
                    name,
                    column,
                    target,
                    target_key,
                    on_delete.as_sql()
                ))
                .await?;
        }

        info!(table = source, constraint = %name, target, "Added partitioned foreign key");
        Ok(Outcome::Applied)
    }

    /// Validate a previously added, unvalidated foreign key on every
    /// partition of `source`.
    ///
    /// A partition without the constraint is logged and skipped rather than
    /// failing the run, so a half-applied earlier attempt can be finished.
    pub async fn validate_partitioned_foreign_key(
        &self,
        source: &str,
        column: &str,
        name: Option<&str>,
    ) -> Result<Outcome, Error> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| concurrent_foreign_key_name(source, column));

        for partition in self.catalog.partitions_of(source).await? {
            let keys = self.catalog.foreign_keys(&partition).await?;
            let Some(key) = keys.iter().find(|fk| fk.name == name) else {
                warn!(table = %partition, constraint = %name,
                    "Missing foreign key, skipping validation");
                continue;
            };
            if key.validated {
                continue;
            }
            self.validate_constraint(&partition, &name).await?;
        }

        Ok(Outcome::Applied)
    }

    /// Rename a constraint on the parent and on every partition.
    pub async fn rename_partitioned_foreign_key(
        &self,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), Error> {
        self.rename_constraint(table, old_name, new_name).await?;
        for partition in self.catalog.partitions_of(table).await? {
            self.rename_constraint(&partition, old_name, new_name).await?;
        }
        Ok(())
    }

    /// Exchange the names of two constraints on `table` and its partitions,
    /// going through a temporary name since constraint names must stay
    /// unique per table throughout.
    pub async fn swap_partitioned_foreign_keys(
        &self,
        table: &str,
        name_a: &str,
        name_b: &str,
    ) -> Result<(), Error> {
        let tmp_name = format!("fk_{}", hashed_identifier(&format!("{}_swap", name_a)));

        self.rename_partitioned_foreign_key(table, name_a, &tmp_name).await?;
        self.rename_partitioned_foreign_key(table, name_b, name_a).await?;
        self.rename_partitioned_foreign_key(table, &tmp_name, name_b).await?;
        Ok(())
    }

    async fn rename_constraint(
        &self,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), Error> {
        self.retry
            .run(&format!(
                "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
                table, old_name, new_name
            ))
            .await?;
        Ok(())
    }

    /// `VALIDATE CONSTRAINT` scans the whole partition; run it with the
    /// statement timeout lifted so large partitions do not abort mid-scan.
    async fn validate_constraint(&self, table: &str, name: &str) -> Result<(), Error> {
        self.executor.execute("SET statement_timeout TO 0").await?;
        let validated = self
            .executor
            .execute(&format!(
                "ALTER TABLE {} VALIDATE CONSTRAINT {}",
                table, name
            ))
            .await;
        self.executor.execute("RESET statement_timeout").await?;
        validated.map(|_| ())
    }

    async fn referenced_columns(&self, target: &str) -> Result<String, Error> {
        let key = self.catalog.primary_key_columns(target).await?;
        if key.is_empty() {
            return Err(Error::MissingPrimaryKey {
                table: target.to_string(),
            });
        }
        Ok(key.join(", "))
    }
}
