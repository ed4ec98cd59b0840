//! Sequence-enforced id assignment.
//!
//! While old and new table run side by side under the dual-write trigger,
//! an id handed out by the application instead of the sequence could collide
//! later. [`UniquenessHelpers`] moves id assignment fully into the database:
//! the column default goes away and a trigger assigns `nextval` on every
//! insert, ignoring (with a warning in the server log) any id the client
//! supplied.

use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::CatalogClient;
use crate::error::{Error, Outcome};
use crate::executor::SqlExecutor;
use crate::retry::LockRetries;

pub struct UniquenessHelpers {
    catalog: Arc<dyn CatalogClient>,
    executor: Arc<dyn SqlExecutor>,
    retry: LockRetries,
}

impl UniquenessHelpers {
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

    /// Force `table.id` to always come from `sequence` (defaulting to the
    /// `<table>_id_seq` convention).
    ///
    /// Drops the column default and installs a `BEFORE INSERT` trigger that
    /// overwrites any explicitly supplied id with `nextval`, emitting a
    /// database warning when it does.
    pub async fn ensure_unique_id(
        &self,
        table: &str,
        sequence: Option<&str>,
    ) -> Result<Outcome, Error> {
        let sequence = resolve_sequence_name(table, sequence);
        if !self.catalog.sequence_exists(&sequence).await? {
            return Err(Error::MissingSequence { sequence });
        }

        let trigger = trigger_name(table);
        if self.catalog.trigger_exists(table, &trigger).await? {
            let reason = format!("trigger {} already exists on {}", trigger, table);
            warn!(table, trigger = %trigger,
                "Trigger not created because it exists already \
                 (this may be due to an aborted migration or similar)");
            return Ok(Outcome::Skipped(reason));
        }

        let function = function_name(table);

        self.retry
            .run(&format!("ALTER TABLE {} ALTER COLUMN id DROP DEFAULT", table))
            .await?;

        self.executor
            .execute(&build_assign_id_function_sql(&function, &sequence))
            .await?;

        self.retry
            .run(&format!(
                "CREATE TRIGGER {trigger} BEFORE INSERT ON {table} \
                 FOR EACH ROW EXECUTE FUNCTION {function}()"
            ))
            .await?;

        info!(table, trigger = %trigger, "Enforced sequence-assigned ids");
        Ok(Outcome::Applied)
    }

    /// Undo [`ensure_unique_id`](Self::ensure_unique_id): restore the
    /// sequence-backed column default and drop the trigger and function.
    pub async fn revert_ensure_unique_id(
        &self,
        table: &str,
        sequence: Option<&str>,
    ) -> Result<Outcome, Error> {
        let trigger = trigger_name(table);
        if !self.catalog.trigger_exists(table, &trigger).await? {
            let reason = format!("trigger {} does not exist on {}", trigger, table);
            warn!(table, trigger = %trigger,
                "Trigger not removed because it does not exist \
                 (this may be due to an aborted migration or similar)");
            return Ok(Outcome::Skipped(reason));
        }

        self.retry
            .run(&format!("DROP TRIGGER {} ON {}", trigger, table))
            .await?;

        self.executor
            .execute(&format!(
                "DROP FUNCTION IF EXISTS {}() CASCADE",
                function_name(table)
            ))
            .await?;

        self.retry
            .run(&format!(
                "ALTER TABLE {} ALTER COLUMN id SET DEFAULT nextval('{}'::regclass)",
                table,
                resolve_sequence_name(table, sequence)
            ))
            .await?;

        info!(table, trigger = %trigger, "Restored default id assignment");
        Ok(Outcome::Applied)
    }
}

fn resolve_sequence_name(table: &str, sequence: Option<&str>) -> String {
    sequence
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}_id_seq", table))
}

fn function_name(table: &str) -> String {
    format!("assign_{}_id_value", table)
}

fn trigger_name(table: &str) -> String {
    format!("assign_{}_id_trigger", table)
}

fn build_assign_id_function_sql(function: &str, sequence: &str) -> String {
    format!(
        "CREATE OR REPLACE FUNCTION {function}() \
         RETURNS TRIGGER AS \
         $$ \
         BEGIN \
         IF NEW.id IS NOT NULL THEN \
         RAISE WARNING 'Manually assigned id on insert, the value will be ignored'; \
         END IF; \
         NEW.id := nextval('{sequence}'::regclass); \
         RETURN NEW; \
         END \
         $$ LANGUAGE PLPGSQL"
    )
}
