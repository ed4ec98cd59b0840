//! Creating and dropping the partitioned sibling of a live table.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use super::descriptor::monthly_partitions;
use crate::catalog::{CatalogClient, ColumnDef};
use crate::error::{Error, Outcome};
use crate::executor::SqlExecutor;
use crate::naming;
use crate::retry::LockRetries;

/// Creates the range-partitioned sibling of a table and keeps writes flowing
/// into it until cutover.
///
/// All statements issued here are fast metadata-only DDL: attaching a
/// partition copies no data, and the dual-write trigger install only needs a
/// brief lock taken under retry.
pub struct TableManager {
    catalog: Arc<dyn CatalogClient>,
    executor: Arc<dyn SqlExecutor>,
    retry: LockRetries,
}

impl TableManager {
    /// Create a table manager over one connection.
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

    /// Create `<table>_part`, partitioned by range on `column`, with one
    /// partition per calendar month between `min_date` and `max_date` plus a
    /// catch-all below, and install the dual-write sync trigger on the
    /// source table.
    ///
    /// The sibling copies the source's column shape but not its indexes
    /// (those are rebuilt concurrently later), takes `(primary key, column)`
    /// as its composite primary key, drops the primary key default, and
    /// widens an `integer` primary key to `bigint`.
    pub async fn partition_table_by_date(
        &self,
        table: &str,
        column: &str,
        min_date: NaiveDate,
        max_date: NaiveDate,
    ) -> Result<Outcome, Error> {
        if self.executor.in_transaction().await? {
            return Err(Error::TransactionOpen {
                operation: "partition_table_by_date",
            });
        }

        if max_date <= min_date {
            return Err(Error::InvalidDateRange { min_date, max_date });
        }

        let partitioned_table = naming::partitioned_table_name(table);
        if self.catalog.table_exists(&partitioned_table).await? {
            let reason = format!("partitioned table {} already exists", partitioned_table);
            warn!(table, partitioned_table = %partitioned_table,
                "Partitioned table not created because it already exists \
                 (this may be due to an aborted migration or similar)");
            return Ok(Outcome::Skipped(reason));
        }

        let primary_key = self.catalog.primary_key_columns(table).await?;
        if primary_key.is_empty() {
            return Err(Error::MissingPrimaryKey {
                table: table.to_string(),
            });
        }

        let columns = self.catalog.columns(table).await?;
        if !columns.iter().any(|c| c.name == column) {
            return Err(Error::MissingColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }

        let create_sql = build_partitioned_table_sql(
            &partitioned_table,
            &columns,
            &primary_key,
            column,
        );
        self.executor.execute(&create_sql).await?;

        for partition in monthly_partitions(&partitioned_table, min_date, max_date) {
            let sql = format!(
                "CREATE TABLE {} PARTITION OF {} {}",
                partition.name,
                partitioned_table,
                partition.for_values_clause()
            );
            self.executor.execute(&sql).await?;
        }

        self.create_trigger_to_sync_tables(table, &partitioned_table, &columns, &primary_key)
            .await?;

        info!(table, partitioned_table = %partitioned_table,
            "Created partitioned table and monthly partitions");
        Ok(Outcome::Applied)
    }

    /// Drop the partitioned sibling of `table` (partitions drop with it) and
    /// remove the sync trigger and function from the source table.
    pub async fn drop_partitioned_table_for(&self, table: &str) -> Result<(), Error> {
        self.drop_sync_trigger(table).await?;

        let partitioned_table = naming::partitioned_table_name(table);
        self.retry
            .run(&format!("DROP TABLE IF EXISTS {}", partitioned_table))
            .await?;

        info!(table, partitioned_table = %partitioned_table, "Dropped partitioned table");
        Ok(())
    }

    /// Install the function + trigger pair mirroring every insert, update,
    /// and delete on `source` into `target`.
    ///
    /// The delete and update arms match target rows by `primary_key`, the
    /// only columns guaranteed unique on both sides. The insert arm uses
    /// `ON CONFLICT DO NOTHING` so rows already moved by the backfill never
    /// error.
    pub async fn create_trigger_to_sync_tables(
        &self,
        source: &str,
        target: &str,
        columns: &[ColumnDef],
        primary_key: &[String],
    ) -> Result<Outcome, Error> {
        let trigger_name = naming::sync_trigger_name(source);
        if self.catalog.trigger_exists(source, &trigger_name).await? {
            let reason = format!("sync trigger {} already exists on {}", trigger_name, source);
            warn!(source, trigger = %trigger_name,
                "Sync trigger not created because it already exists");
            return Ok(Outcome::Skipped(reason));
        }

        let function_name = naming::sync_function_name(source);
        let function_sql = build_sync_function_sql(&function_name, target, columns, primary_key);
        self.executor.execute(&function_sql).await?;

        let trigger_sql = format!(
            "CREATE TRIGGER {trigger} \
             AFTER INSERT OR UPDATE OR DELETE ON {source} \
             FOR EACH ROW EXECUTE FUNCTION {function}()",
            trigger = trigger_name,
            source = source,
            function = function_name,
        );
        self.retry.run(&trigger_sql).await?;

        Ok(Outcome::Applied)
    }

    /// Drop the sync trigger and its function for `source`, if present.
    pub async fn drop_sync_trigger(&self, source: &str) -> Result<(), Error> {
        let trigger_name = naming::sync_trigger_name(source);
        let function_name = naming::sync_function_name(source);

        self.retry
            .run(&format!(
                "DROP TRIGGER IF EXISTS {} ON {}",
                trigger_name, source
            ))
            .await?;
        self.executor
            .execute(&format!("DROP FUNCTION IF EXISTS {}() CASCADE", function_name))
            .await?;
        Ok(())
    }
}

fn build_partitioned_table_sql(
    partitioned_table: &str,
    columns: &[ColumnDef],
    primary_key: &[String],
    partition_column: &str,
) -> String {
    let mut definitions = Vec::with_capacity(columns.len() + 1);
    for column in columns {
        let is_pk = primary_key.contains(&column.name);

        // The sibling's ids come from the source rows, not from a serial
        // default, so the primary key default is dropped. An integer key is
        // widened to bigint while we are rewriting the table anyway.
        let sql_type = if is_pk && column.is_integer() {
            "bigint"
        } else {
            column.sql_type.as_str()
        };

        let mut definition = format!("{} {}", column.name, sql_type);
        if !column.nullable {
            definition.push_str(" NOT NULL");
        }
        if !is_pk {
            if let Some(default) = &column.default {
                definition.push_str(&format!(" DEFAULT {}", default));
            }
        }
        definitions.push(definition);
    }

    let mut key_columns: Vec<&str> = primary_key.iter().map(String::as_str).collect();
    if !key_columns.contains(&partition_column) {
        key_columns.push(partition_column);
    }
    definitions.push(format!("PRIMARY KEY ({})", key_columns.join(", ")));

    format!(
        "CREATE TABLE {} ({}) PARTITION BY RANGE ({})",
        partitioned_table,
        definitions.join(", "),
        partition_column
    )
}

fn build_sync_function_sql(
    function_name: &str,
    target: &str,
    columns: &[ColumnDef],
    primary_key: &[String],
) -> String {
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    let column_list = names.join(", ");
    let new_values: Vec<String> = names.iter().map(|n| format!("NEW.{}", n)).collect();
    let assignments: Vec<String> = names.iter().map(|n| format!("{n} = NEW.{n}")).collect();
    let delete_condition: Vec<String> = primary_key
        .iter()
        .map(|k| format!("{k} = OLD.{k}"))
        .collect();
    let update_condition: Vec<String> = primary_key
        .iter()
        .map(|k| format!("{target}.{k} = NEW.{k}"))
        .collect();

    format!(
        "CREATE OR REPLACE FUNCTION {function}() RETURNS TRIGGER AS $$ \
         BEGIN \
         IF (TG_OP = 'DELETE') THEN \
         DELETE FROM {target} WHERE {delete_condition}; \
         ELSIF (TG_OP = 'UPDATE') THEN \
         UPDATE {target} SET {assignments} WHERE {update_condition}; \
         ELSIF (TG_OP = 'INSERT') THEN \
         INSERT INTO {target} ({column_list}) VALUES ({new_values}) \
         ON CONFLICT DO NOTHING; \
         END IF; \
         RETURN NULL; \
         END $$ LANGUAGE PLPGSQL",
        function = function_name,
        target = target,
        delete_condition = delete_condition.join(" AND "),
        assignments = assignments.join(", "),
        update_condition = update_condition.join(" AND "),
        column_list = column_list,
        new_values = new_values.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Pacer;
    use crate::testing::{FakeCatalog, RecordingExecutor, RecordingPacer};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn source_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", "integer")
                .not_null()
                .with_default("nextval('events_id_seq'::regclass)"),
            ColumnDef::new("name", "character varying").not_null(),
            ColumnDef::new("created_at", "timestamp without time zone"),
        ]
    }

    fn manager(
        catalog: Arc<FakeCatalog>,
        executor: Arc<RecordingExecutor>,
    ) -> TableManager {
        let pacer: Arc<dyn Pacer> = Arc::new(RecordingPacer::new());
        let retry = LockRetries::new(executor.clone(), pacer);
        TableManager::new(catalog, executor, retry)
    }

    #[tokio::test]
    async fn test_creates_parent_and_monthly_partitions() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_table("events", source_columns(), &["id"]);
        let executor = Arc::new(RecordingExecutor::new());
        let manager = manager(catalog, executor.clone());

        let outcome = manager
            .partition_table_by_date("events", "created_at", date(2020, 1, 1), date(2020, 3, 1))
            .await
            .unwrap();
        assert!(outcome.is_applied());

        let ddl = executor.ddl_statements();
        assert_eq!(
            ddl[0],
            "CREATE TABLE events_part (\
             id bigint NOT NULL, \
             name character varying NOT NULL, \
             created_at timestamp without time zone, \
             PRIMARY KEY (id, created_at)\
             ) PARTITION BY RANGE (created_at)"
        );
        assert_eq!(
            ddl[1],
            "CREATE TABLE events_part_000000 PARTITION OF events_part \
             FOR VALUES FROM (MINVALUE) TO ('2020-01-01 00:00:00')"
        );
        assert_eq!(
            ddl[2],
            "CREATE TABLE events_part_202001 PARTITION OF events_part \
             FOR VALUES FROM ('2020-01-01 00:00:00') TO ('2020-02-01 00:00:00')"
        );
        assert_eq!(
            ddl[3],
            "CREATE TABLE events_part_202002 PARTITION OF events_part \
             FOR VALUES FROM ('2020-02-01 00:00:00') TO ('2020-03-01 00:00:00')"
        );
        assert_eq!(
            ddl[4],
            "CREATE TABLE events_part_202003 PARTITION OF events_part \
             FOR VALUES FROM ('2020-03-01 00:00:00') TO ('2020-04-01 00:00:00')"
        );

        // Dual-write plumbing follows the partition creates.
        assert!(ddl[5].starts_with("CREATE OR REPLACE FUNCTION table_sync_function_"));
        assert!(ddl[5].contains("ON CONFLICT DO NOTHING"));
        assert!(ddl[6].starts_with("CREATE TRIGGER table_sync_trigger_"));
        assert!(ddl[6].contains("AFTER INSERT OR UPDATE OR DELETE ON events"));
    }

    #[tokio::test]
    async fn test_sync_function_keys_on_primary_key_not_first_column() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_table(
            "events",
            vec![
                ColumnDef::new("name", "character varying").not_null(),
                ColumnDef::new("id", "bigint").not_null(),
                ColumnDef::new("created_at", "timestamp without time zone"),
            ],
            &["id"],
        );
        let executor = Arc::new(RecordingExecutor::new());
        let manager = manager(catalog, executor.clone());

        manager
            .partition_table_by_date("events", "created_at", date(2020, 1, 1), date(2020, 2, 1))
            .await
            .unwrap();

        let function = executor
            .ddl_statements()
            .into_iter()
            .find(|s| s.starts_with("CREATE OR REPLACE FUNCTION table_sync_function_"))
            .unwrap();
        assert!(function.contains("DELETE FROM events_part WHERE id = OLD.id"));
        assert!(function.contains("WHERE events_part.id = NEW.id"));
        assert!(!function.contains("name = OLD.name"));
    }

    #[tokio::test]
    async fn test_primary_key_default_is_dropped() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_table("events", source_columns(), &["id"]);
        let executor = Arc::new(RecordingExecutor::new());
        let manager = manager(catalog, executor.clone());

        manager
            .partition_table_by_date("events", "created_at", date(2020, 1, 1), date(2020, 2, 1))
            .await
            .unwrap();

        let create = &executor.ddl_statements()[0];
        assert!(!create.contains("nextval"));
        assert!(create.contains("id bigint NOT NULL"));
    }

    #[tokio::test]
    async fn test_non_integer_primary_key_type_is_kept() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_table(
            "events",
            vec![
                ColumnDef::new("identifier", "character varying").not_null(),
                ColumnDef::new("created_at", "timestamp without time zone"),
            ],
            &["identifier"],
        );
        let executor = Arc::new(RecordingExecutor::new());
        let manager = manager(catalog, executor.clone());

        manager
            .partition_table_by_date("events", "created_at", date(2020, 1, 1), date(2020, 2, 1))
            .await
            .unwrap();

        let create = &executor.ddl_statements()[0];
        assert!(create.contains("identifier character varying NOT NULL"));
        assert!(!create.contains("identifier bigint"));
    }

    #[tokio::test]
    async fn test_fails_inside_transaction() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_table("events", source_columns(), &["id"]);
        let executor = Arc::new(RecordingExecutor::new());
        executor.set_in_transaction(true);
        let manager = manager(catalog, executor);

        let err = manager
            .partition_table_by_date("events", "created_at", date(2020, 1, 1), date(2020, 3, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransactionOpen { .. }));
    }

    #[tokio::test]
    async fn test_fails_when_max_date_not_after_min_date() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_table("events", source_columns(), &["id"]);
        let executor = Arc::new(RecordingExecutor::new());
        let manager = manager(catalog, executor);

        let err = manager
            .partition_table_by_date("events", "created_at", date(2020, 3, 1), date(2020, 3, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDateRange { .. }));
    }

    #[tokio::test]
    async fn test_fails_without_primary_key() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_table("events", source_columns(), &[]);
        let executor = Arc::new(RecordingExecutor::new());
        let manager = manager(catalog, executor);

        let err = manager
            .partition_table_by_date("events", "created_at", date(2020, 1, 1), date(2020, 3, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingPrimaryKey { .. }));
    }

    #[tokio::test]
    async fn test_fails_with_unknown_partition_column() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_table("events", source_columns(), &["id"]);
        let executor = Arc::new(RecordingExecutor::new());
        let manager = manager(catalog, executor);

        let err = manager
            .partition_table_by_date("events", "not_a_column", date(2020, 1, 1), date(2020, 3, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingColumn { .. }));
    }

    #[tokio::test]
    async fn test_skips_when_partitioned_table_exists() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_table("events", source_columns(), &["id"]);
        catalog.add_table("events_part", vec![], &[]);
        let executor = Arc::new(RecordingExecutor::new());
        let manager = manager(catalog, executor.clone());

        let outcome = manager
            .partition_table_by_date("events", "created_at", date(2020, 1, 1), date(2020, 3, 1))
            .await
            .unwrap();
        assert!(outcome.is_skipped());
        assert!(executor.ddl_statements().is_empty());
    }

    #[tokio::test]
    async fn test_drop_removes_sibling_trigger_and_function() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_table("events", source_columns(), &["id"]);
        let executor = Arc::new(RecordingExecutor::new());
        let manager = manager(catalog, executor.clone());

        manager.drop_partitioned_table_for("events").await.unwrap();

        let ddl = executor.ddl_statements();
        assert!(ddl[0].starts_with("DROP TRIGGER IF EXISTS table_sync_trigger_"));
        assert!(ddl[1].starts_with("DROP FUNCTION IF EXISTS table_sync_function_"));
        assert!(ddl[1].ends_with("CASCADE"));
        assert_eq!(ddl[2], "DROP TABLE IF EXISTS events_part");
    }
}
