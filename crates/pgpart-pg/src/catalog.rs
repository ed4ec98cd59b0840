//! Catalog introspection over `pg_catalog` and `information_schema`.

use std::sync::Arc;

use async_trait::async_trait;
use pgpart_core::{CatalogClient, ColumnDef, Error, FkAction, ForeignKeyDef, IndexDef};
use tokio_postgres::Client;

use crate::db_error;

/// [`CatalogClient`] answering from the live system catalogs.
///
/// Table arguments are matched by name in the connection's search path;
/// `to_regclass` resolves them the same way the engine's generated DDL will.
pub struct PgCatalog {
    client: Arc<Client>,
}

impl PgCatalog {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    async fn query(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<tokio_postgres::Row>, Error> {
        self.client
            .query(sql, params)
            .await
            .map_err(|e| db_error(sql, e))
    }
}

#[async_trait]
impl CatalogClient for PgCatalog {
    async fn table_exists(&self, table: &str) -> Result<bool, Error> {
        let rows = self
            .query("SELECT to_regclass($1) IS NOT NULL", &[&table])
            .await?;
        Ok(rows.first().map(|r| r.get(0)).unwrap_or(false))
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>, Error> {
        let rows = self
            .query(
                "SELECT column_name, data_type, column_default, is_nullable = 'YES' \
                 FROM information_schema.columns \
                 WHERE table_name = $1 \
                 ORDER BY ordinal_position",
                &[&table],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| ColumnDef {
                name: row.get(0),
                sql_type: row.get(1),
                default: row.get(2),
                nullable: row.get(3),
            })
            .collect())
    }

    async fn primary_key_columns(&self, table: &str) -> Result<Vec<String>, Error> {
        let rows = self
            .query(
                "SELECT a.attname::text \
                 FROM pg_index i \
                 JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
                 WHERE i.indrelid = to_regclass($1) AND i.indisprimary \
                 ORDER BY array_position(i.indkey, a.attnum)",
                &[&table],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn index_exists_by_name(&self, table: &str, name: &str) -> Result<bool, Error> {
        let rows = self
            .query(
                "SELECT EXISTS (\
                 SELECT 1 FROM pg_indexes WHERE tablename = $1 AND indexname = $2)",
                &[&table, &name],
            )
            .await?;
        Ok(rows.first().map(|r| r.get(0)).unwrap_or(false))
    }

    async fn indexes(&self, table: &str) -> Result<Vec<IndexDef>, Error> {
        let rows = self
            .query(
                "SELECT indexname::text, indexdef \
                 FROM pg_indexes \
                 WHERE tablename = $1 \
                 ORDER BY indexname",
                &[&table],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| IndexDef {
                name: row.get(0),
                definition: row.get(1),
            })
            .collect())
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>, Error> {
        let rows = self
            .query(
                "SELECT con.conname::text, \
                        con.confrelid::regclass::text, \
                        (SELECT array_agg(att.attname::text ORDER BY u.ord) \
                           FROM unnest(con.conkey) WITH ORDINALITY AS u(attnum, ord) \
                           JOIN pg_attribute att \
                             ON att.attrelid = con.conrelid AND att.attnum = u.attnum), \
                        con.confdeltype::text, \
                        con.convalidated \
                 FROM pg_constraint con \
                 WHERE con.conrelid = to_regclass($1) AND con.contype = 'f' \
                 ORDER BY con.conname",
                &[&table],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| ForeignKeyDef {
                name: row.get(0),
                target_table: row.get(1),
                columns: row.get(2),
                on_delete: fk_action_from_code(row.get(3)),
                validated: row.get(4),
            })
            .collect())
    }

    async fn trigger_exists(&self, table: &str, name: &str) -> Result<bool, Error> {
        let rows = self
            .query(
                "SELECT EXISTS (\
                 SELECT 1 FROM pg_trigger \
                 WHERE tgrelid = to_regclass($1) AND tgname = $2 AND NOT tgisinternal)",
                &[&table, &name],
            )
            .await?;
        Ok(rows.first().map(|r| r.get(0)).unwrap_or(false))
    }

    async fn partitions_of(&self, table: &str) -> Result<Vec<String>, Error> {
        let rows = self
            .query(
                "SELECT c.relname::text \
                 FROM pg_inherits i \
                 JOIN pg_class c ON c.oid = i.inhrelid \
                 WHERE i.inhparent = to_regclass($1) \
                 ORDER BY c.relname",
                &[&table],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn sequence_exists(&self, name: &str) -> Result<bool, Error> {
        let rows = self
            .query(
                "SELECT EXISTS (\
                 SELECT 1 FROM pg_class WHERE relkind = 'S' AND relname = $1)",
                &[&name],
            )
            .await?;
        Ok(rows.first().map(|r| r.get(0)).unwrap_or(false))
    }

    async fn next_batch_range(
        &self,
        table: &str,
        column: &str,
        from_id: i64,
        stop_id: i64,
        limit: usize,
    ) -> Result<Option<(i64, i64)>, Error> {
        let sql = format!(
            "SELECT min(batch.{column}), max(batch.{column}) FROM (\
             SELECT {column} FROM {table} \
             WHERE {column} BETWEEN $1 AND $2 \
             ORDER BY {column} LIMIT $3) batch"
        );
        let rows = self
            .query(&sql, &[&from_id, &stop_id, &(limit as i64)])
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let min: Option<i64> = row.get(0);
        let max: Option<i64> = row.get(1);
        Ok(min.zip(max))
    }
}

/// `pg_constraint.confdeltype` action code.
fn fk_action_from_code(code: &str) -> FkAction {
    match code {
        "c" => FkAction::Cascade,
        "r" => FkAction::Restrict,
        "n" => FkAction::SetNull,
        _ => FkAction::NoAction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fk_action_codes() {
        assert_eq!(fk_action_from_code("c"), FkAction::Cascade);
        assert_eq!(fk_action_from_code("r"), FkAction::Restrict);
        assert_eq!(fk_action_from_code("n"), FkAction::SetNull);
        assert_eq!(fk_action_from_code("a"), FkAction::NoAction);
    }
}
