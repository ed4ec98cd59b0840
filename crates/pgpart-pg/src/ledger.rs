//! Job ledger over a tracking table with `jsonb` arguments.

use std::sync::Arc;

use async_trait::async_trait;
use pgpart_core::{Error, JobLedger};
use serde_json::Value;
use tokio_postgres::Client;

use crate::db_error;

/// Table tracking backfill jobs handed out by the external scheduler.
pub const LEDGER_TABLE: &str = "partition_backfill_jobs";

/// [`JobLedger`] backed by [`LEDGER_TABLE`].
///
/// A job is identified by `(class_name, arguments)`; completion flips its
/// status from `pending` to `succeeded`. The scheduler owns row creation,
/// the engine only flips statuses and reads back what is still pending.
pub struct PgJobLedger {
    client: Arc<Client>,
}

impl PgJobLedger {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Create the tracking table if the scheduler has not done so yet.
    pub async fn ensure_table(&self) -> Result<(), Error> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (\
             id bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY, \
             class_name text NOT NULL, \
             arguments jsonb NOT NULL, \
             status text NOT NULL DEFAULT 'pending', \
             created_at timestamptz NOT NULL DEFAULT now(), \
             updated_at timestamptz NOT NULL DEFAULT now())"
        );
        self.client
            .execute(&sql, &[])
            .await
            .map_err(|e| db_error(&sql, e))?;
        Ok(())
    }

    /// Record a new pending job.
    pub async fn enqueue(&self, class_name: &str, arguments: &Value) -> Result<(), Error> {
        let sql = format!(
            "INSERT INTO {LEDGER_TABLE} (class_name, arguments) VALUES ($1, $2)"
        );
        self.client
            .execute(&sql, &[&class_name, arguments])
            .await
            .map_err(|e| db_error(&sql, e))?;
        Ok(())
    }
}

#[async_trait]
impl JobLedger for PgJobLedger {
    async fn mark_succeeded(&self, class_name: &str, arguments: &Value) -> Result<u64, Error> {
        let sql = format!(
            "UPDATE {LEDGER_TABLE} \
             SET status = 'succeeded', updated_at = now() \
             WHERE class_name = $1 AND arguments = $2 AND status = 'pending'"
        );
        self.client
            .execute(&sql, &[&class_name, arguments])
            .await
            .map_err(|e| db_error(&sql, e))
    }

    async fn pending_jobs(&self, class_name: &str) -> Result<Vec<Value>, Error> {
        let sql = format!(
            "SELECT arguments FROM {LEDGER_TABLE} \
             WHERE class_name = $1 AND status = 'pending' \
             ORDER BY id"
        );
        let rows = self
            .client
            .query(&sql, &[&class_name])
            .await
            .map_err(|e| db_error(&sql, e))?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }
}
