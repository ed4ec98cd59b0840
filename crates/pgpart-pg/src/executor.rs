//! Statement execution over a live connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pgpart_core::{Error, SqlExecutor};
use tokio_postgres::Client;
use tracing::debug;

use crate::db_error;

/// [`SqlExecutor`] over a `tokio_postgres` client.
///
/// The driver does not expose whether a transaction is open on the raw
/// client, so the executor tracks depth itself: callers who want a
/// transaction go through [`begin`](PgExecutor::begin) /
/// [`commit`](PgExecutor::commit), and the engine's transaction-open
/// precondition checks observe that depth.
pub struct PgExecutor {
    client: Arc<Client>,
    transaction_depth: AtomicUsize,
}

impl PgExecutor {
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            client,
            transaction_depth: AtomicUsize::new(0),
        }
    }

    /// Open a transaction on this connection.
    pub async fn begin(&self) -> Result<(), Error> {
        self.execute("BEGIN").await?;
        self.transaction_depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Commit the current transaction.
    pub async fn commit(&self) -> Result<(), Error> {
        self.execute("COMMIT").await?;
        self.transaction_depth.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    /// Roll back the current transaction.
    pub async fn rollback(&self) -> Result<(), Error> {
        self.execute("ROLLBACK").await?;
        self.transaction_depth.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute(&self, sql: &str) -> Result<u64, Error> {
        debug!(statement = sql, "executing");
        self.client
            .execute(sql, &[])
            .await
            .map_err(|e| db_error(sql, e))
    }

    async fn in_transaction(&self) -> Result<bool, Error> {
        Ok(self.transaction_depth.load(Ordering::SeqCst) > 0)
    }
}
