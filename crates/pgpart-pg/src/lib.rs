//! PostgreSQL-backed implementations of the engine's seams.
//!
//! - [`connect`] - establishes a connection and spawns its driver task
//! - [`PgExecutor`] - [`SqlExecutor`](pgpart_core::SqlExecutor) over a live
//!   connection, with lock timeouts surfaced as typed errors
//! - [`PgCatalog`] - [`CatalogClient`](pgpart_core::CatalogClient) answering
//!   from `pg_catalog` and `information_schema`
//! - [`PgJobLedger`] - [`JobLedger`](pgpart_core::JobLedger) over a jobs
//!   table with `jsonb` arguments

mod catalog;
mod executor;
mod ledger;

pub use catalog::PgCatalog;
pub use executor::PgExecutor;
pub use ledger::{PgJobLedger, LEDGER_TABLE};

use std::sync::Arc;

use pgpart_core::Error;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

/// Connect to PostgreSQL and spawn the connection driver.
///
/// The returned client is shareable across tasks; the driver task logs and
/// exits if the connection drops.
pub async fn connect(url: &str) -> Result<Arc<Client>, Error> {
    info!("connecting to database");
    let (client, connection) = tokio_postgres::connect(url, NoTls)
        .await
        .map_err(|e| Error::Sql(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "database connection closed");
        }
    });
    Ok(Arc::new(client))
}

/// Map a driver error, surfacing lock acquisition failures as
/// [`Error::LockTimeout`] so the retry machinery can recognize them.
pub(crate) fn db_error(statement: &str, error: tokio_postgres::Error) -> Error {
    if error.code() == Some(&SqlState::LOCK_NOT_AVAILABLE) {
        return Error::LockTimeout {
            statement: statement.to_string(),
        };
    }
    Error::Sql(error.to_string())
}
