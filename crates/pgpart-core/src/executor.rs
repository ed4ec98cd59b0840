//! Execution seams: SQL statements and pacing.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Error;

/// Executes SQL text against one database connection.
///
/// The engine builds DDL/DML as text and hands it to this trait; it never
/// opens transactions itself. Operations that must not run inside a caller's
/// transaction probe [`SqlExecutor::in_transaction`] first.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute a statement, returning the number of rows affected.
    async fn execute(&self, sql: &str) -> Result<u64, Error>;

    /// Whether the connection currently has a transaction open.
    async fn in_transaction(&self) -> Result<bool, Error>;
}

/// Self-throttle between units of work.
///
/// Production uses [`TokioPacer`]; tests substitute a recorder so pacing is
/// asserted without real sleeps.
#[async_trait]
pub trait Pacer: Send + Sync {
    /// Block the calling worker for the given duration.
    async fn pause(&self, duration: Duration);
}

/// Pacer backed by `tokio::time::sleep`.
#[derive(Debug, Default)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
