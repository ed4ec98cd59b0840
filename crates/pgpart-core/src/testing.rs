//! In-memory fakes for exercising the engine without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::catalog::{CatalogClient, ColumnDef, ForeignKeyDef, IndexDef};
use crate::error::Error;
use crate::executor::{Pacer, SqlExecutor};
use crate::ledger::JobLedger;

/// Executor that records every statement and can fail on demand.
#[derive(Default)]
pub struct RecordingExecutor {
    statements: Mutex<Vec<String>>,
    in_transaction: AtomicBool,
    lock_failures: Mutex<HashMap<String, usize>>,
    hard_failures: Mutex<HashMap<String, String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// All statements executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    /// Statements excluding `SET`/`RESET` session noise.
    pub fn ddl_statements(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| !s.starts_with("SET ") && !s.starts_with("RESET "))
            .collect()
    }

    pub fn set_in_transaction(&self, open: bool) {
        self.in_transaction.store(open, Ordering::SeqCst);
    }

    /// Fail the next `times` executions of `sql` with a lock timeout.
    pub fn fail_times(&self, sql: &str, times: usize) {
        self.lock_failures.lock().insert(sql.to_string(), times);
    }

    /// Fail every execution of `sql` with a database error.
    pub fn fail_hard(&self, sql: &str, message: &str) {
        self.hard_failures
            .lock()
            .insert(sql.to_string(), message.to_string());
    }
}

#[async_trait]
impl SqlExecutor for RecordingExecutor {
    async fn execute(&self, sql: &str) -> Result<u64, Error> {
        self.statements.lock().push(sql.to_string());

        if let Some(message) = self.hard_failures.lock().get(sql) {
            return Err(Error::Sql(message.clone()));
        }

        let mut failures = self.lock_failures.lock();
        if let Some(remaining) = failures.get_mut(sql) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::LockTimeout {
                    statement: sql.to_string(),
                });
            }
        }

        Ok(0)
    }

    async fn in_transaction(&self) -> Result<bool, Error> {
        Ok(self.in_transaction.load(Ordering::SeqCst))
    }
}

/// Pacer that records requested pauses instead of sleeping.
#[derive(Default)]
pub struct RecordingPacer {
    pauses: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().clone()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn pause(&self, duration: Duration) {
        self.pauses.lock().push(duration);
    }
}

#[derive(Default, Clone)]
struct FakeTable {
    columns: Vec<ColumnDef>,
    primary_key: Vec<String>,
    indexes: Vec<IndexDef>,
    foreign_keys: Vec<ForeignKeyDef>,
    triggers: Vec<String>,
    partitions: Vec<String>,
    row_ids: Vec<i64>,
}

/// In-memory catalog with mutable table metadata.
#[derive(Default)]
pub struct FakeCatalog {
    tables: Mutex<HashMap<String, FakeTable>>,
    sequences: Mutex<Vec<String>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, name: &str, columns: Vec<ColumnDef>, primary_key: &[&str]) {
        let table = FakeTable {
            columns,
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        };
        self.tables.lock().insert(name.to_string(), table);
    }

    pub fn add_partition(&self, parent: &str, child: &str) {
        let mut tables = self.tables.lock();
        if let Some(table) = tables.get_mut(parent) {
            table.partitions.push(child.to_string());
            table.partitions.sort();
        }
        tables.entry(child.to_string()).or_default();
    }

    pub fn add_index(&self, table: &str, index: IndexDef) {
        if let Some(t) = self.tables.lock().get_mut(table) {
            t.indexes.push(index);
        }
    }

    pub fn add_foreign_key(&self, table: &str, fk: ForeignKeyDef) {
        if let Some(t) = self.tables.lock().get_mut(table) {
            t.foreign_keys.push(fk);
        }
    }

    pub fn add_trigger(&self, table: &str, name: &str) {
        if let Some(t) = self.tables.lock().get_mut(table) {
            t.triggers.push(name.to_string());
        }
    }

    pub fn add_sequence(&self, name: &str) {
        self.sequences.lock().push(name.to_string());
    }

    pub fn set_row_ids(&self, table: &str, ids: Vec<i64>) {
        if let Some(t) = self.tables.lock().get_mut(table) {
            t.row_ids = ids;
        }
    }

    pub fn drop_table(&self, name: &str) {
        self.tables.lock().remove(name);
    }

    fn with_table<R>(&self, name: &str, f: impl FnOnce(&FakeTable) -> R) -> Option<R> {
        self.tables.lock().get(name).map(f)
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn table_exists(&self, table: &str) -> Result<bool, Error> {
        Ok(self.tables.lock().contains_key(table))
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>, Error> {
        Ok(self.with_table(table, |t| t.columns.clone()).unwrap_or_default())
    }

    async fn primary_key_columns(&self, table: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .with_table(table, |t| t.primary_key.clone())
            .unwrap_or_default())
    }

    async fn index_exists_by_name(&self, table: &str, name: &str) -> Result<bool, Error> {
        Ok(self
            .with_table(table, |t| t.indexes.iter().any(|i| i.name == name))
            .unwrap_or(false))
    }

    async fn indexes(&self, table: &str) -> Result<Vec<IndexDef>, Error> {
        Ok(self.with_table(table, |t| t.indexes.clone()).unwrap_or_default())
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDef>, Error> {
        Ok(self
            .with_table(table, |t| t.foreign_keys.clone())
            .unwrap_or_default())
    }

    async fn trigger_exists(&self, table: &str, name: &str) -> Result<bool, Error> {
        Ok(self
            .with_table(table, |t| t.triggers.iter().any(|n| n == name))
            .unwrap_or(false))
    }

    async fn partitions_of(&self, table: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .with_table(table, |t| t.partitions.clone())
            .unwrap_or_default())
    }

    async fn sequence_exists(&self, name: &str) -> Result<bool, Error> {
        Ok(self.sequences.lock().iter().any(|s| s == name))
    }

    async fn next_batch_range(
        &self,
        table: &str,
        _column: &str,
        from_id: i64,
        stop_id: i64,
        limit: usize,
    ) -> Result<Option<(i64, i64)>, Error> {
        let mut ids = self
            .with_table(table, |t| t.row_ids.clone())
            .unwrap_or_default();
        ids.retain(|id| *id >= from_id && *id <= stop_id);
        ids.sort_unstable();
        ids.truncate(limit);

        match (ids.first(), ids.last()) {
            (Some(min), Some(max)) => Ok(Some((*min, *max))),
            _ => Ok(None),
        }
    }
}

/// Ledger that records completions in memory.
#[derive(Default)]
pub struct FakeLedger {
    succeeded: Mutex<Vec<(String, Value)>>,
    pending: Mutex<Vec<Value>>,
    refuse_updates: AtomicBool,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeeded(&self) -> Vec<(String, Value)> {
        self.succeeded.lock().clone()
    }

    pub fn add_pending(&self, arguments: Value) {
        self.pending.lock().push(arguments);
    }

    /// Make `mark_succeeded` report zero updated records.
    pub fn refuse_updates(&self) {
        self.refuse_updates.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobLedger for FakeLedger {
    async fn mark_succeeded(&self, class_name: &str, arguments: &Value) -> Result<u64, Error> {
        if self.refuse_updates.load(Ordering::SeqCst) {
            return Ok(0);
        }
        self.pending.lock().retain(|p| p != arguments);
        self.succeeded
            .lock()
            .push((class_name.to_string(), arguments.clone()));
        Ok(1)
    }

    async fn pending_jobs(&self, _class_name: &str) -> Result<Vec<Value>, Error> {
        Ok(self.pending.lock().clone())
    }
}
