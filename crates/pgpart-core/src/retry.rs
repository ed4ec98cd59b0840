//! Lock-retry wrapper for DDL needing a brief exclusive lock.
//!
//! Statements like a parent-table index attach or a constraint rename only
//! need their lock for milliseconds, but acquiring it can stall behind long
//! transactions. Rather than queue indefinitely (and starve everything
//! queued behind us), each attempt runs under a short `lock_timeout`, backs
//! off on timeout, and a final attempt runs unbounded.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Error;
use crate::executor::{Pacer, SqlExecutor};

/// One retry step: how long to wait for the lock, then how long to back off.
#[derive(Debug, Clone, Copy)]
pub struct RetryTiming {
    /// `lock_timeout` for the attempt.
    pub lock_timeout: Duration,
    /// Sleep before the next attempt.
    pub sleep: Duration,
}

impl RetryTiming {
    /// Build a timing step.
    pub fn new(lock_timeout: Duration, sleep: Duration) -> Self {
        Self { lock_timeout, sleep }
    }
}

/// Default escalation schedule: quick attempts first, longer waits later.
pub fn default_timings() -> Vec<RetryTiming> {
    vec![
        RetryTiming::new(Duration::from_millis(100), Duration::from_millis(200)),
        RetryTiming::new(Duration::from_millis(100), Duration::from_millis(500)),
        RetryTiming::new(Duration::from_millis(500), Duration::from_secs(1)),
        RetryTiming::new(Duration::from_millis(500), Duration::from_secs(2)),
        RetryTiming::new(Duration::from_secs(1), Duration::from_secs(5)),
    ]
}

/// Runs a statement under escalating lock timeouts.
#[derive(Clone)]
pub struct LockRetries {
    executor: Arc<dyn SqlExecutor>,
    pacer: Arc<dyn Pacer>,
    timings: Vec<RetryTiming>,
}

impl LockRetries {
    /// Create a wrapper with the default schedule.
    pub fn new(executor: Arc<dyn SqlExecutor>, pacer: Arc<dyn Pacer>) -> Self {
        Self {
            executor,
            pacer,
            timings: default_timings(),
        }
    }

    /// Override the retry schedule.
    pub fn with_timings(mut self, timings: Vec<RetryTiming>) -> Self {
        self.timings = timings;
        self
    }

    /// Execute `sql`, retrying lock acquisition per the schedule.
    ///
    /// Only [`Error::LockTimeout`] is retried; any other error propagates
    /// immediately. The last attempt runs with `lock_timeout` disabled so a
    /// persistently contended lock is eventually waited out rather than
    /// abandoned.
    pub async fn run(&self, sql: &str) -> Result<u64, Error> {
        for (attempt, timing) in self.timings.iter().enumerate() {
            self.set_lock_timeout(timing.lock_timeout).await?;

            match self.executor.execute(sql).await {
                Ok(rows) => {
                    self.reset_lock_timeout().await?;
                    return Ok(rows);
                }
                Err(Error::LockTimeout { .. }) => {
                    warn!(
                        attempt = attempt + 1,
                        lock_timeout_ms = timing.lock_timeout.as_millis() as u64,
                        sleep_ms = timing.sleep.as_millis() as u64,
                        statement = sql,
                        "Lock not acquired, backing off"
                    );
                    self.pacer.pause(timing.sleep).await;
                }
                Err(e) => {
                    // The session outlives this call; don't leave the short
                    // timeout behind. The original error wins over a failed
                    // reset.
                    self.reset_lock_timeout().await.ok();
                    return Err(e);
                }
            }
        }

        debug!(statement = sql, "Final attempt without lock_timeout");
        self.set_lock_timeout(Duration::ZERO).await?;
        match self.executor.execute(sql).await {
            Ok(rows) => {
                self.reset_lock_timeout().await?;
                Ok(rows)
            }
            Err(e) => {
                self.reset_lock_timeout().await.ok();
                Err(e)
            }
        }
    }

    async fn set_lock_timeout(&self, timeout: Duration) -> Result<(), Error> {
        self.executor
            .execute(&format!("SET lock_timeout TO '{}ms'", timeout.as_millis()))
            .await?;
        Ok(())
    }

    async fn reset_lock_timeout(&self) -> Result<(), Error> {
        self.executor.execute("RESET lock_timeout").await?;
        Ok(())
    }
}
