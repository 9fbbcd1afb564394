//! # Conflict Retry
//!
//! Bounded retry for idempotent writes racing on a unique key.
//!
//! ## Protocol (one attempt = one transaction scope)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  attempt 1..=max_attempts                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN IMMEDIATE ──► lookup(key) ── found ──► COMMIT ──► existing value │
//! │                        │                                                │
//! │                     missing                                             │
//! │                        ▼                                                │
//! │                     insert ── ok ──► COMMIT ──► new value               │
//! │                        │                                                │
//! │                      error ──► ROLLBACK                                 │
//! │                        │                                                │
//! │                        ├── not transient ─────────► propagate           │
//! │                        ├── transient, attempts left ► sleep, retry      │
//! │                        └── transient, exhausted ──► RetriesExhausted    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A retry that follows a lost race finds the winner's row in `lookup`, so
//! concurrent create-or-fetch calls converge on one identity.
//!
//! Attempts take the write lock before the lookup. Another writer holding
//! the lock then costs a wait of up to `busy_timeout`, not an attempt.
//!
//! ## Delays
//! - [`RetryBackoff::Fixed`]: the same delay between every attempt
//!   (create-or-fetch resources)
//! - [`RetryBackoff::Exponential`]: doubling delay, no jitter (audit appends)

use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use backoff::ExponentialBackoff;
use futures_util::future::BoxFuture;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::scope::TransactionScope;

/// Environment variable overriding the attempt bound.
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "STOCKPOINT_RETRY_MAX_ATTEMPTS";
/// Environment variable overriding the fixed delay (milliseconds).
pub const ENV_RETRY_DELAY_MS: &str = "STOCKPOINT_RETRY_DELAY_MS";
/// Environment variable overriding the initial exponential delay (milliseconds).
pub const ENV_RETRY_BACKOFF_MS: &str = "STOCKPOINT_RETRY_BACKOFF_MS";

// =============================================================================
// Retry Policy
// =============================================================================

/// Attempt bound and delay parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Default: 3
    pub max_attempts: u32,

    /// Delay between attempts for [`RetryBackoff::Fixed`]. Default: 50ms
    pub fixed_delay: Duration,

    /// First delay for [`RetryBackoff::Exponential`]. Default: 25ms
    pub initial_backoff: Duration,

    /// Cap for [`RetryBackoff::Exponential`]. Default: 1s
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            fixed_delay: Duration::from_millis(50),
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Default policy with `STOCKPOINT_RETRY_*` overrides applied.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut policy = RetryPolicy::default();

        if let Some(attempts) = env_u64(ENV_RETRY_MAX_ATTEMPTS) {
            policy.max_attempts = u32::try_from(attempts).unwrap_or(u32::MAX).max(1);
        }
        if let Some(ms) = env_u64(ENV_RETRY_DELAY_MS) {
            policy.fixed_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64(ENV_RETRY_BACKOFF_MS) {
            policy.initial_backoff = Duration::from_millis(ms);
        }

        policy
    }

    /// Sets the attempt bound (at least 1).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the fixed delay.
    pub fn fixed_delay(mut self, delay: Duration) -> Self {
        self.fixed_delay = delay;
        self
    }

    /// Sets the initial exponential delay.
    pub fn initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Sets the exponential delay cap.
    pub fn max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    /// A fresh delay schedule of the given kind.
    fn schedule(&self, kind: RetryBackoff) -> Box<dyn Backoff + Send> {
        match kind {
            RetryBackoff::Fixed => Box::new(Constant::new(self.fixed_delay)),
            RetryBackoff::Exponential => Box::new(ExponentialBackoff {
                current_interval: self.initial_backoff,
                initial_interval: self.initial_backoff,
                randomization_factor: 0.0,
                multiplier: 2.0,
                max_interval: self.max_backoff,
                max_elapsed_time: None, // bounded by attempts, not time
                ..Default::default()
            }),
        }
    }

    /// The delays slept between attempts when every attempt conflicts.
    ///
    /// ## Example
    /// ```rust
    /// use std::time::Duration;
    /// use stockpoint_db::retry::{RetryBackoff, RetryPolicy};
    ///
    /// let delays = RetryPolicy::default().delays(RetryBackoff::Exponential);
    /// assert_eq!(delays, vec![Duration::from_millis(25), Duration::from_millis(50)]);
    /// ```
    pub fn delays(&self, kind: RetryBackoff) -> Vec<Duration> {
        let mut schedule = self.schedule(kind);
        (1..self.max_attempts)
            .map(|_| schedule.next_backoff().unwrap_or(self.fixed_delay))
            .collect()
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(value = %raw, "Ignoring invalid {}", name);
            None
        }
    }
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBackoff {
    /// Same delay every time.
    Fixed,
    /// Delay doubles after every attempt, capped at `max_backoff`.
    Exponential,
}

// =============================================================================
// Retryable Write
// =============================================================================

/// One idempotent write the executor can re-attempt.
///
/// Both callbacks run on the attempt's transaction connection. A write
/// without a natural key (audit append) keeps the default `lookup`.
pub trait RetryableWrite: Sync {
    /// Value returned by `lookup` or `insert`.
    type Output: Send;

    /// Human-readable resource name used in logs and in
    /// [`DbError::RetriesExhausted`], e.g. `role 'Manager'`.
    fn resource(&self) -> String;

    /// Natural-key existence check. `Some` short-circuits the insert.
    fn lookup<'c>(
        &'c self,
        _conn: &'c mut SqliteConnection,
    ) -> BoxFuture<'c, DbResult<Option<Self::Output>>> {
        Box::pin(async { Ok(None) })
    }

    /// The mutation.
    fn insert<'c>(&'c self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<Self::Output>>;
}

// =============================================================================
// Executor
// =============================================================================

/// Runs [`RetryableWrite`]s with conflict classification and backoff.
#[derive(Debug, Clone)]
pub struct ConflictRetryExecutor {
    pool: SqlitePool,
    policy: RetryPolicy,
}

impl ConflictRetryExecutor {
    pub fn new(pool: SqlitePool, policy: RetryPolicy) -> Self {
        ConflictRetryExecutor { pool, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `write` until it succeeds, fails fatally, or exhausts the
    /// attempt bound.
    ///
    /// ## Returns
    /// * `Ok(output)` - value from `lookup` or `insert`, committed
    /// * `Err(DbError::RetriesExhausted)` - every attempt hit a transient conflict
    /// * `Err(other)` - first non-transient failure, unchanged
    pub async fn execute<W: RetryableWrite>(
        &self,
        write: &W,
        kind: RetryBackoff,
    ) -> DbResult<W::Output> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut schedule = self.policy.schedule(kind);
        let mut attempt = 1;

        loop {
            match self.attempt_once(write).await {
                Ok(output) => {
                    if attempt > 1 {
                        info!(resource = %write.resource(), attempt, "Write succeeded after retry");
                    }
                    return Ok(output);
                }
                Err(err) if err.is_transient_conflict() => {
                    if attempt >= max_attempts {
                        warn!(
                            resource = %write.resource(),
                            attempts = attempt,
                            error = %err,
                            "Giving up on conflicting write"
                        );
                        return Err(DbError::RetriesExhausted {
                            resource: write.resource(),
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }

                    let delay = schedule.next_backoff().unwrap_or(self.policy.fixed_delay);
                    warn!(
                        resource = %write.resource(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Write conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt_once<W: RetryableWrite>(&self, write: &W) -> DbResult<W::Output> {
        let mut scope = TransactionScope::begin_immediate(&self.pool, "conflict_retry").await?;

        match run_write(write, scope.conn()).await {
            Ok(output) => {
                scope.commit().await?;
                Ok(output)
            }
            Err(err) => {
                if let Err(rollback_err) = scope.rollback().await {
                    // The connection still drops back to the pool; the
                    // original failure is what the caller needs.
                    warn!(error = %rollback_err, "Rollback after failed write also failed");
                }
                Err(err)
            }
        }
    }
}

async fn run_write<W: RetryableWrite>(
    write: &W,
    conn: &mut SqliteConnection,
) -> DbResult<W::Output> {
    if let Some(existing) = write.lookup(&mut *conn).await? {
        debug!(resource = %write.resource(), "Found existing, skipping insert");
        return Ok(existing);
    }
    write.insert(conn).await
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
            .fixed_delay(Duration::from_millis(1))
            .initial_backoff(Duration::from_millis(1))
    }

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory().retry_policy(fast_policy()))
            .await
            .unwrap()
    }

    async fn count_clients(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM clients")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    /// Inserts a client row, then fails with `fail_with` for the first
    /// `failures` attempts.
    struct ScriptedWrite {
        failures: u32,
        fail_with: fn() -> DbError,
        inserts: AtomicU32,
        existing: Option<i64>,
    }

    impl ScriptedWrite {
        fn new(failures: u32, fail_with: fn() -> DbError) -> Self {
            ScriptedWrite {
                failures,
                fail_with,
                inserts: AtomicU32::new(0),
                existing: None,
            }
        }

        fn inserts(&self) -> u32 {
            self.inserts.load(Ordering::SeqCst)
        }
    }

    fn unique() -> DbError {
        DbError::UniqueViolation {
            message: "UNIQUE constraint failed: roles.name".into(),
        }
    }

    fn fatal() -> DbError {
        DbError::ForeignKeyViolation {
            message: "FOREIGN KEY constraint failed".into(),
        }
    }

    impl RetryableWrite for ScriptedWrite {
        type Output = i64;

        fn resource(&self) -> String {
            "role 'Manager'".to_string()
        }

        fn lookup<'c>(
            &'c self,
            _conn: &'c mut SqliteConnection,
        ) -> BoxFuture<'c, DbResult<Option<i64>>> {
            Box::pin(async move { Ok(self.existing) })
        }

        fn insert<'c>(&'c self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<i64>> {
            Box::pin(async move {
                let n = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
                let id = sqlx::query("INSERT INTO clients (name) VALUES ('partial')")
                    .execute(&mut *conn)
                    .await?
                    .last_insert_rowid();
                if n <= self.failures {
                    return Err((self.fail_with)());
                }
                Ok(id)
            })
        }
    }

    #[tokio::test]
    async fn test_persistent_conflict_exhausts_after_three_attempts() {
        let db = test_db().await;
        let write = ScriptedWrite::new(u32::MAX, unique);

        let err = db
            .retry_executor()
            .execute(&write, RetryBackoff::Fixed)
            .await
            .unwrap_err();

        match &err {
            DbError::RetriesExhausted {
                resource,
                attempts,
                last,
            } => {
                assert_eq!(resource, "role 'Manager'");
                assert_eq!(*attempts, 3);
                assert!(last.is_unique_violation());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("Manager"));
        assert!(err.to_string().contains('3'));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("roles.name"));
        assert_eq!(write.inserts(), 3);
        // Every attempt rolled back its partial insert.
        assert_eq!(count_clients(&db).await, 0);
    }

    #[tokio::test]
    async fn test_conflict_then_success() {
        let db = test_db().await;
        let write = ScriptedWrite::new(2, unique);

        let id = db
            .retry_executor()
            .execute(&write, RetryBackoff::Exponential)
            .await
            .unwrap();

        assert!(id > 0);
        assert_eq!(write.inserts(), 3);
        assert_eq!(count_clients(&db).await, 1);
    }

    #[tokio::test]
    async fn test_busy_is_retried() {
        let db = test_db().await;
        let write = ScriptedWrite::new(1, || DbError::Busy("database is locked".into()));

        db.retry_executor()
            .execute(&write, RetryBackoff::Fixed)
            .await
            .unwrap();
        assert_eq!(write.inserts(), 2);
    }

    #[tokio::test]
    async fn test_non_conflict_propagates_without_retry() {
        let db = test_db().await;
        let write = ScriptedWrite::new(u32::MAX, fatal);

        let err = db
            .retry_executor()
            .execute(&write, RetryBackoff::Fixed)
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
        assert_eq!(write.inserts(), 1);
        assert_eq!(count_clients(&db).await, 0);
    }

    #[tokio::test]
    async fn test_lookup_hit_skips_insert() {
        let db = test_db().await;
        let mut write = ScriptedWrite::new(0, unique);
        write.existing = Some(41);

        let id = db
            .retry_executor()
            .execute(&write, RetryBackoff::Fixed)
            .await
            .unwrap();

        assert_eq!(id, 41);
        assert_eq!(write.inserts(), 0);
    }

    #[test]
    fn test_delay_schedules() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delays(RetryBackoff::Fixed),
            vec![Duration::from_millis(50), Duration::from_millis(50)]
        );
        assert_eq!(
            policy.delays(RetryBackoff::Exponential),
            vec![Duration::from_millis(25), Duration::from_millis(50)]
        );

        let capped = RetryPolicy::default()
            .max_attempts(6)
            .max_backoff(Duration::from_millis(100));
        assert_eq!(
            capped.delays(RetryBackoff::Exponential),
            vec![
                Duration::from_millis(25),
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(100),
                Duration::from_millis(100),
            ]
        );
    }

    #[test]
    fn test_max_attempts_floor() {
        let policy = RetryPolicy::default().max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
        assert!(policy.delays(RetryBackoff::Fixed).is_empty());
    }
}
