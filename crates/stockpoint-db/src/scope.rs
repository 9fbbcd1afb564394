//! # Transaction Scope
//!
//! A pooled connection with an open transaction, released on every exit
//! path.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  TransactionScope::begin(pool, "post_sale")                             │
//! │       │   acquire connection, BEGIN (auto-commit off)                   │
//! │       │   begin_immediate: BEGIN IMMEDIATE (write lock taken up front)  │
//! │       ▼                                                                 │
//! │  scope.conn() ──► statements ──► ...                                    │
//! │       │                                                                 │
//! │       ├── commit(self)   → COMMIT,   connection back to pool            │
//! │       ├── rollback(self) → ROLLBACK, connection back to pool            │
//! │       └── dropped        → ROLLBACK, connection back to pool            │
//! │           (early `?` return, panic, cancelled future)                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `commit` and `rollback` consume the scope, so a finished scope cannot
//! run further statements. No retry or conflict logic lives here.

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// An open transaction on a pooled connection.
#[derive(Debug)]
pub struct TransactionScope {
    tx: Transaction<'static, Sqlite>,
    label: &'static str,
}

impl TransactionScope {
    /// Acquires a connection from `pool` and begins a transaction.
    ///
    /// `label` names the operation in logs.
    pub async fn begin(pool: &SqlitePool, label: &'static str) -> DbResult<Self> {
        let tx = pool.begin().await?;
        debug!(scope = label, "Transaction started");
        Ok(TransactionScope { tx, label })
    }

    /// Like [`TransactionScope::begin`], but takes the write lock at once.
    ///
    /// A deferred transaction that reads before it writes cannot wait for
    /// another writer: SQLite fails the lock upgrade with `SQLITE_BUSY`
    /// without invoking the busy handler. `BEGIN IMMEDIATE` queues on
    /// `busy_timeout` instead.
    pub async fn begin_immediate(pool: &SqlitePool, label: &'static str) -> DbResult<Self> {
        let tx = pool.begin_with("BEGIN IMMEDIATE").await?;
        debug!(scope = label, "Immediate transaction started");
        Ok(TransactionScope { tx, label })
    }

    /// The connection statements in this scope run on.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    /// Label given at [`TransactionScope::begin`].
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Commits every statement issued since `begin`.
    pub async fn commit(self) -> DbResult<()> {
        let label = self.label;
        self.tx.commit().await.map_err(|e| match DbError::from(e) {
            // A commit that loses to another writer stays classifiable.
            busy @ DbError::Busy(_) => busy,
            other => DbError::TransactionFailed(other.to_string()),
        })?;
        debug!(scope = label, "Transaction committed");
        Ok(())
    }

    /// Discards every statement issued since `begin`.
    pub async fn rollback(self) -> DbResult<()> {
        let label = self.label;
        self.tx
            .rollback()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        debug!(scope = label, "Transaction rolled back");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn count_clients(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM clients")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn insert_client(scope: &mut TransactionScope, name: &str) {
        sqlx::query("INSERT INTO clients (name) VALUES (?1)")
            .bind(name)
            .execute(scope.conn())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_commit_persists() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut scope = TransactionScope::begin(db.pool(), "test").await.unwrap();
        insert_client(&mut scope, "Ana").await;
        scope.commit().await.unwrap();

        assert_eq!(count_clients(db.pool()).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut scope = TransactionScope::begin(db.pool(), "test").await.unwrap();
        insert_client(&mut scope, "Ana").await;
        insert_client(&mut scope, "Luis").await;
        scope.rollback().await.unwrap();

        assert_eq!(count_clients(db.pool()).await, 0);
    }

    #[tokio::test]
    async fn test_drop_rolls_back_and_releases_connection() {
        // Single-connection pool: the follow-up query only runs if the
        // dropped scope returned its connection.
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        {
            let mut scope = TransactionScope::begin(db.pool(), "test").await.unwrap();
            insert_client(&mut scope, "Ana").await;
        }

        assert_eq!(count_clients(db.pool()).await, 0);
    }

    #[tokio::test]
    async fn test_immediate_scope_waits_for_other_writer() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("scope.db")).max_connections(2))
            .await
            .unwrap();

        let mut holder = TransactionScope::begin(db.pool(), "holder").await.unwrap();
        insert_client(&mut holder, "Ana").await;

        let pool = db.pool().clone();
        let waiter = tokio::spawn(async move {
            let mut scope = TransactionScope::begin_immediate(&pool, "waiter").await?;
            let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clients")
                .fetch_one(scope.conn())
                .await?;
            scope.commit().await?;
            Ok::<i64, DbError>(existing)
        });

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        holder.commit().await.unwrap();

        // The waiter queued behind the holder and saw its committed row.
        assert_eq!(waiter.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_statement_then_rollback() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut scope = TransactionScope::begin(db.pool(), "test").await.unwrap();
        insert_client(&mut scope, "Ana").await;
        let err = sqlx::query("INSERT INTO sales (created_at, client_id, total_cents) VALUES ('x', 999, 1)")
            .execute(scope.conn())
            .await
            .map_err(DbError::from)
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
        scope.rollback().await.unwrap();

        assert_eq!(count_clients(db.pool()).await, 0);
    }
}
