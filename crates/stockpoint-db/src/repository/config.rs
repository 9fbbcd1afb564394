//! # Configuration Repository
//!
//! Validated all-or-nothing configuration batches and the in-memory
//! [`ConfigCache`] that mirrors the `configurations` table.
//!
//! ## Batch Commit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  commit_batch([(key, value), ...])                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate_config_batch ── any entry bad ──► Err, zero writes           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN                                                                  │
//! │    UPDATE configurations SET value = ? WHERE key = ?   (per pair)      │
//! │    0 rows ──► NotFound, ROLLBACK                                       │
//! │  COMMIT                                                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  reload cache (before returning)                                       │
//! │    failed ──► cache cleared, Err(CacheReloadFailed)                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A reload builds the complete map first and swaps it in under the write
//! lock, so a reader sees either the previous snapshot or the new one.
//! Reloads are serialized from fetch to swap: the snapshot swapped in last
//! was read after every commit whose reload already finished.
//!
//! A failed reload empties the cache instead of leaving an old snapshot,
//! and the next [`ConfigRepository::get`] loads it again.

use std::collections::HashMap;

use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::scope::TransactionScope;
use stockpoint_core::validation::{validate_config_batch, validate_config_key, validate_config_value};
use stockpoint_core::{ConfigUpdate, ConfigurationParam};

// =============================================================================
// Cache
// =============================================================================

/// Key to value snapshot of the `configurations` table.
///
/// Shared by every [`ConfigRepository`] handed out by one
/// [`Database`](crate::pool::Database).
#[derive(Debug, Default)]
pub struct ConfigCache {
    entries: RwLock<HashMap<String, String>>,
    /// Held from the store read to the swap.
    reload_lock: Mutex<()>,
}

impl ConfigCache {
    /// Creates an empty cache. The first read loads it.
    pub fn new() -> Self {
        ConfigCache::default()
    }

    /// Cached value for `key`, without touching the store.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    /// Copy of the whole snapshot.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.entries.read().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Swaps in a fully built snapshot.
    async fn replace(&self, entries: HashMap<String, String>) {
        *self.entries.write().await = entries;
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for configuration parameters.
#[derive(Debug, Clone)]
pub struct ConfigRepository {
    pool: SqlitePool,
    cache: Arc<ConfigCache>,
}

impl ConfigRepository {
    /// Creates a new ConfigRepository over a shared cache.
    pub fn new(pool: SqlitePool, cache: Arc<ConfigCache>) -> Self {
        ConfigRepository { pool, cache }
    }

    /// The cache this repository keeps in sync.
    pub fn cache(&self) -> &ConfigCache {
        &self.cache
    }

    /// Applies every update in one transaction, then reloads the cache.
    ///
    /// ## Returns
    /// * `Ok(n)` - all `n` updates committed and visible in the cache
    /// * `Err(DbError::Validation)` - some entry is malformed; nothing written
    /// * `Err(DbError::NotFound)` - some key is not stored; rolled back
    /// * `Err(DbError::CacheReloadFailed)` - committed, but the cache was
    ///   cleared instead of refreshed
    ///
    /// ## Example
    /// ```rust,ignore
    /// db.config()
    ///     .commit_batch(&[
    ///         ConfigUpdate::new("store.name", "Corner Shop"),
    ///         ConfigUpdate::new("tax.rate", "0.16"),
    ///     ])
    ///     .await?;
    /// ```
    pub async fn commit_batch(&self, updates: &[ConfigUpdate]) -> DbResult<usize> {
        validate_config_batch(updates)?;

        let mut scope = TransactionScope::begin(&self.pool, "config_batch").await?;

        match apply_updates(scope.conn(), updates).await {
            Ok(()) => scope.commit().await?,
            Err(err) => {
                warn!(error = %err, entries = updates.len(), "Configuration batch failed, rolling back");
                if let Err(rollback_err) = scope.rollback().await {
                    warn!(error = %rollback_err, "Rollback of configuration batch also failed");
                }
                return Err(err);
            }
        }

        info!(entries = updates.len(), "Configuration batch committed");

        self.resync_after_commit(updates.len()).await?;
        Ok(updates.len())
    }

    async fn resync_after_commit(&self, committed: usize) -> DbResult<usize> {
        self.reload().await.map_err(|err| {
            warn!(error = %err, committed, "Cache reload after commit failed, cache cleared");
            DbError::CacheReloadFailed {
                committed,
                source: Box::new(err),
            }
        })
    }

    /// Value for `key` from the cache, loading the cache first if it is empty.
    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        if self.cache.is_empty().await {
            debug!("Configuration cache empty, loading");
            self.reload().await?;
        }
        Ok(self.cache.get(key).await)
    }

    /// Every stored parameter, read from the store, by key.
    pub async fn get_all(&self) -> DbResult<Vec<ConfigurationParam>> {
        let params = sqlx::query_as::<_, ConfigurationParam>(
            "SELECT id, key, value, description FROM configurations ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(params)
    }

    /// Inserts a new parameter and refreshes the cache.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - the key already exists
    pub async fn insert_param(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> DbResult<ConfigurationParam> {
        validate_config_key(key)?;
        validate_config_value(Some(value))?;

        let id = sqlx::query("INSERT INTO configurations (key, value, description) VALUES (?1, ?2, ?3)")
            .bind(key)
            .bind(value)
            .bind(description)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        debug!(key, "Configuration parameter inserted");
        self.reload().await?;

        Ok(ConfigurationParam {
            id,
            key: key.to_string(),
            value: value.to_string(),
            description: description.map(str::to_string),
        })
    }

    /// Rebuilds the cache from the store. Returns the number of entries.
    ///
    /// On failure the cache is left empty.
    pub async fn reload(&self) -> DbResult<usize> {
        let _reloading = self.cache.reload_lock.lock().await;

        let rows: Vec<(String, String)> =
            match sqlx::query_as("SELECT key, value FROM configurations")
                .fetch_all(&self.pool)
                .await
            {
                Ok(rows) => rows,
                Err(err) => {
                    self.cache.clear().await;
                    return Err(err.into());
                }
            };

        let entries: HashMap<String, String> = rows.into_iter().collect();
        let count = entries.len();
        self.cache.replace(entries).await;

        debug!(entries = count, "Configuration cache reloaded");
        Ok(count)
    }
}

async fn apply_updates(conn: &mut SqliteConnection, updates: &[ConfigUpdate]) -> DbResult<()> {
    for update in updates {
        // Validated above: every value is present.
        let value = update.value.as_deref().unwrap_or_default();

        let updated = sqlx::query("UPDATE configurations SET value = ?1 WHERE key = ?2")
            .bind(value)
            .bind(&update.key)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(DbError::not_found("Configuration", &update.key));
        }
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use stockpoint_core::ValidationError;

    async fn seeded() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        for i in 0..10 {
            db.config()
                .insert_param(&format!("param.k{i}"), "old", None)
                .await
                .unwrap();
        }
        db
    }

    async fn stored(db: &Database, key: &str) -> String {
        sqlx::query_scalar("SELECT value FROM configurations WHERE key = ?1")
            .bind(key)
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_batch_updates_store_and_cache() {
        let db = seeded().await;
        let config = db.config();

        let n = config
            .commit_batch(&[ConfigUpdate::new("param.k0", "new0"), ConfigUpdate::new("param.k1", "new1")])
            .await
            .unwrap();

        assert_eq!(n, 2);
        assert_eq!(stored(&db, "param.k0").await, "new0");
        // Visible through the cache straight after commit.
        assert_eq!(config.cache().get("param.k1").await.as_deref(), Some("new1"));
        assert_eq!(config.cache().get("param.k2").await.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_one_invalid_entry_rejects_whole_batch() {
        let db = seeded().await;
        let config = db.config();
        let before = config.cache().snapshot().await;

        let mut batch: Vec<ConfigUpdate> =
            (0..9).map(|i| ConfigUpdate::new(format!("param.k{i}"), "new")).collect();
        batch.push(ConfigUpdate::new("Param K9", "new"));

        let err = config.commit_batch(&batch).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Validation(ValidationError::BatchEntry { index: 9, .. })
        ));

        for i in 0..10 {
            assert_eq!(stored(&db, &format!("param.k{i}")).await, "old");
        }
        assert_eq!(config.cache().snapshot().await, before);
    }

    #[tokio::test]
    async fn test_missing_value_rejected() {
        let db = seeded().await;

        let batch = vec![
            ConfigUpdate::new("param.k0", "new"),
            ConfigUpdate {
                key: "param.k1".into(),
                value: None,
            },
        ];
        let err = db.config().commit_batch(&batch).await.unwrap_err();

        assert!(matches!(
            err,
            DbError::Validation(ValidationError::BatchEntry { index: 1, .. })
        ));
        assert_eq!(stored(&db, "param.k0").await, "old");
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let db = seeded().await;

        let err = db.config().commit_batch(&[]).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(ValidationError::Empty { .. })));
    }

    #[tokio::test]
    async fn test_unknown_key_rolls_back_earlier_updates() {
        let db = seeded().await;
        let config = db.config();

        let err = config
            .commit_batch(&[
                ConfigUpdate::new("param.k0", "new"),
                ConfigUpdate::new("param.missing", "new"),
                ConfigUpdate::new("param.k1", "new"),
            ])
            .await
            .unwrap_err();

        match err {
            DbError::NotFound { entity, id } => {
                assert_eq!(entity, "Configuration");
                assert_eq!(id, "param.missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(stored(&db, "param.k0").await, "old");
        assert_eq!(config.cache().get("param.k0").await.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_get_loads_empty_cache_lazily() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query("INSERT INTO configurations (key, value) VALUES ('store.name', 'Corner Shop')")
            .execute(db.pool())
            .await
            .unwrap();

        let config = db.config();
        assert!(config.cache().is_empty().await);

        assert_eq!(config.get("store.name").await.unwrap().as_deref(), Some("Corner Shop"));
        assert_eq!(config.cache().len().await, 1);
        assert_eq!(config.get("store.phone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cache_shared_across_handles() {
        let db = seeded().await;

        db.config()
            .commit_batch(&[ConfigUpdate::new("param.k3", "shared")])
            .await
            .unwrap();

        assert_eq!(db.config().cache().get("param.k3").await.as_deref(), Some("shared"));
        assert_eq!(db.config().get_all().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_insert_param_validates_key_and_rejects_duplicates() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let config = db.config();

        let err = config.insert_param("9lives", "x", None).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));

        config.insert_param("store.name", "A", Some("Display name")).await.unwrap();
        let err = config.insert_param("store.name", "B", None).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_failed_reload_after_commit_clears_cache() {
        let db = seeded().await;
        let config = db.config();
        assert_eq!(config.cache().len().await, 10);

        db.pool().close().await;
        let err = config.resync_after_commit(2).await.unwrap_err();

        match &err {
            DbError::CacheReloadFailed { committed, source } => {
                assert_eq!(*committed, 2);
                assert!(matches!(**source, DbError::ConnectionFailed(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // No stale snapshot survives; the next get goes to the store.
        assert!(config.cache().is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_batches_leave_cache_matching_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("config.db")).max_connections(4))
            .await
            .unwrap();
        for i in 0..6 {
            db.config()
                .insert_param(&format!("param.k{i}"), "old", None)
                .await
                .unwrap();
        }

        for round in 0..20 {
            let mut handles = Vec::new();
            for i in 0..6 {
                let config = db.config();
                handles.push(tokio::spawn(async move {
                    config
                        .commit_batch(&[ConfigUpdate::new(format!("param.k{i}"), format!("r{round}"))])
                        .await
                }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let store: HashMap<String, String> = db
                .config()
                .get_all()
                .await
                .unwrap()
                .into_iter()
                .map(|p| (p.key, p.value))
                .collect();
            assert_eq!(db.config().cache().snapshot().await, store, "round {round}");
        }
    }
}
