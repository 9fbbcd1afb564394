//! # Audit Repository
//!
//! Append-only log of user actions.
//!
//! Appends have no natural key, so there is no existence check; a busy
//! store is retried with a doubling delay. Rows are never updated or
//! deleted here.

use futures_util::future::BoxFuture;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::retry::{ConflictRetryExecutor, RetryBackoff, RetryableWrite};
use stockpoint_core::{NewUserAction, UserAction};

/// Repository for the `user_actions` table.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
    executor: ConflictRetryExecutor,
}

impl AuditRepository {
    /// Creates a new AuditRepository.
    pub fn new(pool: SqlitePool, executor: ConflictRetryExecutor) -> Self {
        AuditRepository { pool, executor }
    }

    /// Appends one action.
    ///
    /// ## Example
    /// ```rust,ignore
    /// db.audit()
    ///     .record(&NewUserAction::new(ActionType::Sale, "cashier1").target("sale", sale_id))
    ///     .await?;
    /// ```
    pub async fn record(&self, action: &NewUserAction) -> DbResult<UserAction> {
        let recorded = self
            .executor
            .execute(&AppendAction(action), RetryBackoff::Exponential)
            .await?;

        debug!(
            action_id = recorded.id,
            action_type = %recorded.action_type,
            username = %recorded.username,
            "User action recorded"
        );
        Ok(recorded)
    }

    /// Most recent actions first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<UserAction>> {
        let actions = sqlx::query_as::<_, UserAction>(
            r#"
            SELECT id, action_type, username, created_at, description,
                   entity_type, entity_id, user_id
            FROM user_actions
            ORDER BY created_at DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(actions)
    }

    /// Counts stored actions.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_actions")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

struct AppendAction<'a>(&'a NewUserAction);

impl RetryableWrite for AppendAction<'_> {
    type Output = UserAction;

    fn resource(&self) -> String {
        format!("audit entry '{}' by {}", self.0.action_type, self.0.username)
    }

    fn insert<'c>(&'c self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<UserAction>> {
        let action = self.0;
        Box::pin(async move {
            let id = sqlx::query(
                r#"
                INSERT INTO user_actions (
                    action_type, username, created_at, description,
                    entity_type, entity_id, user_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(action.action_type)
            .bind(&action.username)
            .bind(action.created_at)
            .bind(&action.description)
            .bind(&action.entity_type)
            .bind(action.entity_id)
            .bind(action.user_id)
            .execute(conn)
            .await?
            .last_insert_rowid();

            Ok(UserAction {
                id,
                action_type: action.action_type,
                username: action.username.clone(),
                created_at: action.created_at,
                description: action.description.clone(),
                entity_type: action.entity_type.clone(),
                entity_id: action.entity_id,
                user_id: action.user_id,
            })
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
