//! # Role Repository
//!
//! Role and permission provisioning, user-role assignment and
//! role-permission grants.
//!
//! Every write here is create-or-fetch on a natural key and runs through
//! the [`ConflictRetryExecutor`] with a fixed delay:
//!
//! | Operation                     | Natural key                 |
//! |-------------------------------|-----------------------------|
//! | `create_or_fetch`             | `roles.name`                |
//! | `create_or_fetch_permission`  | `permissions.code`          |
//! | `assign_to_user`              | `(user_id, role_id)`        |
//! | `grant_permission`            | `(role_id, permission_id)`  |
//!
//! Calling any of them twice with the same key yields the same row and no
//! duplicate.

use futures_util::future::BoxFuture;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::retry::{ConflictRetryExecutor, RetryBackoff, RetryableWrite};
use stockpoint_core::{Permission, Role, ValidationError};

/// Outcome of a link-table write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// The row was inserted by this call.
    Created,
    /// The row was already there.
    Existing,
}

/// Repository for roles and permissions.
#[derive(Debug, Clone)]
pub struct RoleRepository {
    pool: SqlitePool,
    executor: ConflictRetryExecutor,
}

impl RoleRepository {
    /// Creates a new RoleRepository.
    pub fn new(pool: SqlitePool, executor: ConflictRetryExecutor) -> Self {
        RoleRepository { pool, executor }
    }

    /// Returns the role named `name`, creating it if absent.
    ///
    /// ## Returns
    /// * `Ok(Role)` - existing or newly created role
    /// * `Err(DbError::RetriesExhausted)` - contention outlasted the retry budget
    ///
    /// ## Example
    /// ```rust,ignore
    /// let manager = db.roles().create_or_fetch("Manager", Some("Store manager")).await?;
    /// let again = db.roles().create_or_fetch("Manager", None).await?;
    /// assert_eq!(manager.id, again.id);
    /// ```
    pub async fn create_or_fetch(&self, name: &str, description: Option<&str>) -> DbResult<Role> {
        let name = required(name, "role name")?;
        let role = self
            .executor
            .execute(&CreateRole { name, description }, RetryBackoff::Fixed)
            .await?;

        debug!(role_id = role.id, name = %role.name, "Role resolved");
        Ok(role)
    }

    /// Returns the permission with `code`, creating it if absent.
    pub async fn create_or_fetch_permission(
        &self,
        code: &str,
        description: Option<&str>,
        module: Option<&str>,
    ) -> DbResult<Permission> {
        let code = required(code, "permission code")?;
        let permission = self
            .executor
            .execute(
                &CreatePermission {
                    code,
                    description,
                    module,
                },
                RetryBackoff::Fixed,
            )
            .await?;

        debug!(permission_id = permission.id, code = %permission.code, "Permission resolved");
        Ok(permission)
    }

    /// Assigns a role to a user. Idempotent.
    ///
    /// ## Returns
    /// * `Ok(Link::Created)` / `Ok(Link::Existing)`
    /// * `Err(DbError::ForeignKeyViolation)` - unknown user or role (not retried)
    pub async fn assign_to_user(&self, user_id: i64, role_id: i64) -> DbResult<Link> {
        let link = self
            .executor
            .execute(&AssignRole { user_id, role_id }, RetryBackoff::Fixed)
            .await?;

        if link == Link::Created {
            info!(user_id, role_id, "Role assigned to user");
        }
        Ok(link)
    }

    /// Grants a permission to a role. Idempotent.
    pub async fn grant_permission(&self, role_id: i64, permission_id: i64) -> DbResult<Link> {
        let link = self
            .executor
            .execute(
                &GrantPermission {
                    role_id,
                    permission_id,
                },
                RetryBackoff::Fixed,
            )
            .await?;

        if link == Link::Created {
            info!(role_id, permission_id, "Permission granted to role");
        }
        Ok(link)
    }

    /// Gets a role by its unique name.
    pub async fn get_role_by_name(&self, name: &str) -> DbResult<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT id, name, description FROM roles WHERE name = ?1")
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await?;

        Ok(role)
    }

    /// Roles assigned to a user, by name.
    pub async fn roles_for_user(&self, user_id: i64) -> DbResult<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            r#"
            SELECT r.id, r.name, r.description
            FROM roles r
            INNER JOIN users_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = ?1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(roles)
    }

    /// Permissions granted to a role, by code.
    pub async fn permissions_for_role(&self, role_id: i64) -> DbResult<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            r#"
            SELECT p.id, p.code, p.description, p.module
            FROM permissions p
            INNER JOIN roles_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = ?1
            ORDER BY p.code
            "#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(permissions)
    }

    /// Whether any of the user's roles grants `code`.
    pub async fn user_has_permission(&self, user_id: i64, code: &str) -> DbResult<bool> {
        let granted: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM users_roles ur
                INNER JOIN roles_permissions rp ON rp.role_id = ur.role_id
                INNER JOIN permissions p ON p.id = rp.permission_id
                WHERE ur.user_id = ?1 AND p.code = ?2
            )
            "#,
        )
        .bind(user_id)
        .bind(code)
        .fetch_one(&self.pool)
        .await?;

        Ok(granted)
    }
}

fn required<'a>(value: &'a str, field: &str) -> DbResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DbError::Validation(ValidationError::Required {
            field: field.to_string(),
        }));
    }
    Ok(trimmed)
}

// =============================================================================
// Retryable Writes
// =============================================================================

struct CreateRole<'a> {
    name: &'a str,
    description: Option<&'a str>,
}

impl RetryableWrite for CreateRole<'_> {
    type Output = Role;

    fn resource(&self) -> String {
        format!("role '{}'", self.name)
    }

    fn lookup<'c>(&'c self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<Option<Role>>> {
        Box::pin(async move {
            let role = sqlx::query_as::<_, Role>("SELECT id, name, description FROM roles WHERE name = ?1")
                .bind(self.name)
                .fetch_optional(conn)
                .await?;
            Ok(role)
        })
    }

    fn insert<'c>(&'c self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<Role>> {
        Box::pin(async move {
            let id = sqlx::query("INSERT INTO roles (name, description) VALUES (?1, ?2)")
                .bind(self.name)
                .bind(self.description)
                .execute(conn)
                .await?
                .last_insert_rowid();
            info!(role_id = id, name = %self.name, "Role created");
            Ok(Role {
                id,
                name: self.name.to_string(),
                description: self.description.map(str::to_string),
            })
        })
    }
}

struct CreatePermission<'a> {
    code: &'a str,
    description: Option<&'a str>,
    module: Option<&'a str>,
}

impl RetryableWrite for CreatePermission<'_> {
    type Output = Permission;

    fn resource(&self) -> String {
        format!("permission '{}'", self.code)
    }

    fn lookup<'c>(
        &'c self,
        conn: &'c mut SqliteConnection,
    ) -> BoxFuture<'c, DbResult<Option<Permission>>> {
        Box::pin(async move {
            let permission = sqlx::query_as::<_, Permission>(
                "SELECT id, code, description, module FROM permissions WHERE code = ?1",
            )
            .bind(self.code)
            .fetch_optional(conn)
            .await?;
            Ok(permission)
        })
    }

    fn insert<'c>(&'c self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<Permission>> {
        Box::pin(async move {
            let id = sqlx::query("INSERT INTO permissions (code, description, module) VALUES (?1, ?2, ?3)")
                .bind(self.code)
                .bind(self.description)
                .bind(self.module)
                .execute(conn)
                .await?
                .last_insert_rowid();
            info!(permission_id = id, code = %self.code, "Permission created");
            Ok(Permission {
                id,
                code: self.code.to_string(),
                description: self.description.map(str::to_string),
                module: self.module.map(str::to_string),
            })
        })
    }
}

struct AssignRole {
    user_id: i64,
    role_id: i64,
}

impl RetryableWrite for AssignRole {
    type Output = Link;

    fn resource(&self) -> String {
        format!("role {} for user {}", self.role_id, self.user_id)
    }

    fn lookup<'c>(&'c self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<Option<Link>>> {
        Box::pin(async move {
            let found = sqlx::query_scalar::<_, i64>(
                "SELECT 1 FROM users_roles WHERE user_id = ?1 AND role_id = ?2",
            )
            .bind(self.user_id)
            .bind(self.role_id)
            .fetch_optional(conn)
            .await?;
            Ok(found.map(|_| Link::Existing))
        })
    }

    fn insert<'c>(&'c self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<Link>> {
        Box::pin(async move {
            sqlx::query("INSERT INTO users_roles (user_id, role_id) VALUES (?1, ?2)")
                .bind(self.user_id)
                .bind(self.role_id)
                .execute(conn)
                .await?;
            Ok(Link::Created)
        })
    }
}

struct GrantPermission {
    role_id: i64,
    permission_id: i64,
}

impl RetryableWrite for GrantPermission {
    type Output = Link;

    fn resource(&self) -> String {
        format!("permission {} for role {}", self.permission_id, self.role_id)
    }

    fn lookup<'c>(&'c self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<Option<Link>>> {
        Box::pin(async move {
            let found = sqlx::query_scalar::<_, i64>(
                "SELECT 1 FROM roles_permissions WHERE role_id = ?1 AND permission_id = ?2",
            )
            .bind(self.role_id)
            .bind(self.permission_id)
            .fetch_optional(conn)
            .await?;
            Ok(found.map(|_| Link::Existing))
        })
    }

    fn insert<'c>(&'c self, conn: &'c mut SqliteConnection) -> BoxFuture<'c, DbResult<Link>> {
        Box::pin(async move {
            sqlx::query("INSERT INTO roles_permissions (role_id, permission_id) VALUES (?1, ?2)")
                .bind(self.role_id)
                .bind(self.permission_id)
                .execute(conn)
                .await?;
            Ok(Link::Created)
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::retry::RetryPolicy;
    use crate::scope::TransactionScope;
    use std::time::{Duration, Instant};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    async fn user(db: &Database, username: &str) -> i64 {
        sqlx::query("INSERT INTO users (username) VALUES (?1)")
            .bind(username)
            .execute(db.pool())
            .await
            .unwrap()
            .last_insert_rowid()
    }

    async fn count(db: &Database, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_or_fetch_is_idempotent() {
        let db = test_db().await;
        let roles = db.roles();

        let first = roles.create_or_fetch("Manager", Some("Store manager")).await.unwrap();
        let second = roles.create_or_fetch("  Manager ", None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.description.as_deref(), Some("Store manager"));
        assert_eq!(count(&db, "roles").await, 1);
        assert_eq!(roles.get_role_by_name("Manager").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let db = test_db().await;

        let err = db.roles().create_or_fetch("   ", None).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(ValidationError::Required { .. })));
        assert_eq!(count(&db, "roles").await, 0);
    }

    #[tokio::test]
    async fn test_permission_grant_and_assignment() {
        let db = test_db().await;
        let roles = db.roles();
        let alice = user(&db, "alice").await;

        let cashier = roles.create_or_fetch("Cashier", None).await.unwrap();
        let sell = roles
            .create_or_fetch_permission("sales.create", Some("Post sales"), Some("sales"))
            .await
            .unwrap();
        let again = roles.create_or_fetch_permission("sales.create", None, None).await.unwrap();
        assert_eq!(sell, again);

        assert_eq!(roles.grant_permission(cashier.id, sell.id).await.unwrap(), Link::Created);
        assert_eq!(roles.grant_permission(cashier.id, sell.id).await.unwrap(), Link::Existing);
        assert_eq!(roles.assign_to_user(alice, cashier.id).await.unwrap(), Link::Created);
        assert_eq!(roles.assign_to_user(alice, cashier.id).await.unwrap(), Link::Existing);

        assert_eq!(count(&db, "roles_permissions").await, 1);
        assert_eq!(count(&db, "users_roles").await, 1);
        assert_eq!(roles.roles_for_user(alice).await.unwrap(), vec![cashier.clone()]);
        assert_eq!(roles.permissions_for_role(cashier.id).await.unwrap(), vec![sell]);
        assert!(roles.user_has_permission(alice, "sales.create").await.unwrap());
        assert!(!roles.user_has_permission(alice, "config.edit").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_user_is_fatal_not_retried() {
        let db = test_db().await;
        let role = db.roles().create_or_fetch("Manager", None).await.unwrap();

        let err = db.roles().assign_to_user(404, role.id).await.unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
        assert_eq!(count(&db, "users_roles").await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create_or_fetch_converges() {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig::new(dir.path().join("roles.db"))
            .max_connections(4)
            .retry_policy(RetryPolicy::default().fixed_delay(Duration::from_millis(5)));
        let db = Database::new(config).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let roles = db.roles();
            handles.push(tokio::spawn(async move {
                roles.create_or_fetch("Manager", None).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();

        assert_eq!(ids.len(), 1);
        assert_eq!(count(&db, "roles").await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_create_or_fetch_waits_out_unrelated_writer() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("roles.db")).max_connections(4))
            .await
            .unwrap();

        // An unrelated write transaction holds the lock for longer than the
        // whole retry schedule (2 x 50ms).
        let mut holder = TransactionScope::begin(db.pool(), "holder").await.unwrap();
        sqlx::query("INSERT INTO clients (name) VALUES ('Ana')")
            .execute(holder.conn())
            .await
            .unwrap();

        let roles = db.roles();
        let started = Instant::now();
        let pending = tokio::spawn(async move { roles.create_or_fetch("Manager", None).await });

        tokio::time::sleep(Duration::from_millis(400)).await;
        holder.commit().await.unwrap();

        let role = pending.await.unwrap().unwrap();
        assert_eq!(role.name, "Manager");
        assert!(started.elapsed() >= Duration::from_millis(400));
        assert_eq!(count(&db, "roles").await, 1);
        assert_eq!(count(&db, "clients").await, 1);
    }
}
