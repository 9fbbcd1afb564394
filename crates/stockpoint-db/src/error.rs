//! # Database Error Types
//!
//! Error types for the transactional core.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← classified by error kind / result code        │
//! │       │                                                                 │
//! │       ├── transient conflict? ──► ConflictRetryExecutor retries        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Caller (UI controller) ← owns user-facing messaging                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Classification
//! Constraint failures are recognised through
//! [`sqlx::error::DatabaseError::kind`] and busy/locked contention through
//! the SQLite primary result code. Message text is carried for humans only.

use std::borrow::Cow;

use sqlx::error::ErrorKind;
use stockpoint_core::ValidationError;
use thiserror::Error;

/// SQLITE_BUSY primary result code.
const SQLITE_BUSY: i32 = 5;
/// SQLITE_LOCKED primary result code.
const SQLITE_LOCKED: i32 = 6;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found, or a relative update matched no row.
    ///
    /// ## When This Occurs
    /// - Sale line references an unknown product
    /// - Credit sale references an unknown client
    /// - Configuration batch names a key that is not stored
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique or primary-key constraint violation.
    ///
    /// ## When This Occurs
    /// - Two writers race to create the same role name
    /// - Duplicate (user, role) assignment
    #[error("Unique constraint violated: {message}")]
    UniqueViolation { message: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// SQLite reported the database busy or locked by another writer.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Commit or rollback failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A conflict-retried write kept conflicting until the attempt bound.
    ///
    /// `last` is the conflict seen on the final attempt.
    #[error("{resource}: write conflict persisted after {attempts} attempts")]
    RetriesExhausted {
        resource: String,
        attempts: u32,
        #[source]
        last: Box<DbError>,
    },

    /// A configuration batch committed but the cache could not be rebuilt.
    ///
    /// The store holds the new values. The cache was cleared, so the next
    /// read reloads it.
    #[error("{committed} configuration updates committed, cache reload failed")]
    CacheReloadFailed {
        committed: usize,
        #[source]
        source: Box<DbError>,
    },

    /// Input rejected before any transaction was opened.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Returns true for unique / primary-key violations.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation { .. })
    }

    /// Returns true if a fresh attempt of the same write may succeed.
    ///
    /// ## Transient
    /// - Unique violations (another writer won the race)
    /// - Busy / locked (another writer holds the write lock)
    ///
    /// Everything else is fatal.
    pub fn is_transient_conflict(&self) -> bool {
        matches!(self, DbError::UniqueViolation { .. } | DbError::Busy(_))
    }
}

/// Returns true when an extended SQLite result code is BUSY or LOCKED.
fn is_busy_code(code: Option<Cow<'_, str>>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound         → DbError::NotFound
/// Database, kind UniqueViolation   → DbError::UniqueViolation
/// Database, kind ForeignKey...     → DbError::ForeignKeyViolation
/// Database, code BUSY / LOCKED     → DbError::Busy
/// Database, other                  → DbError::QueryFailed
/// sqlx::Error::PoolTimedOut        → DbError::PoolExhausted
/// sqlx::Error::PoolClosed / Io     → DbError::ConnectionFailed
/// Other                            → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.kind() {
                    ErrorKind::UniqueViolation => DbError::UniqueViolation { message },
                    ErrorKind::ForeignKeyViolation => DbError::ForeignKeyViolation { message },
                    _ if is_busy_code(db_err.code()) => DbError::Busy(message),
                    _ => DbError::QueryFailed(message),
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            sqlx::Error::Io(e) => DbError::ConnectionFailed(e.to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DbError::UniqueViolation {
            message: "roles.name".into()
        }
        .is_transient_conflict());
        assert!(DbError::Busy("database is locked".into()).is_transient_conflict());

        assert!(!DbError::ForeignKeyViolation {
            message: "sale_lines".into()
        }
        .is_transient_conflict());
        assert!(!DbError::not_found("Product", 7).is_transient_conflict());
        assert!(!DbError::PoolExhausted.is_transient_conflict());
        assert!(!DbError::ConnectionFailed("gone".into()).is_transient_conflict());
    }

    #[test]
    fn test_busy_codes() {
        assert!(is_busy_code(Some(Cow::Borrowed("5"))));
        assert!(is_busy_code(Some(Cow::Borrowed("517")))); // BUSY_SNAPSHOT
        assert!(is_busy_code(Some(Cow::Borrowed("6"))));
        assert!(!is_busy_code(Some(Cow::Borrowed("2067")))); // CONSTRAINT_UNIQUE
        assert!(!is_busy_code(Some(Cow::Borrowed("not-a-code"))));
        assert!(!is_busy_code(None));
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = DbError::RetriesExhausted {
            resource: "role 'Manager'".into(),
            attempts: 3,
            last: Box::new(DbError::Busy("database is locked".into())),
        };
        assert_eq!(
            err.to_string(),
            "role 'Manager': write conflict persisted after 3 attempts"
        );
        let last = std::error::Error::source(&err).unwrap();
        assert_eq!(last.to_string(), "Database busy: database is locked");
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::NotFound { .. }));

        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::PoolExhausted));
    }
}
