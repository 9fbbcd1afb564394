//! # stockpoint-db: Transactional Core for Stockpoint
//!
//! Every multi-statement mutation of the Stockpoint store: sale posting,
//! conflict-safe role/permission provisioning and audit appends, and
//! configuration batches with their in-memory cache. SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockpoint Data Flow                             │
//! │                                                                         │
//! │  UI controller (post sale, save settings, assign role)                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockpoint-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   SaleRepository ──────┐        RoleRepository ─┐              │   │
//! │  │   ConfigRepository ────┤        AuditRepository ┤              │   │
//! │  │                        │                        ▼              │   │
//! │  │                        │          ConflictRetryExecutor        │   │
//! │  │                        ▼                        │              │   │
//! │  │                  TransactionScope ◄─────────────┘              │   │
//! │  │                        │                                       │   │
//! │  │                  Database (pool.rs) + migrations               │   │
//! │  └────────────────────────┼───────────────────────────────────────┘   │
//! │                           ▼                                            │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                SQLite (WAL, foreign keys on)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - `DbConfig` and the `Database` handle
//! - [`migrations`] - Embedded schema migrations
//! - [`error`] - `DbError` and conflict classification
//! - [`scope`] - Transaction scope
//! - [`retry`] - Bounded conflict retry
//! - [`repository`] - Sale, product, client, role, audit, config
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockpoint_db::{Database, DbConfig};
//! use stockpoint_core::{NewSale, NewSaleLine};
//!
//! let db = Database::new(DbConfig::from_env("stockpoint.db")).await?;
//!
//! let sale = NewSale::from_lines(None, false, vec![NewSaleLine::new(1, 3, 500)])?;
//! let posted = db.sales().post_sale(&sale).await?;
//!
//! let manager = db.roles().create_or_fetch("Manager", None).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod retry;
pub mod scope;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use retry::{ConflictRetryExecutor, RetryBackoff, RetryPolicy, RetryableWrite};
pub use scope::TransactionScope;

// Repository re-exports for convenience
pub use repository::audit::AuditRepository;
pub use repository::client::ClientRepository;
pub use repository::config::{ConfigCache, ConfigRepository};
pub use repository::product::ProductRepository;
pub use repository::role::{Link, RoleRepository};
pub use repository::sale::SaleRepository;
