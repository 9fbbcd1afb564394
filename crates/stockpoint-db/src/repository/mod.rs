//! # Repository Module
//!
//! One repository per aggregate, each a cheap clone around the pool.
//!
//! ## Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  single attempt, fail fast          retried on conflict                 │
//! │  ─────────────────────────          ───────────────────                 │
//! │  SaleRepository::post_sale          RoleRepository::create_or_fetch     │
//! │  ConfigRepository::commit_batch     RoleRepository::assign_to_user      │
//! │                                     RoleRepository::grant_permission    │
//! │          │                          AuditRepository::record             │
//! │          │                                   │                          │
//! │          │                          ConflictRetryExecutor               │
//! │          ▼                                   ▼                          │
//! │                      TransactionScope                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`SaleRepository`](sale::SaleRepository) - Sale posting and reads
//! - [`ProductRepository`](product::ProductRepository) - Product reads, low stock
//! - [`ClientRepository`](client::ClientRepository) - Client reads, debtors
//! - [`RoleRepository`](role::RoleRepository) - Roles, permissions, assignments
//! - [`AuditRepository`](audit::AuditRepository) - Append-only action log
//! - [`ConfigRepository`](config::ConfigRepository) - Configuration batches and cache

pub mod audit;
pub mod client;
pub mod config;
pub mod product;
pub mod role;
pub mod sale;
