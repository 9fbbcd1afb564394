//! # stockpoint-core: Pure Domain Types for Stockpoint
//!
//! Types, money arithmetic and validation rules shared by the storage
//! layer and the desktop controllers. Nothing in this crate touches a
//! database, a file, or the network.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockpoint Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │           UI controllers / report generators (external)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ in-process calls                       │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ stockpoint-core (THIS CRATE) ★                  │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │   money   │  │ validation│                  │   │
//! │  │   │  NewSale  │  │   Money   │  │ sale lines│                  │   │
//! │  │   │  Role     │  │           │  │ config key│                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              stockpoint-db (transactional core)                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Sale, Product, Role, UserAction, ...)
//! - [`money`] - Integer-cents money type
//! - [`error`] - Domain error types
//! - [`validation`] - Pre-transaction validation
//!
//! ## Example Usage
//!
//! ```rust
//! use stockpoint_core::{Money, NewSale, NewSaleLine};
//!
//! let sale = NewSale::from_lines(None, false, vec![NewSaleLine::new(1, 3, 500)]).unwrap();
//! assert_eq!(sale.total(), Money::from_cents(1500));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum number of lines accepted in a single sale.
pub const MAX_SALE_LINES: usize = 500;

/// Maximum length of a configuration key.
pub const MAX_CONFIG_KEY_LEN: usize = 64;

/// Maximum length of a configuration value.
pub const MAX_CONFIG_VALUE_LEN: usize = 1000;
