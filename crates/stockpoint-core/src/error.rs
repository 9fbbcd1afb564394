//! # Error Types
//!
//! Domain-specific error types for stockpoint-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockpoint-core errors (this file)                                    │
//! │  ├── CoreError        - Domain rule failures                           │
//! │  └── ValidationError  - Input rejected before any transaction          │
//! │                                                                         │
//! │  stockpoint-db errors (separate crate)                                 │
//! │  └── DbError          - Store, conflict and retry failures             │
//! │                                                                         │
//! │  Flow: ValidationError → DbError::Validation → caller                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule failures detected without touching the store.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A sale line quantity overflowed while computing the total.
    #[error("Sale total overflows for product {product_id}")]
    TotalOverflow { product_id: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before a transaction is opened, so no store interaction has
/// happened when a caller sees one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g. configuration key syntax).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A collection that must contain at least one element is empty.
    #[error("{field} must not be empty")]
    Empty { field: String },

    /// One entry of a batch failed; the whole batch is rejected.
    #[error("entry {index} rejected: {source}")]
    BatchEntry {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "value".to_string(),
        };
        assert_eq!(err.to_string(), "value is required");

        let err = ValidationError::Empty {
            field: "lines".to_string(),
        };
        assert_eq!(err.to_string(), "lines must not be empty");
    }

    #[test]
    fn test_batch_entry_message_names_index() {
        let err = ValidationError::BatchEntry {
            index: 9,
            source: Box::new(ValidationError::Required {
                field: "key".to_string(),
            }),
        };
        assert_eq!(err.to_string(), "entry 9 rejected: key is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "lines".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
