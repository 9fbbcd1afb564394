//! # Validation Module
//!
//! Checks that run before any transaction is opened.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: UI controller (external)                                     │
//! │  └── Form-level checks                                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE (no store interaction)                           │
//! │  ├── validate_new_sale     - lines present, quantities, prices         │
//! │  └── validate_config_batch - key syntax, values present                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                       │
//! │  ├── UNIQUE constraints (role name, permission code, config key)       │
//! │  └── Foreign key constraints (product, client, user)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockpoint_core::validation::validate_config_key;
//!
//! assert!(validate_config_key("store.name").is_ok());
//! assert!(validate_config_key("Store Name").is_err());
//! ```

use crate::error::ValidationError;
use crate::types::{ConfigUpdate, NewSale, NewSaleLine};
use crate::{MAX_CONFIG_KEY_LEN, MAX_CONFIG_VALUE_LEN, MAX_SALE_LINES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Sale Validators
// =============================================================================

/// Validates a sale before posting.
///
/// ## Rules
/// - At least one line, at most `MAX_SALE_LINES`
/// - Every quantity positive, every unit price non-negative
/// - Total non-negative
///
/// The total is not compared with the lines.
pub fn validate_new_sale(sale: &NewSale) -> ValidationResult<()> {
    if sale.lines.is_empty() {
        return Err(ValidationError::Empty {
            field: "lines".to_string(),
        });
    }

    if sale.lines.len() > MAX_SALE_LINES {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: MAX_SALE_LINES as i64,
        });
    }

    for (index, line) in sale.lines.iter().enumerate() {
        validate_sale_line(line).map_err(|source| ValidationError::BatchEntry {
            index,
            source: Box::new(source),
        })?;
    }

    if sale.total_cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "total".to_string(),
        });
    }

    Ok(())
}

/// Validates one sale line.
pub fn validate_sale_line(line: &NewSaleLine) -> ValidationResult<()> {
    if line.quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if line.unit_price_cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "unit_price".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Configuration Validators
// =============================================================================

/// Validates a configuration key.
///
/// ## Rules
/// - 1 to `MAX_CONFIG_KEY_LEN` characters
/// - Lowercase ASCII letters, digits, `_` and `.`
/// - Starts with a letter
/// - Dot-separated segments are never empty (`a..b`, `a.` rejected)
///
/// ## Example
/// ```rust
/// use stockpoint_core::validation::validate_config_key;
///
/// assert!(validate_config_key("receipt.footer_text").is_ok());
/// assert!(validate_config_key("tax.rate2").is_ok());
/// assert!(validate_config_key("2fa").is_err());
/// assert!(validate_config_key("a..b").is_err());
/// ```
pub fn validate_config_key(key: &str) -> ValidationResult<()> {
    if key.is_empty() {
        return Err(ValidationError::Required {
            field: "key".to_string(),
        });
    }

    if key.len() > MAX_CONFIG_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "key".to_string(),
            max: MAX_CONFIG_KEY_LEN,
        });
    }

    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: "key".to_string(),
        reason: reason.to_string(),
    };

    if !key
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
    {
        return Err(invalid(
            "must contain only lowercase letters, digits, underscores and dots",
        ));
    }

    if !key.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(invalid("must start with a lowercase letter"));
    }

    if key.split('.').any(str::is_empty) {
        return Err(invalid("must not contain empty dot-separated segments"));
    }

    Ok(())
}

/// Validates a configuration value. `None` means the value is missing.
pub fn validate_config_value(value: Option<&str>) -> ValidationResult<()> {
    let Some(value) = value else {
        return Err(ValidationError::Required {
            field: "value".to_string(),
        });
    };

    if value.chars().count() > MAX_CONFIG_VALUE_LEN {
        return Err(ValidationError::TooLong {
            field: "value".to_string(),
            max: MAX_CONFIG_VALUE_LEN,
        });
    }

    Ok(())
}

/// Validates a whole configuration batch.
///
/// One bad entry rejects the batch; the error carries the entry's index.
pub fn validate_config_batch(updates: &[ConfigUpdate]) -> ValidationResult<()> {
    if updates.is_empty() {
        return Err(ValidationError::Empty {
            field: "configuration batch".to_string(),
        });
    }

    for (index, update) in updates.iter().enumerate() {
        validate_config_key(&update.key)
            .and_then(|_| validate_config_value(update.value.as_deref()))
            .map_err(|source| ValidationError::BatchEntry {
                index,
                source: Box::new(source),
            })?;
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
