//! # Domain Types
//!
//! Records read from and written to the store by the transactional core.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  WRITE SIDE (input)          STORED ROWS                               │
//! │  ──────────────────          ───────────                               │
//! │  NewSale ──────────────────► Sale ─┬─► SaleLine (sale_lines)           │
//! │   └── NewSaleLine[]                └─► Product.stock -= quantity       │
//! │                                        Client.balance += total         │
//! │                                                                         │
//! │  NewUserAction ────────────► UserAction (append-only)                  │
//! │  ConfigUpdate[] ───────────► ConfigurationParam.value                  │
//! │  (name) ───────────────────► Role       (create-or-fetch)              │
//! │  (code) ───────────────────► Permission (create-or-fetch)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Every stored entity carries an autoincrement `i64` id assigned by the
//! store. Input types (`New*`) have no id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;

// =============================================================================
// Sale (write side)
// =============================================================================

/// One line of a sale being posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewSaleLine {
    pub product_id: i64,
    /// Units sold. Must be positive.
    pub quantity: i64,
    /// Price per unit in cents at time of sale. Must not be negative.
    pub unit_price_cents: i64,
}

impl NewSaleLine {
    pub fn new(product_id: i64, quantity: i64, unit_price_cents: i64) -> Self {
        NewSaleLine {
            product_id,
            quantity,
            unit_price_cents,
        }
    }

    /// Returns quantity × unit price, or `None` on overflow.
    #[inline]
    pub fn line_total(&self) -> Option<Money> {
        Money::from_cents(self.unit_price_cents).checked_times(self.quantity)
    }
}

/// A sale submitted for posting.
///
/// ## Total
/// `total_cents` is supplied by the caller and stored as-is. Use
/// [`NewSale::from_lines`] to derive it from the lines instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewSale {
    /// When the sale happened. Defaults to submission time.
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub client_id: Option<i64>,
    /// Credit sales add the total to the client's balance.
    pub is_credit: bool,
    pub total_cents: i64,
    /// Ordered, non-empty.
    pub lines: Vec<NewSaleLine>,
}

impl NewSale {
    /// Creates a sale timestamped now with a caller-supplied total.
    pub fn new(
        client_id: Option<i64>,
        is_credit: bool,
        total: Money,
        lines: Vec<NewSaleLine>,
    ) -> Self {
        NewSale {
            created_at: Utc::now(),
            client_id,
            is_credit,
            total_cents: total.cents(),
            lines,
        }
    }

    /// Creates a sale timestamped now whose total is the sum of its lines.
    ///
    /// ## Example
    /// ```rust
    /// use stockpoint_core::{NewSale, NewSaleLine};
    ///
    /// let sale = NewSale::from_lines(Some(4), true, vec![
    ///     NewSaleLine::new(1, 2, 300),
    ///     NewSaleLine::new(2, 1, 150),
    /// ]).unwrap();
    /// assert_eq!(sale.total_cents, 750);
    /// ```
    pub fn from_lines(
        client_id: Option<i64>,
        is_credit: bool,
        lines: Vec<NewSaleLine>,
    ) -> CoreResult<Self> {
        let total = lines_total(&lines)?;
        Ok(NewSale::new(client_id, is_credit, total, lines))
    }

    /// Overrides the sale timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// Sum of quantity × unit price over the lines.
    pub fn lines_total(&self) -> CoreResult<Money> {
        lines_total(&self.lines)
    }

    /// Whether posting this sale touches a client balance.
    #[inline]
    pub fn charges_client(&self) -> Option<i64> {
        if self.is_credit {
            self.client_id
        } else {
            None
        }
    }
}

fn lines_total(lines: &[NewSaleLine]) -> CoreResult<Money> {
    lines.iter().try_fold(Money::zero(), |acc, line| {
        line.line_total()
            .and_then(|t| acc.checked_add(t))
            .ok_or(CoreError::TotalOverflow {
                product_id: line.product_id,
            })
    })
}

// =============================================================================
// Sale (stored)
// =============================================================================

/// A committed sale header. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub client_id: Option<i64>,
    pub is_credit: bool,
    pub total_cents: i64,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A committed sale line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleLine {
    pub id: i64,
    pub sale_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

/// The result of a successful posting: header plus lines in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PostedSale {
    pub sale: Sale,
    pub lines: Vec<SaleLine>,
}

// =============================================================================
// Product & Client
// =============================================================================

/// A product in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    pub purchase_price_cents: i64,
    pub sale_price_cents: i64,
    /// Units on hand. Not floored at zero.
    pub stock: i64,
    /// Stock level at or below which the product is reported as low.
    pub alert_threshold: i64,
    pub is_deleted: bool,
}

impl Product {
    /// Whether stock has reached the alert threshold.
    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.alert_threshold
    }
}

/// Fields for inserting a product (seeding and tests).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub category: Option<String>,
    pub purchase_price_cents: i64,
    pub sale_price_cents: i64,
    pub stock: i64,
    pub alert_threshold: i64,
}

impl NewProduct {
    pub fn new(name: impl Into<String>, sale_price_cents: i64, stock: i64) -> Self {
        NewProduct {
            name: name.into(),
            category: None,
            purchase_price_cents: 0,
            sale_price_cents,
            stock,
            alert_threshold: 0,
        }
    }
}

/// A client. `balance_cents > 0` means the client owes money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub balance_cents: i64,
}

impl Client {
    #[inline]
    pub fn balance(&self) -> Money {
        Money::from_cents(self.balance_cents)
    }
}

/// Fields for inserting a client (seeding and tests).
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewClient {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

impl NewClient {
    pub fn new(name: impl Into<String>) -> Self {
        NewClient {
            name: name.into(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Roles & Permissions
// =============================================================================

/// A role. Names are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// A permission. Codes are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: i64,
    pub code: String,
    pub description: Option<String>,
    /// Screen or area the permission guards, e.g. "sales".
    pub module: Option<String>,
}

// =============================================================================
// Audit
// =============================================================================

/// Kind of audited user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Login,
    Logout,
    Create,
    Update,
    Delete,
    Sale,
    ConfigChange,
    RoleAssignment,
}

impl ActionType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActionType::Login => "login",
            ActionType::Logout => "logout",
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
            ActionType::Sale => "sale",
            ActionType::ConfigChange => "config_change",
            ActionType::RoleAssignment => "role_assignment",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored audit record. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct UserAction {
    pub id: i64,
    pub action_type: ActionType,
    pub username: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub user_id: Option<i64>,
}

/// An audit record to append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewUserAction {
    pub action_type: ActionType,
    pub username: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub user_id: Option<i64>,
}

impl NewUserAction {
    /// Creates an action timestamped now.
    ///
    /// ## Example
    /// ```rust
    /// use stockpoint_core::{ActionType, NewUserAction};
    ///
    /// let action = NewUserAction::new(ActionType::Sale, "cashier1")
    ///     .describe("Posted sale")
    ///     .target("sale", 42)
    ///     .by_user(7);
    /// assert_eq!(action.entity_id, Some(42));
    /// ```
    pub fn new(action_type: ActionType, username: impl Into<String>) -> Self {
        NewUserAction {
            action_type,
            username: username.into(),
            created_at: Utc::now(),
            description: None,
            entity_type: None,
            entity_id: None,
            user_id: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn target(mut self, entity_type: impl Into<String>, entity_id: i64) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id);
        self
    }

    pub fn by_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// A stored configuration parameter. Keys are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationParam {
    pub id: i64,
    pub key: String,
    pub value: String,
    pub description: Option<String>,
}

/// One entry of a configuration batch.
///
/// `value: None` means the form left the field unset; a batch containing
/// one is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub key: String,
    pub value: Option<String>,
}

impl ConfigUpdate {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        ConfigUpdate {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lines_sums_lines() {
        let sale = NewSale::from_lines(
            None,
            false,
            vec![NewSaleLine::new(1, 3, 500), NewSaleLine::new(2, 2, 125)],
        )
        .unwrap();
        assert_eq!(sale.total(), Money::from_cents(1750));
        assert_eq!(sale.lines_total().unwrap(), sale.total());
    }

    #[test]
    fn test_from_lines_overflow() {
        let err = NewSale::from_lines(None, false, vec![NewSaleLine::new(9, i64::MAX, 2)])
            .unwrap_err();
        assert!(matches!(err, CoreError::TotalOverflow { product_id: 9 }));
    }

    #[test]
    fn test_caller_total_is_kept() {
        let sale = NewSale::new(None, false, Money::from_cents(1), vec![NewSaleLine::new(1, 3, 500)]);
        assert_eq!(sale.total_cents, 1);
        assert_eq!(sale.lines_total().unwrap().cents(), 1500);
    }

    #[test]
    fn test_charges_client() {
        let lines = vec![NewSaleLine::new(1, 1, 100)];
        assert_eq!(
            NewSale::from_lines(Some(3), true, lines.clone()).unwrap().charges_client(),
            Some(3)
        );
        assert_eq!(
            NewSale::from_lines(Some(3), false, lines.clone()).unwrap().charges_client(),
            None
        );
        assert_eq!(
            NewSale::from_lines(None, true, lines).unwrap().charges_client(),
            None
        );
    }

    #[test]
    fn test_action_type_serializes_snake_case() {
        let json = serde_json::to_string(&ActionType::ConfigChange).unwrap();
        assert_eq!(json, "\"config_change\"");
        assert_eq!(ActionType::RoleAssignment.to_string(), "role_assignment");
    }

    #[test]
    fn test_low_stock() {
        let mut product = Product {
            id: 1,
            name: "Rice 1kg".into(),
            category: None,
            purchase_price_cents: 80,
            sale_price_cents: 120,
            stock: 6,
            alert_threshold: 5,
            is_deleted: false,
        };
        assert!(!product.is_low_stock());
        product.stock = 5;
        assert!(product.is_low_stock());
    }
}
