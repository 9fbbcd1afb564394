//! # Sale Repository
//!
//! Sale posting and sale reads.
//!
//! ## Posting
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       post_sale(NewSale)                                │
//! │                                                                         │
//! │  validate_new_sale() ── rejected ──► Err(Validation), store untouched  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN ─────────────────────────── one TransactionScope ────────────┐  │
//! │  │ 1. INSERT sales            → sale id                             │  │
//! │  │ 2. for each line, in order:                                      │  │
//! │  │      INSERT sale_lines                                           │  │
//! │  │      UPDATE products SET stock = stock - qty        (relative)   │  │
//! │  │ 3. credit + client:                                              │  │
//! │  │      UPDATE clients SET balance = balance + total   (relative)   │  │
//! │  └── any error ──► ROLLBACK, nothing from 1-3 persists ────────────┘  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ──► PostedSale { sale, lines }                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No retry on this path. Concurrent sales of the same product are safe
//! because each decrement is a single statement evaluated by SQLite.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::scope::TransactionScope;
use stockpoint_core::validation::validate_new_sale;
use stockpoint_core::{NewSale, PostedSale, Sale, SaleLine};

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Posts a sale and its stock and credit effects atomically.
    ///
    /// ## Returns
    /// * `Ok(PostedSale)` - committed header and lines with generated ids
    /// * `Err(DbError::Validation)` - draft rejected, no transaction opened
    /// * `Err(DbError::ForeignKeyViolation)` - unknown product or client
    /// * `Err(other)` - store failure; the sale was rolled back
    ///
    /// ## Example
    /// ```rust,ignore
    /// let sale = NewSale::from_lines(None, false, vec![NewSaleLine::new(product_id, 3, 500)])?;
    /// let posted = db.sales().post_sale(&sale).await?;
    /// assert_eq!(posted.sale.total_cents, 1500);
    /// ```
    pub async fn post_sale(&self, sale: &NewSale) -> DbResult<PostedSale> {
        validate_new_sale(sale)?;

        let mut scope = TransactionScope::begin(&self.pool, "post_sale").await?;

        match write_sale(scope.conn(), sale).await {
            Ok(posted) => {
                scope.commit().await?;
                info!(
                    sale_id = posted.sale.id,
                    lines = posted.lines.len(),
                    total = %posted.sale.total(),
                    is_credit = posted.sale.is_credit,
                    "Sale posted"
                );
                Ok(posted)
            }
            Err(err) => {
                warn!(error = %err, "Sale posting failed, rolling back");
                if let Err(rollback_err) = scope.rollback().await {
                    warn!(error = %rollback_err, "Rollback of failed sale also failed");
                }
                Err(err)
            }
        }
    }

    /// Gets a sale header by ID.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(
            r#"
            SELECT id, created_at, client_id, is_credit, total_cents
            FROM sales
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    /// Gets the lines of a sale in posting order.
    pub async fn get_lines(&self, sale_id: i64) -> DbResult<Vec<SaleLine>> {
        let lines = sqlx::query_as::<_, SaleLine>(
            r#"
            SELECT id, sale_id, product_id, quantity, unit_price_cents
            FROM sale_lines
            WHERE sale_id = ?1
            ORDER BY id
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    /// Gets a sale with its lines.
    pub async fn get_posted(&self, id: i64) -> DbResult<Option<PostedSale>> {
        let Some(sale) = self.get_by_id(id).await? else {
            return Ok(None);
        };
        let lines = self.get_lines(id).await?;
        Ok(Some(PostedSale { sale, lines }))
    }

    /// Counts stored sales.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// Steps 1-3 of posting, on the scope's connection.
async fn write_sale(conn: &mut SqliteConnection, sale: &NewSale) -> DbResult<PostedSale> {
    let sale_id = sqlx::query(
        r#"
        INSERT INTO sales (created_at, client_id, is_credit, total_cents)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(sale.created_at)
    .bind(sale.client_id)
    .bind(sale.is_credit)
    .bind(sale.total_cents)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    debug!(sale_id, "Sale header inserted");

    let mut lines = Vec::with_capacity(sale.lines.len());
    for line in &sale.lines {
        let line_id = sqlx::query(
            r#"
            INSERT INTO sale_lines (sale_id, product_id, quantity, unit_price_cents)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(sale_id)
        .bind(line.product_id)
        .bind(line.quantity)
        .bind(line.unit_price_cents)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

        let updated = sqlx::query("UPDATE products SET stock = stock - ?1 WHERE id = ?2")
            .bind(line.quantity)
            .bind(line.product_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(DbError::not_found("Product", line.product_id));
        }

        debug!(sale_id, product_id = line.product_id, quantity = line.quantity, "Stock decremented");

        lines.push(SaleLine {
            id: line_id,
            sale_id,
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price_cents: line.unit_price_cents,
        });
    }

    match sale.charges_client() {
        Some(client_id) => {
            let updated = sqlx::query(
                "UPDATE clients SET balance_cents = balance_cents + ?1 WHERE id = ?2",
            )
            .bind(sale.total_cents)
            .bind(client_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
            if updated == 0 {
                return Err(DbError::not_found("Client", client_id));
            }
            debug!(sale_id, client_id, amount = sale.total_cents, "Client balance charged");
        }
        None if sale.is_credit => {
            warn!(sale_id, "Credit sale without client, balance not updated");
        }
        None => {}
    }

    Ok(PostedSale {
        sale: Sale {
            id: sale_id,
            created_at: sale.created_at,
            client_id: sale.client_id,
            is_credit: sale.is_credit,
            total_cents: sale.total_cents,
        },
        lines,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
