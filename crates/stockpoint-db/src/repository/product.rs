//! # Product Repository
//!
//! Product reads and the seed-time insert.
//!
//! Stock is never written here: the only stock mutation in this crate is
//! the relative decrement inside sale posting (see
//! [`SaleRepository::post_sale`](crate::repository::sale::SaleRepository::post_sale)).

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use stockpoint_core::{NewProduct, Product};

const PRODUCT_COLUMNS: &str = "id, name, category, purchase_price_cents, sale_price_cents, \
                               stock, alert_threshold, is_deleted";

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
///
/// let id = repo.insert(&NewProduct::new("Rice 1kg", 500, 10)).await?.id;
/// let product = repo.get_by_id(id).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by its ID, including soft-deleted ones.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Inserts a new product.
    ///
    /// ## Returns
    /// The stored row with its generated id.
    pub async fn insert(&self, product: &NewProduct) -> DbResult<Product> {
        debug!(name = %product.name, "Inserting product");

        let id = sqlx::query(
            r#"
            INSERT INTO products (
                name, category, purchase_price_cents, sale_price_cents,
                stock, alert_threshold, is_deleted
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
            "#,
        )
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.purchase_price_cents)
        .bind(product.sale_price_cents)
        .bind(product.stock)
        .bind(product.alert_threshold)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Product {
            id,
            name: product.name.clone(),
            category: product.category.clone(),
            purchase_price_cents: product.purchase_price_cents,
            sale_price_cents: product.sale_price_cents,
            stock: product.stock,
            alert_threshold: product.alert_threshold,
            is_deleted: false,
        })
    }

    /// Lists live products whose stock is at or below their alert threshold.
    ///
    /// Lowest stock first.
    pub async fn list_low_stock(&self) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE is_deleted = 0 AND stock <= alert_threshold \
             ORDER BY stock, name"
        );
        let products = sqlx::query_as::<_, Product>(&sql)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = products.len(), "Low-stock products");
        Ok(products)
    }

    /// Counts live products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_deleted = 0")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};
    use stockpoint_core::NewProduct;

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();

        let mut draft = NewProduct::new("Rice 1kg", 500, 10);
        draft.category = Some("Groceries".into());
        let inserted = repo.insert(&draft).await.unwrap();
        assert!(inserted.id > 0);

        let fetched = repo.get_by_id(inserted.id).await.unwrap().unwrap();
        assert_eq!(fetched, inserted);
        assert_eq!(fetched.category.as_deref(), Some("Groceries"));

        assert!(repo.get_by_id(inserted.id + 100).await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_low_stock() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();

        let mut low = NewProduct::new("Beans", 300, 2);
        low.alert_threshold = 5;
        let mut at_threshold = NewProduct::new("Oil", 900, 5);
        at_threshold.alert_threshold = 5;
        let mut plenty = NewProduct::new("Salt", 100, 50);
        plenty.alert_threshold = 5;

        repo.insert(&plenty).await.unwrap();
        repo.insert(&at_threshold).await.unwrap();
        repo.insert(&low).await.unwrap();

        let names: Vec<String> = repo
            .list_low_stock()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Beans", "Oil"]);
    }
}
