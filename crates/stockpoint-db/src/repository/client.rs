//! # Client Repository
//!
//! Client reads and the seed-time insert. Balances change only through
//! credit sale posting.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use stockpoint_core::{Client, NewClient};

/// Repository for client database operations.
#[derive(Debug, Clone)]
pub struct ClientRepository {
    pool: SqlitePool,
}

impl ClientRepository {
    /// Creates a new ClientRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ClientRepository { pool }
    }

    /// Gets a client by its ID.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Client>> {
        let client = sqlx::query_as::<_, Client>(
            r#"
            SELECT id, name, phone, email, address, balance_cents
            FROM clients
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(client)
    }

    /// Inserts a new client with a zero balance.
    pub async fn insert(&self, client: &NewClient) -> DbResult<Client> {
        debug!(name = %client.name, "Inserting client");

        let id = sqlx::query(
            r#"
            INSERT INTO clients (name, phone, email, address, balance_cents)
            VALUES (?1, ?2, ?3, ?4, 0)
            "#,
        )
        .bind(&client.name)
        .bind(&client.phone)
        .bind(&client.email)
        .bind(&client.address)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Client {
            id,
            name: client.name.clone(),
            phone: client.phone.clone(),
            email: client.email.clone(),
            address: client.address.clone(),
            balance_cents: 0,
        })
    }

    /// Clients that owe money, largest balance first.
    pub async fn list_debtors(&self) -> DbResult<Vec<Client>> {
        let clients = sqlx::query_as::<_, Client>(
            r#"
            SELECT id, name, phone, email, address, balance_cents
            FROM clients
            WHERE balance_cents > 0
            ORDER BY balance_cents DESC, name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(clients)
    }
}
