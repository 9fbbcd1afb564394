//! # Seed Data Generator
//!
//! Populates a development database with a small catalog, clients, users,
//! the default roles and permissions, and the configuration parameters the
//! settings screen edits.
//!
//! ## Usage
//! ```bash
//! # Default path (or STOCKPOINT_DB_PATH)
//! cargo run -p stockpoint-db --bin seed
//!
//! # Specify database path
//! cargo run -p stockpoint-db --bin seed -- --db ./data/stockpoint.db
//!
//! # Also post a few demo sales
//! cargo run -p stockpoint-db --bin seed -- --with-sales
//! ```
//!
//! Roles, permissions and assignments go through create-or-fetch, so
//! re-running the seeder against an existing database only fills gaps.

use std::env;

use stockpoint_core::{ActionType, NewClient, NewProduct, NewSale, NewSaleLine, NewUserAction};
use stockpoint_db::{Database, DbConfig, DbResult};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// (name, category, purchase cents, sale cents, stock, alert threshold)
const PRODUCTS: &[(&str, &str, i64, i64, i64, i64)] = &[
    ("Rice 1kg", "Groceries", 320, 500, 40, 10),
    ("Black Beans 1kg", "Groceries", 410, 650, 25, 8),
    ("Sunflower Oil 1L", "Groceries", 780, 1150, 12, 5),
    ("Sugar 1kg", "Groceries", 290, 450, 30, 10),
    ("Coffee 250g", "Groceries", 1100, 1690, 6, 6),
    ("Whole Milk 1L", "Dairy", 180, 290, 24, 12),
    ("Cheddar 200g", "Dairy", 350, 560, 9, 4),
    ("Bar Soap", "Household", 90, 150, 60, 15),
    ("Dish Detergent 500ml", "Household", 240, 390, 3, 5),
    ("AA Batteries x4", "Hardware", 520, 890, 15, 5),
];

/// (name, phone)
const CLIENTS: &[(&str, &str)] = &[
    ("Ana Pérez", "555-0101"),
    ("Luis Gómez", "555-0102"),
    ("Marta Ruiz", "555-0103"),
];

/// (username, full name, role)
const USERS: &[(&str, &str, &str)] = &[
    ("admin", "Administrator", "Admin"),
    ("manager", "Store Manager", "Manager"),
    ("cashier1", "Front Cashier", "Cashier"),
];

/// (code, description, module)
const PERMISSIONS: &[(&str, &str, &str)] = &[
    ("sales.create", "Post sales", "sales"),
    ("sales.credit", "Sell on credit", "sales"),
    ("inventory.view", "View stock levels", "inventory"),
    ("inventory.edit", "Edit products", "inventory"),
    ("clients.edit", "Edit clients", "clients"),
    ("reports.view", "View reports", "reports"),
    ("config.edit", "Change settings", "config"),
    ("roles.manage", "Manage roles", "security"),
];

/// (role, description, permission codes)
const ROLES: &[(&str, &str, &[&str])] = &[
    (
        "Admin",
        "Full access",
        &[
            "sales.create",
            "sales.credit",
            "inventory.view",
            "inventory.edit",
            "clients.edit",
            "reports.view",
            "config.edit",
            "roles.manage",
        ],
    ),
    (
        "Manager",
        "Store manager",
        &["sales.create", "sales.credit", "inventory.view", "inventory.edit", "clients.edit", "reports.view"],
    ),
    ("Cashier", "Front counter", &["sales.create", "inventory.view"]),
];

/// (key, value, description)
const CONFIG: &[(&str, &str, &str)] = &[
    ("store.name", "Stockpoint Demo Store", "Name printed on receipts"),
    ("store.address", "123 Main St", "Address printed on receipts"),
    ("store.phone", "555-0100", "Phone printed on receipts"),
    ("tax.rate", "0.16", "Sales tax rate"),
    ("receipt.footer", "Thank you for your purchase", "Receipt footer text"),
    ("inventory.alert_enabled", "true", "Show low-stock alerts"),
    ("currency.symbol", "$", "Currency symbol"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut config = DbConfig::from_env("./stockpoint_dev.db");
    let mut with_sales = false;

    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    config.database_path = args[i + 1].clone().into();
                    i += 1;
                }
            }
            "--with-sales" => with_sales = true,
            "--help" | "-h" => {
                println!("Stockpoint Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./stockpoint_dev.db)");
                println!("      --with-sales   Post a few demo sales");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            other => warn!(argument = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    info!(path = %config.database_path.display(), "Seeding database");
    let db = Database::new(config).await?;

    seed_security(&db).await?;
    seed_config(&db).await?;

    if db.products().count().await? > 0 {
        warn!("Catalog already present, skipping products, clients and sales");
    } else {
        let product_ids = seed_catalog(&db).await?;
        if with_sales {
            seed_sales(&db, &product_ids).await?;
        }
    }

    let low_stock = db.products().list_low_stock().await?;
    info!(
        products = db.products().count().await?,
        low_stock = low_stock.len(),
        sales = db.sales().count().await?,
        audit_entries = db.audit().count().await?,
        "Seed complete"
    );

    db.close().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockpoint=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Users, roles, permissions, grants and assignments.
async fn seed_security(db: &Database) -> DbResult<()> {
    let roles = db.roles();

    for (code, description, module) in PERMISSIONS {
        roles
            .create_or_fetch_permission(code, Some(*description), Some(*module))
            .await?;
    }

    for (name, description, codes) in ROLES {
        let role = roles.create_or_fetch(name, Some(*description)).await?;
        for code in codes.iter() {
            let permission = roles.create_or_fetch_permission(code, None, None).await?;
            roles.grant_permission(role.id, permission.id).await?;
        }
    }

    for (username, full_name, role_name) in USERS {
        // Users belong to the authentication module; only the FK target
        // row is created here.
        sqlx::query("INSERT OR IGNORE INTO users (username, full_name) VALUES (?1, ?2)")
            .bind(*username)
            .bind(*full_name)
            .execute(db.pool())
            .await?;
        let user_id: i64 = sqlx::query_scalar("SELECT id FROM users WHERE username = ?1")
            .bind(*username)
            .fetch_one(db.pool())
            .await?;

        let role = roles.create_or_fetch(role_name, None).await?;
        if roles.assign_to_user(user_id, role.id).await? == stockpoint_db::Link::Created {
            db.audit()
                .record(
                    &NewUserAction::new(ActionType::RoleAssignment, "seed")
                        .describe(format!("{username} -> {role_name}"))
                        .target("user", user_id),
                )
                .await?;
        }
    }

    info!(roles = ROLES.len(), users = USERS.len(), "Security seeded");
    Ok(())
}

async fn seed_config(db: &Database) -> DbResult<()> {
    let config = db.config();
    let existing = config.reload().await?;

    for (key, value, description) in CONFIG {
        if config.cache().get(key).await.is_none() {
            config.insert_param(key, value, Some(*description)).await?;
        }
    }

    info!(existing, total = config.cache().len().await, "Configuration seeded");
    Ok(())
}

async fn seed_catalog(db: &Database) -> DbResult<Vec<i64>> {
    let mut ids = Vec::with_capacity(PRODUCTS.len());
    for (name, category, purchase, sale, stock, alert) in PRODUCTS {
        let mut product = NewProduct::new(*name, *sale, *stock);
        product.category = Some(category.to_string());
        product.purchase_price_cents = *purchase;
        product.alert_threshold = *alert;
        ids.push(db.products().insert(&product).await?.id);
    }

    for (name, phone) in CLIENTS {
        let mut client = NewClient::new(*name);
        client.phone = Some(phone.to_string());
        db.clients().insert(&client).await?;
    }

    info!(products = ids.len(), clients = CLIENTS.len(), "Catalog seeded");
    Ok(ids)
}

async fn seed_sales(db: &Database, product_ids: &[i64]) -> Result<(), Box<dyn std::error::Error>> {
    let debtor = db.clients().insert(&NewClient::new("Credit Demo Client")).await?;

    let drafts = [
        NewSale::from_lines(None, false, vec![NewSaleLine::new(product_ids[0], 2, PRODUCTS[0].3)])?,
        NewSale::from_lines(
            Some(debtor.id),
            true,
            vec![
                NewSaleLine::new(product_ids[1], 1, PRODUCTS[1].3),
                NewSaleLine::new(product_ids[5], 3, PRODUCTS[5].3),
            ],
        )?,
    ];

    for draft in &drafts {
        let posted = db.sales().post_sale(draft).await?;
        db.audit()
            .record(
                &NewUserAction::new(ActionType::Sale, "cashier1")
                    .describe(format!("Demo sale {}", posted.sale.total()))
                    .target("sale", posted.sale.id),
            )
            .await?;
    }

    info!(sales = drafts.len(), "Demo sales posted");
    Ok(())
}
