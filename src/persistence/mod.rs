//! Persistence Layer
//!
//! SQLite storage for the trading ledger via sqlx, plus an in-memory store used
//! by tests. Both implement `domain::repositories::TradingStore`.
//!
//! # Database Schema
//!
//! All money columns are integer cents (`*_cents`).
//!
//! ## instruments
//! - symbol (unique), name, opening/current/min/max price, max change per tick
//! - sentiment_score: written by the news collaborator
//!
//! ## accounts
//! - username, email, cash_balance_cents
//!
//! ## positions
//! - (account_id, instrument_id) unique, signed quantity, average_cost_cents >= 0
//! - flat rows are kept
//!
//! ## orders
//! - append-only; side BUY/SELL, status EXECUTED, realized_pnl_cents
//!
//! ## watchlist
//! - (account_id, instrument_id) unique, target_price_cents, is_active
//!
//! ## news_articles
//! - symbol, title, summary, url, published_at, sentiment_score

pub mod memory;
pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Initialize the database connection pool and run migrations.
///
/// An in-memory database lives only as long as its connection, so memory URLs
/// get a single connection that is never recycled.
pub async fn init_database(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let statement_level = if config.log_queries {
        tracing::log::LevelFilter::Debug
    } else {
        tracing::log::LevelFilter::Trace
    };
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .log_statements(statement_level);

    let pool = if is_memory_url(&config.url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options.journal_mode(SqliteJournalMode::Wal))
            .await?
    };

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

async fn migrate(pool: &DbPool, what: &str, statement: &str) -> Result<(), DatabaseError> {
    sqlx::query(statement)
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create {}: {}", what, e)))?;
    Ok(())
}

/// Idempotent schema setup.
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    migrate(
        pool,
        "instruments table",
        r#"
        CREATE TABLE IF NOT EXISTS instruments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            opening_price_cents INTEGER NOT NULL,
            current_price_cents INTEGER NOT NULL,
            min_price_cents INTEGER NOT NULL,
            max_price_cents INTEGER NOT NULL,
            max_change_cents INTEGER NOT NULL DEFAULT 2 CHECK(max_change_cents >= 0),
            sentiment_score REAL NOT NULL DEFAULT 0.0,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "accounts table",
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            cash_balance_cents INTEGER NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "positions table",
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            instrument_id INTEGER NOT NULL REFERENCES instruments(id),
            quantity INTEGER NOT NULL,
            average_cost_cents INTEGER NOT NULL CHECK(average_cost_cents >= 0),
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(account_id, instrument_id)
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "orders table",
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            instrument_id INTEGER NOT NULL REFERENCES instruments(id),
            side TEXT NOT NULL CHECK(side IN ('BUY', 'SELL')),
            status TEXT NOT NULL DEFAULT 'EXECUTED',
            quantity INTEGER NOT NULL CHECK(quantity > 0),
            price_cents INTEGER NOT NULL,
            notional_cents INTEGER NOT NULL,
            realized_pnl_cents INTEGER NOT NULL DEFAULT 0,
            executed_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "watchlist table",
        r#"
        CREATE TABLE IF NOT EXISTS watchlist (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            instrument_id INTEGER NOT NULL REFERENCES instruments(id),
            target_price_cents INTEGER NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT 1,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(account_id, instrument_id)
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "news_articles table",
        r#"
        CREATE TABLE IF NOT EXISTS news_articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            title TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL,
            published_at DATETIME NOT NULL,
            sentiment_score REAL NOT NULL DEFAULT 0.0
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "orders index",
        "CREATE INDEX IF NOT EXISTS idx_orders_account ON orders(account_id, executed_at)",
    )
    .await?;

    migrate(
        pool,
        "news index",
        "CREATE INDEX IF NOT EXISTS idx_news_symbol_time ON news_articles(symbol, published_at)",
    )
    .await?;

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Inserts a small demo universe and one funded account. Safe to run twice.
pub async fn seed_demo_data(
    pool: &DbPool,
    initial_cash: i64,
    max_change_cents: i64,
) -> Result<(), DatabaseError> {
    const INSTRUMENTS: [(&str, &str, i64, i64, i64); 4] = [
        ("ACME", "Acme Corporation", 15_000, 12_000, 18_000),
        ("GLOBX", "Globex Industries", 4_250, 3_500, 5_000),
        ("INIT", "Initech", 980, 800, 1_200),
        ("UMBR", "Umbrella Holdings", 27_500, 22_000, 33_000),
    ];

    for (symbol, name, price, min, max) in INSTRUMENTS {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO instruments (
                symbol, name, opening_price_cents, current_price_cents,
                min_price_cents, max_price_cents, max_change_cents
            )
            VALUES (?1, ?2, ?3, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(symbol)
        .bind(name)
        .bind(price)
        .bind(min)
        .bind(max)
        .bind(max_change_cents)
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to seed {}: {}", symbol, e)))?;
    }

    sqlx::query(
        "INSERT OR IGNORE INTO accounts (id, username, email, cash_balance_cents) VALUES (1, 'demo', 'demo@example.com', ?1)",
    )
    .bind(initial_cash)
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::QueryError(format!("Failed to seed demo account: {}", e)))?;

    info!("✓ Demo data seeded ({} instruments)", INSTRUMENTS.len());
    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/tradesim.db")
    pub url: String,

    /// Maximum number of connections in the pool (file databases only)
    pub max_connections: u32,

    /// Log SQL statements at debug level
    pub log_queries: bool,

    /// How long a writer waits for the SQLite lock before failing
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/tradesim.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
            busy_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            ..Self::default()
        }
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_connections);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        let busy_timeout_ms = std::env::var("DATABASE_BUSY_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.busy_timeout_ms);

        Self {
            url,
            max_connections,
            log_queries,
            busy_timeout_ms,
        }
    }
}
