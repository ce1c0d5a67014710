//! Persistence Layer
//!
//! SQLite storage for analysis records, their audit trail and the write-once
//! trade order table, with async access via sqlx.
//!
//! # Database Schema
//!
//! ## analyses
//! - id, ticker, user_id
//! - status: pending | running | completed | error | canceled
//! - phase: last phase worked on
//! - decision / confidence: risk-manager verdict
//! - context: versioned `WorkflowContext` JSON
//!
//! ## analysis_insights
//! - (analysis_id, agent_key) primary key, one row per agent
//! - payload: versioned `PhaseInsight` JSON
//!
//! ## analysis_messages
//! - append-only audit trail
//!
//! ## trade_orders
//! - analysis_id primary key: at most one order per analysis
//! - status: pending -> submitting -> submitted | failed, or skipped
//!
//! ## user_policies, user_settings, rebalance_requests
//! - per-user policy JSON, near-limit opt-in plus collaborator settings,
//!   and rebalance status consulted by the near-limit scanner

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::domain::errors::EngineError;

pub use repository::SqliteAnalysisStore;

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

impl From<DatabaseError> for EngineError {
    fn from(error: DatabaseError) -> Self {
        EngineError::Database(error.to_string())
    }
}

/// Initialize the database connection pool and run migrations
pub async fn init_database(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    let in_memory = config.url.contains(":memory:");

    if !in_memory {
        if let Some(db_path) = config.url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                    })?;
                }
            }
        }
    }

    let mut options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true);
    if !config.log_queries {
        options = options.disable_statement_logging();
    }

    // Every connection to :memory: is its own database: keep exactly one alive
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
    };

    let pool = pool_options.connect_with(options).await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "analyses",
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY,
            ticker TEXT NOT NULL,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('pending', 'running', 'completed', 'error', 'canceled')),
            phase TEXT,
            decision TEXT,
            confidence REAL,
            context TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "analysis_insights",
        r#"
        CREATE TABLE IF NOT EXISTS analysis_insights (
            analysis_id TEXT NOT NULL,
            agent_key TEXT NOT NULL,
            payload TEXT NOT NULL,
            updated_at DATETIME NOT NULL,
            PRIMARY KEY (analysis_id, agent_key),
            FOREIGN KEY (analysis_id) REFERENCES analyses(id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "analysis_messages",
        r#"
        CREATE TABLE IF NOT EXISTS analysis_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            analysis_id TEXT NOT NULL,
            phase TEXT,
            message TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (analysis_id) REFERENCES analyses(id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "trade_orders",
        r#"
        CREATE TABLE IF NOT EXISTS trade_orders (
            analysis_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            ticker TEXT NOT NULL,
            action TEXT NOT NULL CHECK(action IN ('BUY', 'SELL', 'HOLD')),
            dollar_amount REAL NOT NULL,
            shares REAL NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('pending', 'submitting', 'submitted', 'failed', 'skipped')),
            broker_order_id TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "user_policies",
        r#"
        CREATE TABLE IF NOT EXISTS user_policies (
            user_id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "user_settings",
        r#"
        CREATE TABLE IF NOT EXISTS user_settings (
            user_id TEXT PRIMARY KEY,
            auto_near_limit_analysis BOOLEAN NOT NULL DEFAULT 0,
            api_settings TEXT NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "rebalance_requests",
        r#"
        CREATE TABLE IF NOT EXISTS rebalance_requests (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_analyses_user_status ON analyses(user_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_analyses_user_created ON analyses(user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_messages_analysis ON analysis_messages(analysis_id)",
    "CREATE INDEX IF NOT EXISTS idx_trade_orders_user_status ON trade_orders(user_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_rebalance_user_status ON rebalance_requests(user_id, status)",
];

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    for (table, ddl) in MIGRATIONS {
        sqlx::query(ddl).execute(pool).await.map_err(|e| {
            DatabaseError::MigrationError(format!("Failed to create {} table: {}", table, e))
        })?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;
    }

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/tradepilot.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/tradepilot.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// In-memory database, used by tests
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            log_queries: false,
        }
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_connections);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }
}
