#![deny(warnings)]

//! Persistence layer: SQLite schema, optimistic writes and repositories.
//!
//! Repository functions take a `&mut SqliteConnection` so callers can run
//! them inside one transaction. Timestamps are stored as unix milliseconds
//! and amounts as decimal text.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub mod buildings;
pub mod mutator;
pub mod orders;
pub mod resources;
pub mod schedules;
pub mod settlements;

pub use mutator::{compare_and_swap, persist_versioned, Versioned};

/// Embedded migrations under `migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    /// Optimistic write lost against a concurrent writer.
    #[error("{entity} {key} was modified concurrently")]
    Conflict { entity: &'static str, key: String },
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
    /// Input rejected by a domain invariant.
    #[error(transparent)]
    Invalid(#[from] colony_core::ValidationError),
    /// A stored row that does not decode into a valid domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Returns the default SQLite URL used for local runs.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://colony.db"
}

/// Opens (creating if needed) the database at `url` and applies migrations.
pub async fn init_db(url: &str) -> Result<SqlitePool, StoreError> {
    let opts = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await?;
    MIGRATOR.run(&pool).await?;
    tracing::info!(url, "database ready");
    Ok(pool)
}

/// Single-connection in-memory database, migrated. Used by tests and dry runs.
pub async fn init_memory_db() -> Result<SqlitePool, StoreError> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {ms} out of range")))
}

pub(crate) fn parse_amount(text: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(text).map_err(|e| StoreError::Corrupt(format!("amount `{text}`: {e}")))
}

pub(crate) fn to_u32(value: i64, what: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{what} {value} out of range")))
}

pub(crate) fn corrupt<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Corrupt(e.to_string())
}
