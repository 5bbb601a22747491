//! SQLite pool construction and idempotent schema migration.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreResult;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS space (
        uuid TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        user_uuid TEXT NOT NULL DEFAULT '',
        kind TEXT NOT NULL,
        size_limit INTEGER NOT NULL DEFAULT -1,
        total_size_limit INTEGER NOT NULL DEFAULT -1,
        total_size INTEGER NOT NULL DEFAULT 0,
        sort INTEGER NOT NULL,
        create_time TEXT NOT NULL,
        update_time TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS matter (
        uuid TEXT PRIMARY KEY,
        puuid TEXT NOT NULL,
        space_uuid TEXT NOT NULL,
        space_name TEXT NOT NULL,
        user_uuid TEXT NOT NULL,
        dir INTEGER NOT NULL DEFAULT 0,
        name TEXT NOT NULL,
        digest TEXT NOT NULL DEFAULT '',
        size INTEGER NOT NULL DEFAULT 0,
        privacy INTEGER NOT NULL DEFAULT 0,
        path TEXT NOT NULL DEFAULT '',
        times INTEGER NOT NULL DEFAULT 0,
        prop TEXT NOT NULL DEFAULT '{}',
        deleted INTEGER NOT NULL DEFAULT 0,
        delete_time TEXT,
        visit_time TEXT NOT NULL,
        sort INTEGER NOT NULL,
        create_time TEXT NOT NULL,
        update_time TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_matter_puuid ON matter (puuid)",
    "CREATE INDEX IF NOT EXISTS idx_matter_space_uuid ON matter (space_uuid)",
    "CREATE INDEX IF NOT EXISTS idx_matter_deleted ON matter (deleted, delete_time)",
    // Sibling uniqueness among live rows only; trash may hold duplicates.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_matter_sibling
        ON matter (space_uuid, puuid, dir, name) WHERE deleted = 0",
    "CREATE TABLE IF NOT EXISTS derivative (
        uuid TEXT PRIMARY KEY,
        matter_uuid TEXT NOT NULL,
        space_uuid TEXT NOT NULL,
        user_uuid TEXT NOT NULL,
        signature TEXT NOT NULL,
        name TEXT NOT NULL,
        path TEXT NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        sort INTEGER NOT NULL,
        create_time TEXT NOT NULL,
        update_time TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_derivative_signature
        ON derivative (matter_uuid, signature)",
    "CREATE TABLE IF NOT EXISTS bridge (
        uuid TEXT PRIMARY KEY,
        share_uuid TEXT NOT NULL,
        matter_uuid TEXT NOT NULL,
        sort INTEGER NOT NULL,
        create_time TEXT NOT NULL,
        update_time TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_bridge_matter ON bridge (matter_uuid)",
    "CREATE INDEX IF NOT EXISTS idx_bridge_share ON bridge (share_uuid)",
];

/// Open (or create) the database file and run migrations.
pub async fn connect(path: &Path) -> CoreResult<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
        .map_err(sqlx::Error::from)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        // Prevent transient "database is locked" errors under concurrent access.
        .busy_timeout(Duration::from_secs(5));

    // SQLite permits limited write concurrency; a single connection avoids
    // persistent lock failures under request concurrency.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .map_err(crate::error::CoreError::from)?;

    migrate(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests.
pub async fn connect_in_memory() -> CoreResult<SqlitePool> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(sqlx::Error::from)?
        .foreign_keys(true);
    // The sole connection must never be recycled or the data vanishes.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .map_err(crate::error::CoreError::from)?;
    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> CoreResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Connectivity probe used at startup.
pub async fn ping(pool: &SqlitePool) -> CoreResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
