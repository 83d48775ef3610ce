pub mod csv_import;
pub mod manual;
pub mod models;
pub mod sources;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Open the SQLite pool (WAL journal, auto-create) and bring the schema up
/// to date.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Versioned migrations through sqlx's embedded migrator, then additive
/// column backfills for schema changes that postdate the versioned files.
/// Runs on every startup; nothing here drops or rewrites a column.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;

    ensure_column(pool, "sources", "building", "building TEXT NOT NULL DEFAULT ''").await?;
    ensure_column(pool, "sources", "room", "room TEXT NOT NULL DEFAULT ''").await?;
    ensure_column(pool, "sources", "email", "email TEXT NOT NULL DEFAULT ''").await?;

    Ok(())
}

/// Add a column if it is missing.
async fn ensure_column(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    ddl: &str,
) -> Result<(), sqlx::Error> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?;
    let exists = rows
        .iter()
        .any(|row| row.get::<String, _>("name") == column);
    if !exists {
        sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {ddl}"))
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// In-memory pool with the full schema, for tests.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("enable foreign keys");

    run_migrations(&pool).await.expect("schema migration");

    pool
}
