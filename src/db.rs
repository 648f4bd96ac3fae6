//! Database module.
//!
//! Manages the SQLite connection pool with WAL mode and provides the
//! wallet-registry operations consumed by the front end plus the persisted
//! scan cursor row. Addresses are stored lowercase; normalization to
//! checksummed form happens when the registry snapshot is built.

use crate::error::{WatchError, WatchResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::info;

/// Type alias for the SQLite connection pool
pub type DbPool = Pool<Sqlite>;

/// Embedded schema, applied idempotently at startup.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    wallet_address TEXT NOT NULL,
    label TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(user_id, wallet_address)
);

CREATE INDEX IF NOT EXISTS idx_wallets_address ON wallets(wallet_address);

CREATE TABLE IF NOT EXISTS scan_cursor (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    height INTEGER NOT NULL,
    committed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Initialize the database connection pool
pub async fn init_pool(config: &crate::config::DatabaseConfig) -> WatchResult<DbPool> {
    if let Some(parent) = config.path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WatchError::Config(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
            info!("Created database directory: {:?}", parent);
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", config.path.display());

    let connect_options = SqliteConnectOptions::from_str(&db_url)?
        // WAL for concurrent reads from on-demand queries
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect_with(connect_options)
        .await?;

    info!(
        "Database pool initialized: {:?} (max {} connections)",
        config.path, config.max_connections
    );

    Ok(pool)
}

/// Apply the embedded schema.
pub async fn run_migrations(pool: &DbPool) -> WatchResult<()> {
    for statement in SCHEMA.split(';') {
        let stmt = statement.trim();
        if stmt.is_empty() {
            continue;
        }
        sqlx::query(stmt).execute(pool).await?;
    }
    info!("Database schema applied");
    Ok(())
}

/// Add a wallet for a user. Returns false when the (user, address) pair
/// already exists.
pub async fn add_wallet(
    pool: &DbPool,
    user_id: i64,
    address: &str,
    label: &str,
) -> WatchResult<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO wallets (user_id, wallet_address, label) VALUES (?, ?, ?)",
    )
    .bind(user_id)
    .bind(address.to_lowercase())
    .bind(label)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Remove a wallet for a user. Returns false when nothing matched.
pub async fn remove_wallet(pool: &DbPool, user_id: i64, address: &str) -> WatchResult<bool> {
    let result = sqlx::query("DELETE FROM wallets WHERE user_id = ? AND wallet_address = ?")
        .bind(user_id)
        .bind(address.to_lowercase())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// List one user's wallets as (address, label) pairs.
pub async fn list_user_wallets(pool: &DbPool, user_id: i64) -> WatchResult<Vec<(String, String)>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT wallet_address, label FROM wallets WHERE user_id = ? ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// List every watched wallet with its owners as raw rows.
/// The registry snapshot turns these into a normalized address map.
pub async fn list_all_watched(pool: &DbPool) -> WatchResult<Vec<(String, i64, String)>> {
    let rows: Vec<(String, i64, String)> =
        sqlx::query_as("SELECT wallet_address, user_id, label FROM wallets")
            .fetch_all(pool)
            .await?;

    Ok(rows)
}

/// Read the committed cursor height, if one was ever committed.
pub async fn read_cursor(pool: &DbPool) -> WatchResult<Option<u64>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT height FROM scan_cursor WHERE id = 1")
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(h,)| h as u64))
}

/// Durably commit the cursor height. Single-row upsert; the WAL fsync on
/// commit is what makes restart-safe resume possible.
pub async fn commit_cursor(pool: &DbPool, height: u64) -> WatchResult<()> {
    sqlx::query(
        r#"
        INSERT INTO scan_cursor (id, height, committed_at) VALUES (1, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(id) DO UPDATE SET height = excluded.height, committed_at = excluded.committed_at
        "#,
    )
    .bind(height as i64)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use tempfile::TempDir;

    async fn test_pool(dir: &TempDir) -> DbPool {
        let config = DatabaseConfig {
            path: dir.path().join("test.db"),
            max_connections: 2,
        };
        let pool = init_pool(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn wallet_add_list_remove() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;

        assert!(add_wallet(&pool, 1, "0xAbC0000000000000000000000000000000000001", "Main")
            .await
            .unwrap());
        // Duplicate pair is rejected
        assert!(!add_wallet(&pool, 1, "0xabc0000000000000000000000000000000000001", "Again")
            .await
            .unwrap());
        // Same address for a different user is fine
        assert!(add_wallet(&pool, 2, "0xabc0000000000000000000000000000000000001", "Shared")
            .await
            .unwrap());

        let wallets = list_user_wallets(&pool, 1).await.unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].1, "Main");

        let all = list_all_watched(&pool).await.unwrap();
        assert_eq!(all.len(), 2);

        assert!(remove_wallet(&pool, 1, "0xABC0000000000000000000000000000000000001")
            .await
            .unwrap());
        assert!(!remove_wallet(&pool, 1, "0xabc0000000000000000000000000000000000001")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn cursor_roundtrip() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;

        assert_eq!(read_cursor(&pool).await.unwrap(), None);
        commit_cursor(&pool, 100).await.unwrap();
        assert_eq!(read_cursor(&pool).await.unwrap(), Some(100));
        commit_cursor(&pool, 105).await.unwrap();
        assert_eq!(read_cursor(&pool).await.unwrap(), Some(105));
    }

    #[tokio::test]
    async fn cursor_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("persist.db"),
            max_connections: 2,
        };

        {
            let pool = init_pool(&config).await.unwrap();
            run_migrations(&pool).await.unwrap();
            commit_cursor(&pool, 42).await.unwrap();
            pool.close().await;
        }

        let pool = init_pool(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert_eq!(read_cursor(&pool).await.unwrap(), Some(42));
    }
}
