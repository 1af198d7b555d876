use anyhow::{bail, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// File name of the context store inside the configured store dir.
pub const STORE_DB_FILE: &str = "store.db";

/// Open the context store for writing, creating the directory and
/// database on first use.
pub async fn connect_store(dir: &Path) -> Result<SqlitePool> {
    std::fs::create_dir_all(dir)?;
    let db_path = dir.join(STORE_DB_FILE);

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_store_schema(&pool).await?;
    Ok(pool)
}

/// Open an existing context store for retrieval. A store that was
/// never built is an error, not an empty result.
pub async fn open_store(dir: &Path) -> Result<SqlitePool> {
    let db_path = dir.join(STORE_DB_FILE);
    if !db_path.exists() {
        bail!("Context store not found at {}", db_path.display());
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn init_store_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_type TEXT NOT NULL,
            seq INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(doc_type, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_type ON chunks(doc_type)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connect_creates_store_and_schema() {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("context_store");

        let pool = connect_store(&store_dir).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
        pool.close().await;

        assert!(store_dir.join(STORE_DB_FILE).exists());
    }

    #[tokio::test]
    async fn test_open_missing_store_fails() {
        let dir = TempDir::new().unwrap();
        let err = open_store(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("Context store not found"));
    }

    #[tokio::test]
    async fn test_open_after_connect_succeeds() {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("context_store");

        let pool = connect_store(&store_dir).await.unwrap();
        pool.close().await;

        let pool = open_store(&store_dir).await.unwrap();
        pool.close().await;
    }
}
