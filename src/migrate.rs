use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an open pool. Safe to run repeatedly.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Field columns are TEXT: values are stored exactly as extracted.
    // du_json holds the raw model reply.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS receipts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_sha TEXT NOT NULL UNIQUE,
            source_path TEXT NOT NULL,
            merchant TEXT,
            receipt_date TEXT,
            total_amount TEXT,
            currency TEXT,
            ocr_text TEXT,
            ocr_json TEXT,
            du_json TEXT,
            meta_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_receipts_updated_at ON receipts(updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
