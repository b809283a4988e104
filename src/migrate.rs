use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create tables and indexes if missing. Idempotent.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // One row per (code, stage, module)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_blocks (
            topic_code TEXT NOT NULL,
            stage TEXT NOT NULL,
            module_code TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            source_file_name TEXT NOT NULL,
            source_file_hash TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(topic_code, stage, module_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Last-synced file per code, used only for change detection
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_files (
            topic_code TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            raw_content TEXT NOT NULL DEFAULT '',
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_content_blocks_code ON content_blocks(topic_code)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_content_files_updated_at ON content_files(updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
