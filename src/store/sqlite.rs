//! SQLite-backed [`BlockStore`].

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::error::ContentError;
use crate::fingerprint::normalize_code;
use crate::migrate::ensure_schema;
use crate::models::{ContentBlockRecord, ContentFileRecord, ModuleCode, StageId};

use super::{BlockStore, CodeCount, StoreStats};

/// SQLite implementation of [`BlockStore`] over the `content_blocks` and
/// `content_files` tables.
#[derive(Clone)]
pub struct SqliteBlockStore {
    pool: SqlitePool,
}

impl SqliteBlockStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect using `[db].path` and make sure the schema exists.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = crate::db::connect(config).await?;
        ensure_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn block_from_row(row: &SqliteRow) -> Result<ContentBlockRecord, ContentError> {
    let stage: String = row.get("stage");
    let module_code: String = row.get("module_code");
    Ok(ContentBlockRecord {
        topic_code: row.get("topic_code"),
        stage: stage.parse().map_err(ContentError::Store)?,
        module_code: module_code.parse().map_err(ContentError::Store)?,
        title: row.get("title"),
        body: row.get("body"),
        source_file_name: row.get("source_file_name"),
        source_file_hash: row.get("source_file_hash"),
        updated_at: row.get("updated_at"),
    })
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl BlockStore for SqliteBlockStore {
    async fn file_record(&self, code: &str) -> Result<Option<ContentFileRecord>, ContentError> {
        let row = sqlx::query(
            "SELECT topic_code, file_name, file_hash, raw_content, updated_at FROM content_files WHERE topic_code = ?",
        )
        .bind(normalize_code(code))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ContentFileRecord {
            topic_code: r.get("topic_code"),
            file_name: r.get("file_name"),
            file_hash: r.get("file_hash"),
            raw_content: r.get("raw_content"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn block_count(&self, code: &str) -> Result<i64, ContentError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_blocks WHERE topic_code = ?")
            .bind(normalize_code(code))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn replace_blocks(
        &self,
        file: &ContentFileRecord,
        blocks: &[ContentBlockRecord],
    ) -> Result<usize, ContentError> {
        let code = normalize_code(&file.topic_code);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM content_blocks WHERE topic_code = ?")
            .bind(&code)
            .execute(&mut *tx)
            .await?;

        for block in blocks {
            sqlx::query(
                r#"
                INSERT INTO content_blocks (topic_code, stage, module_code, title, body,
                                            source_file_name, source_file_hash, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&code)
            .bind(block.stage.as_str())
            .bind(block.module_code.as_str())
            .bind(&block.title)
            .bind(&block.body)
            .bind(&block.source_file_name)
            .bind(&block.source_file_hash)
            .bind(block.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO content_files (topic_code, file_name, file_hash, raw_content, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(topic_code) DO UPDATE SET
                file_name = excluded.file_name,
                file_hash = excluded.file_hash,
                raw_content = excluded.raw_content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&code)
        .bind(&file.file_name)
        .bind(&file.file_hash)
        .bind(&file.raw_content)
        .bind(file.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(blocks.len())
    }

    async fn blocks(
        &self,
        code: &str,
        stage: Option<StageId>,
        module: Option<ModuleCode>,
    ) -> Result<Vec<ContentBlockRecord>, ContentError> {
        let rows = sqlx::query(
            r#"
            SELECT topic_code, stage, module_code, title, body,
                   source_file_name, source_file_hash, updated_at
            FROM content_blocks
            WHERE topic_code = ?
              AND (? IS NULL OR stage = ?)
              AND (? IS NULL OR module_code = ?)
            ORDER BY stage, module_code
            "#,
        )
        .bind(normalize_code(code))
        .bind(stage.map(|s| s.as_str()))
        .bind(stage.map(|s| s.as_str()))
        .bind(module.map(|m| m.as_str()))
        .bind(module.map(|m| m.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(block_from_row).collect()
    }

    async fn similar_codes(
        &self,
        fragment: &str,
        limit: i64,
    ) -> Result<Vec<CodeCount>, ContentError> {
        let pattern = format!("%{}%", escape_like(fragment.trim()));
        let rows = sqlx::query(
            r#"
            SELECT topic_code, COUNT(*) AS blocks
            FROM content_blocks
            WHERE topic_code LIKE ? ESCAPE '\'
            GROUP BY topic_code
            ORDER BY topic_code
            LIMIT ?
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| CodeCount {
                topic_code: r.get("topic_code"),
                blocks: r.get("blocks"),
            })
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats, ContentError> {
        let codes: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT topic_code) FROM content_blocks")
            .fetch_one(&self.pool)
            .await?;
        let blocks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_blocks")
            .fetch_one(&self.pool)
            .await?;
        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_files")
            .fetch_one(&self.pool)
            .await?;
        let last_sync: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM content_files")
            .fetch_one(&self.pool)
            .await?;

        let stage_rows = sqlx::query(
            "SELECT stage, COUNT(*) AS n FROM content_blocks GROUP BY stage ORDER BY stage",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut by_stage: Vec<(StageId, i64)> = Vec::new();
        for row in &stage_rows {
            let stage: String = row.get("stage");
            by_stage.push((stage.parse().map_err(ContentError::Store)?, row.get("n")));
        }

        let module_rows = sqlx::query(
            "SELECT module_code, COUNT(*) AS n FROM content_blocks GROUP BY module_code ORDER BY module_code",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut by_module: Vec<(ModuleCode, i64)> = Vec::new();
        for row in &module_rows {
            let module: String = row.get("module_code");
            by_module.push((module.parse().map_err(ContentError::Store)?, row.get("n")));
        }

        Ok(StoreStats {
            codes,
            blocks,
            files,
            by_stage,
            by_module,
            last_sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(code: &str, stage: StageId, module: ModuleCode, body: &str) -> ContentBlockRecord {
        ContentBlockRecord {
            topic_code: code.to_string(),
            stage,
            module_code: module,
            title: format!("{} title", module),
            body: body.to_string(),
            source_file_name: format!("{}.txt", code.to_lowercase()),
            source_file_hash: "h1".to_string(),
            updated_at: 1_700_000_000,
        }
    }

    fn file(code: &str, hash: &str) -> ContentFileRecord {
        ContentFileRecord {
            topic_code: code.to_string(),
            file_name: format!("{}.txt", code.to_lowercase()),
            file_hash: hash.to_string(),
            raw_content: String::new(),
            updated_at: 1_700_000_000,
        }
    }

    async fn open(tmp: &TempDir) -> SqliteBlockStore {
        let config = Config::rooted_at(tmp.path());
        SqliteBlockStore::open(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_replace_then_read_ordered() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;

        let blocks = vec![
            record("C1", StageId::Stage2, ModuleCode::M05, "b"),
            record("C1", StageId::Stage1, ModuleCode::M03, "a2"),
            record("C1", StageId::Stage1, ModuleCode::M02, "a1"),
        ];
        let n = store.replace_blocks(&file("C1", "h1"), &blocks).await.unwrap();
        assert_eq!(n, 3);

        let read = store.blocks("c1", None, None).await.unwrap();
        let bodies: Vec<&str> = read.iter().map(|b| b.body.as_str()).collect();
        assert_eq!(bodies, vec!["a1", "a2", "b"]);

        let only = store
            .blocks("C1", Some(StageId::Stage1), Some(ModuleCode::M03))
            .await
            .unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].body, "a2");

        let record = store.file_record("c1").await.unwrap().unwrap();
        assert_eq!(record.file_hash, "h1");
    }

    #[tokio::test]
    async fn test_replace_removes_previous_set() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;

        store
            .replace_blocks(
                &file("C1", "h1"),
                &[
                    record("C1", StageId::Stage1, ModuleCode::M02, "old"),
                    record("C1", StageId::Stage1, ModuleCode::M03, "old"),
                ],
            )
            .await
            .unwrap();
        store
            .replace_blocks(&file("C2", "x"), &[record("C2", StageId::Stage1, ModuleCode::M02, "other")])
            .await
            .unwrap();
        store
            .replace_blocks(&file("C1", "h2"), &[record("C1", StageId::Stage3, ModuleCode::M06, "new")])
            .await
            .unwrap();

        assert_eq!(store.block_count("C1").await.unwrap(), 1);
        assert_eq!(store.block_count("C2").await.unwrap(), 1);
        assert_eq!(store.file_record("C1").await.unwrap().unwrap().file_hash, "h2");
    }

    #[tokio::test]
    async fn test_duplicate_key_rolls_back() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;

        store
            .replace_blocks(&file("C1", "h1"), &[record("C1", StageId::Stage1, ModuleCode::M02, "kept")])
            .await
            .unwrap();

        let dup = vec![
            record("C1", StageId::Stage1, ModuleCode::M03, "x"),
            record("C1", StageId::Stage1, ModuleCode::M03, "y"),
        ];
        let err = store.replace_blocks(&file("C1", "h2"), &dup).await.unwrap_err();
        assert!(matches!(err, ContentError::Store(_)));

        let blocks = store.blocks("C1", None, None).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].body, "kept");
        assert_eq!(store.file_record("C1").await.unwrap().unwrap().file_hash, "h1");
    }

    #[tokio::test]
    async fn test_similar_codes_and_stats() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;

        store
            .replace_blocks(&file("C8.4.10", "a"), &[record("C8.4.10", StageId::Stage1, ModuleCode::M02, "x")])
            .await
            .unwrap();
        store
            .replace_blocks(
                &file("C8.4.1", "b"),
                &[
                    record("C8.4.1", StageId::Stage1, ModuleCode::M02, "x"),
                    record("C8.4.1", StageId::Stage2, ModuleCode::M05, "y"),
                ],
            )
            .await
            .unwrap();

        let similar = store.similar_codes("8.4.1", 20).await.unwrap();
        let codes: Vec<&str> = similar.iter().map(|c| c.topic_code.as_str()).collect();
        assert_eq!(codes, vec!["C8.4.1", "C8.4.10"]);
        assert_eq!(similar[0].blocks, 2);

        assert!(store.similar_codes("9.9", 20).await.unwrap().is_empty());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.codes, 2);
        assert_eq!(stats.blocks, 3);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.by_stage, vec![(StageId::Stage1, 2), (StageId::Stage2, 1)]);
        assert_eq!(stats.by_module, vec![(ModuleCode::M02, 2), (ModuleCode::M05, 1)]);
        assert_eq!(stats.last_sync, Some(1_700_000_000));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("8.4_1%"), "8.4\\_1\\%");
    }
}
