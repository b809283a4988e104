//! Persisted block store.
//!
//! The [`BlockStore`] trait is the only way the synchronizer, content service
//! and diagnostics touch persisted state. All mutation goes through
//! [`replace_blocks`](BlockStore::replace_blocks), which must apply the
//! delete, insert and file-record upsert for one topic code as a single
//! all-or-nothing unit.
//!
//! Topic codes are stored in the form returned by
//! [`normalize_code`](crate::fingerprint::normalize_code); implementations
//! normalize every code argument the same way.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ContentError;
use crate::models::{ContentBlockRecord, ContentFileRecord, ModuleCode, StageId};

pub use memory::InMemoryBlockStore;
pub use sqlite::SqliteBlockStore;

/// A code in the store with the number of blocks it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeCount {
    pub topic_code: String,
    pub blocks: i64,
}

/// Store-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub codes: i64,
    pub blocks: i64,
    pub files: i64,
    pub by_stage: Vec<(StageId, i64)>,
    pub by_module: Vec<(ModuleCode, i64)>,
    /// Most recent file-record update, Unix seconds.
    pub last_sync: Option<i64>,
}

/// Abstract storage backend for content blocks.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`file_record`](BlockStore::file_record) | Last-synced file and hash for a code |
/// | [`block_count`](BlockStore::block_count) | Number of blocks held for a code |
/// | [`replace_blocks`](BlockStore::replace_blocks) | Atomically swap a code's block set |
/// | [`blocks`](BlockStore::blocks) | Read blocks, optionally filtered |
/// | [`similar_codes`](BlockStore::similar_codes) | Codes containing a fragment |
/// | [`stats`](BlockStore::stats) | Store-wide counts |
#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn file_record(&self, code: &str) -> Result<Option<ContentFileRecord>, ContentError>;

    async fn block_count(&self, code: &str) -> Result<i64, ContentError>;

    /// Delete every block for `file.topic_code`, insert `blocks`, and upsert
    /// `file`, all or nothing. Returns the number of blocks inserted.
    ///
    /// Every block must carry `file.topic_code` and keys must be unique.
    async fn replace_blocks(
        &self,
        file: &ContentFileRecord,
        blocks: &[ContentBlockRecord],
    ) -> Result<usize, ContentError>;

    /// Blocks for `code` ordered by stage then module.
    async fn blocks(
        &self,
        code: &str,
        stage: Option<StageId>,
        module: Option<ModuleCode>,
    ) -> Result<Vec<ContentBlockRecord>, ContentError>;

    /// Codes whose text contains `fragment` (case-insensitive), at most `limit`.
    async fn similar_codes(
        &self,
        fragment: &str,
        limit: i64,
    ) -> Result<Vec<CodeCount>, ContentError>;

    async fn stats(&self) -> Result<StoreStats, ContentError>;
}
