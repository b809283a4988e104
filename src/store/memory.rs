//! In-memory [`BlockStore`] for tests.
//!
//! State lives behind one `std::sync::RwLock`, so `replace_blocks` is atomic
//! with respect to readers. Writes can be made to fail on demand to exercise
//! store-failure paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::ContentError;
use crate::fingerprint::{normalize_code, BlockKey};
use crate::models::{ContentBlockRecord, ContentFileRecord, ModuleCode, StageId};

use super::{BlockStore, CodeCount, StoreStats};

#[derive(Default)]
struct State {
    blocks: BTreeMap<BlockKey, ContentBlockRecord>,
    files: BTreeMap<String, ContentFileRecord>,
}

#[derive(Default)]
pub struct InMemoryBlockStore {
    state: RwLock<State>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `replace_blocks` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent writes fail with [`ContentError::Store`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, ContentError> {
        self.state
            .read()
            .map_err(|_| ContentError::Store("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl BlockStore for InMemoryBlockStore {
    async fn file_record(&self, code: &str) -> Result<Option<ContentFileRecord>, ContentError> {
        Ok(self.read()?.files.get(&normalize_code(code)).cloned())
    }

    async fn block_count(&self, code: &str) -> Result<i64, ContentError> {
        let code = normalize_code(code);
        Ok(self
            .read()?
            .blocks
            .keys()
            .filter(|k| k.topic_code == code)
            .count() as i64)
    }

    async fn replace_blocks(
        &self,
        file: &ContentFileRecord,
        blocks: &[ContentBlockRecord],
    ) -> Result<usize, ContentError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ContentError::Store("injected write failure".to_string()));
        }

        let code = normalize_code(&file.topic_code);

        // Build the new set first so a bad batch leaves the state untouched.
        let mut fresh = BTreeMap::new();
        for block in blocks {
            let key = BlockKey::new(&code, block.stage, block.module_code);
            if fresh.contains_key(&key) {
                return Err(ContentError::Store(format!("duplicate block key {}", key)));
            }
            let mut stored = block.clone();
            stored.topic_code = code.clone();
            fresh.insert(key, stored);
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| ContentError::Store("in-memory store lock poisoned".to_string()))?;
        state.blocks.retain(|k, _| k.topic_code != code);
        state.blocks.extend(fresh);
        let mut file = file.clone();
        file.topic_code = code.clone();
        state.files.insert(code, file);

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(blocks.len())
    }

    async fn blocks(
        &self,
        code: &str,
        stage: Option<StageId>,
        module: Option<ModuleCode>,
    ) -> Result<Vec<ContentBlockRecord>, ContentError> {
        let code = normalize_code(code);
        Ok(self
            .read()?
            .blocks
            .iter()
            .filter(|(k, _)| k.topic_code == code)
            .filter(|(k, _)| stage.map_or(true, |s| k.stage == s))
            .filter(|(k, _)| module.map_or(true, |m| k.module_code == m))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn similar_codes(
        &self,
        fragment: &str,
        limit: i64,
    ) -> Result<Vec<CodeCount>, ContentError> {
        let needle = fragment.trim().to_uppercase();
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for key in self.read()?.blocks.keys() {
            if key.topic_code.contains(&needle) {
                *counts.entry(key.topic_code.clone()).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(topic_code, blocks)| CodeCount { topic_code, blocks })
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats, ContentError> {
        let state = self.read()?;
        let mut codes: BTreeSet<&str> = BTreeSet::new();
        let mut by_stage: BTreeMap<StageId, i64> = BTreeMap::new();
        let mut by_module: BTreeMap<ModuleCode, i64> = BTreeMap::new();
        for key in state.blocks.keys() {
            codes.insert(&key.topic_code);
            *by_stage.entry(key.stage).or_default() += 1;
            *by_module.entry(key.module_code).or_default() += 1;
        }
        Ok(StoreStats {
            codes: codes.len() as i64,
            blocks: state.blocks.len() as i64,
            files: state.files.len() as i64,
            by_stage: by_stage.into_iter().collect(),
            by_module: by_module.into_iter().collect(),
            last_sync: state.files.values().map(|f| f.updated_at).max(),
        })
    }
}
