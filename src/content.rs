//! Content retrieval.
//!
//! `get_content` always reads and parses the file on disk, so edits are
//! visible immediately without a sync. Persisted blocks are served by
//! `get_blocks`, and `get_content_or_stored` falls back to them when the
//! file has gone missing.
//!
//! Used by `kpb show`, `kpb blocks` and the `/content` and `/blocks` HTTP
//! routes.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::error::ContentError;
use crate::fingerprint::normalize_code;
use crate::locator::FileLocator;
use crate::models::{ContentBlockRecord, ModuleBlock, ModuleCode, Stage, StageId};
use crate::parser::parse;
use crate::store::{BlockStore, SqliteBlockStore};

/// Where a [`ParsedContent`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    File,
    Store,
}

/// Parsed content for one topic code.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedContent {
    pub code: String,
    pub file_name: String,
    pub file_hash: String,
    pub source: ContentSource,
    pub stages: Vec<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
}

impl ParsedContent {
    pub fn module_count(&self) -> usize {
        self.stages.iter().map(|s| s.modules.len()).sum()
    }
}

pub struct ContentService {
    locator: FileLocator,
    store: Option<Arc<dyn BlockStore>>,
}

impl ContentService {
    /// Service that only reads files.
    pub fn new(locator: FileLocator) -> Self {
        Self {
            locator,
            store: None,
        }
    }

    pub fn with_store(locator: FileLocator, store: Arc<dyn BlockStore>) -> Self {
        Self {
            locator,
            store: Some(store),
        }
    }

    pub fn locator(&self) -> &FileLocator {
        &self.locator
    }

    /// Locate and parse the document for `code`. Never consults the store.
    pub async fn get_content(&self, code: &str) -> Result<ParsedContent, ContentError> {
        let locator = self.locator.clone();
        let lookup = code.to_string();
        let (doc, parsed) = tokio::task::spawn_blocking(move || {
            let doc = locator.load(&lookup)?;
            let parsed = parse(&doc.raw_text);
            Ok::<_, ContentError>((doc, parsed))
        })
        .await
        .map_err(|e| ContentError::Internal(e.to_string()))??;

        Ok(ParsedContent {
            code: normalize_code(code),
            file_name: doc.file_name,
            file_hash: doc.content_hash.to_string(),
            source: ContentSource::File,
            stages: parsed.stages,
            raw_content: Some(doc.raw_text),
        })
    }

    /// Like [`get_content`](Self::get_content), but falls back to persisted
    /// blocks when no file matches the code.
    pub async fn get_content_or_stored(&self, code: &str) -> Result<ParsedContent, ContentError> {
        match self.get_content(code).await {
            Err(ContentError::NotFound(missing)) => {
                let Some(store) = &self.store else {
                    return Err(ContentError::NotFound(missing));
                };
                let records = store.blocks(code, None, None).await?;
                if records.is_empty() {
                    return Err(ContentError::NotFound(missing));
                }
                tracing::debug!(code, blocks = records.len(), "serving content from store");
                let file = store.file_record(code).await?;
                Ok(ParsedContent {
                    code: normalize_code(code),
                    file_name: file
                        .as_ref()
                        .map(|f| f.file_name.clone())
                        .unwrap_or_else(|| records[0].source_file_name.clone()),
                    file_hash: file
                        .map(|f| f.file_hash)
                        .unwrap_or_else(|| records[0].source_file_hash.clone()),
                    source: ContentSource::Store,
                    stages: stages_from_records(&records),
                    raw_content: None,
                })
            }
            other => other,
        }
    }

    /// Persisted blocks for `code`, optionally filtered.
    ///
    /// An empty result is `NotFound`.
    pub async fn get_blocks(
        &self,
        code: &str,
        stage: Option<StageId>,
        module: Option<ModuleCode>,
    ) -> Result<Vec<ContentBlockRecord>, ContentError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| ContentError::Internal("no block store configured".to_string()))?;
        let blocks = store.blocks(code, stage, module).await?;
        if blocks.is_empty() {
            return Err(ContentError::NotFound(code.trim().to_string()));
        }
        Ok(blocks)
    }
}

/// Regroup persisted records into stages, using canonical stage titles.
fn stages_from_records(records: &[ContentBlockRecord]) -> Vec<Stage> {
    let mut grouped: BTreeMap<StageId, Vec<ModuleBlock>> = BTreeMap::new();
    for r in records {
        grouped.entry(r.stage).or_default().push(ModuleBlock {
            module_code: r.module_code,
            module_title: r.title.clone(),
            body: r.body.clone(),
        });
    }
    grouped
        .into_iter()
        .map(|(stage_id, mut modules)| {
            modules.sort_by_key(|m| m.module_code);
            Stage {
                stage_id,
                stage_title: stage_id.canonical_title().to_string(),
                preamble: None,
                modules,
            }
        })
        .collect()
}

/// CLI entry point for `kpb show`.
pub async fn run_show(config: &Config, code: &str, json: bool) -> Result<()> {
    let store = SqliteBlockStore::open(config).await?;
    let service = ContentService::with_store(
        FileLocator::from_config(&config.content)?,
        Arc::new(store.clone()),
    );
    let result = service.get_content_or_stored(code).await;
    store.close().await;
    let content = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&content)?);
        return Ok(());
    }

    println!("--- {} ---", content.code);
    println!("file:    {}", content.file_name);
    println!("hash:    {}", content.file_hash);
    if content.source == ContentSource::Store {
        println!("source:  store (file not found on disk)");
    }
    println!("modules: {}", content.module_count());
    for stage in &content.stages {
        println!();
        println!("== {} [{}] ==", stage.stage_title, stage.stage_id);
        if let Some(preamble) = &stage.preamble {
            println!("{}", preamble);
        }
        for module in &stage.modules {
            println!();
            println!("[{}] {}", module.module_code, module.module_title);
            println!("{}", module.body);
        }
    }
    Ok(())
}

/// CLI entry point for `kpb blocks`.
pub async fn run_blocks(
    config: &Config,
    code: &str,
    stage: Option<StageId>,
    module: Option<ModuleCode>,
    json: bool,
) -> Result<()> {
    let store = SqliteBlockStore::open(config).await?;
    let service = ContentService::with_store(
        FileLocator::from_config(&config.content)?,
        Arc::new(store.clone()),
    );
    let result = service.get_blocks(code, stage, module).await;
    store.close().await;
    let blocks = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&blocks)?);
        return Ok(());
    }

    println!("--- Blocks ({}) ---", blocks.len());
    for b in &blocks {
        println!(
            "[{} {} {}] {}  (from {}, {})",
            b.topic_code,
            b.stage,
            b.module_code,
            b.title,
            b.source_file_name,
            crate::stats::format_ts_iso(b.updated_at)
        );
        println!("{}", b.body);
        println!();
    }
    Ok(())
}
