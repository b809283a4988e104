//! Block synchronization.
//!
//! Reconciles a topic's parsed document against the block store:
//!
//! 1. locate and fingerprint the document;
//! 2. skip when the stored file hash matches and blocks are present;
//! 3. otherwise parse, refuse empty results, and swap the code's whole block
//!    set in one transaction.
//!
//! Blocks are identified by position (stage × module), so a resync deletes
//! and re-inserts instead of diffing. [`Synchronizer::sync_all`] runs every
//! document in the content directory, bounding each code with a timeout and
//! collecting failures instead of stopping at the first one.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::error::ContentError;
use crate::fingerprint::{normalize_code, BlockKey};
use crate::locator::{code_from_file_name, FileLocator};
use crate::models::{ContentBlockRecord, ContentFileRecord, ParsedDocument, SourceDocument};
use crate::parser::parse;
use crate::store::{BlockStore, SqliteBlockStore};

/// Knobs for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Re-import even when the fingerprint is unchanged.
    pub force: bool,
    /// Parse and count without writing.
    pub dry_run: bool,
    /// Per-code bound used by [`Synchronizer::sync_all`].
    pub timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            dry_run: false,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a successful single-code sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Document unchanged since the last sync; nothing was written.
    Skipped { file_name: String },
    /// The code's block set was replaced.
    Written { file_name: String, blocks: usize },
    /// Dry run: this many blocks would have been written.
    DryRun { file_name: String, blocks: usize },
}

impl SyncOutcome {
    pub fn blocks_written(&self) -> usize {
        match self {
            SyncOutcome::Written { blocks, .. } => *blocks,
            _ => 0,
        }
    }
}

/// One code's line in a [`SyncReport`].
#[derive(Debug, Clone, Serialize)]
pub struct CodeSyncResult {
    pub code: String,
    pub file_name: String,
    /// `written`, `skipped`, `dry_run` or `failed`.
    pub status: &'static str,
    pub blocks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CodeSyncResult {
    fn from_outcome(code: String, outcome: SyncOutcome) -> Self {
        let (status, file_name, blocks) = match outcome {
            SyncOutcome::Skipped { file_name } => ("skipped", file_name, 0),
            SyncOutcome::Written { file_name, blocks } => ("written", file_name, blocks),
            SyncOutcome::DryRun { file_name, blocks } => ("dry_run", file_name, blocks),
        };
        Self {
            code,
            file_name,
            status,
            blocks,
            kind: None,
            error: None,
        }
    }

    fn failed(code: String, file_name: String, err: &ContentError) -> Self {
        Self {
            code,
            file_name,
            status: "failed",
            blocks: 0,
            kind: Some(err.kind()),
            error: Some(err.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == "failed"
    }
}

/// Summary of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub total_files: usize,
    pub codes: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    pub blocks_written: usize,
    /// Document counts per chapter (the code's first dotted segment).
    pub chapters: BTreeMap<String, usize>,
    /// Files whose names do not start with a topic code.
    pub unrecognized_files: Vec<String>,
    pub results: Vec<CodeSyncResult>,
    pub generated_at: String,
}

impl SyncReport {
    pub fn failures(&self) -> impl Iterator<Item = &CodeSyncResult> {
        self.results.iter().filter(|r| r.is_failed())
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

pub struct Synchronizer {
    locator: FileLocator,
    store: Arc<dyn BlockStore>,
    options: SyncOptions,
    /// Serializes concurrent syncs of the same code.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Synchronizer {
    pub fn new(locator: FileLocator, store: Arc<dyn BlockStore>, options: SyncOptions) -> Self {
        Self {
            locator,
            store,
            options,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn lock_for(&self, code: &str) -> CodeLock<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks.entry(code.to_string()).or_default().clone();
        CodeLock {
            table: &self.locks,
            code: code.to_string(),
            lock,
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Sync one topic code.
    pub async fn sync_one(&self, code: &str) -> Result<SyncOutcome, ContentError> {
        let code = normalize_code(code);
        let entry = self.lock_for(&code);
        let _guard = entry.lock.lock().await;

        let locator = self.locator.clone();
        let lookup = code.clone();
        let doc = run_blocking(move || locator.load(&lookup)).await?;

        if !self.options.force && self.is_unchanged(&code, &doc).await? {
            tracing::debug!(code = %code, file = %doc.file_name, "document unchanged, skipping");
            return Ok(SyncOutcome::Skipped {
                file_name: doc.file_name,
            });
        }

        let text = doc.raw_text.clone();
        let parsed = run_blocking(move || Ok(parse(&text))).await?;
        if parsed.module_count() == 0 {
            tracing::warn!(
                code = %code,
                file = %doc.file_name,
                stages = parsed.stages.len(),
                "document parsed to zero module blocks; store left untouched"
            );
            return Err(ContentError::EmptyParse {
                code,
                file_name: doc.file_name,
            });
        }

        let now = chrono::Utc::now().timestamp();
        let blocks = block_records(&code, &doc, &parsed, now);

        if self.options.dry_run {
            return Ok(SyncOutcome::DryRun {
                file_name: doc.file_name,
                blocks: blocks.len(),
            });
        }

        let file = ContentFileRecord {
            topic_code: code.clone(),
            file_name: doc.file_name.clone(),
            file_hash: doc.content_hash.to_string(),
            raw_content: doc.raw_text,
            updated_at: now,
        };
        let written = self.store.replace_blocks(&file, &blocks).await?;

        tracing::info!(code = %code, file = %doc.file_name, blocks = written, "synced content blocks");
        Ok(SyncOutcome::Written {
            file_name: doc.file_name,
            blocks: written,
        })
    }

    /// The stored hash matches and the store still holds blocks for the code.
    ///
    /// A matching hash with zero blocks means an earlier run recorded the
    /// file without its blocks; that case is re-imported.
    async fn is_unchanged(&self, code: &str, doc: &SourceDocument) -> Result<bool, ContentError> {
        let Some(record) = self.store.file_record(code).await? else {
            return Ok(false);
        };
        if !doc.content_hash.matches(&record.file_hash) {
            return Ok(false);
        }
        let blocks = self.store.block_count(code).await?;
        if blocks == 0 {
            tracing::warn!(code = %code, "file unchanged but store has no blocks, re-importing");
        }
        Ok(blocks > 0)
    }

    /// [`sync_one`](Self::sync_one) bounded by the configured timeout.
    pub async fn sync_one_bounded(&self, code: &str) -> Result<SyncOutcome, ContentError> {
        let timeout = self.options.timeout;
        match tokio::time::timeout(timeout, self.sync_one(code)).await {
            Ok(result) => result,
            Err(_) => Err(ContentError::Timeout {
                code: code.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Sync every document in the content directory.
    ///
    /// Only a failure to list the directory aborts the batch; per-code
    /// failures are recorded in the report.
    pub async fn sync_all(&self) -> Result<SyncReport, ContentError> {
        let locator = self.locator.clone();
        let files = run_blocking(move || locator.documents()).await?;

        let mut chapters: BTreeMap<String, usize> = BTreeMap::new();
        let mut unrecognized_files = Vec::new();
        // First file per code; duplicates surface as `Ambiguous` from the locator.
        let mut codes: BTreeMap<String, String> = BTreeMap::new();
        for file in &files {
            match code_from_file_name(&file.file_name) {
                Some(code) => {
                    let chapter = code.split('.').next().unwrap_or(&code).to_string();
                    *chapters.entry(chapter).or_default() += 1;
                    codes.entry(code).or_insert_with(|| file.file_name.clone());
                }
                None => {
                    tracing::warn!(file = %file.file_name, "cannot infer topic code from file name");
                    unrecognized_files.push(file.file_name.clone());
                }
            }
        }

        let mut results = Vec::with_capacity(codes.len());
        let (mut written, mut skipped, mut failed, mut blocks_written) = (0, 0, 0, 0);

        for (code, file_name) in codes {
            let result = match self.sync_one_bounded(&code).await {
                Ok(outcome) => {
                    match &outcome {
                        SyncOutcome::Skipped { .. } => skipped += 1,
                        SyncOutcome::Written { blocks, .. } => {
                            written += 1;
                            blocks_written += blocks;
                        }
                        SyncOutcome::DryRun { .. } => written += 1,
                    }
                    CodeSyncResult::from_outcome(code, outcome)
                }
                Err(e) => {
                    tracing::error!(code = %code, kind = e.kind(), error = %e, "sync failed");
                    failed += 1;
                    CodeSyncResult::failed(code, file_name, &e)
                }
            };
            results.push(result);
        }

        Ok(SyncReport {
            total_files: files.len(),
            codes: results.len(),
            written,
            skipped,
            failed,
            blocks_written,
            chapters,
            unrecognized_files,
            results,
            generated_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

/// A handle on one code's entry in the lock table.
///
/// Dropping the last handle removes the entry, so the table only holds codes
/// with a sync in flight. Cancellation by a timeout drops it too.
struct CodeLock<'a> {
    table: &'a Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    code: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for CodeLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.table.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the table, one here: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.code);
        }
    }
}

/// Project a parsed document onto store records.
///
/// When the same stage × module appears more than once, the later block
/// wins, so the result holds at most one record per key.
pub fn block_records(
    code: &str,
    doc: &SourceDocument,
    parsed: &ParsedDocument,
    updated_at: i64,
) -> Vec<ContentBlockRecord> {
    let mut by_key: BTreeMap<BlockKey, ContentBlockRecord> = BTreeMap::new();
    for (stage, module) in parsed.blocks() {
        let key = BlockKey::new(code, stage, module.module_code);
        let record = ContentBlockRecord {
            topic_code: key.topic_code.clone(),
            stage,
            module_code: module.module_code,
            title: module.module_title.clone(),
            body: module.body.clone(),
            source_file_name: doc.file_name.clone(),
            source_file_hash: doc.content_hash.to_string(),
            updated_at,
        };
        if by_key.insert(key.clone(), record).is_some() {
            tracing::warn!(block = %key, file = %doc.file_name, "duplicate block, keeping the later one");
        }
    }
    by_key.into_values().collect()
}

async fn run_blocking<T, F>(f: F) -> Result<T, ContentError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ContentError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ContentError::Internal(e.to_string()))?
}

/// CLI entry point for `kpb sync`.
pub async fn run_sync(config: &Config, code: Option<&str>, force: bool, dry_run: bool) -> Result<()> {
    let store = SqliteBlockStore::open(config).await?;
    let locator = FileLocator::from_config(&config.content)?;
    let options = SyncOptions {
        force,
        dry_run,
        timeout: Duration::from_secs(config.sync.timeout_secs),
    };
    let sync = Synchronizer::new(locator, Arc::new(store.clone()), options);

    let result = match code {
        Some(code) => run_sync_one(&sync, code).await,
        None => run_sync_all(&sync, config).await,
    };

    store.close().await;
    result
}

async fn run_sync_one(sync: &Synchronizer, code: &str) -> Result<()> {
    let outcome = sync.sync_one(code).await?;
    println!("sync {}", normalize_code(code));
    match outcome {
        SyncOutcome::Skipped { file_name } => {
            println!("  file: {}", file_name);
            println!("  skipped (unchanged)");
        }
        SyncOutcome::Written { file_name, blocks } => {
            println!("  file: {}", file_name);
            println!("  blocks written: {}", blocks);
        }
        SyncOutcome::DryRun { file_name, blocks } => {
            println!("  file: {}", file_name);
            println!("  blocks (dry-run): {}", blocks);
        }
    }
    println!("ok");
    Ok(())
}

async fn run_sync_all(sync: &Synchronizer, config: &Config) -> Result<()> {
    let report = sync.sync_all().await?;

    if sync.options().dry_run {
        println!("sync all (dry-run)");
    } else {
        println!("sync all");
    }
    println!("  files: {}", report.total_files);
    println!("  codes: {}", report.codes);
    println!("  written: {}", report.written);
    println!("  skipped (unchanged): {}", report.skipped);
    println!("  failed: {}", report.failed);
    println!("  blocks written: {}", report.blocks_written);
    if !report.unrecognized_files.is_empty() {
        println!("  unrecognized files: {}", report.unrecognized_files.len());
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!();
        println!("failed codes:");
        for f in failures {
            println!(
                "  - {} ({}): {}",
                f.code,
                f.file_name,
                f.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if let Some(path) = &config.sync.report_path {
        report.write_json(path)?;
        println!("  report: {}", path.display());
    }

    println!("ok");
    Ok(())
}
