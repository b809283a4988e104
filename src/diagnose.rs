//! Read-only troubleshooting for a single topic code.
//!
//! [`diagnose`] never fails: each section records what it could determine
//! and carries a `note` when something went wrong, so an operator can see in
//! one report whether the problem is the file, the parse or the store.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::fingerprint::{normalize_code, Fingerprint};
use crate::locator::FileLocator;
use crate::models::{ModuleCode, StageId};
use crate::parser::{looks_like_module_header, normalize_text, parse};
use crate::store::{BlockStore, CodeCount, SqliteBlockStore};

const PREVIEW_CHARS: usize = 200;
const SIMILAR_LIMIT: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub code: String,
    pub file: FileSection,
    pub parse: ParseSection,
    pub store: StoreSection,
    /// Stored codes containing the numeric part of `code`; filled only when
    /// the store holds no blocks for `code` itself.
    pub similar_codes: Vec<CodeCount>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileSection {
    pub dir: String,
    pub candidates: Vec<String>,
    pub chosen: Option<String>,
    pub fingerprint: Option<String>,
    pub preview: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseSection {
    pub stages: Vec<StageSummary>,
    pub modules: Vec<ModuleSummary>,
    /// Lines containing the module marker that did not parse as a header.
    /// Filled only when no module was found.
    pub unmatched_headers: Vec<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage_id: StageId,
    pub title: String,
    pub modules: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub stage_id: StageId,
    pub module_code: ModuleCode,
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSection {
    pub block_count: Option<i64>,
    pub stored_file: Option<String>,
    pub stored_hash: Option<String>,
    /// Whether the stored hash equals the on-disk fingerprint.
    pub up_to_date: Option<bool>,
    pub note: Option<String>,
}

/// Gather everything known about `code` without modifying anything.
pub async fn diagnose(locator: &FileLocator, store: &dyn BlockStore, code: &str) -> DiagnosticReport {
    let code = normalize_code(code);

    let inspect = {
        let locator = locator.clone();
        let code = code.clone();
        tokio::task::spawn_blocking(move || inspect_file(&locator, &code))
    };
    let (file, parse_section, on_disk) = match inspect.await {
        Ok(found) => found,
        Err(e) => {
            tracing::error!(code = %code, error = %e, "file inspection task failed");
            let file = FileSection {
                dir: locator.dir().display().to_string(),
                note: Some(format!("internal error: {e}")),
                ..FileSection::default()
            };
            let parse_section = ParseSection {
                note: Some("no document to parse".to_string()),
                ..ParseSection::default()
            };
            (file, parse_section, None)
        }
    };

    let mut store_section = StoreSection::default();
    match store.block_count(&code).await {
        Ok(n) => store_section.block_count = Some(n),
        Err(e) => store_section.note = Some(e.to_string()),
    }
    match store.file_record(&code).await {
        Ok(Some(record)) => {
            store_section.up_to_date = on_disk.as_ref().map(|fp| fp.matches(&record.file_hash));
            store_section.stored_file = Some(record.file_name);
            store_section.stored_hash = Some(record.file_hash);
        }
        Ok(None) => {
            store_section.note.get_or_insert_with(|| "never synced".to_string());
        }
        Err(e) => store_section.note = Some(e.to_string()),
    }

    let mut similar_codes = Vec::new();
    if store_section.block_count == Some(0) {
        let numeric = code.trim_start_matches(|c: char| c.is_ascii_alphabetic());
        if !numeric.is_empty() {
            match store.similar_codes(numeric, SIMILAR_LIMIT).await {
                Ok(found) => similar_codes = found,
                Err(e) => tracing::warn!(code = %code, error = %e, "similar code lookup failed"),
            }
        }
    }

    DiagnosticReport {
        code,
        file,
        parse: parse_section,
        store: store_section,
        similar_codes,
    }
}

/// Directory listing, file read and parse for one code. Blocking.
fn inspect_file(locator: &FileLocator, code: &str) -> (FileSection, ParseSection, Option<Fingerprint>) {
    let mut file = FileSection {
        dir: locator.dir().display().to_string(),
        ..FileSection::default()
    };
    let mut parse_section = ParseSection::default();

    let doc = match locator.candidates(code) {
        Err(e) => {
            file.note = Some(e.to_string());
            None
        }
        Ok(found) => {
            file.candidates = found.iter().map(|f| f.file_name.clone()).collect();
            match found.as_slice() {
                [] => {
                    file.note = Some(format!("no file name starts with {}", code.to_lowercase()));
                    None
                }
                [only] => match locator.read(&only.path) {
                    Ok(doc) => Some(doc),
                    Err(e) => {
                        file.note = Some(e.to_string());
                        None
                    }
                },
                _ => {
                    file.note = Some(format!(
                        "{} files match; rename or exclude all but one",
                        found.len()
                    ));
                    None
                }
            }
        }
    };

    let Some(doc) = doc else {
        parse_section.note = Some("no document to parse".to_string());
        return (file, parse_section, None);
    };

    file.chosen = Some(doc.file_name.clone());
    file.fingerprint = Some(doc.content_hash.to_string());
    file.preview = Some(doc.raw_text.chars().take(PREVIEW_CHARS).collect());

    let parsed = parse(&doc.raw_text);
    parse_section.stages = parsed
        .stages
        .iter()
        .map(|s| StageSummary {
            stage_id: s.stage_id,
            title: s.stage_title.clone(),
            modules: s.modules.len(),
        })
        .collect();
    parse_section.modules = parsed
        .blocks()
        .map(|(stage_id, m)| ModuleSummary {
            stage_id,
            module_code: m.module_code,
            title: m.module_title.clone(),
        })
        .collect();

    if parsed.module_count() == 0 {
        parse_section.unmatched_headers = normalize_text(&doc.raw_text)
            .lines()
            .filter(|l| looks_like_module_header(l))
            .map(|l| l.trim().to_string())
            .collect();
        parse_section.note = Some(if parsed.stages.is_empty() {
            "no stage header found".to_string()
        } else {
            "stages found but no module header matched".to_string()
        });
    }

    (file, parse_section, Some(doc.content_hash))
}

impl DiagnosticReport {
    /// Plain-text rendering for the CLI.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut line = |s: String| {
            out.push_str(&s);
            out.push('\n');
        };

        line(format!("diagnose {}", self.code));
        line(String::new());
        line("[file]".to_string());
        line(format!("  dir:        {}", self.file.dir));
        line(format!(
            "  candidates: {}",
            if self.file.candidates.is_empty() {
                "(none)".to_string()
            } else {
                self.file.candidates.join(", ")
            }
        ));
        if let Some(chosen) = &self.file.chosen {
            line(format!("  chosen:     {}", chosen));
        }
        if let Some(fp) = &self.file.fingerprint {
            line(format!("  sha256:     {}", fp));
        }
        if let Some(note) = &self.file.note {
            line(format!("  note:       {}", note));
        }
        if let Some(preview) = &self.file.preview {
            line("  preview:".to_string());
            for l in preview.lines() {
                line(format!("    | {}", l));
            }
        }

        line(String::new());
        line("[parse]".to_string());
        for s in &self.parse.stages {
            line(format!("  {} {} ({} modules)", s.stage_id, s.title, s.modules));
        }
        for m in &self.parse.modules {
            line(format!("    {} {} {}", m.stage_id, m.module_code, m.title));
        }
        for l in &self.parse.unmatched_headers {
            line(format!("  unmatched: {}", l));
        }
        if let Some(note) = &self.parse.note {
            line(format!("  note: {}", note));
        }

        line(String::new());
        line("[store]".to_string());
        if let Some(n) = self.store.block_count {
            line(format!("  blocks:     {}", n));
        }
        if let Some(name) = &self.store.stored_file {
            line(format!("  file:       {}", name));
        }
        if let Some(hash) = &self.store.stored_hash {
            line(format!("  sha256:     {}", hash));
        }
        if let Some(up) = self.store.up_to_date {
            line(format!("  up to date: {}", if up { "yes" } else { "no" }));
        }
        if let Some(note) = &self.store.note {
            line(format!("  note:       {}", note));
        }

        if !self.similar_codes.is_empty() {
            line(String::new());
            line("[similar codes in store]".to_string());
            for c in &self.similar_codes {
                line(format!("  {} ({} blocks)", c.topic_code, c.blocks));
            }
        }
        out
    }
}

/// CLI entry point for `kpb diagnose`.
pub async fn run_diagnose(config: &Config, code: &str, json: bool) -> Result<()> {
    let store = SqliteBlockStore::open(config).await?;
    let locator = FileLocator::from_config(&config.content)?;
    let report = diagnose(&locator, &store, code).await;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBlockStore;
    use crate::sync::{SyncOptions, Synchronizer};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    const DOC: &str = "第一阶段：建立框架\n【考点 C8.4.10｜M02｜本页定位】\n定位\n第二阶段：复习\n【考点 C8.4.10｜M05｜易错】\n易错\n";

    #[tokio::test]
    async fn test_healthy_code() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("c8.4.10.txt"), DOC).unwrap();
        let store = Arc::new(InMemoryBlockStore::new());
        let locator = FileLocator::new(tmp.path(), "txt");
        Synchronizer::new(locator.clone(), store.clone(), SyncOptions::default())
            .sync_one("C8.4.10")
            .await
            .unwrap();

        let report = diagnose(&locator, store.as_ref(), "c8.4.10").await;
        assert_eq!(report.code, "C8.4.10");
        assert_eq!(report.file.chosen.as_deref(), Some("c8.4.10.txt"));
        assert_eq!(report.parse.stages.len(), 2);
        assert_eq!(report.parse.modules.len(), 2);
        assert_eq!(report.store.block_count, Some(2));
        assert_eq!(report.store.up_to_date, Some(true));
        assert!(report.similar_codes.is_empty());
        assert!(report.render().contains("up to date: yes"));
    }

    #[tokio::test]
    async fn test_missing_file_suggests_similar_codes() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("d8.4.10.txt"), DOC).unwrap();
        let store = Arc::new(InMemoryBlockStore::new());
        let locator = FileLocator::new(tmp.path(), "txt");
        Synchronizer::new(locator.clone(), store.clone(), SyncOptions::default())
            .sync_one("D8.4.10")
            .await
            .unwrap();

        let report = diagnose(&locator, store.as_ref(), "C8.4.10").await;
        assert!(report.file.candidates.is_empty());
        assert!(report.file.note.is_some());
        assert_eq!(report.parse.note.as_deref(), Some("no document to parse"));
        assert_eq!(report.store.block_count, Some(0));
        assert_eq!(report.store.note.as_deref(), Some("never synced"));
        assert_eq!(report.similar_codes.len(), 1);
        assert_eq!(report.similar_codes[0].topic_code, "D8.4.10");
    }

    #[tokio::test]
    async fn test_lists_unmatched_module_lines() {
        let tmp = TempDir::new().unwrap();
        let doc = "第一阶段：建立框架\n【考点 C1｜M09｜未知模块】\n【考点C1】\n正文\n";
        fs::write(tmp.path().join("c1.txt"), doc).unwrap();
        let store = InMemoryBlockStore::new();
        let locator = FileLocator::new(tmp.path(), "txt");

        let report = diagnose(&locator, &store, "C1").await;
        assert_eq!(report.parse.stages.len(), 1);
        assert!(report.parse.modules.is_empty());
        assert_eq!(
            report.parse.unmatched_headers,
            vec!["【考点 C1｜M09｜未知模块】".to_string(), "【考点C1】".to_string()]
        );
        assert_eq!(report.store.up_to_date, None);
    }

    #[tokio::test]
    async fn test_stale_store_and_ambiguity() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("c2.txt"), DOC).unwrap();
        let store = Arc::new(InMemoryBlockStore::new());
        let locator = FileLocator::new(tmp.path(), "txt");
        Synchronizer::new(locator.clone(), store.clone(), SyncOptions::default())
            .sync_one("C2")
            .await
            .unwrap();

        fs::write(tmp.path().join("c2.txt"), format!("{}补充\n", DOC)).unwrap();
        let report = diagnose(&locator, store.as_ref(), "C2").await;
        assert_eq!(report.store.up_to_date, Some(false));

        fs::write(tmp.path().join("c2 copy.txt"), DOC).unwrap();
        let report = diagnose(&locator, store.as_ref(), "C2").await;
        assert_eq!(report.file.candidates.len(), 2);
        assert!(report.file.chosen.is_none());
        assert_eq!(report.store.block_count, Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_reports_on_worker_threads() {
        let tmp = TempDir::new().unwrap();
        for i in 1..=8 {
            fs::write(tmp.path().join(format!("c{i}.txt")), DOC).unwrap();
        }
        let store: Arc<dyn BlockStore> = Arc::new(InMemoryBlockStore::new());
        let locator = FileLocator::new(tmp.path(), "txt");

        let mut handles = Vec::new();
        for i in 1..=8 {
            let locator = locator.clone();
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                diagnose(&locator, store.as_ref(), &format!("c{i}")).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let report = handle.await.unwrap();
            assert_eq!(report.file.chosen, Some(format!("c{}.txt", i + 1)));
            assert_eq!(report.parse.modules.len(), 2);
            assert!(report.file.fingerprint.is_some());
            assert_eq!(report.store.note.as_deref(), Some("never synced"));
        }
    }
}
