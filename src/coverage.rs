//! Content directory coverage.
//!
//! Walks every document in the content directory and reports, per file,
//! which stages and modules it provides and what looks wrong with it.
//! Nothing is written; `kpb coverage` is meant to be run before a bulk sync.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::error::ContentError;
use crate::fingerprint::normalize_code;
use crate::locator::{code_from_file_name, FileLocator};
use crate::models::{ModuleCode, StageId};
use crate::parser::{module_header, normalize_text, parse, stage_header};

#[derive(Debug, Clone, Serialize)]
pub struct FileCoverage {
    pub file_name: String,
    pub code: String,
    pub stages: Vec<StageId>,
    pub modules_found: Vec<ModuleCode>,
    pub missing_modules: Vec<ModuleCode>,
    pub blocks: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AmbiguousCode {
    pub code: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadFailure {
    pub file_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub dir: String,
    pub files: Vec<FileCoverage>,
    pub unrecognized_files: Vec<String>,
    pub ambiguous_codes: Vec<AmbiguousCode>,
    pub read_failures: Vec<ReadFailure>,
}

impl CoverageReport {
    /// Files that would sync to at least one block.
    pub fn syncable(&self) -> usize {
        self.files.iter().filter(|f| f.blocks > 0).count()
    }

    pub fn with_warnings(&self) -> impl Iterator<Item = &FileCoverage> {
        self.files.iter().filter(|f| !f.warnings.is_empty())
    }
}

/// Build a coverage report for the locator's directory.
///
/// Only an unreadable directory is an error; per-file problems are
/// recorded in the report.
pub fn coverage(locator: &FileLocator) -> Result<CoverageReport, ContentError> {
    let documents = locator.documents()?;

    let mut files = Vec::new();
    let mut unrecognized_files = Vec::new();
    let mut read_failures = Vec::new();
    let mut by_code: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for entry in &documents {
        let Some(code) = code_from_file_name(&entry.file_name) else {
            unrecognized_files.push(entry.file_name.clone());
            continue;
        };
        by_code
            .entry(code.clone())
            .or_default()
            .push(entry.file_name.clone());

        match locator.read(&entry.path) {
            Ok(doc) => files.push(file_coverage(&entry.file_name, &code, &doc.raw_text)),
            Err(e) => read_failures.push(ReadFailure {
                file_name: entry.file_name.clone(),
                error: e.to_string(),
            }),
        }
    }

    let ambiguous_codes = by_code
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|(code, files)| AmbiguousCode { code, files })
        .collect();

    Ok(CoverageReport {
        dir: locator.dir().display().to_string(),
        files,
        unrecognized_files,
        ambiguous_codes,
        read_failures,
    })
}

/// Coverage of one document's text.
pub fn file_coverage(file_name: &str, code: &str, raw: &str) -> FileCoverage {
    let parsed = parse(raw);
    let mut warnings = Vec::new();

    let mut seen_stages = BTreeSet::new();
    for stage in &parsed.stages {
        if !seen_stages.insert(stage.stage_id) {
            warnings.push(format!("{} appears more than once", stage.stage_id));
        }
        if stage.modules.is_empty() {
            warnings.push(format!("{} has no modules", stage.stage_id));
        }
    }

    // Headers the parser drops or that name another code.
    let mut in_stage = false;
    let mut orphan_modules = 0;
    let mut foreign_points = BTreeSet::new();
    for line in normalize_text(raw).lines() {
        if stage_header(line).is_some() {
            in_stage = true;
            continue;
        }
        if let Some(header) = module_header(line) {
            if !in_stage {
                orphan_modules += 1;
            }
            if normalize_code(&header.point) != code {
                foreign_points.insert(header.point);
            }
        }
    }
    if orphan_modules > 0 {
        warnings.push(format!(
            "{} module header(s) before the first stage header are ignored",
            orphan_modules
        ));
    }
    for point in foreign_points {
        warnings.push(format!("module header names {} instead of {}", point, code));
    }
    if parsed.stages.is_empty() {
        warnings.push("no stage header found".to_string());
    }

    let modules_found: BTreeSet<ModuleCode> = parsed.blocks().map(|(_, m)| m.module_code).collect();
    let missing_modules = ModuleCode::ALL
        .into_iter()
        .filter(|m| !modules_found.contains(m))
        .collect();

    FileCoverage {
        file_name: file_name.to_string(),
        code: code.to_string(),
        stages: seen_stages.into_iter().collect(),
        modules_found: modules_found.into_iter().collect(),
        missing_modules,
        blocks: parsed.module_count(),
        warnings,
    }
}

/// CLI entry point for `kpb coverage`.
pub fn run_coverage(config: &Config, json: bool) -> Result<()> {
    let locator = FileLocator::from_config(&config.content)?;
    let report = coverage(&locator)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("coverage {}", report.dir);
    println!("  documents:    {}", report.files.len());
    println!("  syncable:     {}", report.syncable());
    println!("  unrecognized: {}", report.unrecognized_files.len());
    println!("  ambiguous:    {}", report.ambiguous_codes.len());
    println!("  unreadable:   {}", report.read_failures.len());

    if !report.files.is_empty() {
        println!();
        println!(
            "  {:<16} {:<20} {:>6}   {}",
            "CODE", "STAGES", "BLOCKS", "MISSING"
        );
        println!("  {}", "-".repeat(64));
        for f in &report.files {
            let stages: Vec<&str> = f.stages.iter().map(|s| s.as_str()).collect();
            let missing: Vec<&str> = f.missing_modules.iter().map(|m| m.as_str()).collect();
            println!(
                "  {:<16} {:<20} {:>6}   {}",
                f.code,
                stages.join(","),
                f.blocks,
                if missing.is_empty() { "-".to_string() } else { missing.join(",") }
            );
        }
    }

    let warned: Vec<_> = report.with_warnings().collect();
    if !warned.is_empty() {
        println!();
        println!("warnings:");
        for f in warned {
            for w in &f.warnings {
                println!("  - {}: {}", f.file_name, w);
            }
        }
    }
    for a in &report.ambiguous_codes {
        println!("  - {} matches {} files: {}", a.code, a.files.len(), a.files.join(", "));
    }
    for name in &report.unrecognized_files {
        println!("  - {}: no topic code in file name", name);
    }
    for r in &report.read_failures {
        println!("  - {}: {}", r.file_name, r.error);
    }
    Ok(())
}
