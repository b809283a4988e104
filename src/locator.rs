//! Knowledge-point file locator.
//!
//! Maps a topic code onto the one document in the content directory whose
//! name starts with that code. Matching is case-insensitive and requires a
//! non-digit boundary after the code, so `C1` finds `c1.txt` and
//! `c1概述.txt` but never `c10.txt`.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ContentConfig;
use crate::error::ContentError;
use crate::fingerprint::fingerprint;
use crate::models::SourceDocument;

/// A document file found in the content directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFile {
    pub path: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct FileLocator {
    dir: PathBuf,
    extension: String,
    excludes: GlobSet,
}

impl FileLocator {
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.to_lowercase(),
            excludes: GlobSet::empty(),
        }
    }

    pub fn from_config(config: &ContentConfig) -> anyhow::Result<Self> {
        let mut locator = Self::new(&config.dir, &config.extension);
        locator.excludes = build_globset(&config.exclude_globs)?;
        Ok(locator)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All document files in the directory, sorted by file name.
    ///
    /// Non-recursive. Fails with [`ContentError::Io`] when the directory
    /// cannot be listed.
    pub fn documents(&self) -> Result<Vec<DocumentFile>, ContentError> {
        let suffix = format!(".{}", self.extension);
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.dir).to_path_buf();
                ContentError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.to_lowercase().ends_with(&suffix) {
                continue;
            }
            if self.excludes.is_match(&file_name) {
                continue;
            }

            files.push(DocumentFile {
                path: entry.path().to_path_buf(),
                file_name,
            });
        }

        Ok(files)
    }

    /// Every document whose name matches `code`.
    pub fn candidates(&self, code: &str) -> Result<Vec<DocumentFile>, ContentError> {
        let code_norm = code.trim().to_lowercase();
        if code_norm.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .documents()?
            .into_iter()
            .filter(|f| name_matches_code(&f.file_name, &code_norm))
            .collect())
    }

    /// The single document for `code`.
    ///
    /// Zero matches is [`ContentError::NotFound`]; more than one is
    /// [`ContentError::Ambiguous`] rather than an arbitrary pick.
    pub fn locate(&self, code: &str) -> Result<PathBuf, ContentError> {
        let mut matches = self.candidates(code)?;
        match matches.len() {
            0 => {
                tracing::debug!(code, dir = %self.dir.display(), "no document matches code");
                Err(ContentError::NotFound(code.trim().to_string()))
            }
            1 => {
                let found = matches.remove(0);
                tracing::debug!(code, file = %found.file_name, "located document");
                Ok(found.path)
            }
            _ => Err(ContentError::Ambiguous {
                code: code.trim().to_string(),
                files: matches.into_iter().map(|f| f.file_name).collect(),
            }),
        }
    }

    /// Read a document and fingerprint its bytes.
    pub fn read(&self, path: &Path) -> Result<SourceDocument, ContentError> {
        let bytes = std::fs::read(path).map_err(|e| ContentError::io(path, e))?;
        let content_hash = fingerprint(&bytes);
        let raw_text = String::from_utf8(bytes).map_err(|e| {
            ContentError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(SourceDocument {
            path: path.to_path_buf(),
            file_name,
            raw_text,
            content_hash,
        })
    }

    /// Locate and read the document for `code`.
    pub fn load(&self, code: &str) -> Result<SourceDocument, ContentError> {
        let path = self.locate(code)?;
        self.read(&path)
    }
}

/// `file_name` starts with `code_norm` (already trimmed and lower-cased) and
/// the code does not continue into a longer one.
///
/// The character after the prefix must not be a digit, and a `.` followed by
/// a digit also counts as a continuation (`c5.1` vs `c5.1.1.txt`).
pub fn name_matches_code(file_name: &str, code_norm: &str) -> bool {
    let name = file_name.to_lowercase();
    let Some(rest) = name.strip_prefix(code_norm) else {
        return false;
    };
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => false,
        Some('.') => !chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => true,
    }
}

/// Infer a topic code from a document file name.
///
/// A code is an optional run of ASCII letters followed by dot-separated
/// digit groups: `c5.1.1药物分类.txt` gives `C5.1.1`, `C10.txt` gives `C10`.
/// Returns `None` when the name does not start with such a code.
pub fn code_from_file_name(file_name: &str) -> Option<String> {
    let bytes = file_name.as_bytes();
    let mut end = bytes
        .iter()
        .position(|b| !b.is_ascii_alphabetic())
        .unwrap_or(bytes.len());

    let digits_start = end;
    loop {
        let group = bytes[end..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if group == 0 {
            break;
        }
        end += group;
        let dotted = bytes.get(end) == Some(&b'.')
            && bytes.get(end + 1).is_some_and(|b| b.is_ascii_digit());
        if !dotted {
            break;
        }
        end += 1;
    }

    if end == digits_start {
        return None;
    }
    Some(file_name[..end].to_uppercase())
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
