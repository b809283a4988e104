//! Core data models.
//!
//! A knowledge-point document parses into a [`ParsedDocument`]: ordered
//! [`Stage`]s, each holding ordered [`ModuleBlock`]s. The persisted
//! projections are [`ContentBlockRecord`] (one per stage × module) and
//! [`ContentFileRecord`] (one per topic code, used for change detection).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::fingerprint::Fingerprint;

/// One of the three pedagogical stages of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageId {
    Stage1,
    Stage2,
    Stage3,
}

impl StageId {
    pub const ALL: [StageId; 3] = [StageId::Stage1, StageId::Stage2, StageId::Stage3];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Stage1 => "stage1",
            StageId::Stage2 => "stage2",
            StageId::Stage3 => "stage3",
        }
    }

    /// Title used when a stage is rebuilt from stored blocks and the
    /// author's header line is no longer available.
    pub fn canonical_title(&self) -> &'static str {
        match self {
            StageId::Stage1 => "第一阶段 建立框架 初学",
            StageId::Stage2 => "第二阶段 复习查漏 默认推荐",
            StageId::Stage3 => "第三阶段 冲刺秒杀 考前",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stage1" => Ok(StageId::Stage1),
            "stage2" => Ok(StageId::Stage2),
            "stage3" => Ok(StageId::Stage3),
            other => Err(format!(
                "invalid stage '{}': must be stage1, stage2 or stage3",
                other
            )),
        }
    }
}

/// The closed set of recognized module codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModuleCode {
    M02,
    M03,
    M04,
    M05,
    M06,
}

impl ModuleCode {
    pub const ALL: [ModuleCode; 5] = [
        ModuleCode::M02,
        ModuleCode::M03,
        ModuleCode::M04,
        ModuleCode::M05,
        ModuleCode::M06,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleCode::M02 => "M02",
            ModuleCode::M03 => "M03",
            ModuleCode::M04 => "M04",
            ModuleCode::M05 => "M05",
            ModuleCode::M06 => "M06",
        }
    }
}

impl fmt::Display for ModuleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleCode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "invalid module '{}': must be one of M02, M03, M04, M05, M06",
                    s
                )
            })
    }
}

/// A titled sub-section of content within a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleBlock {
    pub module_code: ModuleCode,
    pub module_title: String,
    pub body: String,
}

/// One stage of a parsed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub stage_id: StageId,
    /// The header line as found in the source, trimmed.
    pub stage_title: String,
    /// Text between the stage header and its first module header.
    pub preamble: Option<String>,
    pub modules: Vec<ModuleBlock>,
}

/// The parse tree of one source document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedDocument {
    pub stages: Vec<Stage>,
}

impl ParsedDocument {
    pub fn module_count(&self) -> usize {
        self.stages.iter().map(|s| s.modules.len()).sum()
    }

    /// All blocks in document order, paired with their stage.
    pub fn blocks(&self) -> impl Iterator<Item = (StageId, &ModuleBlock)> {
        self.stages
            .iter()
            .flat_map(|s| s.modules.iter().map(move |m| (s.stage_id, m)))
    }
}

/// The raw text of one topic's content file.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub file_name: String,
    pub raw_text: String,
    pub content_hash: Fingerprint,
}

/// Persisted projection of a [`ModuleBlock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentBlockRecord {
    pub topic_code: String,
    pub stage: StageId,
    pub module_code: ModuleCode,
    pub title: String,
    pub body: String,
    pub source_file_name: String,
    pub source_file_hash: String,
    /// Unix seconds.
    pub updated_at: i64,
}

/// Last-synced file bookkeeping for one topic code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentFileRecord {
    pub topic_code: String,
    pub file_name: String,
    pub file_hash: String,
    #[serde(skip_serializing)]
    pub raw_content: String,
    /// Unix seconds.
    pub updated_at: i64,
}
