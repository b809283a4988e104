//! Knowledge-point document parser.
//!
//! Documents are plain text organised as up to three stages, each holding a
//! run of module blocks:
//!
//! ```text
//! 第一阶段：建立框架
//! 【考点 C1.1.1｜M02｜本页定位】
//! body line
//!
//! body line after a blank line
//! 【考点 C1.1.1｜M03｜概念】
//! ...
//! 第二阶段：复习查漏
//! ...
//! ```
//!
//! Parsing is a left fold over normalized lines with an explicit
//! [`ParseState`] accumulator. It never fails: unrecognized lines become body
//! text and malformed documents simply produce fewer blocks.

use crate::models::{ModuleBlock, ModuleCode, ParsedDocument, Stage, StageId};

/// Opening marker of a module header, `【考点`.
pub const MODULE_MARKER: &str = "【考点";
const MODULE_CLOSE: char = '】';

/// Parse a raw document into stages and module blocks.
pub fn parse(raw: &str) -> ParsedDocument {
    let text = normalize_text(raw);
    text.split('\n')
        .fold(ParseState::default(), ParseState::feed)
        .finish()
}

/// Drop a leading byte-order mark and convert CRLF and lone CR line endings
/// to LF.
///
/// Only the parse input is normalized; fingerprints stay byte-exact.
pub fn normalize_text(raw: &str) -> String {
    let raw = raw.strip_prefix('\u{FEFF}').unwrap_or(raw);
    raw.replace("\r\n", "\n").replace('\r', "\n")
}

/// Recognize a stage header line.
///
/// The line must start (no leading whitespace) with `第一阶段`, `第二阶段` or
/// `第三阶段` (arabic `第1阶段`.. also accepted) followed by `：`, `:` or
/// whitespace.
pub fn stage_header(line: &str) -> Option<StageId> {
    let rest = line.strip_prefix('第')?;
    let mut chars = rest.chars();
    let stage = match chars.next()? {
        '一' | '1' => StageId::Stage1,
        '二' | '2' => StageId::Stage2,
        '三' | '3' => StageId::Stage3,
        _ => return None,
    };
    let after = chars.as_str().strip_prefix("阶段")?;
    match after.chars().next() {
        Some(c) if c == '：' || c == ':' || c.is_whitespace() => Some(stage),
        _ => None,
    }
}

/// A recognized module header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleHeader {
    /// The topic-code fragment written in the header, as found.
    pub point: String,
    pub module_code: ModuleCode,
    pub title: String,
}

/// Recognize a module header anywhere in the line.
///
/// Shape: `【考点 <point>｜<code>｜<title>】`, where the separators may be
/// full-width `｜` or ASCII `|` and `<code>` must be one of the five module
/// codes. Any other code leaves the line as ordinary text.
pub fn module_header(line: &str) -> Option<ModuleHeader> {
    line.match_indices(MODULE_MARKER)
        .find_map(|(idx, marker)| match_header_at(&line[idx + marker.len()..]))
}

fn is_separator(c: char) -> bool {
    c == '｜' || c == '|'
}

fn match_header_at(rest: &str) -> Option<ModuleHeader> {
    let rest = rest.trim_start();

    // <point>
    let point_end = rest.find(|c: char| is_separator(c) || c == '【' || c == MODULE_CLOSE)?;
    let point = rest[..point_end].trim();
    if point.is_empty() {
        return None;
    }
    let rest = strip_separator(&rest[point_end..])?;

    // <code>
    let code_end = rest.find(is_separator)?;
    let module_code: ModuleCode = rest[..code_end].parse().ok()?;
    let rest = strip_separator(&rest[code_end..])?;

    // <title>
    let title_end = rest.find(MODULE_CLOSE)?;
    let raw_title = &rest[..title_end];
    if raw_title.is_empty() {
        return None;
    }

    Some(ModuleHeader {
        point: point.to_string(),
        module_code,
        title: raw_title.trim().to_string(),
    })
}

fn strip_separator(s: &str) -> Option<&str> {
    let c = s.chars().next()?;
    is_separator(c).then(|| &s[c.len_utf8()..])
}

/// True for lines that look like an attempted module header, whether or not
/// they parse. Used by diagnostics to show why a document yields no blocks.
pub fn looks_like_module_header(line: &str) -> bool {
    line.contains(MODULE_MARKER)
}

/// Join lines, dropping trailing lines that are blank or whitespace-only.
fn join_trimming_trailing_blank(lines: &[String]) -> String {
    let end = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(0, |i| i + 1);
    lines[..end].join("\n")
}

#[derive(Debug)]
struct OpenModule {
    header: ModuleHeader,
    lines: Vec<String>,
}

#[derive(Debug)]
struct OpenStage {
    stage_id: StageId,
    title: String,
    preamble: Vec<String>,
    modules: Vec<ModuleBlock>,
}

/// Accumulator threaded through the fold in [`parse`].
#[derive(Debug, Default)]
pub struct ParseState {
    stages: Vec<Stage>,
    stage: Option<OpenStage>,
    module: Option<OpenModule>,
}

impl ParseState {
    /// Consume one line.
    pub fn feed(mut self, line: &str) -> Self {
        if let Some(stage_id) = stage_header(line) {
            self.close_module();
            self.close_stage();
            self.stage = Some(OpenStage {
                stage_id,
                title: line.trim().to_string(),
                preamble: Vec::new(),
                modules: Vec::new(),
            });
            return self;
        }

        if let Some(header) = module_header(line) {
            self.close_module();
            self.module = Some(OpenModule {
                header,
                lines: Vec::new(),
            });
            return self;
        }

        if let Some(module) = self.module.as_mut() {
            module.lines.push(line.to_string());
        } else if let Some(stage) = self.stage.as_mut() {
            // Leading blank lines before any preamble text are skipped.
            if !line.trim().is_empty() || !stage.preamble.is_empty() {
                stage.preamble.push(line.to_string());
            }
        }
        self
    }

    /// Flush everything still open and return the document.
    pub fn finish(mut self) -> ParsedDocument {
        self.close_module();
        self.close_stage();
        ParsedDocument {
            stages: self.stages,
        }
    }

    fn close_module(&mut self) {
        let Some(module) = self.module.take() else {
            return;
        };
        // A module before any stage header has nowhere to go and is dropped.
        if let Some(stage) = self.stage.as_mut() {
            stage.modules.push(ModuleBlock {
                module_code: module.header.module_code,
                module_title: module.header.title,
                body: join_trimming_trailing_blank(&module.lines),
            });
        }
    }

    fn close_stage(&mut self) {
        if let Some(stage) = self.stage.take() {
            let preamble = join_trimming_trailing_blank(&stage.preamble);
            self.stages.push(Stage {
                stage_id: stage.stage_id,
                stage_title: stage.title,
                preamble: (!preamble.is_empty()).then_some(preamble),
                modules: stage.modules,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "第一阶段：示例\n【考点 X1.1｜M02｜本页定位】\n第一行\n第二行\n【考点 X1.1｜M03｜概念】\n只有一行\n";

    #[test]
    fn test_example_document() {
        let doc = parse(EXAMPLE);
        assert_eq!(doc.stages.len(), 1);
        let stage = &doc.stages[0];
        assert_eq!(stage.stage_id, StageId::Stage1);
        assert_eq!(stage.stage_title, "第一阶段：示例");
        assert_eq!(stage.preamble, None);
        assert_eq!(stage.modules.len(), 2);
        assert_eq!(stage.modules[0].module_code, ModuleCode::M02);
        assert_eq!(stage.modules[0].module_title, "本页定位");
        assert_eq!(stage.modules[0].body, "第一行\n第二行");
        assert_eq!(stage.modules[1].module_code, ModuleCode::M03);
        assert_eq!(stage.modules[1].module_title, "概念");
        assert_eq!(stage.modules[1].body, "只有一行");
    }

    #[test]
    fn test_leading_bom_ignored() {
        let doc = "\u{FEFF}第一阶段：A\r\n【考点 C1｜M02｜定位】\r\nx\r\n第二阶段：B\r\n【考点 C1｜M05｜易错】\r\ny\r\n";
        let parsed = parse(doc);
        assert_eq!(parsed.stages.len(), 2);
        assert_eq!(parsed.module_count(), 2);
        assert_eq!(parsed.stages[0].stage_id, StageId::Stage1);
        assert_eq!(parsed.stages[0].stage_title, "第一阶段：A");
        assert_eq!(parsed.stages[0].modules[0].body, "x");

        // Only a leading mark is dropped.
        assert_eq!(normalize_text("a\u{FEFF}b"), "a\u{FEFF}b");
    }

    #[test]
    fn test_line_endings_normalized() {
        let crlf = EXAMPLE.replace('\n', "\r\n");
        let cr = EXAMPLE.replace('\n', "\r");
        assert_eq!(parse(&crlf), parse(EXAMPLE));
        assert_eq!(parse(&cr), parse(EXAMPLE));
    }

    #[test]
    fn test_three_stages_in_order() {
        let text = "第一阶段：A\n【考点 C1.1.1｜M02｜定位】\na\n\
                    第二阶段 B\n【考点 C1.1.1｜M05｜易错】\nb\n\
                    第三阶段:C\n【考点 C1.1.1｜M06｜秒杀】\nc";
        let doc = parse(text);
        let ids: Vec<StageId> = doc.stages.iter().map(|s| s.stage_id).collect();
        assert_eq!(ids, vec![StageId::Stage1, StageId::Stage2, StageId::Stage3]);
        assert_eq!(doc.stages[1].stage_title, "第二阶段 B");
        assert_eq!(doc.stages[2].modules[0].body, "c");
        assert_eq!(doc.module_count(), 3);
    }

    #[test]
    fn test_internal_blank_lines_preserved_trailing_trimmed() {
        let text = "第一阶段：A\n【考点 C1｜M02｜定位】\n  缩进行\n\n\n下一段\n\n   \n\n【考点 C1｜M03｜概念】\nx\n\n\n";
        let doc = parse(text);
        let modules = &doc.stages[0].modules;
        assert_eq!(modules[0].body, "  缩进行\n\n\n下一段");
        assert_eq!(modules[1].body, "x");
    }

    #[test]
    fn test_unknown_module_code_is_body_text() {
        let text = "第一阶段：A\n【考点 C1｜M02｜定位】\nx\n【考点 C1｜M07｜额外】\ny\n【考点 C1｜M01｜旧】";
        let doc = parse(text);
        let modules = &doc.stages[0].modules;
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].body, "x\n【考点 C1｜M07｜额外】\ny\n【考点 C1｜M01｜旧】");
    }

    #[test]
    fn test_module_before_stage_is_dropped() {
        let text = "【考点 C1｜M02｜孤立】\n孤立内容\n第一阶段：A\n【考点 C1｜M03｜概念】\nx";
        let doc = parse(text);
        assert_eq!(doc.stages.len(), 1);
        assert_eq!(doc.stages[0].modules.len(), 1);
        assert_eq!(doc.stages[0].modules[0].module_code, ModuleCode::M03);
        assert_eq!(doc.stages[0].preamble, None);
    }

    #[test]
    fn test_preamble_captured() {
        let text = "第一阶段：A\n\n导语第一行\n\n导语第二行\n\n【考点 C1｜M02｜定位】\nx";
        let doc = parse(text);
        assert_eq!(
            doc.stages[0].preamble.as_deref(),
            Some("导语第一行\n\n导语第二行")
        );
        assert_eq!(doc.stages[0].modules[0].body, "x");
    }

    #[test]
    fn test_stage_without_modules_kept() {
        let doc = parse("第二阶段：只有标题\n一些文字");
        assert_eq!(doc.stages.len(), 1);
        assert!(doc.stages[0].modules.is_empty());
        assert_eq!(doc.module_count(), 0);
    }

    #[test]
    fn test_empty_and_garbage_input() {
        assert_eq!(parse("").stages.len(), 0);
        assert_eq!(parse("\n\n\r\n").stages.len(), 0);
        assert_eq!(parse("random text\n【考点 broken").module_count(), 0);
    }

    #[test]
    fn test_stage_header_requires_separator() {
        assert_eq!(stage_header("第一阶段：建立框架"), Some(StageId::Stage1));
        assert_eq!(stage_header("第二阶段:复习"), Some(StageId::Stage2));
        assert_eq!(stage_header("第三阶段 冲刺"), Some(StageId::Stage3));
        assert_eq!(stage_header("第2阶段：复习"), Some(StageId::Stage2));
        assert_eq!(stage_header("第一阶段"), None);
        assert_eq!(stage_header("第一阶段的内容"), None);
        assert_eq!(stage_header(" 第一阶段：缩进"), None);
        assert_eq!(stage_header("第四阶段：不存在"), None);
    }

    #[test]
    fn test_module_header_variants() {
        let h = module_header("【考点 c1.1.1｜M02｜本页定位】").unwrap();
        assert_eq!(h.point, "c1.1.1");
        assert_eq!(h.module_code, ModuleCode::M02);
        assert_eq!(h.title, "本页定位");

        let h = module_header("前缀【考点C8.4.10|M04| 秒杀技巧 】后缀").unwrap();
        assert_eq!(h.point, "C8.4.10");
        assert_eq!(h.module_code, ModuleCode::M04);
        assert_eq!(h.title, "秒杀技巧");

        assert!(module_header("【考点 c1｜M02】").is_none());
        assert!(module_header("【考点 ｜M02｜标题】").is_none());
        assert!(module_header("【考点 c1｜M02｜】").is_none());
        assert!(module_header("【考点 c1｜m02｜小写】").is_none());
        assert!(module_header("【知识 c1｜M02｜其它标记】").is_none());
    }

    #[test]
    fn test_module_header_second_marker_on_line() {
        let h = module_header("【考点 坏的】 【考点 C2｜M05｜第二个】").unwrap();
        assert_eq!(h.module_code, ModuleCode::M05);
        assert_eq!(h.title, "第二个");
    }

    #[test]
    fn test_rebuild_reproduces_document() {
        let parts = [
            ("第一阶段：建立框架", vec![
                (ModuleCode::M02, "本页定位", "定位内容\n\n  保留缩进"),
                (ModuleCode::M03, "必背要点", "要点"),
            ]),
            ("第二阶段：复习查漏", vec![(ModuleCode::M05, "易错", "易错一\n易错二")]),
        ];

        let mut text = String::new();
        for (title, modules) in &parts {
            text.push_str(title);
            text.push('\n');
            for (code, mtitle, body) in modules {
                text.push_str(&format!("【考点 C3.2.1｜{}｜{}】\n{}\n", code, mtitle, body));
            }
        }

        let doc = parse(&text);
        let mut rebuilt = String::new();
        for stage in &doc.stages {
            rebuilt.push_str(&stage.stage_title);
            rebuilt.push('\n');
            for m in &stage.modules {
                rebuilt.push_str(&format!(
                    "【考点 C3.2.1｜{}｜{}】\n{}\n",
                    m.module_code, m.module_title, m.body
                ));
            }
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_empty_module_body() {
        let doc = parse("第一阶段：A\n【考点 C1｜M02｜空】\n【考点 C1｜M03｜有】\nx");
        let modules = &doc.stages[0].modules;
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].body, "");
    }
}
