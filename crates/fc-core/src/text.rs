//! Text run merger: styled segments → blocks of lines of marked runs.
//!
//! Steps, per text node:
//! 1. split every segment on line breaks into per-line runs
//! 2. annotate marks and hoist allowlisted attributes
//! 3. sticky space: whitespace runs inherit marks shared by both neighbours
//! 4. merge adjacent compatible runs
//! 5. group lines into blocks by list type

use crate::model::{ListType, StyledSegment, TextCase, TextContent, TextDecoration};
use crate::options::format_num;
use serde::Serialize;
use std::collections::BTreeMap;
use url::Url;

/// Hoisted run attributes, in output order.
pub const ATTRIBUTE_ALLOWLIST: &[&str] = &[
    "color",
    "font-family",
    "font-size",
    "letter-spacing",
    "line-height",
    "text-align",
    "text-transform",
];

const CODE_FAMILY_KEYWORDS: &[&str] = &["mono", "code", "consolas", "courier", "menlo"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct TextMarks {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strike: bool,
    pub code: bool,
    pub link: bool,
}

impl TextMarks {
    /// Marks set on both sides.
    fn shared(self, other: TextMarks) -> TextMarks {
        TextMarks {
            bold: self.bold && other.bold,
            italic: self.italic && other.italic,
            underline: self.underline && other.underline,
            strike: self.strike && other.strike,
            code: self.code && other.code,
            link: self.link && other.link,
        }
    }

    fn union(self, other: TextMarks) -> TextMarks {
        TextMarks {
            bold: self.bold || other.bold,
            italic: self.italic || other.italic,
            underline: self.underline || other.underline,
            strike: self.strike || other.strike,
            code: self.code || other.code,
            link: self.link || other.link,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRun {
    pub text: String,
    pub marks: TextMarks,
    pub attrs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl TextRun {
    /// Whitespace-only, including the empty string.
    pub fn is_whitespace(&self) -> bool {
        self.text.chars().all(char::is_whitespace)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LineAttrs {
    pub list_type: ListType,
    pub indentation: u32,
    pub list_spacing: f32,
    pub paragraph_spacing: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TextLine {
    pub runs: Vec<TextRun>,
    pub attrs: LineAttrs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockKind {
    Paragraph,
    OrderedList,
    UnorderedList,
}

impl From<ListType> for BlockKind {
    fn from(list: ListType) -> Self {
        match list {
            ListType::None => BlockKind::Paragraph,
            ListType::Ordered => BlockKind::OrderedList,
            ListType::Unordered => BlockKind::UnorderedList,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBlock {
    pub kind: BlockKind,
    pub lines: Vec<TextLine>,
}

/// Run the whole merger over one text node's content.
pub fn merge_text(content: &TextContent) -> Vec<TextBlock> {
    let mut lines = split_lines(&content.segments);
    for line in &mut lines {
        apply_sticky_space(&mut line.runs);
        line.runs = merge_runs(std::mem::take(&mut line.runs));
    }
    group_blocks(lines)
}

// ─── Splitting ────────────────────────────────────────────────────────────

/// Split on CR, LF, CRLF, U+2028 and U+2029.
pub fn split_on_breaks(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\r' => {
                pieces.push(&text[start..i]);
                if chars.peek().is_some_and(|(_, n)| *n == '\n') {
                    chars.next();
                    start = i + 2;
                } else {
                    start = i + 1;
                }
            }
            '\n' | '\u{2028}' | '\u{2029}' => {
                pieces.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    pieces.push(&text[start..]);
    pieces
}

fn split_lines(segments: &[StyledSegment]) -> Vec<TextLine> {
    let mut lines: Vec<TextLine> = Vec::new();
    let mut current: Option<TextLine> = None;

    for segment in segments {
        let pieces = split_on_breaks(&segment.characters);
        for (i, piece) in pieces.iter().enumerate() {
            if i > 0 {
                let line = current.take().unwrap_or_else(|| new_line(segment));
                lines.push(line);
            }
            // Empty segments still produce a run so they can act as sticky separators.
            if !piece.is_empty() || segment.characters.is_empty() {
                current
                    .get_or_insert_with(|| new_line(segment))
                    .runs
                    .push(run_for(segment, piece));
            }
        }
    }

    // A trailing break leaves `current` empty, so it opens no extra line.
    if let Some(line) = current {
        lines.push(line);
    }
    lines
}

fn new_line(segment: &StyledSegment) -> TextLine {
    TextLine {
        runs: Vec::new(),
        attrs: LineAttrs {
            list_type: segment.list_type,
            indentation: segment.indentation,
            list_spacing: segment.list_spacing,
            paragraph_spacing: segment.paragraph_spacing,
        },
    }
}

// ─── Marks & attributes ───────────────────────────────────────────────────

pub fn is_code_family(family: &str) -> bool {
    let family = family.to_ascii_lowercase();
    CODE_FAMILY_KEYWORDS.iter().any(|k| family.contains(k))
}

pub fn marks_for(segment: &StyledSegment) -> TextMarks {
    TextMarks {
        bold: segment.font_weight >= 600,
        italic: segment.is_italic(),
        underline: segment.text_decoration == TextDecoration::Underline,
        strike: segment.text_decoration == TextDecoration::Strikethrough,
        code: is_code_family(&segment.font_family),
        link: segment.hyperlink.is_some(),
    }
}

/// Allowlisted attributes hoisted from a segment.
pub fn attrs_for(segment: &StyledSegment) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    if let Some(fill) = segment.fill {
        attrs.insert("color".to_string(), fill.to_hex());
    }
    attrs.insert("font-family".to_string(), segment.font_family.clone());
    attrs.insert("font-size".to_string(), format!("{}px", format_num(segment.font_size)));
    if let Some(spacing) = segment.letter_spacing {
        attrs.insert("letter-spacing".to_string(), format!("{}px", format_num(spacing)));
    }
    if let Some(height) = segment.line_height {
        attrs.insert("line-height".to_string(), format!("{}px", format_num(height)));
    }
    if let Some(align) = &segment.text_align {
        attrs.insert("text-align".to_string(), align.to_ascii_lowercase());
    }
    let transform = match segment.text_case {
        Some(TextCase::Upper) => Some("uppercase"),
        Some(TextCase::Lower) => Some("lowercase"),
        Some(TextCase::Title) => Some("capitalize"),
        Some(TextCase::Original) | None => None,
    };
    if let Some(t) = transform {
        attrs.insert("text-transform".to_string(), t.to_string());
    }
    attrs.retain(|k, _| ATTRIBUTE_ALLOWLIST.contains(&k.as_str()));
    attrs
}

fn run_for(segment: &StyledSegment, text: &str) -> TextRun {
    TextRun {
        text: text.to_string(),
        marks: marks_for(segment),
        attrs: attrs_for(segment),
        link: segment.hyperlink.clone(),
    }
}

// ─── Sticky space & merging ───────────────────────────────────────────────

/// A whitespace-only run between two runs inherits the marks both share.
/// Only immediate neighbours are consulted.
pub fn apply_sticky_space(runs: &mut [TextRun]) {
    if runs.len() < 3 {
        return;
    }
    let before: Vec<(TextMarks, Option<String>)> =
        runs.iter().map(|r| (r.marks, r.link.clone())).collect();
    for i in 1..runs.len() - 1 {
        if !runs[i].is_whitespace() {
            continue;
        }
        let (left, left_link) = &before[i - 1];
        let (right, right_link) = &before[i + 1];
        let mut shared = left.shared(*right);
        if shared.link && left_link != right_link {
            shared.link = false;
        }
        runs[i].marks = runs[i].marks.union(shared);
        if shared.link && runs[i].link.is_none() {
            runs[i].link = left_link.clone();
        }
    }
}

/// Merge adjacent runs: strict (marks, link and attrs equal) or relaxed when
/// either side is whitespace-only (attrs ignored, the non-whitespace run's
/// attrs kept).
pub fn merge_runs(runs: Vec<TextRun>) -> Vec<TextRun> {
    let mut out: Vec<TextRun> = Vec::with_capacity(runs.len());
    for run in runs {
        if let Some(last) = out.last_mut()
            && last.marks == run.marks
            && last.link == run.link
        {
            let last_ws = last.is_whitespace();
            let run_ws = run.is_whitespace();
            if last.attrs == run.attrs || last_ws || run_ws {
                if last_ws && !run_ws {
                    last.attrs = run.attrs;
                }
                last.text.push_str(&run.text);
                continue;
            }
        }
        out.push(run);
    }
    out
}

fn group_blocks(lines: Vec<TextLine>) -> Vec<TextBlock> {
    let mut blocks: Vec<TextBlock> = Vec::new();
    for line in lines {
        let kind = BlockKind::from(line.attrs.list_type);
        match blocks.last_mut() {
            Some(block) if block.kind == kind => block.lines.push(line),
            _ => blocks.push(TextBlock {
                kind,
                lines: vec![line],
            }),
        }
    }
    blocks
}

/// Lowercased host of a link, used as the favicon lookup key. Links
/// without a scheme are read as `https`.
pub fn link_domain(link: &str) -> Option<String> {
    let parsed = match Url::parse(link.trim()) {
        Ok(parsed) => parsed,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{}", link.trim())).ok()?,
        Err(_) => return None,
    };
    parsed.host_str().filter(|h| !h.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seg(text: &str) -> StyledSegment {
        StyledSegment::plain(text)
    }

    fn bold(text: &str) -> StyledSegment {
        let mut s = seg(text);
        s.font_weight = 700;
        s
    }

    fn texts(line: &TextLine) -> Vec<&str> {
        line.runs.iter().map(|r| r.text.as_str()).collect()
    }

    #[test]
    fn splits_every_break_kind() {
        assert_eq!(split_on_breaks("a\r\nb\rc\nd\u{2028}e\u{2029}f"), vec!["a", "b", "c", "d", "e", "f"]);
        assert_eq!(split_on_breaks("a\n"), vec!["a", ""]);
    }

    #[test]
    fn newline_yields_two_single_run_lines() {
        let blocks = merge_text(&TextContent {
            segments: vec![seg("a\nb")],
        });
        assert_eq!(blocks.len(), 1);
        let lines = &blocks[0].lines;
        assert_eq!(lines.len(), 2);
        assert_eq!(texts(&lines[0]), vec!["a"]);
        assert_eq!(texts(&lines[1]), vec!["b"]);
    }

    #[test]
    fn trailing_break_opens_no_line() {
        let blocks = merge_text(&TextContent {
            segments: vec![seg("a\n\nb\n")],
        });
        let lines = &blocks[0].lines;
        assert_eq!(lines.len(), 3);
        assert!(lines[1].runs.is_empty());
    }

    #[test]
    fn empty_separator_between_bold_runs_merges() {
        let blocks = merge_text(&TextContent {
            segments: vec![bold("Hello"), seg(""), bold("World")],
        });
        let runs = &blocks[0].lines[0].runs;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, "HelloWorld");
        assert!(runs[0].marks.bold);
    }

    #[test]
    fn sticky_space_only_looks_at_neighbours() {
        let mut runs = vec![
            run_for(&bold("a"), "a"),
            run_for(&seg(" "), " "),
            run_for(&seg(" "), " "),
            run_for(&bold("b"), "b"),
        ];
        apply_sticky_space(&mut runs);
        assert!(!runs[1].marks.bold);
        assert!(!runs[2].marks.bold);
    }

    #[test]
    fn whitespace_merge_keeps_content_attrs() {
        let mut big = seg("Title");
        big.font_size = 32.0;
        let blocks = merge_text(&TextContent {
            segments: vec![seg(" "), big],
        });
        let runs = &blocks[0].lines[0].runs;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, " Title");
        assert_eq!(runs[0].attrs["font-size"], "32px");
    }

    #[test]
    fn marks_and_attrs_from_segment() {
        let mut s = seg("x");
        s.font_family = "JetBrains Mono".into();
        s.font_style = "Italic".into();
        s.text_decoration = TextDecoration::Strikethrough;
        s.text_case = Some(TextCase::Upper);
        s.hyperlink = Some("https://example.com/docs".into());
        let marks = marks_for(&s);
        assert!(marks.code && marks.italic && marks.strike && marks.link);
        assert!(!marks.bold && !marks.underline);
        assert_eq!(attrs_for(&s)["text-transform"], "uppercase");
        assert_eq!(link_domain("https://user@example.com:8080/docs?q").as_deref(), Some("example.com"));
    }

    #[test]
    fn link_domains_are_normalized_hosts() {
        assert_eq!(link_domain("https://Docs.Example.com/a"), link_domain("https://docs.example.com/b"));
        assert_eq!(link_domain("https://[::1]:8080/x").as_deref(), Some("[::1]"));
        assert_eq!(link_domain("example.org/pricing").as_deref(), Some("example.org"));
        assert_eq!(link_domain("mailto:team@example.com"), None);
    }

    #[test]
    fn lists_group_into_blocks() {
        let mut item1 = seg("one\n");
        item1.list_type = ListType::Ordered;
        let mut item2 = seg("two\n");
        item2.list_type = ListType::Ordered;
        let blocks = merge_text(&TextContent {
            segments: vec![seg("Intro\n"), item1, item2, seg("Outro")],
        });
        let kinds: Vec<BlockKind> = blocks.iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            vec![BlockKind::Paragraph, BlockKind::OrderedList, BlockKind::Paragraph]
        );
        assert_eq!(blocks[1].lines.len(), 2);
    }
}
