//! Content plan parser.
//!
//! Two input shapes are accepted:
//! - Structured: line-labeled blocks, one per article:
//!   ```text
//!   Title: Best Trail Running Shoes
//!   URL: /best-trail-running-shoes
//!   Keywords: trail shoes, running
//!   Description: Roundup of grippy shoes.
//!   ```
//!   Blocks are separated by blank lines, `---`, markdown headings, or by the
//!   next `Title:` label. Labels may be numbered, bulleted or bolded.
//! - Free-form: one idea per line, to be expanded by the generation service.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use blogpostgen_shared::{BlogPostGenError, PlanEntry, Result};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Result of parsing plan text.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPlan {
    /// Labeled blocks were found.
    Structured {
        entries: Vec<PlanEntry>,
        /// Blocks that could not become an entry.
        rejected: Vec<RejectedBlock>,
    },
    /// No labels were found; each line is an idea.
    Ideas(Vec<String>),
}

/// A structured block that was dropped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedBlock {
    /// 1-based line where the block starts.
    pub line: usize,
    pub reason: String,
}

/// Recognized field labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Title,
    Url,
    Keywords,
    Description,
    Words,
    Priority,
    Intent,
    Funnel,
}

impl Label {
    fn from_name(name: &str) -> Option<Self> {
        let normalized = name.to_lowercase().replace(['_', '-'], " ");
        let label = match normalized.trim() {
            "title" | "headline" => Self::Title,
            "url" | "path" | "slug" => Self::Url,
            "keyword" | "keywords" => Self::Keywords,
            "description" | "brief" | "summary" => Self::Description,
            "words" | "word count" | "target words" | "target word count" | "length" => {
                Self::Words
            }
            "priority" => Self::Priority,
            "intent" | "search intent" => Self::Intent,
            "funnel" | "funnel stage" => Self::Funnel,
            _ => return None,
        };
        Some(label)
    }
}

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches `Label: value`, tolerating `1.`, `-`, and `**` decorations.
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+[.)]\s*)?(?:[-*]\s+)?\**([A-Za-z][A-Za-z _-]{1,24}?)\**\s*:\**\s*(.*)$")
        .expect("label regex")
});

/// Matches block separators: `---`, `***`, `===`.
static SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:-{3,}|\*{3,}|={3,})$").expect("separator regex"));

/// Matches a leading list marker on free-form lines.
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+•]\s+|\d+[.)]\s+)").expect("bullet regex"));

/// Matches the first integer in a value (`1,500 words` → `1,500`).
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,_]*").expect("number regex"));

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse plan text into structured entries or free-form ideas.
pub fn parse_plan(content: &str) -> Result<ParsedPlan> {
    if content.trim().is_empty() {
        return Err(BlogPostGenError::parse("plan is empty"));
    }

    let structured = content
        .lines()
        .any(|line| label_of(line.trim()).is_some());

    if structured {
        let parsed = parse_structured(content);
        if let ParsedPlan::Structured { entries, rejected } = &parsed {
            debug!(
                entries = entries.len(),
                rejected = rejected.len(),
                "parsed structured plan"
            );
        }
        Ok(parsed)
    } else {
        let ideas = parse_ideas(content);
        if ideas.is_empty() {
            return Err(BlogPostGenError::parse("plan contains no ideas"));
        }
        debug!(ideas = ideas.len(), "parsed free-form plan");
        Ok(ParsedPlan::Ideas(ideas))
    }
}

fn label_of(line: &str) -> Option<(Label, String)> {
    let caps = LABEL_RE.captures(line)?;
    let label = Label::from_name(&caps[1])?;
    let value = caps[2].trim().trim_matches('*').trim().to_string();
    Some((label, value))
}

/// Accumulates one block's fields.
#[derive(Debug, Default)]
struct BlockBuilder {
    start_line: usize,
    entry: PlanEntry,
    has_fields: bool,
    last_label: Option<Label>,
}

impl BlockBuilder {
    fn new(start_line: usize) -> Self {
        Self {
            start_line,
            ..Default::default()
        }
    }

    fn apply(&mut self, label: Label, value: String) {
        self.has_fields = true;
        self.last_label = Some(label);
        let entry = &mut self.entry;
        match label {
            Label::Title => entry.title = value,
            Label::Url => entry.url = non_empty(value),
            Label::Keywords => entry.keywords = split_keywords(&value),
            Label::Description => entry.description = non_empty(value),
            Label::Words => entry.target_word_count = parse_number(&value),
            Label::Priority => entry.priority = parse_priority(&value),
            Label::Intent => entry.search_intent = non_empty(value.to_lowercase()),
            Label::Funnel => entry.funnel_stage = non_empty(value.to_lowercase()),
        }
    }

    /// Unlabeled line inside a block: continues a description.
    fn continue_text(&mut self, text: &str) {
        if self.last_label == Some(Label::Description) {
            let desc = self.entry.description.get_or_insert_with(String::new);
            if !desc.is_empty() {
                desc.push(' ');
            }
            desc.push_str(text);
        }
    }

    fn finish(self, entries: &mut Vec<PlanEntry>, rejected: &mut Vec<RejectedBlock>) {
        if !self.has_fields {
            return;
        }
        if self.entry.title.trim().is_empty() {
            rejected.push(RejectedBlock {
                line: self.start_line,
                reason: "block has no title".into(),
            });
            return;
        }
        entries.push(self.entry);
    }
}

fn parse_structured(content: &str) -> ParsedPlan {
    let mut entries = Vec::new();
    let mut rejected = Vec::new();
    let mut block = BlockBuilder::new(1);

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();

        if trimmed.is_empty() || SEPARATOR_RE.is_match(trimmed) || trimmed.starts_with('#') {
            std::mem::replace(&mut block, BlockBuilder::new(line_no + 1))
                .finish(&mut entries, &mut rejected);
            continue;
        }

        match label_of(trimmed) {
            Some((Label::Title, value)) if !block.entry.title.is_empty() => {
                std::mem::replace(&mut block, BlockBuilder::new(line_no))
                    .finish(&mut entries, &mut rejected);
                block.apply(Label::Title, value);
            }
            Some((label, value)) => {
                if !block.has_fields {
                    block.start_line = line_no;
                }
                block.apply(label, value);
            }
            None => block.continue_text(trimmed),
        }
    }
    block.finish(&mut entries, &mut rejected);

    ParsedPlan::Structured { entries, rejected }
}

fn parse_ideas(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !SEPARATOR_RE.is_match(line))
        .map(|line| BULLET_RE.replace(line, "").trim().to_string())
        .filter(|idea| !idea.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn split_keywords(value: &str) -> Vec<String> {
    value
        .split([',', ';', '|'])
        .map(|k| k.trim().trim_matches('"').trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

fn parse_number(value: &str) -> Option<u32> {
    NUMBER_RE
        .find(value)
        .and_then(|m| m.as_str().replace([',', '_'], "").parse().ok())
}

fn parse_priority(value: &str) -> Option<u32> {
    match value.trim().to_lowercase().as_str() {
        "high" | "p1" => Some(1),
        "medium" | "normal" | "p2" => Some(2),
        "low" | "p3" => Some(3),
        other => parse_number(other),
    }
}
