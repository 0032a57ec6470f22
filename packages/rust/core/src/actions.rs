//! In-process actions: `add_toc`, `word_count`, `verify_assets`.
//!
//! Local actions read the article body and update metadata fields. They never
//! touch the network and cost nothing.

use std::collections::HashMap;
use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use blogpostgen_shared::{ArticleMeta, BlogPostGenError, Result, TocHeading};

use crate::registry::LocalAction;

/// ATX heading: `## Text ##`.
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*\s*$").expect("heading regex"));

/// Inline link or image: `[text](target "title")`, `![alt](<target>)`.
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(!?)\[([^\]]*)\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#).expect("link regex")
});

/// Inline emphasis and code markers stripped from heading text.
static INLINE_MARKUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[*_`~]+").expect("markup regex"));

/// Run `action` against `meta`, given the article body and directory.
pub fn run_local(
    action: LocalAction,
    meta: &mut ArticleMeta,
    content: &str,
    article_dir: &Path,
) -> Result<()> {
    match action {
        LocalAction::AddToc => {
            let toc = build_toc(content);
            debug!(article = %meta.path, headings = toc.len(), "built outline");
            meta.toc = Some(toc);
        }
        LocalAction::WordCount => {
            let count = count_words(content);
            debug!(article = %meta.path, words = count, "counted words");
            meta.word_count = Some(count);
        }
        LocalAction::VerifyAssets => {
            let missing = missing_assets(content, article_dir);
            if !missing.is_empty() {
                return Err(BlogPostGenError::validation(format!(
                    "missing assets in '{}': {}",
                    meta.path,
                    missing.join(", ")
                )));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Markdown scanning
// ---------------------------------------------------------------------------

/// Lines outside fenced code blocks.
fn prose_lines(content: &str) -> impl Iterator<Item = &str> {
    let mut fence: Option<&str> = None;
    content.lines().filter(move |line| {
        let trimmed = line.trim_start();
        let marker = if trimmed.starts_with("```") {
            Some("```")
        } else if trimmed.starts_with("~~~") {
            Some("~~~")
        } else {
            None
        };
        match (fence, marker) {
            (None, Some(m)) => {
                fence = Some(m);
                false
            }
            (Some(open), Some(m)) if open == m => {
                fence = None;
                false
            }
            (Some(_), _) => false,
            (None, None) => true,
        }
    })
}

/// Heading outline for levels 2–6; the level-1 heading is the article title.
pub fn build_toc(content: &str) -> Vec<TocHeading> {
    let mut used: HashMap<String, usize> = HashMap::new();
    let mut toc = Vec::new();

    for line in prose_lines(content) {
        let Some(caps) = HEADING_RE.captures(line) else {
            continue;
        };
        let level = caps[1].len();
        if level < 2 {
            continue;
        }
        let text = heading_text(&caps[2]);
        if text.is_empty() {
            continue;
        }

        let base = anchor_for(&text);
        let count = used.entry(base.clone()).or_insert(0);
        let anchor = if *count == 0 {
            base
        } else {
            format!("{base}-{count}")
        };
        *count += 1;

        toc.push(TocHeading {
            level: u8::try_from(level).unwrap_or(6),
            text,
            anchor,
        });
    }
    toc
}

fn heading_text(raw: &str) -> String {
    let linked = LINK_RE.replace_all(raw, "$2");
    INLINE_MARKUP_RE.replace_all(&linked, "").trim().to_string()
}

/// GitHub-style anchor: lowercase, punctuation dropped, spaces to hyphens.
fn anchor_for(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter_map(|c| match c {
            c if c.is_alphanumeric() || c == '-' || c == '_' => Some(c),
            ' ' => Some('-'),
            _ => None,
        })
        .collect()
}

/// Words in prose, ignoring code blocks and markup-only tokens.
pub fn count_words(content: &str) -> usize {
    prose_lines(content)
        .flat_map(str::split_whitespace)
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .count()
}

/// Relative link and image targets that do not exist inside `article_dir`.
///
/// Targets that climb out of the directory count as missing.
pub fn missing_assets(content: &str, article_dir: &Path) -> Vec<String> {
    let mut missing = Vec::new();
    for line in prose_lines(content) {
        for caps in LINK_RE.captures_iter(line) {
            let target = &caps[3];
            if !is_local_target(target) {
                continue;
            }
            let file = target.split(['#', '?']).next().unwrap_or_default();
            if file.is_empty() {
                continue;
            }
            let escapes = Path::new(file)
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if (escapes || !article_dir.join(file).exists()) && !missing.iter().any(|m| m == file)
            {
                missing.push(file.to_string());
            }
        }
    }
    missing
}

fn is_local_target(target: &str) -> bool {
    !(target.contains("://")
        || target.starts_with('#')
        || target.starts_with('/')
        || target.starts_with("mailto:")
        || target.starts_with("tel:")
        || target.starts_with("data:"))
}
