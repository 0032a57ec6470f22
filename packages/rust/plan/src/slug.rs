//! Article path derivation.
//!
//! Titles become paths by lowercasing, dropping stopwords, keeping at most
//! `max_words` words, and joining with hyphens. An explicit plan URL is only
//! normalized; its words are kept as the author wrote them.

use blogpostgen_shared::{BlogPostGenError, PlanEntry, Result};

/// Words kept from a title when no limit is configured.
pub const DEFAULT_MAX_WORDS: usize = 6;

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for",
    "from", "how", "i", "in", "into", "is", "it", "its", "my", "of", "on", "or", "our", "so",
    "than", "that", "the", "their", "this", "to", "vs", "was", "we", "what", "when", "where",
    "which", "who", "why", "will", "with", "you", "your",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

/// Lowercased alphanumeric words; apostrophes are dropped inside words.
fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace(['\'', '\u{2019}'], "")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Derive a path from a title.
///
/// Falls back to the unfiltered words when the title is made only of
/// stopwords. Returns `None` when the title has no usable characters.
pub fn slugify_title(title: &str, max_words: usize) -> Option<String> {
    let all = words(title);
    let limit = max_words.max(1);

    let filtered: Vec<&str> = all
        .iter()
        .map(String::as_str)
        .filter(|w| !is_stopword(w))
        .take(limit)
        .collect();

    let chosen = if filtered.is_empty() {
        all.iter().map(String::as_str).take(limit).collect()
    } else {
        filtered
    };

    if chosen.is_empty() {
        None
    } else {
        Some(chosen.join("-"))
    }
}

/// Normalize an explicit plan URL or path into an article path.
///
/// Absolute URLs contribute only their path. Each segment is lowercased and
/// reduced to hyphen-joined alphanumeric runs; empty segments are dropped.
pub fn normalize_slug(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let path = match raw.find("://") {
        Some(idx) => {
            let rest = &raw[idx + 3..];
            rest.find('/').map_or("", |slash| &rest[slash..])
        }
        None => raw,
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let segments: Vec<String> = path
        .split('/')
        .map(|segment| words(segment).join("-"))
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Path for a plan entry: its explicit URL when usable, else its title.
pub fn candidate_path(entry: &PlanEntry, max_words: usize) -> Result<String> {
    if let Some(path) = entry.url.as_deref().and_then(normalize_slug) {
        return Ok(path);
    }
    slugify_title(&entry.title, max_words).ok_or_else(|| {
        BlogPostGenError::validation(format!(
            "cannot derive an article path from title {:?}",
            entry.title
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwords_are_sorted_for_binary_search() {
        let mut sorted = STOPWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOPWORDS);
    }

    #[test]
    fn title_drops_stopwords_and_truncates() {
        assert_eq!(
            slugify_title("The Best Trail Running Shoes for Muddy Terrain", 6).as_deref(),
            Some("best-trail-running-shoes-muddy-terrain")
        );
        assert_eq!(
            slugify_title("How to Choose Running Poles", 2).as_deref(),
            Some("choose-running")
        );
    }

    #[test]
    fn title_punctuation_and_apostrophes() {
        assert_eq!(
            slugify_title("A Runner's Guide: 10 Tips (2026 Edition)!", 6).as_deref(),
            Some("runners-guide-10-tips-2026-edition")
        );
    }

    #[test]
    fn all_stopword_title_keeps_words() {
        assert_eq!(slugify_title("What Is It", 6).as_deref(), Some("what-is-it"));
    }

    #[test]
    fn unusable_title_yields_none() {
        assert_eq!(slugify_title("  ?! -- ", 6), None);
    }

    #[test]
    fn explicit_urls_are_normalized() {
        assert_eq!(
            normalize_slug("/best-trail-running-shoes").as_deref(),
            Some("best-trail-running-shoes")
        );
        assert_eq!(
            normalize_slug("https://example.com/Guides/Trail_Shoes/?ref=x").as_deref(),
            Some("guides/trail-shoes")
        );
        assert_eq!(normalize_slug("https://example.com/"), None);
    }

    #[test]
    fn candidate_prefers_url_over_title() {
        let entry = PlanEntry {
            title: "Anything At All".into(),
            url: Some("/custom-path".into()),
            ..Default::default()
        };
        assert_eq!(candidate_path(&entry, 6).expect("path"), "custom-path");

        let entry = PlanEntry {
            title: "Hydration Vest Buying Guide".into(),
            url: Some("/".into()),
            ..Default::default()
        };
        assert_eq!(
            candidate_path(&entry, 6).expect("path"),
            "hydration-vest-buying-guide"
        );
    }

    #[test]
    fn candidate_without_words_fails() {
        let entry = PlanEntry {
            title: "!!!".into(),
            ..Default::default()
        };
        assert!(candidate_path(&entry, 6).is_err());
    }
}
