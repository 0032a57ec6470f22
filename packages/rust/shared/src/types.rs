//! Core domain types for BlogPostGen projects and articles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Distinguished value shown for articles with no `last_pipeline`.
pub const SEED: &str = "seed";

// ---------------------------------------------------------------------------
// ArticleMeta
// ---------------------------------------------------------------------------

/// The `index.json` snapshot stored in each article directory.
///
/// Fields this version does not know about are kept in `extra` so a rewrite
/// never drops data written by other tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleMeta {
    /// Unique path within the project (e.g. `best-trail-running-shoes`).
    pub path: String,
    /// Working title.
    pub title: String,
    /// Target keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Short brief from the content plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Desired length of the finished article.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_word_count: Option<u32>,
    /// Scheduling priority (lower runs first in plans that set it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// Search intent (informational, commercial, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_intent: Option<String>,
    /// Funnel stage (tofu, mofu, bofu).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel_stage: Option<String>,
    /// Bumped whenever the importer replaces the article.
    #[serde(default = "default_version")]
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last pipeline that completed in full. `None` means seed.
    #[serde(default)]
    pub last_pipeline: Option<String>,
    /// Ordered, deduplicated names of actions that already succeeded.
    #[serde(default)]
    pub applied_actions: Vec<String>,
    /// Heading outline written by the `add_toc` action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toc: Option<Vec<TocHeading>>,
    /// Body word count written by the `word_count` action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<usize>,
    /// SHA-256 of `content.md` as last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Running total of remote tokens spent on this article.
    #[serde(default)]
    pub tokens_used: u64,
    /// Running total of remote cost in USD spent on this article.
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_version() -> u32 {
    1
}

impl ArticleMeta {
    /// A fresh seed article with no pipeline progress.
    pub fn seed(path: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            path: path.into(),
            title: title.into(),
            keywords: Vec::new(),
            description: None,
            target_word_count: None,
            priority: None,
            search_intent: None,
            funnel_stage: None,
            version: 1,
            created_at: now,
            updated_at: now,
            last_pipeline: None,
            applied_actions: Vec::new(),
            toc: None,
            word_count: None,
            content_hash: None,
            tokens_used: 0,
            cost_usd: 0.0,
            extra: serde_json::Map::new(),
        }
    }

    /// Build a seed article from a parsed plan entry.
    pub fn from_plan(path: impl Into<String>, entry: &PlanEntry) -> Self {
        let mut meta = Self::seed(path, entry.title.clone());
        meta.keywords = entry.keywords.clone();
        meta.description = entry.description.clone();
        meta.target_word_count = entry.target_word_count;
        meta.priority = entry.priority;
        meta.search_intent = entry.search_intent.clone();
        meta.funnel_stage = entry.funnel_stage.clone();
        meta
    }

    /// Whether the article has not completed any pipeline yet.
    pub fn is_seed(&self) -> bool {
        self.last_pipeline.is_none()
    }

    /// `last_pipeline`, or `"seed"` for display.
    pub fn stage(&self) -> &str {
        self.last_pipeline.as_deref().unwrap_or(SEED)
    }

    pub fn has_applied(&self, action: &str) -> bool {
        self.applied_actions.iter().any(|a| a == action)
    }

    /// Append `action` unless it is already recorded. Returns whether it was added.
    pub fn record_applied(&mut self, action: &str) -> bool {
        if self.has_applied(action) {
            return false;
        }
        self.applied_actions.push(action.to_string());
        true
    }

    /// Names from `expected` that are not in `applied_actions`, in `expected` order.
    pub fn missing_actions<'a>(&self, expected: &'a [String]) -> Vec<&'a str> {
        expected
            .iter()
            .filter(|name| !self.has_applied(name))
            .map(String::as_str)
            .collect()
    }
}

/// One heading in an article outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocHeading {
    pub level: u8,
    pub text: String,
    pub anchor: String,
}

// ---------------------------------------------------------------------------
// Pipeline & action declarations
// ---------------------------------------------------------------------------

/// Where an action executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// In-process, zero external cost.
    Local,
    /// Delegated to the generation service.
    Remote,
}

/// Which generation-service operation a remote action calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOperation {
    Generate,
    #[default]
    Enhance,
}

impl RemoteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Enhance => "enhance",
        }
    }
}

/// `[[actions]]` entry declaring an action name and how it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDecl {
    pub name: String,
    pub kind: ActionKind,
    /// Only meaningful for remote actions.
    #[serde(default)]
    pub operation: RemoteOperation,
}

/// Reference to an action inside a pipeline declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub action: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// `[[pipelines]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDecl {
    pub name: String,
    /// Pipeline that must have completed last. Absent means seed-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,
    pub actions: Vec<PipelineStep>,
}

impl PipelineDecl {
    pub fn eligibility(&self) -> Eligibility {
        match &self.requires {
            Some(prev) => Eligibility::After(prev.clone()),
            None => Eligibility::Seed,
        }
    }
}

/// Which articles a pipeline may run on, keyed on `last_pipeline`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// Only articles with no `last_pipeline`.
    Seed,
    /// Only articles whose `last_pipeline` is exactly this value.
    After(String),
}

impl Eligibility {
    /// Whether an article at `last_pipeline` qualifies.
    pub fn matches(&self, last_pipeline: Option<&str>) -> bool {
        match self {
            Self::Seed => last_pipeline.is_none(),
            Self::After(prev) => last_pipeline == Some(prev.as_str()),
        }
    }

    /// The `last_pipeline` value that satisfies this filter.
    pub fn required_state(&self) -> Option<&str> {
        match self {
            Self::Seed => None,
            Self::After(prev) => Some(prev.as_str()),
        }
    }
}

impl std::fmt::Display for Eligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seed => write!(f, "{SEED}"),
            Self::After(prev) => write!(f, "after {prev}"),
        }
    }
}

// ---------------------------------------------------------------------------
// PlanEntry
// ---------------------------------------------------------------------------

/// One article proposal from a content plan, before path derivation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub title: String,
    /// Explicit slug or URL from the plan, if given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_word_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel_stage: Option<String>,
}
