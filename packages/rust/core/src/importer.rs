//! Plan Importer: turn plan text into seed articles.
//!
//! Each candidate is classified against the existing article at its path:
//! - none → [`Classification::New`]
//! - a seed (no `last_pipeline`) → [`Classification::SeedReplace`]: the old seed
//!   is archived, then replaced
//! - a processed article → [`Classification::Processed`]: never overwritten
//!   automatically; interactive imports ask a [`ConflictResolver`]
//!
//! Candidates are independent. One failing never stops the rest.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, instrument, warn};

use blogpostgen_client::GenerationService;
use blogpostgen_plan::{DEFAULT_MAX_WORDS, ParsedPlan, candidate_path, parse_plan};
use blogpostgen_shared::{ArticleMeta, PlanEntry, Result};
use blogpostgen_storage::ArticleStore;

// ---------------------------------------------------------------------------
// Conflict resolution
// ---------------------------------------------------------------------------

/// How a candidate relates to what is already stored at its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    New,
    SeedReplace,
    Processed,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::SeedReplace => "seed_replace",
            Self::Processed => "processed",
        }
    }
}

/// Answer to a processed-article conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    Skip,
    /// Archive the processed article and replace it with a fresh seed.
    Overwrite,
}

/// Consulted in interactive mode when a candidate collides with a processed
/// article.
pub trait ConflictResolver {
    fn resolve(&self, existing: &ArticleMeta, candidate: &ImportCandidate) -> ConflictDecision;
}

/// Declines every overwrite.
pub struct DeclineAll;

impl ConflictResolver for DeclineAll {
    fn resolve(&self, _existing: &ArticleMeta, _candidate: &ImportCandidate) -> ConflictDecision {
        ConflictDecision::Skip
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A plan entry with its derived article path.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportCandidate {
    pub path: String,
    pub entry: PlanEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    Created,
    /// Replaced an existing article; the old one was archived here.
    Replaced { archive: PathBuf },
    /// Dry run: would create or replace.
    Planned,
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportItem {
    pub title: String,
    /// `None` when no path could be derived.
    pub path: Option<String>,
    pub classification: Option<Classification>,
    pub outcome: ImportOutcome,
}

/// Aggregate import result with per-candidate detail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportResult {
    pub dry_run: bool,
    pub items: Vec<ImportItem>,
}

impl ImportResult {
    fn count(&self, f: impl Fn(&ImportItem) -> bool) -> usize {
        self.items.iter().filter(|&i| f(i)).count()
    }

    pub fn created(&self) -> usize {
        self.count(|i| {
            matches!(i.outcome, ImportOutcome::Created)
                || (matches!(i.outcome, ImportOutcome::Planned)
                    && i.classification == Some(Classification::New))
        })
    }

    pub fn updated(&self) -> usize {
        self.count(|i| {
            matches!(i.outcome, ImportOutcome::Replaced { .. })
                || (matches!(i.outcome, ImportOutcome::Planned)
                    && i.classification != Some(Classification::New))
        })
    }

    pub fn skipped(&self) -> usize {
        self.count(|i| matches!(i.outcome, ImportOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|i| matches!(i.outcome, ImportOutcome::Failed { .. }))
    }

    /// `(title, reason)` for every failed candidate.
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.items
            .iter()
            .filter_map(|i| match &i.outcome {
                ImportOutcome::Failed { reason } => Some((i.title.as_str(), reason.as_str())),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Ask the resolver about processed-article conflicts instead of failing them.
    pub interactive: bool,
    /// Classify only; write nothing.
    pub dry_run: bool,
    /// Words kept when deriving a path from a title.
    pub slug_max_words: usize,
    /// Timeout for free-form idea expansion.
    pub expand_timeout: Duration,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            interactive: false,
            dry_run: false,
            slug_max_words: DEFAULT_MAX_WORDS,
            expand_timeout: Duration::from_secs(600),
        }
    }
}

// ---------------------------------------------------------------------------
// PlanImporter
// ---------------------------------------------------------------------------

pub struct PlanImporter<'a, S, R> {
    store: &'a ArticleStore,
    project: &'a str,
    service: &'a S,
    resolver: &'a R,
}

impl<'a, S: GenerationService, R: ConflictResolver> PlanImporter<'a, S, R> {
    pub fn new(store: &'a ArticleStore, project: &'a str, service: &'a S, resolver: &'a R) -> Self {
        Self {
            store,
            project,
            service,
            resolver,
        }
    }

    /// Parse `text` and import every candidate.
    ///
    /// Only unusable input (empty plan, failed idea expansion) is an error;
    /// everything else is reported per candidate.
    #[instrument(skip_all, fields(project = %self.project, dry_run = options.dry_run))]
    pub async fn import_text(&self, text: &str, options: &ImportOptions) -> Result<ImportResult> {
        let (entries, rejected) = match parse_plan(text)? {
            ParsedPlan::Structured { entries, rejected } => (entries, rejected),
            ParsedPlan::Ideas(ideas) => {
                info!(ideas = ideas.len(), "expanding free-form ideas");
                let entries = self
                    .service
                    .expand_ideas(self.project, &ideas, options.expand_timeout)
                    .await?;
                (entries, Vec::new())
            }
        };

        let mut result = self.import_entries(entries, options);
        for block in rejected {
            result.items.push(ImportItem {
                title: String::new(),
                path: None,
                classification: None,
                outcome: ImportOutcome::Failed {
                    reason: format!("line {}: {}", block.line, block.reason),
                },
            });
        }

        info!(
            created = result.created(),
            updated = result.updated(),
            skipped = result.skipped(),
            failed = result.failed(),
            "import finished"
        );
        Ok(result)
    }

    /// Import already-parsed entries, in order.
    pub fn import_entries(&self, entries: Vec<PlanEntry>, options: &ImportOptions) -> ImportResult {
        let mut result = ImportResult {
            dry_run: options.dry_run,
            items: Vec::with_capacity(entries.len()),
        };
        let mut seen = HashSet::new();

        for entry in entries {
            let title = entry.title.clone();
            let path = match candidate_path(&entry, options.slug_max_words) {
                Ok(path) => path,
                Err(e) => {
                    result.items.push(ImportItem {
                        title,
                        path: None,
                        classification: None,
                        outcome: ImportOutcome::Failed {
                            reason: e.to_string(),
                        },
                    });
                    continue;
                }
            };

            if !seen.insert(path.clone()) {
                result.items.push(ImportItem {
                    title,
                    path: Some(path),
                    classification: None,
                    outcome: ImportOutcome::Failed {
                        reason: "duplicate path in plan".into(),
                    },
                });
                continue;
            }

            let candidate = ImportCandidate { path, entry };
            let item = match self.import_one(&candidate, options) {
                Ok(item) => item,
                Err(e) => {
                    warn!(path = %candidate.path, error = %e, "candidate failed");
                    ImportItem {
                        title,
                        path: Some(candidate.path.clone()),
                        classification: None,
                        outcome: ImportOutcome::Failed {
                            reason: e.to_string(),
                        },
                    }
                }
            };
            result.items.push(item);
        }
        result
    }

    /// Classify the stored article at `candidate.path`, if any.
    pub fn classify(&self, candidate: &ImportCandidate) -> Result<(Classification, Option<ArticleMeta>)> {
        if !self.store.exists(&candidate.path) {
            return Ok((Classification::New, None));
        }
        let existing = self.store.load(&candidate.path)?;
        let class = if existing.is_seed() {
            Classification::SeedReplace
        } else {
            Classification::Processed
        };
        Ok((class, Some(existing)))
    }

    fn import_one(&self, candidate: &ImportCandidate, options: &ImportOptions) -> Result<ImportItem> {
        let (class, existing) = self.classify(candidate)?;
        let item = |outcome| ImportItem {
            title: candidate.entry.title.clone(),
            path: Some(candidate.path.clone()),
            classification: Some(class),
            outcome,
        };

        if let (Classification::Processed, Some(existing)) = (class, &existing) {
            let stage = existing.stage();
            if !options.interactive {
                return Ok(item(ImportOutcome::Failed {
                    reason: format!("article is at stage '{stage}'; processed articles are never overwritten"),
                }));
            }
            if options.dry_run {
                return Ok(item(ImportOutcome::Skipped {
                    reason: format!("article is at stage '{stage}'; would ask before overwriting"),
                }));
            }
            if self.resolver.resolve(existing, candidate) == ConflictDecision::Skip {
                return Ok(item(ImportOutcome::Skipped {
                    reason: format!("kept existing article at stage '{stage}'"),
                }));
            }
        }

        if options.dry_run {
            return Ok(item(ImportOutcome::Planned));
        }

        let mut meta = ArticleMeta::from_plan(&candidate.path, &candidate.entry);
        let outcome = match existing {
            None => {
                self.store.create(&mut meta, &seed_body(&candidate.entry))?;
                info!(path = %candidate.path, "created seed article");
                ImportOutcome::Created
            }
            Some(old) => {
                let archive = self.store.archive(&candidate.path)?;
                meta.version = old.version + 1;
                meta.created_at = old.created_at;
                if let Err(e) = self.store.create(&mut meta, &seed_body(&candidate.entry)) {
                    if let Err(restore_err) = self.store.restore(&candidate.path, &archive) {
                        warn!(
                            path = %candidate.path,
                            archive = %archive.display(),
                            error = %restore_err,
                            "failed to restore archived article"
                        );
                    }
                    return Err(e);
                }
                info!(
                    path = %candidate.path,
                    version = meta.version,
                    previous_stage = old.stage(),
                    "replaced article"
                );
                ImportOutcome::Replaced { archive }
            }
        };
        Ok(item(outcome))
    }
}

/// Initial body for a seed: the title and the plan brief.
fn seed_body(entry: &PlanEntry) -> String {
    match &entry.description {
        Some(desc) => format!("# {}\n\n{desc}\n", entry.title),
        None => format!("# {}\n", entry.title),
    }
}
