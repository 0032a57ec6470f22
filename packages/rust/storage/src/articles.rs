//! Article State Store.
//!
//! Each article directory holds:
//! - `index.json`: the materialized [`ArticleMeta`] snapshot
//! - `content.md`: the article body
//! - `actions.log`: JSON lines, one per successful action
//!
//! Recording an action appends to the log and fsyncs it before the snapshot is
//! rewritten. [`ArticleStore::load`] replays the log over the snapshot, so a
//! crash between the two writes loses nothing. Resetting an action appends a
//! `reset` entry that replay honours the same way.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use blogpostgen_shared::{ArticleMeta, BlogPostGenError, Result, SEED};

const INDEX_FILE: &str = "index.json";
const CONTENT_FILE: &str = "content.md";
const LOG_FILE: &str = "actions.log";

/// What a log line does to `applied_actions`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOp {
    #[default]
    Applied,
    Reset,
}

/// One line of `actions.log`.
///
/// For a `reset` line, `pipeline` is the stage the article was moved back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub action: String,
    pub pipeline: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub op: LogOp,
}

/// Filesystem-backed store for one project's articles.
#[derive(Debug, Clone)]
pub struct ArticleStore {
    articles_dir: PathBuf,
    archive_dir: PathBuf,
}

impl ArticleStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            articles_dir: project_root.join("articles"),
            archive_dir: project_root.join(".archive"),
        }
    }

    pub fn articles_dir(&self) -> &Path {
        &self.articles_dir
    }

    /// Directory for `path`, rejecting paths that would escape the store.
    pub fn article_dir(&self, path: &str) -> Result<PathBuf> {
        validate_article_path(path)?;
        Ok(self.articles_dir.join(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.article_dir(path)
            .map(|dir| dir.join(INDEX_FILE).is_file())
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// All article paths, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        if self.articles_dir.is_dir() {
            collect_articles(&self.articles_dir, "", &mut paths)?;
        }
        paths.sort();
        Ok(paths)
    }

    /// Load an article snapshot and replay the action log over it.
    ///
    /// Only the last log line per action counts: an action whose last line is
    /// `applied` is added if the snapshot lacks it, one whose last line is
    /// `reset` is removed if the snapshot still has it.
    pub fn load(&self, path: &str) -> Result<ArticleMeta> {
        let dir = self.article_dir(path)?;
        let index = dir.join(INDEX_FILE);
        if !index.is_file() {
            return Err(BlogPostGenError::NotFound(format!("article '{path}'")));
        }

        let raw = std::fs::read_to_string(&index).map_err(|e| BlogPostGenError::io(&index, e))?;
        let mut meta: ArticleMeta = serde_json::from_str(&raw).map_err(|e| {
            BlogPostGenError::parse(format!("invalid {}: {e}", index.display()))
        })?;
        // The directory is authoritative for the path.
        meta.path = path.to_string();

        let log = read_log(&dir.join(LOG_FILE))?;
        let mut last_op: HashMap<&str, LogOp> = HashMap::new();
        for entry in &log {
            last_op.insert(entry.action.as_str(), entry.op);
        }
        meta.applied_actions
            .retain(|a| last_op.get(a.as_str()) != Some(&LogOp::Reset));
        for entry in &log {
            if last_op.get(entry.action.as_str()) == Some(&LogOp::Applied)
                && meta.record_applied(&entry.action)
            {
                info!(
                    article = path,
                    action = %entry.action,
                    "recovered action from log"
                );
            }
        }
        Ok(meta)
    }

    /// Load every article, sorted by path. Fails on the first unreadable one.
    pub fn load_all(&self) -> Result<Vec<ArticleMeta>> {
        self.list()?.iter().map(|p| self.load(p)).collect()
    }

    /// Load every article independently, sorted by path, so one unreadable
    /// record does not hide the rest.
    pub fn load_each(&self) -> Result<Vec<(String, Result<ArticleMeta>)>> {
        Ok(self
            .list()?
            .into_iter()
            .map(|path| {
                let loaded = self.load(&path);
                (path, loaded)
            })
            .collect())
    }

    /// Read the body; a missing file reads as empty.
    pub fn read_content(&self, path: &str) -> Result<String> {
        let file = self.article_dir(path)?.join(CONTENT_FILE);
        match std::fs::read_to_string(&file) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(BlogPostGenError::io(&file, e)),
        }
    }

    /// The logged action history for `path`.
    pub fn action_log(&self, path: &str) -> Result<Vec<ActionLogEntry>> {
        read_log(&self.article_dir(path)?.join(LOG_FILE))
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    /// Create a new article. Fails if one already exists at `meta.path`.
    pub fn create(&self, meta: &mut ArticleMeta, content: &str) -> Result<()> {
        if self.exists(&meta.path) {
            return Err(BlogPostGenError::validation(format!(
                "article '{}' already exists",
                meta.path
            )));
        }
        let dir = self.article_dir(&meta.path)?;
        std::fs::create_dir_all(&dir).map_err(|e| BlogPostGenError::io(&dir, e))?;

        write_atomic(&dir.join(CONTENT_FILE), content.as_bytes())?;
        meta.content_hash = Some(content_hash(content));
        self.save(meta)?;
        debug!(article = %meta.path, "created article");
        Ok(())
    }

    /// Rewrite the snapshot atomically, bumping `updated_at`.
    pub fn save(&self, meta: &mut ArticleMeta) -> Result<()> {
        let dir = self.article_dir(&meta.path)?;
        meta.updated_at = Utc::now();
        let json = serde_json::to_vec_pretty(meta)
            .map_err(|e| BlogPostGenError::Storage(format!("serialize {}: {e}", meta.path)))?;
        write_atomic(&dir.join(INDEX_FILE), &json)
    }

    /// Durably record that `action` succeeded as part of `pipeline`.
    ///
    /// Returns `false` without touching disk when the action is already
    /// recorded, so reruns never duplicate entries.
    pub fn record_action(
        &self,
        meta: &mut ArticleMeta,
        action: &str,
        pipeline: &str,
    ) -> Result<bool> {
        if meta.has_applied(action) {
            return Ok(false);
        }
        let dir = self.article_dir(&meta.path)?;
        append_log(
            &dir.join(LOG_FILE),
            &ActionLogEntry {
                action: action.to_string(),
                pipeline: pipeline.to_string(),
                at: Utc::now(),
                op: LogOp::Applied,
            },
        )?;
        meta.record_applied(action);
        self.save(meta)?;
        Ok(true)
    }

    /// Forget that `action` was applied and move the article back to `stage`
    /// (`None` is seed), so the next run of that stage's successor redoes it.
    ///
    /// Returns `false` without touching disk when the action is not applied.
    pub fn reset_action(
        &self,
        meta: &mut ArticleMeta,
        action: &str,
        stage: Option<&str>,
    ) -> Result<bool> {
        if !meta.has_applied(action) {
            return Ok(false);
        }
        let dir = self.article_dir(&meta.path)?;
        append_log(
            &dir.join(LOG_FILE),
            &ActionLogEntry {
                action: action.to_string(),
                pipeline: stage.unwrap_or(SEED).to_string(),
                at: Utc::now(),
                op: LogOp::Reset,
            },
        )?;
        meta.applied_actions.retain(|a| a.as_str() != action);
        meta.last_pipeline = stage.map(str::to_string);
        self.save(meta)?;
        Ok(true)
    }

    /// Set `last_pipeline` and persist.
    pub fn set_last_pipeline(&self, meta: &mut ArticleMeta, pipeline: Option<&str>) -> Result<()> {
        meta.last_pipeline = pipeline.map(str::to_string);
        self.save(meta)
    }

    /// Replace the body, refresh `content_hash`, and persist the snapshot.
    pub fn write_content(&self, meta: &mut ArticleMeta, content: &str) -> Result<()> {
        let file = self.article_dir(&meta.path)?.join(CONTENT_FILE);
        write_atomic(&file, content.as_bytes())?;
        meta.content_hash = Some(content_hash(content));
        self.save(meta)
    }

    /// Move an article's own files into `.archive/` and return their new
    /// location.
    ///
    /// The archive name carries the article version and a UTC timestamp:
    /// `.archive/<path>.v<version>.<YYYYMMDDTHHMMSSZ>`. Subdirectories holding
    /// nested articles stay where they are.
    pub fn archive(&self, path: &str) -> Result<PathBuf> {
        let meta = self.load(path)?;
        let src = self.article_dir(path)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let dest = self
            .archive_dir
            .join(format!("{path}.v{}.{stamp}", meta.version));
        std::fs::create_dir_all(&dest).map_err(|e| BlogPostGenError::io(&dest, e))?;

        let mut nested = 0;
        let entries = std::fs::read_dir(&src).map_err(|e| BlogPostGenError::io(&src, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| BlogPostGenError::io(&src, e))?;
            let from = entry.path();
            if from.is_dir() && holds_article(&from)? {
                nested += 1;
                continue;
            }
            let to = dest.join(entry.file_name());
            std::fs::rename(&from, &to).map_err(|e| BlogPostGenError::io(&from, e))?;
        }
        if nested == 0 {
            std::fs::remove_dir(&src).map_err(|e| BlogPostGenError::io(&src, e))?;
        }

        info!(article = path, archive = %dest.display(), nested, "archived article");
        Ok(dest)
    }

    /// Move the files of an archive made by [`ArticleStore::archive`] back to
    /// `path`, replacing whatever was written there since.
    pub fn restore(&self, path: &str, archive: &Path) -> Result<()> {
        let dir = self.article_dir(path)?;
        std::fs::create_dir_all(&dir).map_err(|e| BlogPostGenError::io(&dir, e))?;

        let entries = std::fs::read_dir(archive).map_err(|e| BlogPostGenError::io(archive, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| BlogPostGenError::io(archive, e))?;
            let from = entry.path();
            let to = dir.join(entry.file_name());
            std::fs::rename(&from, &to).map_err(|e| BlogPostGenError::io(&from, e))?;
        }
        std::fs::remove_dir(archive).map_err(|e| BlogPostGenError::io(archive, e))?;

        info!(article = path, archive = %archive.display(), "restored article from archive");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// SHA-256 of an article body, lowercase hex.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn validate_article_path(path: &str) -> Result<()> {
    let invalid = || BlogPostGenError::validation(format!("invalid article path: {path:?}"));
    if path.is_empty() || path.contains('\\') || path.ends_with('/') {
        return Err(invalid());
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(seg) if !seg.to_string_lossy().starts_with('.') => {}
            _ => return Err(invalid()),
        }
    }
    Ok(())
}

fn collect_articles(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| BlogPostGenError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| BlogPostGenError::io(dir, e))?;
        let child = entry.path();
        if !child.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        if child.join(INDEX_FILE).is_file() {
            out.push(rel.clone());
        }
        collect_articles(&child, &rel, out)?;
    }
    Ok(())
}

/// Whether `dir` or anything below it is an article directory.
fn holds_article(dir: &Path) -> Result<bool> {
    if dir.join(INDEX_FILE).is_file() {
        return Ok(true);
    }
    let entries = std::fs::read_dir(dir).map_err(|e| BlogPostGenError::io(dir, e))?;
    for entry in entries {
        let child = entry.map_err(|e| BlogPostGenError::io(dir, e))?.path();
        if child.is_dir() && holds_article(&child)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Write to a sibling temp file, then rename over the target.
fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(".{file_name}.tmp"));

    let mut file = File::create(&temp).map_err(|e| BlogPostGenError::io(&temp, e))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| BlogPostGenError::io(&temp, e))?;
    drop(file);

    std::fs::rename(&temp, target).map_err(|e| BlogPostGenError::io(target, e))
}

fn append_log(log: &Path, entry: &ActionLogEntry) -> Result<()> {
    let mut line = serde_json::to_string(entry)
        .map_err(|e| BlogPostGenError::Storage(format!("serialize log entry: {e}")))?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .map_err(|e| BlogPostGenError::io(log, e))?;
    file.write_all(line.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| BlogPostGenError::io(log, e))
}

/// Read log entries. A torn or malformed line is skipped with a warning.
fn read_log(log: &Path) -> Result<Vec<ActionLogEntry>> {
    let file = match File::open(log) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BlogPostGenError::io(log, e)),
    };

    let mut entries = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| BlogPostGenError::io(log, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ActionLogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(log = %log.display(), line = idx + 1, error = %e, "skipping bad log line"),
        }
    }
    Ok(entries)
}
