//! Action Executor: drives one article through one pipeline.
//!
//! Actions run strictly in order. An action already in `applied_actions` is
//! skipped. Each success is persisted before the next action starts. The
//! first failure aborts the article. `last_pipeline` only advances after the
//! reloaded record is confirmed to hold every action of the pipeline.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use blogpostgen_client::{GenerationService, RemoteOptions, ServiceResponse};
use blogpostgen_shared::{AppConfig, ArticleMeta, BlogPostGenError, RemoteOperation, Result};
use blogpostgen_storage::{ArticleStore, content_hash};

use crate::actions::run_local;
use crate::batch::ProgressReporter;
use crate::registry::{Action, ResolvedAction, ResolvedPipeline};

// ---------------------------------------------------------------------------
// RunSession
// ---------------------------------------------------------------------------

/// Per-invocation settings threaded through every executor call.
#[derive(Debug, Clone)]
pub struct RunSession {
    /// Re-run actions even when already applied, and accept articles that
    /// already reached the pipeline.
    pub force: bool,
    /// Report what would run without calling the service or writing state.
    pub dry_run: bool,
    /// Log full remote responses.
    pub debug: bool,
    /// Timeout for each remote attempt.
    pub remote_timeout: Duration,
}

impl Default for RunSession {
    fn default() -> Self {
        Self {
            force: false,
            dry_run: false,
            debug: false,
            remote_timeout: Duration::from_secs(600),
        }
    }
}

impl RunSession {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            remote_timeout: Duration::from_secs(config.service.remote_timeout_secs),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What happened to one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Already in `applied_actions`; nothing ran.
    AlreadyApplied,
    /// Ran and was recorded.
    Applied,
    /// The service answered `skipped`; recorded as applied.
    NoChange,
    /// Dry run: would execute.
    Planned,
    /// Ran and failed; the article stopped here.
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyApplied => "already applied",
            Self::Applied => "applied",
            Self::NoChange => "skipped by service",
            Self::Planned => "would run",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub action: String,
    pub status: StepStatus,
    pub tokens_used: u64,
    pub cost_usd: f64,
    /// Service message or failure reason.
    pub message: Option<String>,
}

impl StepReport {
    fn new(action: &str, status: StepStatus) -> Self {
        Self {
            action: action.to_string(),
            status,
            tokens_used: 0,
            cost_usd: 0.0,
            message: None,
        }
    }
}

/// Outcome of one article in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleOutcome {
    pub path: String,
    pub steps: Vec<StepReport>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    /// Set when the article failed.
    pub error: Option<String>,
    /// Whether `last_pipeline` now names this pipeline.
    pub advanced: bool,
}

impl ArticleOutcome {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            steps: Vec::new(),
            tokens_used: 0,
            cost_usd: 0.0,
            error: None,
            advanced: false,
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Actions that actually executed in this run.
    pub fn actions_run(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Applied | StepStatus::NoChange))
            .count()
    }
}

// ---------------------------------------------------------------------------
// ActionExecutor
// ---------------------------------------------------------------------------

pub struct ActionExecutor<'a, S> {
    store: &'a ArticleStore,
    service: &'a S,
    project: &'a str,
    session: &'a RunSession,
}

impl<'a, S: GenerationService> ActionExecutor<'a, S> {
    pub fn new(
        store: &'a ArticleStore,
        service: &'a S,
        project: &'a str,
        session: &'a RunSession,
    ) -> Self {
        Self {
            store,
            service,
            project,
            session,
        }
    }

    /// Run `pipeline` on `meta`. Never returns early on error: failures are
    /// captured in the outcome and `meta` reflects what was persisted.
    #[instrument(skip_all, fields(article = %meta.path, pipeline = %pipeline.name))]
    pub async fn execute(
        &self,
        meta: &mut ArticleMeta,
        pipeline: &ResolvedPipeline,
        progress: &dyn ProgressReporter,
    ) -> ArticleOutcome {
        let mut outcome = ArticleOutcome::new(&meta.path);

        for step in &pipeline.actions {
            if !self.session.force && meta.has_applied(&step.name) {
                debug!(action = %step.name, "already applied, skipping");
                let report = StepReport::new(&step.name, StepStatus::AlreadyApplied);
                progress.action_finished(&meta.path, &report);
                outcome.steps.push(report);
                continue;
            }

            if self.session.dry_run {
                let report = StepReport::new(&step.name, StepStatus::Planned);
                progress.action_finished(&meta.path, &report);
                outcome.steps.push(report);
                continue;
            }

            progress.action_started(&meta.path, &step.name);
            match self.run_step(meta, &pipeline.name, step).await {
                Ok(report) => {
                    outcome.tokens_used += report.tokens_used;
                    outcome.cost_usd += report.cost_usd;
                    progress.action_finished(&meta.path, &report);
                    outcome.steps.push(report);
                }
                Err(e) => {
                    warn!(action = %step.name, error = %e, "action failed, aborting article");
                    let mut report = StepReport::new(&step.name, StepStatus::Failed);
                    report.message = Some(e.to_string());
                    progress.action_finished(&meta.path, &report);
                    outcome.steps.push(report);
                    outcome.error = Some(format!("{}: {e}", step.name));
                    return outcome;
                }
            }
        }

        if self.session.dry_run {
            return outcome;
        }

        match self.advance(meta, pipeline) {
            Ok(advanced) => outcome.advanced = advanced,
            Err(e) => {
                warn!(error = %e, "pipeline not advanced");
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }

    /// Execute one action and persist it as applied.
    async fn run_step(
        &self,
        meta: &mut ArticleMeta,
        pipeline: &str,
        step: &ResolvedAction,
    ) -> Result<StepReport> {
        let report = match step.action {
            Action::Local(local) => {
                let content = self.store.read_content(&meta.path)?;
                let dir = self.store.article_dir(&meta.path)?;
                run_local(local, meta, &content, &dir)?;
                StepReport::new(&step.name, StepStatus::Applied)
            }
            Action::Remote(operation) => self.run_remote(meta, pipeline, step, operation).await?,
        };

        meta.tokens_used += report.tokens_used;
        meta.cost_usd += report.cost_usd;

        // Forced reruns find the action already recorded; persist the new
        // usage and fields without duplicating the entry.
        if !self.store.record_action(meta, &step.name, pipeline)? {
            self.store.save(meta)?;
        }
        Ok(report)
    }

    async fn run_remote(
        &self,
        meta: &mut ArticleMeta,
        pipeline: &str,
        step: &ResolvedAction,
        operation: RemoteOperation,
    ) -> Result<StepReport> {
        let options = RemoteOptions {
            project: self.project.to_string(),
            action: step.name.clone(),
            pipeline: pipeline.to_string(),
            timeout: self.session.remote_timeout,
        };

        let response = match operation {
            RemoteOperation::Generate => self.service.generate(&meta.path, &options).await?,
            RemoteOperation::Enhance => self.service.enhance(&meta.path, &options).await?,
        };
        if self.session.debug {
            info!(action = %step.name, response = ?response, "remote response");
        }

        let ServiceResponse {
            success,
            skipped,
            tokens_used,
            cost_usd,
            message,
            error,
        } = response;

        if !success {
            return Err(BlogPostGenError::Remote(
                error
                    .or(message)
                    .unwrap_or_else(|| format!("{} reported failure", operation.as_str())),
            ));
        }

        // The service writes the body itself; keep the recorded hash current.
        let body = self.store.read_content(&meta.path)?;
        let hash = content_hash(&body);
        if meta.content_hash.as_deref() != Some(hash.as_str()) {
            meta.content_hash = Some(hash);
        }

        let status = if skipped {
            StepStatus::NoChange
        } else {
            StepStatus::Applied
        };
        Ok(StepReport {
            action: step.name.clone(),
            status,
            tokens_used: tokens_used.unwrap_or(0),
            cost_usd: cost_usd.unwrap_or(0.0),
            message,
        })
    }

    /// Reload the record and advance `last_pipeline` only if every action of
    /// the pipeline is recorded. Returns whether the stored value changed.
    fn advance(&self, meta: &mut ArticleMeta, pipeline: &ResolvedPipeline) -> Result<bool> {
        let mut fresh = self.store.load(&meta.path)?;
        let expected = pipeline.action_names();
        let missing = fresh.missing_actions(&expected);
        if !missing.is_empty() {
            let detail = missing.join(", ");
            *meta = fresh;
            return Err(BlogPostGenError::Pipeline(format!(
                "'{}' finished without recording: {detail}",
                pipeline.name
            )));
        }

        let changed = fresh.last_pipeline.as_deref() != Some(pipeline.name.as_str());
        if changed {
            self.store
                .set_last_pipeline(&mut fresh, Some(&pipeline.name))?;
            info!(stage = %pipeline.name, "article advanced");
        }
        *meta = fresh;
        Ok(changed)
    }
}
