//! Batch Runner: select eligible articles and run a pipeline over them.
//!
//! Articles run one at a time in path order. The first failed article halts
//! the batch so no further budget is spent against a broken pipeline.
//! Completed articles are unaffected by a later failure.

use std::ops::RangeInclusive;

use tracing::{info, instrument, warn};

use blogpostgen_client::GenerationService;
use blogpostgen_shared::{ArticleMeta, BlogPostGenError, Result, SEED};
use blogpostgen_storage::{Project, RunItemRecord, RunLedger, RunTotals};

use crate::executor::{ActionExecutor, ArticleOutcome, RunSession, StepReport};
use crate::registry::{PipelineRegistry, ResolvedPipeline};

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for batch runs.
pub trait ProgressReporter {
    /// Called once the eligible articles are known.
    fn batch_started(&self, pipeline: &str, total: usize);
    /// Called before an article's first action.
    fn article_started(&self, path: &str, index: usize, total: usize);
    /// Called before an action executes.
    fn action_started(&self, path: &str, action: &str);
    /// Called after each action, including skipped ones.
    fn action_finished(&self, path: &str, step: &StepReport);
    /// Called when an article finishes, successfully or not.
    fn article_finished(&self, outcome: &ArticleOutcome);
    /// Called when the batch completes.
    fn done(&self, result: &BatchResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn batch_started(&self, _pipeline: &str, _total: usize) {}
    fn article_started(&self, _path: &str, _index: usize, _total: usize) {}
    fn action_started(&self, _path: &str, _action: &str) {}
    fn action_finished(&self, _path: &str, _step: &StepReport) {}
    fn article_finished(&self, _outcome: &ArticleOutcome) {}
    fn done(&self, _result: &BatchResult) {}
}

// ---------------------------------------------------------------------------
// Options & results
// ---------------------------------------------------------------------------

/// Which eligible articles to run.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Run only this article. It must be eligible.
    pub article: Option<String>,
    /// 1-based inclusive positions within the sorted eligible list.
    pub range: Option<RangeInclusive<usize>>,
}

/// Parse an `A-B` range (1-based, inclusive). A single `N` selects one article.
pub fn parse_range(raw: &str) -> Result<RangeInclusive<usize>> {
    let invalid = || BlogPostGenError::validation(format!("invalid range '{raw}', expected A-B"));
    let (start, end) = match raw.split_once('-') {
        Some((a, b)) => (a.trim(), b.trim()),
        None => (raw.trim(), raw.trim()),
    };
    let start: usize = start.parse().map_err(|_| invalid())?;
    let end: usize = end.parse().map_err(|_| invalid())?;
    if start == 0 || end < start {
        return Err(invalid());
    }
    Ok(start..=end)
}

/// Aggregate outcome of a batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub pipeline: String,
    /// Ledger run id, when the run was recorded.
    pub run_id: Option<String>,
    pub dry_run: bool,
    /// Articles selected before any ran.
    pub selected: usize,
    /// One entry per article that ran, in order.
    pub outcomes: Vec<ArticleOutcome>,
    /// A failure halted the batch.
    pub stopped_early: bool,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Selected articles that never ran because the batch halted.
    pub fn not_run(&self) -> usize {
        self.selected.saturating_sub(self.outcomes.len())
    }

    pub fn tokens_used(&self) -> u64 {
        self.outcomes.iter().map(|o| o.tokens_used).sum()
    }

    pub fn cost_usd(&self) -> f64 {
        self.outcomes.iter().map(|o| o.cost_usd).sum()
    }

    fn totals(&self) -> RunTotals {
        RunTotals {
            processed: count_u32(self.outcomes.len()),
            succeeded: count_u32(self.succeeded()),
            failed: count_u32(self.failed()),
            tokens_used: self.tokens_used(),
            cost_usd: self.cost_usd(),
            stopped_early: self.stopped_early,
        }
    }
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// BatchRunner
// ---------------------------------------------------------------------------

pub struct BatchRunner<'a, S> {
    project: &'a Project,
    registry: &'a PipelineRegistry,
    service: &'a S,
    session: &'a RunSession,
    ledger: Option<&'a RunLedger>,
}

impl<'a, S: GenerationService> BatchRunner<'a, S> {
    pub fn new(
        project: &'a Project,
        registry: &'a PipelineRegistry,
        service: &'a S,
        session: &'a RunSession,
    ) -> Self {
        Self {
            project,
            registry,
            service,
            session,
            ledger: None,
        }
    }

    /// Record non-dry runs in `ledger`.
    pub fn with_ledger(mut self, ledger: &'a RunLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Eligible articles for `pipeline`, sorted by path, narrowed by `options`.
    pub fn select(
        &self,
        pipeline: &ResolvedPipeline,
        options: &BatchOptions,
    ) -> Result<Vec<ArticleMeta>> {
        let store = self.project.articles();

        if let Some(path) = &options.article {
            let meta = store.load(path)?;
            if !pipeline.accepts(meta.last_pipeline.as_deref(), self.session.force) {
                return Err(BlogPostGenError::validation(format!(
                    "article '{path}' is at stage '{}'; '{}' accepts articles at stage '{}'",
                    meta.stage(),
                    pipeline.name,
                    pipeline.eligibility.required_state().unwrap_or(SEED)
                )));
            }
            return Ok(vec![meta]);
        }

        let eligible: Vec<ArticleMeta> = store
            .load_each()?
            .into_iter()
            .filter_map(|(path, loaded)| match loaded {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!(article = %path, error = %e, "skipping unreadable article");
                    None
                }
            })
            .filter(|m| pipeline.accepts(m.last_pipeline.as_deref(), self.session.force))
            .collect();

        Ok(match &options.range {
            Some(range) => eligible
                .into_iter()
                .enumerate()
                .filter(|(idx, _)| range.contains(&(idx + 1)))
                .map(|(_, meta)| meta)
                .collect(),
            None => eligible,
        })
    }

    /// Run `pipeline_name` over the selected articles.
    #[instrument(skip_all, fields(project = %self.project.name(), pipeline = %pipeline_name))]
    pub async fn run(
        &self,
        pipeline_name: &str,
        options: &BatchOptions,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchResult> {
        let pipeline = self
            .registry
            .resolve(pipeline_name, self.project.config())?;
        let selected = self.select(&pipeline, options)?;
        let total = selected.len();

        info!(
            articles = total,
            actions = pipeline.actions.len(),
            force = self.session.force,
            dry_run = self.session.dry_run,
            "starting batch"
        );
        progress.batch_started(&pipeline.name, total);

        let ledger = if self.session.dry_run {
            None
        } else {
            self.ledger
        };
        let run_id = match ledger {
            Some(ledger) => Some(ledger.start_run(&pipeline.name, self.session.force).await?),
            None => None,
        };

        let executor = ActionExecutor::new(
            self.project.articles(),
            self.service,
            self.project.name(),
            self.session,
        );

        let mut result = BatchResult {
            pipeline: pipeline.name.clone(),
            run_id: run_id.clone(),
            dry_run: self.session.dry_run,
            selected: total,
            outcomes: Vec::with_capacity(total),
            stopped_early: false,
        };

        for (idx, mut meta) in selected.into_iter().enumerate() {
            progress.article_started(&meta.path, idx + 1, total);
            let outcome = executor.execute(&mut meta, &pipeline, progress).await;
            progress.article_finished(&outcome);

            if let (Some(ledger), Some(run_id)) = (ledger, run_id.as_deref()) {
                let item = RunItemRecord {
                    article_path: outcome.path.clone(),
                    status: (if outcome.success() { "succeeded" } else { "failed" }).to_string(),
                    actions_run: count_u32(outcome.actions_run()),
                    tokens_used: outcome.tokens_used,
                    cost_usd: outcome.cost_usd,
                    error: outcome.error.clone(),
                };
                if let Err(e) = ledger.record_item(run_id, &item).await {
                    warn!(error = %e, "failed to record run item");
                }
            }

            let failed = !outcome.success();
            result.outcomes.push(outcome);
            if failed {
                result.stopped_early = true;
                warn!(
                    article = %meta.path,
                    remaining = total - idx - 1,
                    "article failed, halting batch"
                );
                break;
            }
        }

        if let (Some(ledger), Some(run_id)) = (ledger, run_id.as_deref()) {
            if let Err(e) = ledger.finish_run(run_id, &result.totals()).await {
                warn!(error = %e, "failed to finish run record");
            }
        }

        info!(
            succeeded = result.succeeded(),
            failed = result.failed(),
            not_run = result.not_run(),
            tokens = result.tokens_used(),
            cost_usd = result.cost_usd(),
            "batch finished"
        );
        progress.done(&result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::time::Duration;

    use blogpostgen_client::{HttpGenerationService, RetryPolicy, ServiceResponse};
    use blogpostgen_shared::AppConfig;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::executor::tests::{ScriptedService, seed};

    fn temp_project() -> Project {
        let data_root = std::env::temp_dir().join(format!("bpg_batch_{}", Uuid::now_v7()));
        Project::open_or_init(&data_root, "trail", None).expect("project")
    }

    fn registry() -> PipelineRegistry {
        PipelineRegistry::from_config(&AppConfig::default()).expect("registry")
    }

    /// Records the order of article-level callbacks.
    #[derive(Default)]
    struct RecordingProgress {
        events: RefCell<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn batch_started(&self, pipeline: &str, total: usize) {
            self.events.borrow_mut().push(format!("batch {pipeline} {total}"));
        }
        fn article_started(&self, path: &str, index: usize, total: usize) {
            self.events.borrow_mut().push(format!("start {path} {index}/{total}"));
        }
        fn action_started(&self, _path: &str, _action: &str) {}
        fn action_finished(&self, _path: &str, _step: &StepReport) {}
        fn article_finished(&self, outcome: &ArticleOutcome) {
            self.events
                .borrow_mut()
                .push(format!("end {} {}", outcome.path, outcome.success()));
        }
        fn done(&self, result: &BatchResult) {
            self.events
                .borrow_mut()
                .push(format!("done {}", result.outcomes.len()));
        }
    }

    #[test]
    fn parse_range_forms() {
        assert_eq!(parse_range("2-5").expect("range"), 2..=5);
        assert_eq!(parse_range("3").expect("range"), 3..=3);
        assert_eq!(parse_range(" 1 - 2 ").expect("range"), 1..=2);
        assert!(parse_range("0-2").is_err());
        assert!(parse_range("5-2").is_err());
        assert!(parse_range("a-b").is_err());
    }

    #[tokio::test]
    async fn selects_only_eligible_sorted_by_path() {
        let project = temp_project();
        let store = project.articles();
        seed(store, "c", Some("generate"), &[]);
        seed(store, "a", Some("generate"), &[]);
        seed(store, "b", None, &[]);
        seed(store, "d", Some("enhance"), &[]);

        let registry = registry();
        let service = ScriptedService::default();
        let session = RunSession::default();
        let runner = BatchRunner::new(&project, &registry, &service, &session);
        let enhance = registry
            .resolve("enhance", project.config())
            .expect("resolve");

        let paths = |metas: Vec<ArticleMeta>| -> Vec<String> {
            metas.into_iter().map(|m| m.path).collect()
        };
        assert_eq!(
            paths(runner.select(&enhance, &BatchOptions::default()).expect("select")),
            vec!["a", "c"]
        );

        let ranged = BatchOptions {
            range: Some(2..=9),
            ..Default::default()
        };
        assert_eq!(paths(runner.select(&enhance, &ranged).expect("select")), vec!["c"]);

        let forced = RunSession {
            force: true,
            ..Default::default()
        };
        let runner = BatchRunner::new(&project, &registry, &service, &forced);
        assert_eq!(
            paths(runner.select(&enhance, &BatchOptions::default()).expect("select")),
            vec!["a", "c", "d"]
        );
    }

    #[tokio::test]
    async fn unreadable_article_does_not_block_the_batch() {
        let project = temp_project();
        let store = project.articles();
        seed(store, "a", Some("generate"), &[]);
        seed(store, "b", Some("generate"), &[]);
        std::fs::write(
            store.article_dir("b").expect("dir").join("index.json"),
            "{ not json",
        )
        .expect("corrupt");

        let registry = registry();
        let service = ScriptedService::default();
        let session = RunSession::default();
        let result = BatchRunner::new(&project, &registry, &service, &session)
            .run("enhance", &BatchOptions::default(), &SilentProgress)
            .await
            .expect("run");

        assert_eq!(result.selected, 1);
        assert_eq!(result.succeeded(), 1);
        assert_eq!(store.load("a").expect("a").stage(), "enhance");
    }

    #[tokio::test]
    async fn ineligible_single_article_is_rejected() {
        let project = temp_project();
        seed(project.articles(), "b", None, &[]);
        let registry = registry();
        let service = ScriptedService::default();
        let session = RunSession::default();
        let runner = BatchRunner::new(&project, &registry, &service, &session);

        let options = BatchOptions {
            article: Some("b".into()),
            ..Default::default()
        };
        let err = runner
            .run("enhance", &options, &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stage 'seed'"));
    }

    #[tokio::test]
    async fn failure_halts_batch_and_is_recorded() {
        let project = temp_project();
        let store = project.articles();
        for path in ["a", "b", "c"] {
            seed(store, path, Some("generate"), &[]);
        }
        let registry = registry();
        let service = ScriptedService::default();
        service.script("add_faq", Ok(ServiceResponse::failed("bad article")));
        let session = RunSession::default();
        let ledger = RunLedger::open(&project.ledger_path()).await.expect("ledger");
        let progress = RecordingProgress::default();

        let result = BatchRunner::new(&project, &registry, &service, &session)
            .with_ledger(&ledger)
            .run("enhance", &BatchOptions::default(), &progress)
            .await
            .expect("run");

        assert!(result.stopped_early);
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.not_run(), 2);
        assert_eq!(
            progress.events.borrow().as_slice(),
            ["batch enhance 3", "start a 1/3", "end a false", "done 1"]
        );
        assert!(store.load("b").expect("b").applied_actions.is_empty());

        let runs = ledger.list_runs(10).await.expect("runs");
        assert_eq!(runs.len(), 1);
        assert!(runs[0].totals.stopped_early);
        assert_eq!(runs[0].totals.failed, 1);
        let items = ledger
            .run_items(result.run_id.as_deref().expect("run id"))
            .await
            .expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, "failed");
    }

    #[tokio::test]
    async fn successful_batch_aggregates_cost() {
        let project = temp_project();
        for path in ["a", "b"] {
            seed(project.articles(), path, Some("generate"), &[]);
        }
        let registry = registry();
        let service = ScriptedService::default();
        let session = RunSession::default();

        let result = BatchRunner::new(&project, &registry, &service, &session)
            .run("enhance", &BatchOptions::default(), &SilentProgress)
            .await
            .expect("run");

        assert!(!result.stopped_early);
        assert_eq!(result.succeeded(), 2);
        assert_eq!(result.tokens_used(), 400);
        assert!((result.cost_usd() - 0.04).abs() < 1e-9);
        assert!(result.run_id.is_none());
        for path in ["a", "b"] {
            assert_eq!(project.articles().load(path).expect("load").stage(), "enhance");
        }
    }

    #[tokio::test]
    async fn dry_run_is_not_recorded() {
        let project = temp_project();
        seed(project.articles(), "a", None, &[]);
        let registry = registry();
        let service = ScriptedService::default();
        let session = RunSession {
            dry_run: true,
            ..Default::default()
        };
        let ledger = RunLedger::open(&project.ledger_path()).await.expect("ledger");

        let result = BatchRunner::new(&project, &registry, &service, &session)
            .with_ledger(&ledger)
            .run("generate", &BatchOptions::default(), &SilentProgress)
            .await
            .expect("run");

        assert!(result.dry_run);
        assert_eq!(result.outcomes[0].steps.len(), 2);
        assert!(service.calls.borrow().is_empty());
        assert!(ledger.list_runs(10).await.expect("runs").is_empty());
        assert!(project.articles().load("a").expect("load").is_seed());
    }

    /// 503 on every attempt: retries are exhausted, the article fails, its
    /// earlier action stays recorded, and a rerun resumes at the failed action.
    #[tokio::test]
    async fn exhausted_retries_fail_article_and_rerun_resumes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/enhance"))
            .and(body_partial_json(serde_json::json!({ "action": "add_faq" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "success": true, "tokensUsed": 10 })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/enhance"))
            .and(body_partial_json(serde_json::json!({ "action": "add_jsonld" })))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(3)
            .expect(3)
            .mount(&server)
            .await;

        let project = temp_project();
        seed(project.articles(), "a", Some("generate"), &[]);
        let registry = registry();
        let retry = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let service = HttpGenerationService::new(&server.uri(), None, retry).expect("service");
        let session = RunSession::default();
        let runner = BatchRunner::new(&project, &registry, &service, &session);

        let result = runner
            .run("enhance", &BatchOptions::default(), &SilentProgress)
            .await
            .expect("run");
        assert_eq!(result.failed(), 1);
        let error = result.outcomes[0].error.as_deref().unwrap_or_default();
        assert!(error.contains("HTTP 503"), "{error}");
        let meta = project.articles().load("a").expect("load");
        assert_eq!(meta.applied_actions, vec!["add_faq"]);
        assert_eq!(meta.stage(), "generate");

        // The 503 mock is used up; add_jsonld now succeeds.
        Mock::given(method("POST"))
            .and(path("/api/enhance"))
            .and(body_partial_json(serde_json::json!({ "action": "add_jsonld" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
            .mount(&server)
            .await;

        let result = runner
            .run("enhance", &BatchOptions::default(), &SilentProgress)
            .await
            .expect("rerun");
        assert_eq!(result.succeeded(), 1);
        let steps = &result.outcomes[0].steps;
        assert_eq!(steps[0].status, crate::executor::StepStatus::AlreadyApplied);
        assert_eq!(steps[1].action, "add_jsonld");
        assert_eq!(project.articles().load("a").expect("load").stage(), "enhance");
    }
}
