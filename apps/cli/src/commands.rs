//! CLI command definitions, routing, and tracing setup.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use blogpostgen_client::{GenerationService, HttpGenerationService, RemoteOptions, ServiceResponse};
use blogpostgen_core::{
    ArticleOutcome, BatchOptions, BatchResult, BatchRunner, ConflictDecision, ConflictResolver,
    DeclineAll, ImportCandidate, ImportOptions, ImportOutcome, ImportResult, PipelineRegistry,
    PlanImporter, ProgressReporter, ResetReport, RunSession, StepReport, StepStatus, VerifyReport,
    Violation, parse_range, repair, reset_action, verify,
};
use blogpostgen_shared::{
    AppConfig, ArticleMeta, BlogPostGenError, PlanEntry, ProjectConfig, SEED, data_root,
    init_config, load_config,
};
use blogpostgen_storage::{Project, RunLedger};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// BlogPostGen: push blog articles through AI content pipelines.
#[derive(Parser)]
#[command(
    name = "blogpostgen",
    version,
    about = "Import content plans and run articles through generation pipelines.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a pipeline over a project's eligible articles.
    Run {
        /// Pipeline name (e.g. generate, enhance, finalize).
        pipeline: String,

        /// Project name under the data root.
        #[arg(short, long)]
        project: String,

        /// Run a single article by path.
        #[arg(short, long, conflicts_with = "range")]
        article: Option<String>,

        /// 1-based range within the eligible articles, e.g. 1-10.
        #[arg(short, long)]
        range: Option<String>,

        /// Re-run actions that were already applied.
        #[arg(long)]
        force: bool,

        /// Show what would run without calling the service.
        #[arg(long)]
        dry_run: bool,

        /// Log full service responses.
        #[arg(long)]
        debug: bool,
    },

    /// Import a content plan as seed articles.
    Import {
        /// Plan file (structured blocks or one idea per line).
        file: PathBuf,

        /// Project name; created if it does not exist.
        #[arg(short, long)]
        project: String,

        /// Ask before overwriting processed articles.
        #[arg(short, long)]
        interactive: bool,

        /// Classify candidates without writing.
        #[arg(long)]
        dry_run: bool,

        /// Site URL recorded when the project is created.
        #[arg(long)]
        url: Option<Url>,
    },

    /// Create a single seed article.
    Seed {
        /// Project name; created if it does not exist.
        #[arg(short, long)]
        project: String,

        /// Article title.
        #[arg(short, long)]
        title: String,

        /// Explicit path or URL (derived from the title otherwise).
        #[arg(long)]
        path: Option<String>,

        /// Comma-separated keywords.
        #[arg(short, long, value_delimiter = ',')]
        keywords: Vec<String>,

        /// Target word count.
        #[arg(short, long)]
        words: Option<u32>,
    },

    /// Check that every article has all actions of its last pipeline.
    Verify {
        #[arg(short, long)]
        project: String,

        /// Revert inconsistent articles to their previous stage.
        #[arg(long)]
        fix: bool,
    },

    /// Forget one action on every article that has it, moving them back to a stage.
    Reset {
        /// Action to forget (e.g. add_toc).
        action: String,

        #[arg(short, long)]
        project: String,

        /// Stage to move affected articles back to ("seed" or a pipeline name).
        #[arg(long)]
        to: String,

        /// List affected articles without changing them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show per-article pipeline state.
    Status {
        #[arg(short, long)]
        project: String,
    },

    /// List configured pipelines and their actions.
    Pipelines {
        /// Apply this project's action exclusions.
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Show recent batch runs.
    History {
        #[arg(short, long)]
        project: String,

        /// Number of runs to show.
        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Show per-article items for each run.
        #[arg(long)]
        items: bool,
    },

    /// Check that the generation service is reachable.
    Health,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "blogpostgen=warn",
        1 => "blogpostgen=info",
        2 => "blogpostgen=debug",
        _ => "blogpostgen=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            pipeline,
            project,
            article,
            range,
            force,
            dry_run,
            debug,
        } => {
            let flags = RunFlags {
                force,
                dry_run,
                debug,
            };
            cmd_run(&pipeline, &project, article, range.as_deref(), flags).await
        }
        Command::Import {
            file,
            project,
            interactive,
            dry_run,
            url,
        } => cmd_import(&file, &project, url, interactive, dry_run).await,
        Command::Seed {
            project,
            title,
            path,
            keywords,
            words,
        } => cmd_seed(&project, title, path, keywords, words),
        Command::Verify { project, fix } => cmd_verify(&project, fix),
        Command::Reset {
            action,
            project,
            to,
            dry_run,
        } => cmd_reset(&action, &project, &to, dry_run),
        Command::Status { project } => cmd_status(&project),
        Command::Pipelines { project } => cmd_pipelines(project.as_deref()),
        Command::History {
            project,
            limit,
            items,
        } => cmd_history(&project, limit, items).await,
        Command::Health => cmd_health().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

/// Open an existing project under the configured data root.
fn open_project(config: &AppConfig, name: &str) -> Result<Project> {
    let root = data_root(config)?;
    Ok(Project::open(&root, name)?)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

struct RunFlags {
    force: bool,
    dry_run: bool,
    debug: bool,
}

async fn cmd_run(
    pipeline: &str,
    project: &str,
    article: Option<String>,
    range: Option<&str>,
    flags: RunFlags,
) -> Result<()> {
    let config = load_config()?;
    let session = RunSession {
        force: flags.force,
        dry_run: flags.dry_run,
        debug: flags.debug,
        ..RunSession::from_config(&config)
    };
    let registry = PipelineRegistry::from_config(&config)?;
    let project = open_project(&config, project)?;
    let service = HttpGenerationService::from_config(&config)?;

    let options = BatchOptions {
        article,
        range: range.map(parse_range).transpose()?,
    };

    info!(
        pipeline,
        project = project.name(),
        force = session.force,
        dry_run = session.dry_run,
        "running pipeline"
    );

    let ledger = if session.dry_run {
        None
    } else {
        Some(RunLedger::open(&project.ledger_path()).await?)
    };
    let mut runner = BatchRunner::new(&project, &registry, &service, &session);
    if let Some(ledger) = &ledger {
        runner = runner.with_ledger(ledger);
    }

    let reporter = CliProgress::new();
    let result = runner.run(pipeline, &options, &reporter).await?;
    print_batch_summary(&result);

    if result.stopped_early {
        let failed = result
            .outcomes
            .last()
            .map(|o| o.path.as_str())
            .unwrap_or_default();
        return Err(eyre!(
            "batch stopped after '{failed}' failed; {} article(s) not run",
            result.not_run()
        ));
    }
    Ok(())
}

fn print_batch_summary(result: &BatchResult) {
    println!();
    if result.dry_run {
        println!("  Dry run of '{}': {} article(s) selected", result.pipeline, result.selected);
        println!();
        return;
    }
    println!("  Pipeline:  {}", result.pipeline);
    if let Some(run_id) = &result.run_id {
        println!("  Run:       {run_id}");
    }
    println!("  Selected:  {}", result.selected);
    println!("  Succeeded: {}", result.succeeded());
    println!("  Failed:    {}", result.failed());
    if result.stopped_early {
        println!("  Not run:   {}", result.not_run());
    }
    println!("  Tokens:    {}", result.tokens_used());
    println!("  Cost:      ${:.4}", result.cost_usd());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn batch_started(&self, pipeline: &str, total: usize) {
        self.spinner
            .println(format!("{pipeline}: {total} eligible article(s)"));
    }

    fn article_started(&self, path: &str, index: usize, total: usize) {
        self.spinner.set_message(format!("[{index}/{total}] {path}"));
    }

    fn action_started(&self, path: &str, action: &str) {
        self.spinner.set_message(format!("{path}: {action}"));
    }

    fn action_finished(&self, path: &str, step: &StepReport) {
        if matches!(step.status, StepStatus::Planned | StepStatus::AlreadyApplied) {
            self.spinner
                .println(format!("    {path}: {} ({})", step.action, step.status.as_str()));
        }
    }

    fn article_finished(&self, outcome: &ArticleOutcome) {
        let line = match &outcome.error {
            None => format!(
                "  ✓ {}  {} action(s), {} tokens, ${:.4}",
                outcome.path,
                outcome.actions_run(),
                outcome.tokens_used,
                outcome.cost_usd
            ),
            Some(error) => format!("  ✗ {}  {error}", outcome.path),
        };
        self.spinner.println(line);
    }

    fn done(&self, _result: &BatchResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// import / seed
// ---------------------------------------------------------------------------

/// Asks on the terminal before overwriting a processed article.
struct StdinResolver;

impl ConflictResolver for StdinResolver {
    fn resolve(&self, existing: &ArticleMeta, candidate: &ImportCandidate) -> ConflictDecision {
        print!(
            "'{}' is at stage '{}' ({} action(s) applied). Overwrite with '{}'? [y/N] ",
            existing.path,
            existing.stage(),
            existing.applied_actions.len(),
            candidate.entry.title
        );
        if std::io::stdout().flush().is_err() {
            return ConflictDecision::Skip;
        }
        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(_) if matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") => {
                ConflictDecision::Overwrite
            }
            _ => ConflictDecision::Skip,
        }
    }
}

async fn cmd_import(
    file: &Path,
    project: &str,
    url: Option<Url>,
    interactive: bool,
    dry_run: bool,
) -> Result<()> {
    let config = load_config()?;
    let text = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read plan '{}': {e}", file.display()))?;
    let project = Project::open_or_init(&data_root(&config)?, project, url)?;
    let service = HttpGenerationService::from_config(&config)?;

    let options = ImportOptions {
        interactive,
        dry_run,
        slug_max_words: config.defaults.slug_max_words,
        expand_timeout: Duration::from_secs(config.service.remote_timeout_secs),
    };

    info!(
        plan = %file.display(),
        project = project.name(),
        interactive,
        dry_run,
        "importing plan"
    );

    let result = if interactive {
        PlanImporter::new(project.articles(), project.name(), &service, &StdinResolver)
            .import_text(&text, &options)
            .await?
    } else {
        PlanImporter::new(project.articles(), project.name(), &service, &DeclineAll)
            .import_text(&text, &options)
            .await?
    };
    print_import_summary(&result);
    Ok(())
}

fn cmd_seed(
    project: &str,
    title: String,
    path: Option<String>,
    keywords: Vec<String>,
    words: Option<u32>,
) -> Result<()> {
    let config = load_config()?;
    let project = Project::open_or_init(&data_root(&config)?, project, None)?;

    let entry = PlanEntry {
        title,
        url: path,
        keywords: keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
        target_word_count: words,
        ..Default::default()
    };
    let options = ImportOptions {
        slug_max_words: config.defaults.slug_max_words,
        ..Default::default()
    };

    // Seeding never expands ideas, so no service is configured.
    let result = PlanImporter::new(project.articles(), project.name(), &NoService, &DeclineAll)
        .import_entries(vec![entry], &options);
    print_import_summary(&result);

    match result.failures().first() {
        Some((_, reason)) => Err(eyre!("seed failed: {reason}")),
        None => Ok(()),
    }
}

/// Service stand-in for commands that never call the service.
struct NoService;

fn no_service() -> BlogPostGenError {
    BlogPostGenError::config("no generation service configured")
}

impl GenerationService for NoService {
    async fn generate(
        &self,
        _path: &str,
        _options: &RemoteOptions,
    ) -> blogpostgen_shared::Result<ServiceResponse> {
        Err(no_service())
    }

    async fn enhance(
        &self,
        _path: &str,
        _options: &RemoteOptions,
    ) -> blogpostgen_shared::Result<ServiceResponse> {
        Err(no_service())
    }

    async fn health_check(&self) -> bool {
        false
    }

    async fn expand_ideas(
        &self,
        _project: &str,
        _ideas: &[String],
        _timeout: Duration,
    ) -> blogpostgen_shared::Result<Vec<PlanEntry>> {
        Err(no_service())
    }
}

fn print_import_summary(result: &ImportResult) {
    println!();
    for item in &result.items {
        let path = item.path.as_deref().unwrap_or("-");
        let class = item.classification.map(|c| c.as_str()).unwrap_or("-");
        let outcome = match &item.outcome {
            ImportOutcome::Created => "created".to_string(),
            ImportOutcome::Replaced { archive } => format!("replaced (archived to {})", archive.display()),
            ImportOutcome::Planned => "would write".to_string(),
            ImportOutcome::Skipped { reason } => format!("skipped: {reason}"),
            ImportOutcome::Failed { reason } => format!("failed: {reason}"),
        };
        println!("  {path:<40} {class:<13} {outcome}");
    }
    println!();
    if result.dry_run {
        println!("  Dry run, nothing written.");
    }
    println!("  Created: {}", result.created());
    println!("  Updated: {}", result.updated());
    println!("  Skipped: {}", result.skipped());
    println!("  Failed:  {}", result.failed());
    println!();
}

// ---------------------------------------------------------------------------
// verify / status / pipelines / history
// ---------------------------------------------------------------------------

fn cmd_verify(project: &str, fix: bool) -> Result<()> {
    let config = load_config()?;
    let registry = PipelineRegistry::from_config(&config)?;
    let project = open_project(&config, project)?;

    let report = verify(&project, &registry)?;
    print_verify_report(&report);

    if !fix {
        if report.is_consistent() {
            return Ok(());
        }
        return Err(eyre!(
            "{} inconsistent article(s); rerun with --fix to repair",
            report.invalid.len()
        ));
    }

    let reverts = repair(&project, &registry, &report)?;
    for revert in &reverts {
        println!(
            "  reverted {}: {} -> {}",
            revert.path,
            revert.from,
            revert.to.as_deref().unwrap_or(SEED)
        );
    }
    println!("  {} article(s) repaired", reverts.len());
    Ok(())
}

fn print_verify_report(report: &VerifyReport) {
    println!();
    println!("  Checked: {} ({} seed)", report.checked, report.seeds);
    for invalid in &report.invalid {
        match &invalid.violation {
            Violation::MissingActions {
                expected,
                applied,
                missing,
            } => println!(
                "  ✗ {} [{}] {applied}/{expected} applied, missing: {}",
                invalid.path,
                invalid.pipeline,
                missing.join(", ")
            ),
            Violation::UnknownPipeline => {
                println!("  ✗ {} [{}] unknown pipeline", invalid.path, invalid.pipeline)
            }
            Violation::Unreadable(reason) => {
                println!("  ✗ {} unreadable: {reason}", invalid.path)
            }
        }
    }
    if report.is_consistent() {
        println!("  All articles consistent.");
    }
    println!();
}

// ---------------------------------------------------------------------------
// reset
// ---------------------------------------------------------------------------

fn cmd_reset(action: &str, project: &str, to: &str, dry_run: bool) -> Result<()> {
    let config = load_config()?;
    let registry = PipelineRegistry::from_config(&config)?;
    let project = open_project(&config, project)?;

    let report = reset_action(&project, &registry, action, to, dry_run)?;
    print_reset_report(&report);
    Ok(())
}

fn print_reset_report(report: &ResetReport) {
    let to = report.to.as_deref().unwrap_or(SEED);
    println!();
    for item in &report.items {
        let tag = if report.dry_run { "DRY" } else { "OK" };
        println!("  [{tag}] {}: {} -> {to}, removed {}", item.path, item.from, report.action);
    }
    let verb = if report.dry_run { "Would reset" } else { "Reset" };
    println!("  {verb} '{}' on {} article(s)", report.action, report.items.len());
    println!();
}

fn cmd_status(project: &str) -> Result<()> {
    let config = load_config()?;
    let project = open_project(&config, project)?;

    let mut articles = Vec::new();
    let mut unreadable = Vec::new();
    for (path, loaded) in project.articles().load_each()? {
        match loaded {
            Ok(meta) => articles.push(meta),
            Err(e) => unreadable.push((path, e)),
        }
    }

    println!();
    println!("  {:<40} {:<12} {:>7} {:>7} {:>9}", "PATH", "STAGE", "APPLIED", "WORDS", "TOKENS");
    for meta in &articles {
        let words = meta
            .word_count
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:<40} {:<12} {:>7} {:>7} {:>9}",
            meta.path,
            meta.stage(),
            meta.applied_actions.len(),
            words,
            meta.tokens_used
        );
    }
    for (path, e) in &unreadable {
        println!("  {path:<40} unreadable: {e}");
    }
    println!();
    println!("  {} article(s) in '{}'", articles.len() + unreadable.len(), project.name());
    println!();
    Ok(())
}

fn cmd_pipelines(project: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let registry = PipelineRegistry::from_config(&config)?;
    let project_config = match project {
        Some(name) => open_project(&config, name)?.config().clone(),
        None => ProjectConfig::default(),
    };

    println!();
    for decl in registry.pipelines() {
        let resolved = registry.resolve(&decl.name, &project_config)?;
        println!("  {} ({})", resolved.name, resolved.eligibility);
        for step in &resolved.actions {
            let kind = if step.action.is_remote() { "remote" } else { "local" };
            println!("    - {} [{kind}]", step.name);
        }
        for step in &decl.actions {
            if !resolved.actions.iter().any(|a| a.name == step.action) {
                println!("    - {} [off]", step.action);
            }
        }
    }
    println!();
    Ok(())
}

async fn cmd_history(project: &str, limit: u32, items: bool) -> Result<()> {
    let config = load_config()?;
    let project = open_project(&config, project)?;
    let ledger = RunLedger::open(&project.ledger_path()).await?;
    let runs = ledger.list_runs(limit).await?;

    println!();
    if runs.is_empty() {
        println!("  No runs recorded for '{}'.", project.name());
    }
    for run in &runs {
        let state = match (&run.finished_at, run.totals.stopped_early) {
            (None, _) => "unfinished",
            (Some(_), true) => "stopped",
            (Some(_), false) => "completed",
        };
        println!(
            "  {}  {:<10} {:<10} {}  ok {} / failed {}  {} tokens  ${:.4}{}",
            run.started_at,
            run.pipeline,
            state,
            run.id,
            run.totals.succeeded,
            run.totals.failed,
            run.totals.tokens_used,
            run.totals.cost_usd,
            if run.forced { "  (forced)" } else { "" }
        );
        if items {
            for item in ledger.run_items(&run.id).await? {
                println!(
                    "      {:<9} {}{}",
                    item.status,
                    item.article_path,
                    item.error.map(|e| format!(": {e}")).unwrap_or_default()
                );
            }
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// health / config
// ---------------------------------------------------------------------------

async fn cmd_health() -> Result<()> {
    let config = load_config()?;
    let service = HttpGenerationService::from_config(&config)?;
    if service.health_check().await {
        println!("Service at {} is healthy", config.service.base_url);
        Ok(())
    } else {
        Err(eyre!("service at {} is unreachable or unhealthy", config.service.base_url))
    }
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
