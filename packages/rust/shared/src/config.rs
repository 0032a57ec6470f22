//! Application and project configuration for BlogPostGen.
//!
//! User config lives at `~/.blogpostgen/blogpostgen.toml`.
//! Each project directory carries its own `project.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BlogPostGenError, Result};
use crate::types::{ActionDecl, ActionKind, PipelineDecl, PipelineStep, RemoteOperation};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "blogpostgen.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".blogpostgen";

/// Per-project config file name.
pub const PROJECT_FILE_NAME: &str = "project.toml";

// ---------------------------------------------------------------------------
// Config structs (matching blogpostgen.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Remote generation service settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Retry policy for remote calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Action declarations. Replaces the built-in set when present.
    #[serde(default = "builtin_actions")]
    pub actions: Vec<ActionDecl>,

    /// Pipeline declarations. Replaces the built-in set when present.
    #[serde(default = "builtin_pipelines")]
    pub pipelines: Vec<PipelineDecl>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            service: ServiceConfig::default(),
            retry: RetryConfig::default(),
            actions: builtin_actions(),
            pipelines: builtin_pipelines(),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory holding one sub-directory per project.
    #[serde(default = "default_data_root")]
    pub data_root: String,

    /// Maximum number of words kept in a derived article path.
    #[serde(default = "default_slug_max_words")]
    pub slug_max_words: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            slug_max_words: default_slug_max_words(),
        }
    }
}

fn default_data_root() -> String {
    "~/blogpostgen-data/projects".into()
}
fn default_slug_max_words() -> usize {
    6
}

/// `[service]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the generation service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Timeout for a single generate/enhance call. Generation can take minutes.
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,

    /// Timeout for the health check.
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            remote_timeout_secs: default_remote_timeout(),
            health_timeout_secs: default_health_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".into()
}
fn default_api_key_env() -> String {
    "BLOGPOSTGEN_API_KEY".into()
}
fn default_remote_timeout() -> u64 {
    600
}
fn default_health_timeout() -> u64 {
    10
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Random extra delay as a fraction of the backoff step (0.0–1.0).
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1_000
}
fn default_max_delay() -> u64 {
    30_000
}
fn default_jitter_ratio() -> f64 {
    0.25
}

// ---------------------------------------------------------------------------
// Built-in actions & pipelines
// ---------------------------------------------------------------------------

fn local(name: &str) -> ActionDecl {
    ActionDecl {
        name: name.into(),
        kind: ActionKind::Local,
        operation: RemoteOperation::default(),
    }
}

fn remote(name: &str, operation: RemoteOperation) -> ActionDecl {
    ActionDecl {
        name: name.into(),
        kind: ActionKind::Remote,
        operation,
    }
}

/// Actions known without any config file.
pub fn builtin_actions() -> Vec<ActionDecl> {
    vec![
        remote("generate_content", RemoteOperation::Generate),
        remote("add_faq", RemoteOperation::Enhance),
        remote("add_jsonld", RemoteOperation::Enhance),
        remote("add_internal_links", RemoteOperation::Enhance),
        remote("improve_readability", RemoteOperation::Enhance),
        local("add_toc"),
        local("word_count"),
        local("verify_assets"),
    ]
}

fn steps(names: &[&str]) -> Vec<PipelineStep> {
    names
        .iter()
        .map(|name| PipelineStep {
            action: (*name).into(),
            enabled: true,
        })
        .collect()
}

/// Pipelines known without any config file.
pub fn builtin_pipelines() -> Vec<PipelineDecl> {
    vec![
        PipelineDecl {
            name: "generate".into(),
            requires: None,
            actions: steps(&["generate_content", "word_count"]),
        },
        PipelineDecl {
            name: "enhance".into(),
            requires: Some("generate".into()),
            actions: steps(&["add_faq", "add_jsonld", "add_toc", "verify_assets"]),
        },
        PipelineDecl {
            name: "finalize".into(),
            requires: Some("enhance".into()),
            actions: steps(&["add_internal_links", "improve_readability", "word_count"]),
        },
    ]
}

// ---------------------------------------------------------------------------
// Project config
// ---------------------------------------------------------------------------

/// `project.toml`: per-project settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (defaults to the directory name).
    #[serde(default)]
    pub name: String,

    /// Public site URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,

    /// Pipeline name → actions to leave out for this project.
    #[serde(default)]
    pub exclude_actions: BTreeMap<String, Vec<String>>,
}

impl ProjectConfig {
    /// Actions excluded from `pipeline` for this project.
    pub fn excluded_for(&self, pipeline: &str) -> &[String] {
        self.exclude_actions
            .get(pipeline)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Load `project.toml` from `path`.
pub fn load_project_config(path: &Path) -> Result<ProjectConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BlogPostGenError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        BlogPostGenError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.blogpostgen/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BlogPostGenError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.blogpostgen/blogpostgen.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BlogPostGenError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        BlogPostGenError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BlogPostGenError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BlogPostGenError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BlogPostGenError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve `defaults.data_root`, expanding a leading `~`.
pub fn data_root(config: &AppConfig) -> Result<PathBuf> {
    expand_home(&config.defaults.data_root)
}

/// Expand `~` alone or a `~/` prefix; `~user` forms are left as written.
fn expand_home(raw: &str) -> Result<PathBuf> {
    let rest = match raw.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with(['/', '\\']) => rest.trim_start_matches(['/', '\\']),
        _ => return Ok(PathBuf::from(raw)),
    };
    let home = dirs::home_dir()
        .ok_or_else(|| BlogPostGenError::config("could not determine home directory"))?;
    Ok(home.join(rest))
}

/// Read the service API key from the configured env var, if set and non-empty.
pub fn resolve_api_key(config: &AppConfig) -> Option<String> {
    std::env::var(&config.service.api_key_env)
        .ok()
        .filter(|val| !val.is_empty())
}
