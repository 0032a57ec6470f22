//! Shared types, error model, and configuration for BlogPostGen.
//!
//! This crate is the foundation depended on by all other BlogPostGen crates.
//! It provides:
//! - [`BlogPostGenError`]: the unified error type
//! - Domain types ([`ArticleMeta`], [`PipelineDecl`], [`ActionDecl`], [`PlanEntry`])
//! - Configuration ([`AppConfig`], [`ProjectConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, PROJECT_FILE_NAME, ProjectConfig, RetryConfig, ServiceConfig,
    builtin_actions, builtin_pipelines, config_dir, config_file_path, data_root, init_config,
    load_config, load_config_from, load_project_config, resolve_api_key,
};
pub use error::{BlogPostGenError, Result};
pub use types::{
    ActionDecl, ActionKind, ArticleMeta, Eligibility, PipelineDecl, PipelineStep, PlanEntry,
    RemoteOperation, SEED, TocHeading,
};
