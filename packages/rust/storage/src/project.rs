//! Project directory handling.
//!
//! A project lives at `<data_root>/<name>/`:
//!
//! ```text
//! <name>/
//!   project.toml          optional, see ProjectConfig
//!   articles/<path>/      one directory per article
//!   .archive/             archived article versions
//!   .blogpostgen/ledger.db
//! ```

use std::path::{Path, PathBuf};

use tracing::info;
use url::Url;

use blogpostgen_shared::{
    BlogPostGenError, PROJECT_FILE_NAME, ProjectConfig, Result, load_project_config,
};

use crate::articles::ArticleStore;

/// An opened project: its root directory, settings, and article store.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    config: ProjectConfig,
    articles: ArticleStore,
}

impl Project {
    /// Open the project `name` under `data_root`.
    pub fn open(data_root: &Path, name: &str) -> Result<Self> {
        validate_project_name(name)?;
        let root = data_root.join(name);
        if !root.is_dir() {
            return Err(BlogPostGenError::NotFound(format!(
                "project '{name}' (looked in {})",
                root.display()
            )));
        }
        Self::open_at(root)
    }

    /// Open a project rooted at `root`. A missing `project.toml` yields defaults.
    pub fn open_at(root: PathBuf) -> Result<Self> {
        let config_path = root.join(PROJECT_FILE_NAME);
        let mut config = if config_path.exists() {
            load_project_config(&config_path)?
        } else {
            ProjectConfig::default()
        };
        if config.name.is_empty() {
            config.name = root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
        }

        let articles = ArticleStore::new(&root);
        Ok(Self {
            root,
            config,
            articles,
        })
    }

    /// Open `name`, creating the directory and a `project.toml` if absent.
    pub fn open_or_init(data_root: &Path, name: &str, url: Option<Url>) -> Result<Self> {
        validate_project_name(name)?;
        let root = data_root.join(name);
        if root.is_dir() {
            return Self::open_at(root);
        }

        let articles_dir = root.join("articles");
        std::fs::create_dir_all(&articles_dir)
            .map_err(|e| BlogPostGenError::io(&articles_dir, e))?;

        let config = ProjectConfig {
            name: name.to_string(),
            url,
            ..Default::default()
        };
        let toml_str = toml::to_string_pretty(&config)
            .map_err(|e| BlogPostGenError::config(format!("failed to serialize project: {e}")))?;
        let config_path = root.join(PROJECT_FILE_NAME);
        std::fs::write(&config_path, toml_str)
            .map_err(|e| BlogPostGenError::io(&config_path, e))?;

        info!(project = name, root = %root.display(), "created project");
        Self::open_at(root)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn articles(&self) -> &ArticleStore {
        &self.articles
    }

    /// Location of the run ledger database.
    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(".blogpostgen").join("ledger.db")
    }
}

fn validate_project_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != "..";
    if ok {
        Ok(())
    } else {
        Err(BlogPostGenError::validation(format!(
            "invalid project name: {name:?}"
        )))
    }
}
