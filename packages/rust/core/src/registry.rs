//! Action and pipeline registries.
//!
//! Action names are resolved once into an [`Action`] so the executor branches
//! on a tagged variant rather than comparing strings. Pipelines resolve to an
//! ordered, filtered action list plus an eligibility filter.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use blogpostgen_shared::{
    ActionDecl, ActionKind, AppConfig, BlogPostGenError, Eligibility, PipelineDecl,
    ProjectConfig, RemoteOperation, Result,
};

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Actions implemented in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAction {
    /// Store a heading outline in `toc`.
    AddToc,
    /// Store the body word count in `word_count`.
    WordCount,
    /// Fail when a relative image or link target is missing.
    VerifyAssets,
}

impl LocalAction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "add_toc" => Some(Self::AddToc),
            "word_count" => Some(Self::WordCount),
            "verify_assets" => Some(Self::VerifyAssets),
            _ => None,
        }
    }
}

/// A resolved action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Local(LocalAction),
    Remote(RemoteOperation),
}

impl Action {
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Name → [`Action`] lookup built from `[[actions]]`.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Action>,
}

impl ActionRegistry {
    pub fn from_decls(decls: &[ActionDecl]) -> Result<Self> {
        let mut actions = BTreeMap::new();
        for decl in decls {
            let action = match decl.kind {
                ActionKind::Local => {
                    let local = LocalAction::from_name(&decl.name).ok_or_else(|| {
                        BlogPostGenError::config(format!(
                            "'{}' is declared local but no local implementation exists",
                            decl.name
                        ))
                    })?;
                    Action::Local(local)
                }
                ActionKind::Remote => Action::Remote(decl.operation),
            };
            if actions.insert(decl.name.clone(), action).is_some() {
                return Err(BlogPostGenError::config(format!(
                    "action '{}' is declared more than once",
                    decl.name
                )));
            }
        }
        Ok(Self { actions })
    }

    pub fn get(&self, name: &str) -> Option<Action> {
        self.actions.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

/// One step of a resolved pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAction {
    pub name: String,
    pub action: Action,
}

/// A pipeline ready to execute for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPipeline {
    pub name: String,
    pub eligibility: Eligibility,
    /// Enabled, non-excluded actions in declared order.
    pub actions: Vec<ResolvedAction>,
}

impl ResolvedPipeline {
    /// Action names in execution order.
    pub fn action_names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.name.clone()).collect()
    }

    /// Whether an article whose `last_pipeline` is `last` may run this pipeline.
    ///
    /// With `force`, articles that already reached this pipeline also qualify.
    pub fn accepts(&self, last: Option<&str>, force: bool) -> bool {
        self.eligibility.matches(last) || (force && last == Some(self.name.as_str()))
    }
}

/// Validated pipeline declarations plus the action registry.
#[derive(Debug, Clone)]
pub struct PipelineRegistry {
    actions: ActionRegistry,
    pipelines: Vec<PipelineDecl>,
}

impl PipelineRegistry {
    /// Build and validate from the `[[actions]]` and `[[pipelines]]` config.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            ActionRegistry::from_decls(&config.actions)?,
            config.pipelines.clone(),
        )
    }

    pub fn new(actions: ActionRegistry, pipelines: Vec<PipelineDecl>) -> Result<Self> {
        let mut seen = HashSet::new();
        for decl in &pipelines {
            if !seen.insert(decl.name.as_str()) {
                return Err(BlogPostGenError::config(format!(
                    "pipeline '{}' is declared more than once",
                    decl.name
                )));
            }
        }

        for decl in &pipelines {
            if let Some(prev) = &decl.requires {
                if prev == &decl.name {
                    return Err(BlogPostGenError::config(format!(
                        "pipeline '{}' cannot require itself",
                        decl.name
                    )));
                }
                if !seen.contains(prev.as_str()) {
                    return Err(BlogPostGenError::config(format!(
                        "pipeline '{}' requires unknown pipeline '{prev}'",
                        decl.name
                    )));
                }
            }
            for step in &decl.actions {
                if actions.get(&step.action).is_none() {
                    return Err(BlogPostGenError::config(format!(
                        "pipeline '{}' references undeclared action '{}'",
                        decl.name, step.action
                    )));
                }
            }
        }

        Ok(Self { actions, pipelines })
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Declarations in config order.
    pub fn pipelines(&self) -> &[PipelineDecl] {
        &self.pipelines
    }

    pub fn decl(&self, name: &str) -> Option<&PipelineDecl> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    /// Resolve `name` for a project: drop disabled steps and the project's
    /// per-pipeline exclusions.
    pub fn resolve(&self, name: &str, project: &ProjectConfig) -> Result<ResolvedPipeline> {
        let decl = self
            .decl(name)
            .ok_or_else(|| BlogPostGenError::NotFound(format!("pipeline '{name}'")))?;
        let excluded = project.excluded_for(name);

        let mut actions = Vec::with_capacity(decl.actions.len());
        for step in &decl.actions {
            if !step.enabled {
                debug!(pipeline = name, action = %step.action, "action disabled");
                continue;
            }
            if excluded.contains(&step.action) {
                debug!(pipeline = name, action = %step.action, "action excluded by project");
                continue;
            }
            let action = self.actions.get(&step.action).ok_or_else(|| {
                BlogPostGenError::config(format!(
                    "pipeline '{name}' references undeclared action '{}'",
                    step.action
                ))
            })?;
            actions.push(ResolvedAction {
                name: step.action.clone(),
                action,
            });
        }

        Ok(ResolvedPipeline {
            name: decl.name.clone(),
            eligibility: decl.eligibility(),
            actions,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use blogpostgen_shared::PipelineStep;

    use super::*;

    fn builtin() -> PipelineRegistry {
        PipelineRegistry::from_config(&AppConfig::default()).expect("builtin registry")
    }

    #[test]
    fn builtin_pipelines_resolve() {
        let registry = builtin();
        let enhance = registry
            .resolve("enhance", &ProjectConfig::default())
            .expect("resolve");
        assert_eq!(
            enhance.action_names(),
            vec!["add_faq", "add_jsonld", "add_toc", "verify_assets"]
        );
        assert_eq!(enhance.eligibility, Eligibility::After("generate".into()));
        assert_eq!(enhance.actions[0].action, Action::Remote(RemoteOperation::Enhance));
        assert_eq!(enhance.actions[2].action, Action::Local(LocalAction::AddToc));

        let generate = registry
            .resolve("generate", &ProjectConfig::default())
            .expect("resolve");
        assert_eq!(generate.eligibility, Eligibility::Seed);
        assert_eq!(
            generate.actions[0].action,
            Action::Remote(RemoteOperation::Generate)
        );
    }

    #[test]
    fn project_exclusions_and_disabled_steps_are_filtered() {
        let mut config = AppConfig::default();
        config.pipelines[1].actions[1].enabled = false; // enhance: add_jsonld

        let registry = PipelineRegistry::from_config(&config).expect("registry");
        let project = ProjectConfig {
            exclude_actions: BTreeMap::from([("enhance".into(), vec!["verify_assets".into()])]),
            ..Default::default()
        };
        let enhance = registry.resolve("enhance", &project).expect("resolve");
        assert_eq!(enhance.action_names(), vec!["add_faq", "add_toc"]);
    }

    #[test]
    fn unknown_pipeline_is_not_found() {
        let err = builtin()
            .resolve("publish", &ProjectConfig::default())
            .unwrap_err();
        assert!(matches!(err, BlogPostGenError::NotFound(_)));
    }

    #[test]
    fn undeclared_action_is_config_error() {
        let mut config = AppConfig::default();
        config.pipelines[0].actions.push(PipelineStep {
            action: "translate".into(),
            enabled: true,
        });
        let err = PipelineRegistry::from_config(&config).unwrap_err();
        assert!(matches!(err, BlogPostGenError::Config { .. }));
        assert!(err.to_string().contains("translate"));
    }

    #[test]
    fn local_decl_without_implementation_is_rejected() {
        let decls = vec![ActionDecl {
            name: "spellcheck".into(),
            kind: ActionKind::Local,
            operation: RemoteOperation::default(),
        }];
        assert!(ActionRegistry::from_decls(&decls).is_err());
    }

    #[test]
    fn requires_must_name_a_declared_pipeline() {
        let mut config = AppConfig::default();
        config.pipelines[1].requires = Some("draft".into());
        assert!(PipelineRegistry::from_config(&config).is_err());

        let mut config = AppConfig::default();
        let duplicate = config.pipelines[0].clone();
        config.pipelines.push(duplicate);
        assert!(PipelineRegistry::from_config(&config).is_err());
    }

    #[test]
    fn force_accepts_articles_already_at_pipeline() {
        let enhance = builtin()
            .resolve("enhance", &ProjectConfig::default())
            .expect("resolve");
        assert!(enhance.accepts(Some("generate"), false));
        assert!(!enhance.accepts(Some("enhance"), false));
        assert!(enhance.accepts(Some("enhance"), true));
        assert!(!enhance.accepts(None, true));
        assert!(!enhance.accepts(Some("finalize"), true));
    }
}
