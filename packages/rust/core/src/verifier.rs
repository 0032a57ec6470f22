//! Consistency Verifier / Repair.
//!
//! An article whose `last_pipeline` is `P` must have every action of `P` in
//! `applied_actions`. Repair moves such an article back to the stage `P`
//! requires, leaving `applied_actions` alone, so the next run of `P` skips
//! the recorded actions and completes the rest.

use tracing::{info, instrument, warn};

use blogpostgen_shared::{Result, SEED};
use blogpostgen_storage::Project;

use crate::registry::PipelineRegistry;

/// Why an article failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Actions of `last_pipeline` missing from `applied_actions`.
    MissingActions {
        expected: usize,
        applied: usize,
        missing: Vec<String>,
    },
    /// `last_pipeline` names a pipeline that is not configured.
    UnknownPipeline,
    /// The record could not be loaded.
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidArticle {
    pub path: String,
    /// Empty when the record is unreadable.
    pub pipeline: String,
    pub violation: Violation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Articles with a `last_pipeline` that were checked.
    pub checked: usize,
    /// Seed articles, which have nothing to verify.
    pub seeds: usize,
    pub invalid: Vec<InvalidArticle>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// A `last_pipeline` revert performed by [`repair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revert {
    pub path: String,
    pub from: String,
    /// `None` means back to seed.
    pub to: Option<String>,
}

/// Audit every processed article in `project`.
#[instrument(skip_all, fields(project = %project.name()))]
pub fn verify(project: &Project, registry: &PipelineRegistry) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();

    for (path, loaded) in project.articles().load_each()? {
        let meta = match loaded {
            Ok(meta) => meta,
            Err(e) => {
                warn!(article = %path, error = %e, "unreadable article");
                report.invalid.push(InvalidArticle {
                    path,
                    pipeline: String::new(),
                    violation: Violation::Unreadable(e.to_string()),
                });
                continue;
            }
        };
        let Some(pipeline) = meta.last_pipeline.as_deref() else {
            report.seeds += 1;
            continue;
        };
        report.checked += 1;

        let resolved = match registry.resolve(pipeline, project.config()) {
            Ok(resolved) => resolved,
            Err(_) => {
                warn!(article = %meta.path, pipeline, "unknown pipeline");
                report.invalid.push(InvalidArticle {
                    path: meta.path.clone(),
                    pipeline: pipeline.to_string(),
                    violation: Violation::UnknownPipeline,
                });
                continue;
            }
        };

        let expected = resolved.action_names();
        let missing: Vec<String> = meta
            .missing_actions(&expected)
            .into_iter()
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            warn!(
                article = %meta.path,
                pipeline,
                missing = %missing.join(", "),
                "article is missing actions"
            );
            report.invalid.push(InvalidArticle {
                path: meta.path.clone(),
                pipeline: pipeline.to_string(),
                violation: Violation::MissingActions {
                    expected: expected.len(),
                    applied: expected.len() - missing.len(),
                    missing,
                },
            });
        }
    }

    info!(
        checked = report.checked,
        invalid = report.invalid.len(),
        "verification finished"
    );
    Ok(report)
}

/// Revert each article in `report` that is missing actions to the stage its
/// pipeline requires. Unknown pipelines and unreadable records are left
/// untouched.
///
/// Articles whose `last_pipeline` changed since `report` was built are skipped.
#[instrument(skip_all, fields(project = %project.name()))]
pub fn repair(
    project: &Project,
    registry: &PipelineRegistry,
    report: &VerifyReport,
) -> Result<Vec<Revert>> {
    let store = project.articles();
    let mut reverts = Vec::new();

    for invalid in &report.invalid {
        if !matches!(invalid.violation, Violation::MissingActions { .. }) {
            continue;
        }
        let Some(decl) = registry.decl(&invalid.pipeline) else {
            continue;
        };

        let mut meta = store.load(&invalid.path)?;
        if meta.last_pipeline.as_deref() != Some(invalid.pipeline.as_str()) {
            continue;
        }

        let target = decl.requires.clone();
        store.set_last_pipeline(&mut meta, target.as_deref())?;
        info!(
            article = %invalid.path,
            from = %invalid.pipeline,
            to = target.as_deref().unwrap_or(SEED),
            "reverted last_pipeline"
        );
        reverts.push(Revert {
            path: invalid.path.clone(),
            from: invalid.pipeline.clone(),
            to: target,
        });
    }
    Ok(reverts)
}

#[cfg(test)]
mod tests {
    use blogpostgen_shared::{AppConfig, PipelineStep};
    use uuid::Uuid;

    use super::*;
    use crate::executor::tests::seed;

    fn temp_project() -> Project {
        let data_root = std::env::temp_dir().join(format!("bpg_verify_{}", Uuid::now_v7()));
        Project::open_or_init(&data_root, "trail", None).expect("project")
    }

    /// Built-in config with `enhance = [add_faq, add_jsonld, verify_assets]`.
    fn registry() -> PipelineRegistry {
        let mut config = AppConfig::default();
        config.pipelines[1].actions = ["add_faq", "add_jsonld", "verify_assets"]
            .into_iter()
            .map(|action| PipelineStep {
                action: action.into(),
                enabled: true,
            })
            .collect();
        PipelineRegistry::from_config(&config).expect("registry")
    }

    #[test]
    fn flags_missing_actions_and_repairs_to_predecessor() {
        let project = temp_project();
        let store = project.articles();
        seed(store, "bad", Some("enhance"), &["add_faq"]);
        seed(
            store,
            "good",
            Some("enhance"),
            &["add_faq", "add_jsonld", "verify_assets"],
        );
        seed(store, "fresh", None, &[]);
        let registry = registry();

        let report = verify(&project, &registry).expect("verify");
        assert_eq!(report.checked, 2);
        assert_eq!(report.seeds, 1);
        assert_eq!(
            report.invalid,
            vec![InvalidArticle {
                path: "bad".into(),
                pipeline: "enhance".into(),
                violation: Violation::MissingActions {
                    expected: 3,
                    applied: 1,
                    missing: vec!["add_jsonld".into(), "verify_assets".into()],
                },
            }]
        );

        let reverts = repair(&project, &registry, &report).expect("repair");
        assert_eq!(
            reverts,
            vec![Revert {
                path: "bad".into(),
                from: "enhance".into(),
                to: Some("generate".into()),
            }]
        );
        let meta = store.load("bad").expect("load");
        assert_eq!(meta.stage(), "generate");
        assert_eq!(meta.applied_actions, vec!["add_faq"]);

        // Repeating with the same report changes nothing.
        assert!(repair(&project, &registry, &report).expect("repair").is_empty());
    }

    #[test]
    fn repair_cascades_only_through_fresh_reports() {
        let project = temp_project();
        seed(project.articles(), "a", Some("enhance"), &["add_faq"]);
        let registry = registry();

        let first = verify(&project, &registry).expect("verify");
        repair(&project, &registry, &first).expect("repair");

        // Now at `generate`, whose actions are also missing.
        let second = verify(&project, &registry).expect("verify");
        assert_eq!(second.invalid.len(), 1);
        let reverts = repair(&project, &registry, &second).expect("repair");
        assert_eq!(reverts[0].to, None);
        assert!(project.articles().load("a").expect("load").is_seed());

        assert!(verify(&project, &registry).expect("verify").is_consistent());
    }

    #[test]
    fn unknown_pipeline_is_reported_but_not_repaired() {
        let project = temp_project();
        seed(project.articles(), "odd", Some("publish"), &[]);
        let registry = registry();

        let report = verify(&project, &registry).expect("verify");
        assert_eq!(report.invalid[0].violation, Violation::UnknownPipeline);
        assert!(repair(&project, &registry, &report).expect("repair").is_empty());
        assert_eq!(project.articles().load("odd").expect("load").stage(), "publish");
    }

    #[test]
    fn unreadable_record_is_reported_and_others_still_checked() {
        let project = temp_project();
        let store = project.articles();
        seed(store, "a", Some("enhance"), &["add_faq"]);
        seed(store, "b", Some("generate"), &[]);
        std::fs::write(
            store.article_dir("b").expect("dir").join("index.json"),
            "{ not json",
        )
        .expect("corrupt");
        let registry = registry();

        let report = verify(&project, &registry).expect("verify");
        assert_eq!(report.checked, 1);
        assert_eq!(report.invalid.len(), 2);
        assert_eq!(report.invalid[0].path, "a");
        assert_eq!(report.invalid[1].path, "b");
        assert!(matches!(
            &report.invalid[1].violation,
            Violation::Unreadable(reason) if reason.contains("index.json")
        ));

        let reverts = repair(&project, &registry, &report).expect("repair");
        assert_eq!(reverts.len(), 1);
        assert_eq!(reverts[0].path, "a");
    }

    #[test]
    fn exclusions_shrink_the_expected_list() {
        let data_root = std::env::temp_dir().join(format!("bpg_verify_{}", Uuid::now_v7()));
        let root = data_root.join("trail");
        std::fs::create_dir_all(&root).expect("mkdir");
        std::fs::write(
            root.join("project.toml"),
            "[exclude_actions]\nenhance = [\"add_jsonld\", \"verify_assets\"]\n",
        )
        .expect("write");
        let project = Project::open(&data_root, "trail").expect("open");
        seed(project.articles(), "a", Some("enhance"), &["add_faq"]);

        assert!(verify(&project, &registry()).expect("verify").is_consistent());
    }
}
