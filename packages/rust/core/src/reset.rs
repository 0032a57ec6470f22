//! Action reset: forget one action across a project.
//!
//! Used when an action's implementation changes. Every article that has the
//! action applied loses it and moves back to a chosen stage, so the next run
//! of the following pipeline applies the new version.

use tracing::{info, instrument, warn};

use blogpostgen_shared::{BlogPostGenError, Result, SEED};
use blogpostgen_storage::Project;

use crate::registry::PipelineRegistry;

/// One article touched (or, in a dry run, to be touched) by a reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetItem {
    pub path: String,
    /// Stage before the reset.
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetReport {
    pub action: String,
    /// `None` means back to seed.
    pub to: Option<String>,
    pub dry_run: bool,
    pub items: Vec<ResetItem>,
}

/// Remove `action` from every article that has it applied and set
/// `last_pipeline` to `to` (`"seed"` clears it).
///
/// Unreadable records are skipped with a warning.
#[instrument(skip_all, fields(project = %project.name(), action = %action, to = %to))]
pub fn reset_action(
    project: &Project,
    registry: &PipelineRegistry,
    action: &str,
    to: &str,
    dry_run: bool,
) -> Result<ResetReport> {
    if registry.actions().get(action).is_none() {
        return Err(BlogPostGenError::validation(format!("unknown action '{action}'")));
    }
    let target = if to == SEED {
        None
    } else if registry.decl(to).is_some() {
        Some(to)
    } else {
        return Err(BlogPostGenError::validation(format!("unknown stage '{to}'")));
    };

    let store = project.articles();
    let mut items = Vec::new();
    for (path, loaded) in store.load_each()? {
        let mut meta = match loaded {
            Ok(meta) => meta,
            Err(e) => {
                warn!(article = %path, error = %e, "skipping unreadable article");
                continue;
            }
        };
        if !meta.has_applied(action) {
            continue;
        }
        let from = meta.stage().to_string();
        if !dry_run {
            store.reset_action(&mut meta, action, target)?;
            info!(article = %path, from = %from, "reset action");
        }
        items.push(ResetItem { path, from });
    }

    info!(articles = items.len(), dry_run, "reset finished");
    Ok(ResetReport {
        action: action.to_string(),
        to: target.map(str::to_string),
        dry_run,
        items,
    })
}

#[cfg(test)]
mod tests {
    use blogpostgen_shared::AppConfig;
    use uuid::Uuid;

    use super::*;
    use crate::executor::tests::seed;

    fn temp_project() -> Project {
        let data_root = std::env::temp_dir().join(format!("bpg_reset_{}", Uuid::now_v7()));
        Project::open_or_init(&data_root, "trail", None).expect("project")
    }

    fn registry() -> PipelineRegistry {
        PipelineRegistry::from_config(&AppConfig::default()).expect("registry")
    }

    fn populate(project: &Project) {
        let store = project.articles();
        seed(store, "a", Some("enhance"), &["generate_content", "add_toc", "add_faq"]);
        seed(store, "b", Some("generate"), &["generate_content"]);
        seed(store, "c", None, &[]);
    }

    #[test]
    fn resets_only_articles_with_the_action() {
        let project = temp_project();
        populate(&project);

        let report =
            reset_action(&project, &registry(), "add_toc", "generate", false).expect("reset");
        assert_eq!(
            report.items,
            vec![ResetItem {
                path: "a".into(),
                from: "enhance".into(),
            }]
        );
        assert_eq!(report.to.as_deref(), Some("generate"));

        let store = project.articles();
        let a = store.load("a").expect("reload");
        assert_eq!(a.stage(), "generate");
        assert_eq!(a.applied_actions, vec!["generate_content", "add_faq"]);
        assert_eq!(store.load("b").expect("b").applied_actions, vec!["generate_content"]);

        // Nothing left to reset.
        let again =
            reset_action(&project, &registry(), "add_toc", "generate", false).expect("reset");
        assert!(again.items.is_empty());
    }

    #[test]
    fn dry_run_changes_nothing() {
        let project = temp_project();
        populate(&project);

        let report = reset_action(&project, &registry(), "add_toc", SEED, true).expect("reset");
        assert!(report.dry_run);
        assert_eq!(report.to, None);
        assert_eq!(report.items.len(), 1);

        let a = project.articles().load("a").expect("load");
        assert_eq!(a.stage(), "enhance");
        assert!(a.has_applied("add_toc"));
    }

    #[test]
    fn rejects_unknown_action_and_stage() {
        let project = temp_project();
        populate(&project);
        let registry = registry();

        assert!(reset_action(&project, &registry, "add_sparkles", "generate", false).is_err());
        assert!(reset_action(&project, &registry, "add_toc", "publish", false).is_err());
        assert!(project.articles().load("a").expect("load").has_applied("add_toc"));
    }
}
