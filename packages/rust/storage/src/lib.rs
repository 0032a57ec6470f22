//! Durable state for BlogPostGen projects.
//!
//! - [`Project`]: a project directory and its `project.toml`
//! - [`ArticleStore`]: per-article snapshot, body and append-only action log
//! - [`RunLedger`]: libSQL history of batch runs
//!
//! Article state lives in plain files so it can be inspected and edited by
//! hand. The ledger is an audit trail and is never consulted for eligibility.

mod articles;
mod ledger;
mod migrations;
mod project;

pub use articles::{ActionLogEntry, ArticleStore, LogOp, content_hash};
pub use ledger::{RunItemRecord, RunLedger, RunRecord, RunTotals};
pub use project::Project;
