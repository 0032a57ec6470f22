//! Pipeline orchestration for BlogPostGen.
//!
//! Resolves configured pipelines, runs their actions against stored
//! articles, imports content plans as seed articles, audits article state
//! against pipeline definitions and resets stale actions.

pub mod actions;
pub mod batch;
pub mod executor;
pub mod importer;
pub mod registry;
pub mod reset;
pub mod verifier;

pub use batch::{
    BatchOptions, BatchResult, BatchRunner, ProgressReporter, SilentProgress, parse_range,
};
pub use executor::{ActionExecutor, ArticleOutcome, RunSession, StepReport, StepStatus};
pub use importer::{
    Classification, ConflictDecision, ConflictResolver, DeclineAll, ImportCandidate, ImportItem,
    ImportOptions, ImportOutcome, ImportResult, PlanImporter,
};
pub use registry::{ActionRegistry, PipelineRegistry, ResolvedPipeline};
pub use reset::{ResetItem, ResetReport, reset_action};
pub use verifier::{InvalidArticle, Revert, VerifyReport, Violation, repair, verify};
