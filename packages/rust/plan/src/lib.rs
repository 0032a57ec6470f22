//! Content plan parsing and article path derivation.
//!
//! A plan is plain text handed to `blogpostgen import`. It is either a list of
//! labeled article blocks or a list of free-form ideas. This crate only turns
//! text into [`PlanEntry`](blogpostgen_shared::PlanEntry) values and candidate
//! paths; deciding what to do with each candidate is the importer's job.

mod parser;
mod slug;

pub use parser::{ParsedPlan, RejectedBlock, parse_plan};
pub use slug::{DEFAULT_MAX_WORDS, candidate_path, normalize_slug, slugify_title};
