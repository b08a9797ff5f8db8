// Pure scoring, classification, and composition logic.
// No storage access here; the runtime gathers candidates and this crate
// turns them into decisions and rendered context.

mod categories;
mod causal;
mod dedupe;
mod enforce;
mod error;
mod extract;
mod inject;
mod scoring;
mod sop;

pub use categories::CategoryManager;
pub use causal::{QueryClass, classify_query, sanitize_fragment, synthesize_insight};
pub use dedupe::{CollapsePlan, DedupeAction, DuplicateGroup, find_duplicate_groups, plan_collapse};
pub use enforce::{
    EnforcementConfig, EnforcementLevel, KnowledgeBundle, Verdict, compose_block_reason, decide,
};
pub use error::{Error, Result};
pub use extract::{
    ActionContext, CommandType, RiskLevel, extract_context, is_read_only_command, serialize_params,
};
pub use inject::{
    ComposedContext, HotCandidate, InjectionInputs, InjectorConfig, SemanticCandidate,
    StmCandidate, compose, compute_budget,
};
pub use scoring::{
    CONFIDENCE_CRITICAL, CONFIDENCE_EXPERIMENTAL, CONFIDENCE_ROUTINE, ScoringParams,
    audit_reasons, compute_confidence, initial_confidence, stm_match_score, temporal_relevance,
};
pub use sop::{SOP_SECTIONS, SopEnhancer, SopMatch, SopPattern, SopPriority, parse_sections};
