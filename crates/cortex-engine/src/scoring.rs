use chrono::{DateTime, Utc};
use cortex_types::{CONFIDENCE_MAX, CONFIDENCE_MIN, Memory};

/// Confidence thresholds consumed by enforcement callers. Not enforced
/// here; the scoring layer only computes values.
pub const CONFIDENCE_CRITICAL: f64 = 0.8;
pub const CONFIDENCE_ROUTINE: f64 = 0.5;
pub const CONFIDENCE_EXPERIMENTAL: f64 = 0.2;

const AGE_DECAY_PER_DAY: f64 = 0.01;
const ACCESS_BONUS: f64 = 0.05;
const ACCESS_BONUS_CAP: f64 = 0.5;
const VALIDATION_BONUS: f64 = 0.2;
const CONTRADICTION_PENALTY: f64 = 0.3;

/// Half-life for temporal relevance in STM matching
const TEMPORAL_HALF_LIFE_HOURS: f64 = 48.0;

const PHRASE_BONUS: f64 = 0.3;
const PHRASE_MIN_CHARS: usize = 5;
const CATEGORY_OVERLAP_BONUS: f64 = 0.1;

/// Initial confidence for a freshly stored memory
pub fn initial_confidence() -> f64 {
    CONFIDENCE_MAX
}

/// Recompute confidence from age, access history, validations, and
/// contradictions. Clamped into [0.1, 1.0].
pub fn compute_confidence(
    memory: &Memory,
    now: DateTime<Utc>,
    validations: u32,
    contradictions: u32,
) -> f64 {
    let base = (1.0 - memory.age_days(now) * AGE_DECAY_PER_DAY).max(CONFIDENCE_MIN);
    let access_bonus = (memory.access_count as f64 * ACCESS_BONUS).min(ACCESS_BONUS_CAP);
    let validation_bonus = validations as f64 * VALIDATION_BONUS;
    let contradiction_penalty = contradictions as f64 * CONTRADICTION_PENALTY;

    (base + access_bonus + validation_bonus - contradiction_penalty)
        .clamp(CONFIDENCE_MIN, CONFIDENCE_MAX)
}

/// Exponential decay with a ~48h half-life, in (0, 1]
pub fn temporal_relevance(age_hours: f64) -> f64 {
    (-(std::f64::consts::LN_2) * age_hours.max(0.0) / TEMPORAL_HALF_LIFE_HOURS).exp()
}

/// Tunable weights for STM match scoring
#[derive(Debug, Clone, Copy)]
pub struct ScoringParams {
    pub temporal_weight: f64,
    pub importance_weight: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            temporal_weight: 0.3,
            importance_weight: 0.2,
        }
    }
}

/// Composite STM match score: keyword overlap, exact-phrase bonus,
/// recency, importance, and category overlap.
pub fn stm_match_score(
    memory: &Memory,
    query: &str,
    active_categories: &[String],
    params: ScoringParams,
    now: DateTime<Utc>,
) -> f64 {
    let content = memory.content.to_lowercase();
    let query_lower = query.to_lowercase();

    let terms: Vec<&str> = query_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let overlap = terms.iter().filter(|t| content.contains(**t)).count() as f64 / terms.len() as f64;

    let phrase_bonus = if query_lower.trim().len() > PHRASE_MIN_CHARS
        && content.contains(query_lower.trim())
    {
        PHRASE_BONUS
    } else {
        0.0
    };

    let recency = temporal_relevance(memory.age_hours(now)) * params.temporal_weight;
    let importance = (memory.importance - 1.0) / 2.0 * params.importance_weight;

    let shared_categories = memory
        .categories
        .iter()
        .filter(|c| active_categories.contains(c))
        .count() as f64;
    let category_bonus = shared_categories * CATEGORY_OVERLAP_BONUS;

    overlap + phrase_bonus + recency + importance + category_bonus
}

/// Reasons recorded in the confidence audit trail. Free-form text is
/// allowed by the store; these are the ones the engine itself emits.
pub mod audit_reasons {
    pub const CREATED: &str = "created";
    pub const AGE_DECAY: &str = "age decay";
    pub const VALIDATED: &str = "validated execution";
    pub const CONTRADICTED: &str = "contradiction flagged";
}
