use cortex_types::DecisionOutcome;
use once_cell::sync::Lazy;
use regex::Regex;

// Correction detection. A bare "no" or "hmm" must not move trust scores;
// only phrases that clearly reference a wrong action count.
static SIGNIFICANT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(revert|roll\s?back|completely wrong|you broke|that broke|disaster)\b")
        .expect("significant correction pattern compiles")
});

static MINOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(undo|that'?s (wrong|incorrect|not right)|not what i (asked|meant|wanted)|don'?t do that|stop doing|shouldn'?t have|wrong file|wrong place|fix that)\b",
    )
    .expect("minor correction pattern compiles")
});

/// Classify a user message as a correction, if it is one. Returns the
/// outcome to resolve the most recent pending decision with.
pub fn detect_correction(text: &str) -> Option<DecisionOutcome> {
    let trimmed = text.trim();
    // Standalone vague words are not corrections
    if trimmed.split_whitespace().count() < 2 {
        return None;
    }
    if SIGNIFICANT.is_match(trimmed) {
        Some(DecisionOutcome::CorrectedSignificant)
    } else if MINOR.is_match(trimmed) {
        Some(DecisionOutcome::CorrectedMinor)
    } else {
        None
    }
}
