use chrono::Utc;
use cortex_types::{DecisionOutcome, RiskTier, TrustScore};

/// Starting score for a category with no history. Below every threshold
/// except tier 1, so new categories pause until trust accumulates.
pub const INITIAL_SCORE: f64 = 0.5;

/// EWMA update with tier-specific alpha, clamped into [0, 1].
/// Tier 4 has alpha 0: its score never moves.
pub fn ewma_update(score: f64, tier: RiskTier, outcome: DecisionOutcome) -> f64 {
    let alpha = tier.alpha();
    let updated = (1.0 - alpha) * score + alpha * outcome.feedback_value();
    updated.clamp(0.0, 1.0)
}

/// Fold an outcome into a (possibly absent) stored score
pub fn fold_outcome(
    existing: Option<TrustScore>,
    category: &str,
    tier: RiskTier,
    outcome: DecisionOutcome,
) -> TrustScore {
    let mut score = existing.unwrap_or(TrustScore {
        category: category.to_string(),
        tier,
        current_score: INITIAL_SCORE,
        decision_count: 0,
        last_updated: Utc::now(),
    });
    score.current_score = ewma_update(score.current_score, tier, outcome);
    score.decision_count += 1;
    score.last_updated = Utc::now();
    score.tier = tier;
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ewma_moves_toward_feedback() {
        // Tier 2, alpha 0.10, corrected_minor (-0.5):
        // 0.9 * 0.8 + 0.1 * (-0.5) = 0.67
        let updated = ewma_update(0.8, RiskTier::Tier2, DecisionOutcome::CorrectedMinor);
        assert!((updated - 0.67).abs() < 1e-9);

        // Pass pulls upward
        let updated = ewma_update(0.5, RiskTier::Tier1, DecisionOutcome::Pass);
        assert!((updated - 0.54).abs() < 1e-9);
    }

    #[test]
    fn test_clamp_at_zero() {
        let updated = ewma_update(0.0, RiskTier::Tier3, DecisionOutcome::CorrectedSignificant);
        assert_eq!(updated, 0.0);
    }

    #[test]
    fn test_tier4_never_moves() {
        let updated = ewma_update(0.5, RiskTier::Tier4, DecisionOutcome::Pass);
        assert_eq!(updated, 0.5);
    }

    #[test]
    fn test_fold_outcome_seeds_initial() {
        let score = fold_outcome(None, "file_write", RiskTier::Tier2, DecisionOutcome::Pass);
        assert_eq!(score.decision_count, 1);
        // 0.9 * 0.5 + 0.1 * 1.0 = 0.55
        assert!((score.current_score - 0.55).abs() < 1e-9);
    }
}
