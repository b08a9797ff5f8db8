use cortex_types::{GateDecision, OverrideState, RiskTier};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

// Session ids that may set overrides must look interactive. Pipeline,
// subagent, isolated, cron, and background contexts are refused so an
// automated path can never grant itself trust.
static NON_INTERACTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)pipeline|subagent|isolated|cron|background|batch|headless")
        .expect("non-interactive pattern compiles")
});

static SESSION_ID_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{3,63}$").expect("session id pattern compiles"));

/// Validate that a caller session id is allowed to set overrides.
pub fn validate_override_caller(caller_session_id: &str) -> Result<()> {
    if !SESSION_ID_SHAPE.is_match(caller_session_id) {
        return Err(Error::Forbidden(format!(
            "session id '{}' is not a valid interactive session",
            caller_session_id
        )));
    }
    if NON_INTERACTIVE.is_match(caller_session_id) {
        return Err(Error::Forbidden(format!(
            "session '{}' is non-interactive and cannot set overrides",
            caller_session_id
        )));
    }
    Ok(())
}

/// The gate decision table, applied strictly in order:
/// override granted -> pass; override revoked -> block; tier 4 -> pause
/// (hardcap); score >= threshold -> pass; score in [floor, threshold) ->
/// pause; below floor -> block.
pub fn gate_decision(
    tier: RiskTier,
    score: f64,
    override_state: Option<OverrideState>,
) -> GateDecision {
    match override_state {
        Some(OverrideState::Granted) => return GateDecision::Pass,
        Some(OverrideState::Revoked) => return GateDecision::Block,
        None => {}
    }
    if tier == RiskTier::Tier4 {
        return GateDecision::Pause;
    }
    if score >= tier.threshold() {
        GateDecision::Pass
    } else if score >= tier.floor() {
        GateDecision::Pause
    } else {
        GateDecision::Block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_table_order() {
        // Override granted wins even at tier 4
        assert_eq!(
            gate_decision(RiskTier::Tier4, 0.0, Some(OverrideState::Granted)),
            GateDecision::Pass
        );
        // Override revoked wins even with a perfect score
        assert_eq!(
            gate_decision(RiskTier::Tier1, 1.0, Some(OverrideState::Revoked)),
            GateDecision::Block
        );
        // Tier 4 without override always pauses
        assert_eq!(gate_decision(RiskTier::Tier4, 1.0, None), GateDecision::Pause);
    }

    #[test]
    fn test_threshold_and_floor_bands() {
        assert_eq!(gate_decision(RiskTier::Tier2, 0.75, None), GateDecision::Pass);
        assert_eq!(gate_decision(RiskTier::Tier2, 0.55, None), GateDecision::Pause);
        assert_eq!(gate_decision(RiskTier::Tier2, 0.30, None), GateDecision::Block);
        // Boundary values
        assert_eq!(gate_decision(RiskTier::Tier2, 0.70, None), GateDecision::Pass);
        assert_eq!(gate_decision(RiskTier::Tier2, 0.40, None), GateDecision::Pause);
    }

    #[test]
    fn test_override_caller_validation() {
        assert!(validate_override_caller("interactive-7f2a").is_ok());
        assert!(validate_override_caller("pipeline-build-42").is_err());
        assert!(validate_override_caller("nightly-cron").is_err());
        assert!(validate_override_caller("subagent_3").is_err());
        assert!(validate_override_caller("x").is_err());
        assert!(validate_override_caller("has spaces").is_err());
    }
}
