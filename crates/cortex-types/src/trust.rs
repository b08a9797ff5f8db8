use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Action risk tier. Each trust category belongs to exactly one tier.
///
/// Tier 4 is the financial hardcap: alpha 0, threshold unreachable, so the
/// gate can never learn its way into auto-passing those actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskTier {
    Tier1,
    Tier2,
    Tier3,
    Tier4,
}

impl RiskTier {
    pub fn as_u8(&self) -> u8 {
        match self {
            RiskTier::Tier1 => 1,
            RiskTier::Tier2 => 2,
            RiskTier::Tier3 => 3,
            RiskTier::Tier4 => 4,
        }
    }

    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            1 => Some(RiskTier::Tier1),
            2 => Some(RiskTier::Tier2),
            3 => Some(RiskTier::Tier3),
            4 => Some(RiskTier::Tier4),
            _ => None,
        }
    }

    /// EWMA smoothing factor for outcome feedback
    pub fn alpha(&self) -> f64 {
        match self {
            RiskTier::Tier1 => 0.08,
            RiskTier::Tier2 => 0.10,
            RiskTier::Tier3 => 0.15,
            RiskTier::Tier4 => 0.0,
        }
    }

    /// Score at or above which the gate passes
    pub fn threshold(&self) -> f64 {
        match self {
            RiskTier::Tier1 => 0.50,
            RiskTier::Tier2 => 0.70,
            RiskTier::Tier3 => 0.85,
            RiskTier::Tier4 => f64::INFINITY,
        }
    }

    /// Score below which the gate blocks outright
    pub fn floor(&self) -> f64 {
        match self {
            RiskTier::Tier1 => 0.20,
            RiskTier::Tier2 => 0.40,
            RiskTier::Tier3 => 0.60,
            RiskTier::Tier4 => f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Pass,
    Pause,
    Block,
}

impl GateDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateDecision::Pass => "pass",
            GateDecision::Pause => "pause",
            GateDecision::Block => "block",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(GateDecision::Pass),
            "pause" => Some(GateDecision::Pause),
            "block" => Some(GateDecision::Block),
            _ => None,
        }
    }
}

/// Outcome of a gated decision once feedback is known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Pending,
    Pass,
    CorrectedMinor,
    CorrectedSignificant,
    ToolErrorInternal,
    ToolErrorExternal,
    Denied,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Pending => "pending",
            DecisionOutcome::Pass => "pass",
            DecisionOutcome::CorrectedMinor => "corrected_minor",
            DecisionOutcome::CorrectedSignificant => "corrected_significant",
            DecisionOutcome::ToolErrorInternal => "tool_error_internal",
            DecisionOutcome::ToolErrorExternal => "tool_error_external",
            DecisionOutcome::Denied => "denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DecisionOutcome::Pending),
            "pass" => Some(DecisionOutcome::Pass),
            "corrected_minor" => Some(DecisionOutcome::CorrectedMinor),
            "corrected_significant" => Some(DecisionOutcome::CorrectedSignificant),
            "tool_error_internal" => Some(DecisionOutcome::ToolErrorInternal),
            "tool_error_external" => Some(DecisionOutcome::ToolErrorExternal),
            "denied" => Some(DecisionOutcome::Denied),
            _ => None,
        }
    }

    /// Feedback value folded into the EWMA score
    pub fn feedback_value(&self) -> f64 {
        match self {
            DecisionOutcome::Pass => 1.0,
            DecisionOutcome::CorrectedMinor => -0.5,
            DecisionOutcome::CorrectedSignificant => -1.0,
            DecisionOutcome::ToolErrorInternal => -0.3,
            DecisionOutcome::ToolErrorExternal => 0.0,
            DecisionOutcome::Pending | DecisionOutcome::Denied => 0.0,
        }
    }
}

/// One row in the decision log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub category: String,
    pub tier: RiskTier,
    pub gate_decision: GateDecision,
    pub outcome: DecisionOutcome,
    /// Secret-redacted, at most 250 chars
    pub tool_params_summary: String,
    /// 16-hex prefix, non-cryptographic identity for dedup
    pub tool_params_hash: String,
}

/// Per-category trust score, EWMA-updated and clamped into [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustScore {
    pub category: String,
    pub tier: RiskTier,
    pub current_score: f64,
    pub decision_count: u64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideState {
    Granted,
    Revoked,
}

impl OverrideState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideState::Granted => "granted",
            OverrideState::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "granted" => Some(OverrideState::Granted),
            "revoked" => Some(OverrideState::Revoked),
            _ => None,
        }
    }
}

/// Manual trust override for a category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustOverride {
    pub category: String,
    pub state: OverrideState,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub set_by: String,
    pub set_at: DateTime<Utc>,
}

impl TrustOverride {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier4_is_unreachable() {
        assert_eq!(RiskTier::Tier4.alpha(), 0.0);
        assert!(RiskTier::Tier4.threshold().is_infinite());
        assert!(RiskTier::Tier4.floor().is_infinite());
    }

    #[test]
    fn test_outcome_feedback_values() {
        assert_eq!(DecisionOutcome::Pass.feedback_value(), 1.0);
        assert_eq!(DecisionOutcome::CorrectedMinor.feedback_value(), -0.5);
        assert_eq!(DecisionOutcome::CorrectedSignificant.feedback_value(), -1.0);
        assert_eq!(DecisionOutcome::ToolErrorInternal.feedback_value(), -0.3);
        assert_eq!(DecisionOutcome::ToolErrorExternal.feedback_value(), 0.0);
    }

    #[test]
    fn test_override_expiry() {
        let now = Utc::now();
        let o = TrustOverride {
            category: "financial_augur".to_string(),
            state: OverrideState::Revoked,
            reason: "manual".to_string(),
            expires_at: Some(now - chrono::Duration::minutes(1)),
            set_by: "session-abc".to_string(),
            set_at: now - chrono::Duration::hours(1),
        };
        assert!(!o.is_active(now));
    }
}
