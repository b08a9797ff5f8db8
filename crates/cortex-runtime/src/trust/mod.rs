mod classifier;
mod gate;
mod outcomes;
mod redact;
mod score;

pub use classifier::{Classification, classify_action};
pub use gate::{gate_decision, validate_override_caller};
pub use outcomes::detect_correction;
pub use redact::{params_hash, params_summary, redact};
pub use score::{INITIAL_SCORE, ewma_update, fold_outcome};

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use cortex_store::{PendingOutcome, Store};
use cortex_types::{
    DecisionOutcome, DecisionRecord, GateDecision, OverrideState, TrustOverride,
};
use serde_json::Value;
use uuid::Uuid;

use crate::config::TrustConfig;
use crate::{Error, Result};

/// TTL for pause confirmations; expired entries resolve as denied.
const CONFIRMATION_TTL_MINUTES: i64 = 10;

/// Result of one gate evaluation
#[derive(Debug, Clone)]
pub struct TrustEvaluation {
    pub decision_id: String,
    pub classification: Classification,
    pub decision: GateDecision,
    pub rationale: String,
}

struct PendingConfirmation {
    decision_id: String,
    expires_at: DateTime<Utc>,
}

/// The trust gate: classification, EWMA scores, override table, and
/// outcome feedback over the store.
pub struct TrustGate {
    store: Arc<Mutex<Store>>,
    config: TrustConfig,
    confirmations: Mutex<Vec<PendingConfirmation>>,
}

impl TrustGate {
    pub fn new(store: Arc<Mutex<Store>>, config: TrustConfig) -> Self {
        Self {
            store,
            config,
            confirmations: Mutex::new(Vec::new()),
        }
    }

    fn store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().expect("store mutex poisoned")
    }

    /// Classify the action, apply the decision table, and log the decision.
    /// Gate passes open a feedback window; pauses enter the confirmation
    /// queue with a TTL.
    pub fn evaluate(&self, tool_name: &str, params: &Value) -> Result<TrustEvaluation> {
        let classification = classify_action(tool_name, params);
        let now = Utc::now();

        let store = self.store();
        let override_state = store
            .get_override(&classification.category, now)?
            .map(|o| o.state);
        let score = store
            .get_trust_score(&classification.category)?
            .map(|s| s.current_score)
            .unwrap_or(INITIAL_SCORE);
        let decision = gate_decision(classification.tier, score, override_state);

        let record = DecisionRecord {
            decision_id: Uuid::new_v4().to_string(),
            timestamp: now,
            tool_name: tool_name.to_string(),
            category: classification.category.clone(),
            tier: classification.tier,
            gate_decision: decision,
            outcome: DecisionOutcome::Pending,
            tool_params_summary: params_summary(params),
            tool_params_hash: params_hash(params),
        };
        store.insert_decision(&record)?;

        match decision {
            GateDecision::Pass => {
                store.insert_pending_outcome(&PendingOutcome {
                    decision_id: record.decision_id.clone(),
                    category: classification.category.clone(),
                    tier: classification.tier,
                    created_at: now,
                    due_at: now + Duration::minutes(self.config.correction_window_minutes),
                })?;
            }
            GateDecision::Pause => {
                drop(store);
                self.confirmations
                    .lock()
                    .expect("confirmation queue poisoned")
                    .push(PendingConfirmation {
                        decision_id: record.decision_id.clone(),
                        expires_at: now + Duration::minutes(CONFIRMATION_TTL_MINUTES),
                    });
            }
            GateDecision::Block => {}
        }

        let rationale = match (decision, override_state) {
            (GateDecision::Pass, Some(OverrideState::Granted)) => {
                format!("override granted for '{}'", classification.category)
            }
            (GateDecision::Block, Some(OverrideState::Revoked)) => {
                format!("override revoked for '{}'", classification.category)
            }
            (GateDecision::Pause, _) if classification.tier == cortex_types::RiskTier::Tier4 => {
                format!(
                    "tier-4 action '{}' always requires confirmation",
                    classification.category
                )
            }
            (decision, _) => format!(
                "category '{}' tier {} score {:.2} -> {}",
                classification.category,
                classification.tier.as_u8(),
                score,
                decision.as_str()
            ),
        };

        Ok(TrustEvaluation {
            decision_id: record.decision_id,
            classification,
            decision,
            rationale,
        })
    }

    /// Resolve an outcome: decision row, EWMA fold, pending cleanup.
    pub fn resolve_outcome(&self, decision_id: &str, outcome: DecisionOutcome) -> Result<()> {
        let store = self.store();
        let record = store.get_decision(decision_id)?;
        store.set_decision_outcome(decision_id, outcome)?;
        store.remove_pending_outcome(decision_id)?;

        let existing = store.get_trust_score(&record.category)?;
        let folded = fold_outcome(existing, &record.category, record.tier, outcome);
        store.upsert_trust_score(&folded)?;
        Ok(())
    }

    /// A tool result came back with an error; attribute it to the most
    /// recent pending decision in the category.
    pub fn record_tool_error(&self, category: &str, internal: bool) -> Result<bool> {
        let window_start = Utc::now() - Duration::minutes(self.config.correction_window_minutes);
        let pending = self.store().latest_pending_in_category(category, window_start)?;
        match pending {
            Some(pending) => {
                let outcome = if internal {
                    DecisionOutcome::ToolErrorInternal
                } else {
                    DecisionOutcome::ToolErrorExternal
                };
                self.resolve_outcome(&pending.decision_id, outcome)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Inspect a user message for a correction phrase and resolve the most
    /// recent pending decision inside the feedback window.
    pub fn handle_user_message(&self, text: &str) -> Result<Option<(String, DecisionOutcome)>> {
        let Some(outcome) = detect_correction(text) else {
            return Ok(None);
        };
        let window_start = Utc::now() - Duration::minutes(self.config.correction_window_minutes);
        let pending = self.store().latest_pending(window_start)?;
        match pending {
            Some(pending) => {
                self.resolve_outcome(&pending.decision_id, outcome)?;
                Ok(Some((pending.decision_id, outcome)))
            }
            None => Ok(None),
        }
    }

    /// Approve or reject a paused decision from the confirmation queue.
    pub fn resolve_confirmation(&self, decision_id: &str, approved: bool) -> Result<()> {
        let mut queue = self.confirmations.lock().expect("confirmation queue poisoned");
        let position = queue.iter().position(|c| c.decision_id == decision_id);
        match position {
            Some(idx) => {
                queue.remove(idx);
                drop(queue);
                let outcome = if approved {
                    DecisionOutcome::Pass
                } else {
                    DecisionOutcome::Denied
                };
                self.resolve_outcome(decision_id, outcome)
            }
            None => Err(Error::InvalidOperation(format!(
                "decision '{}' is not awaiting confirmation",
                decision_id
            ))),
        }
    }

    /// Periodic sweep: expired feedback windows resolve to pass; expired
    /// confirmations resolve to denied. Returns (passed, denied) counts.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let due = self.store().due_pending_outcomes(now)?;
        let mut passed = 0;
        for pending in due {
            self.resolve_outcome(&pending.decision_id, DecisionOutcome::Pass)?;
            passed += 1;
        }

        let expired: Vec<String> = {
            let mut queue = self.confirmations.lock().expect("confirmation queue poisoned");
            let expired = queue
                .iter()
                .filter(|c| c.expires_at <= now)
                .map(|c| c.decision_id.clone())
                .collect();
            queue.retain(|c| c.expires_at > now);
            expired
        };
        let mut denied = 0;
        for decision_id in expired {
            self.resolve_outcome(&decision_id, DecisionOutcome::Denied)?;
            denied += 1;
        }
        Ok((passed, denied))
    }

    /// Set a manual override. The caller must look like an interactive
    /// session; automated contexts are refused.
    pub fn set_override(
        &self,
        category: &str,
        state: OverrideState,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
        caller_session_id: &str,
    ) -> Result<()> {
        validate_override_caller(caller_session_id)?;
        self.store().set_override(&TrustOverride {
            category: category.to_string(),
            state,
            reason: reason.to_string(),
            expires_at,
            set_by: caller_session_id.to_string(),
            set_at: Utc::now(),
        })?;
        Ok(())
    }

    /// Retention: drop resolved decision rows past the retention horizon.
    pub fn purge_old_decisions(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(self.config.retention_days);
        Ok(self.store().purge_decisions_before(cutoff)?)
    }
}
