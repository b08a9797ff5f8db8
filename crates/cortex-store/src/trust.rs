use chrono::{DateTime, Utc};
use cortex_types::{
    DecisionOutcome, DecisionRecord, GateDecision, OverrideState, RiskTier, TrustOverride,
    TrustScore,
};
use rusqlite::{OptionalExtension, Row, params};

use crate::store::not_found;
use crate::{Result, Store};

/// A decision awaiting outcome feedback
#[derive(Debug, Clone)]
pub struct PendingOutcome {
    pub decision_id: String,
    pub category: String,
    pub tier: RiskTier,
    pub created_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
}

fn decision_from_row(row: &Row) -> rusqlite::Result<DecisionRecord> {
    let tier_raw: i64 = row.get(4)?;
    let gate_raw: String = row.get(5)?;
    let outcome_raw: String = row.get(6)?;
    Ok(DecisionRecord {
        decision_id: row.get(0)?,
        timestamp: row.get(1)?,
        tool_name: row.get(2)?,
        category: row.get(3)?,
        tier: RiskTier::from_u8(tier_raw as u8).unwrap_or(RiskTier::Tier2),
        gate_decision: GateDecision::parse(&gate_raw).unwrap_or(GateDecision::Pause),
        outcome: DecisionOutcome::parse(&outcome_raw).unwrap_or(DecisionOutcome::Pending),
        tool_params_summary: row.get(7)?,
        tool_params_hash: row.get(8)?,
    })
}

const DECISION_COLUMNS: &str = "decision_id, timestamp, tool_name, category, tier, \
     gate_decision, outcome, tool_params_summary, tool_params_hash";

impl Store {
    pub fn insert_decision(&self, record: &DecisionRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO decision_log (decision_id, timestamp, tool_name, category, tier,
                gate_decision, outcome, tool_params_summary, tool_params_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                &record.decision_id,
                record.timestamp,
                &record.tool_name,
                &record.category,
                record.tier.as_u8() as i64,
                record.gate_decision.as_str(),
                record.outcome.as_str(),
                &record.tool_params_summary,
                &record.tool_params_hash,
            ],
        )?;
        Ok(())
    }

    pub fn get_decision(&self, decision_id: &str) -> Result<DecisionRecord> {
        let record = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM decision_log WHERE decision_id = ?1", DECISION_COLUMNS),
                [decision_id],
                decision_from_row,
            )
            .optional()?;
        match record {
            Some(record) => Ok(record),
            None => not_found("decision", decision_id),
        }
    }

    pub fn set_decision_outcome(&self, decision_id: &str, outcome: DecisionOutcome) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE decision_log SET outcome = ?1 WHERE decision_id = ?2",
            params![outcome.as_str(), decision_id],
        )?;
        if updated == 0 {
            return not_found("decision", decision_id);
        }
        Ok(())
    }

    pub fn insert_pending_outcome(&self, pending: &PendingOutcome) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO pending_outcomes (decision_id, category, tier, created_at, due_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &pending.decision_id,
                &pending.category,
                pending.tier.as_u8() as i64,
                pending.created_at,
                pending.due_at,
            ],
        )?;
        Ok(())
    }

    pub fn due_pending_outcomes(&self, now: DateTime<Utc>) -> Result<Vec<PendingOutcome>> {
        self.query_pendings("due_at <= ?1", params![now])
    }

    /// Most recent unresolved decision in a category, for correction
    /// attribution inside the feedback window.
    pub fn latest_pending_in_category(
        &self,
        category: &str,
        not_before: DateTime<Utc>,
    ) -> Result<Option<PendingOutcome>> {
        let mut pendings =
            self.query_pendings("category = ?1 AND created_at >= ?2", params![category, not_before])?;
        pendings.sort_by_key(|p| p.created_at);
        Ok(pendings.pop())
    }

    /// Most recent unresolved decision across categories inside the window
    pub fn latest_pending(&self, not_before: DateTime<Utc>) -> Result<Option<PendingOutcome>> {
        let mut pendings = self.query_pendings("created_at >= ?1", params![not_before])?;
        pendings.sort_by_key(|p| p.created_at);
        Ok(pendings.pop())
    }

    fn query_pendings(
        &self,
        where_clause: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<PendingOutcome>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT decision_id, category, tier, created_at, due_at FROM pending_outcomes WHERE {}",
            where_clause
        ))?;
        let pendings = stmt
            .query_map(args, |row| {
                let tier_raw: i64 = row.get(2)?;
                Ok(PendingOutcome {
                    decision_id: row.get(0)?,
                    category: row.get(1)?,
                    tier: RiskTier::from_u8(tier_raw as u8).unwrap_or(RiskTier::Tier2),
                    created_at: row.get(3)?,
                    due_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pendings)
    }

    pub fn remove_pending_outcome(&self, decision_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM pending_outcomes WHERE decision_id = ?1",
            [decision_id],
        )?;
        Ok(())
    }

    /// Newest decision row in a category, for audits and tests
    pub fn latest_decision_in_category(&self, category: &str) -> Result<Option<DecisionRecord>> {
        let record = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM decision_log WHERE category = ?1 ORDER BY timestamp DESC LIMIT 1",
                    DECISION_COLUMNS
                ),
                [category],
                decision_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_trust_score(&self, category: &str) -> Result<Option<TrustScore>> {
        let score = self
            .conn()
            .query_row(
                "SELECT category, tier, current_score, decision_count, last_updated FROM trust_scores WHERE category = ?1",
                [category],
                |row| {
                    let tier_raw: i64 = row.get(1)?;
                    Ok(TrustScore {
                        category: row.get(0)?,
                        tier: RiskTier::from_u8(tier_raw as u8).unwrap_or(RiskTier::Tier2),
                        current_score: row.get(2)?,
                        decision_count: row.get::<_, i64>(3)? as u64,
                        last_updated: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(score)
    }

    pub fn upsert_trust_score(&self, score: &TrustScore) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO trust_scores (category, tier, current_score, decision_count, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(category) DO UPDATE SET
                tier = ?2,
                current_score = ?3,
                decision_count = ?4,
                last_updated = ?5
            "#,
            params![
                &score.category,
                score.tier.as_u8() as i64,
                score.current_score,
                score.decision_count as i64,
                score.last_updated,
            ],
        )?;
        Ok(())
    }

    pub fn set_override(&self, o: &TrustOverride) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO trust_overrides (category, state, reason, expires_at, set_by, set_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(category) DO UPDATE SET
                state = ?2, reason = ?3, expires_at = ?4, set_by = ?5, set_at = ?6
            "#,
            params![
                &o.category,
                o.state.as_str(),
                &o.reason,
                o.expires_at,
                &o.set_by,
                o.set_at,
            ],
        )?;
        Ok(())
    }

    /// Active (unexpired) override for a category
    pub fn get_override(&self, category: &str, now: DateTime<Utc>) -> Result<Option<TrustOverride>> {
        let o = self
            .conn()
            .query_row(
                "SELECT category, state, reason, expires_at, set_by, set_at FROM trust_overrides WHERE category = ?1",
                [category],
                |row| {
                    let state_raw: String = row.get(1)?;
                    Ok(TrustOverride {
                        category: row.get(0)?,
                        state: OverrideState::parse(&state_raw).unwrap_or(OverrideState::Revoked),
                        reason: row.get(2)?,
                        expires_at: row.get(3)?,
                        set_by: row.get(4)?,
                        set_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(o.filter(|o| o.is_active(now)))
    }

    pub fn clear_override(&self, category: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM trust_overrides WHERE category = ?1",
            [category],
        )?;
        Ok(())
    }

    /// Retention: drop decision rows older than the cutoff. Pending rows are
    /// never dropped here; the sweep resolves them first.
    pub fn purge_decisions_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn().execute(
            r#"
            DELETE FROM decision_log
            WHERE timestamp < ?1
              AND decision_id NOT IN (SELECT decision_id FROM pending_outcomes)
            "#,
            [cutoff],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn decision(category: &str, tier: RiskTier, decision: GateDecision) -> DecisionRecord {
        DecisionRecord {
            decision_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            tool_name: "exec".to_string(),
            category: category.to_string(),
            tier,
            gate_decision: decision,
            outcome: DecisionOutcome::Pending,
            tool_params_summary: "command=systemctl restart augur".to_string(),
            tool_params_hash: "a1b2c3d4e5f60718".to_string(),
        }
    }

    #[test]
    fn test_decision_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let record = decision("system_control", RiskTier::Tier3, GateDecision::Pause);
        store.insert_decision(&record).unwrap();

        let loaded = store.get_decision(&record.decision_id).unwrap();
        assert_eq!(loaded.category, "system_control");
        assert_eq!(loaded.tier, RiskTier::Tier3);
        assert_eq!(loaded.outcome, DecisionOutcome::Pending);

        store
            .set_decision_outcome(&record.decision_id, DecisionOutcome::Pass)
            .unwrap();
        let loaded = store.get_decision(&record.decision_id).unwrap();
        assert_eq!(loaded.outcome, DecisionOutcome::Pass);
    }

    #[test]
    fn test_pending_outcome_due_query() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let record = decision("file_write", RiskTier::Tier2, GateDecision::Pass);
        store.insert_decision(&record).unwrap();
        store
            .insert_pending_outcome(&PendingOutcome {
                decision_id: record.decision_id.clone(),
                category: "file_write".to_string(),
                tier: RiskTier::Tier2,
                created_at: now - chrono::Duration::minutes(31),
                due_at: now - chrono::Duration::minutes(1),
            })
            .unwrap();

        let due = store.due_pending_outcomes(now).unwrap();
        assert_eq!(due.len(), 1);

        store.remove_pending_outcome(&record.decision_id).unwrap();
        assert!(store.due_pending_outcomes(now).unwrap().is_empty());
    }

    #[test]
    fn test_latest_pending_in_category() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        for minutes_ago in [20, 5] {
            let record = decision("file_write", RiskTier::Tier2, GateDecision::Pass);
            store.insert_decision(&record).unwrap();
            store
                .insert_pending_outcome(&PendingOutcome {
                    decision_id: record.decision_id.clone(),
                    category: "file_write".to_string(),
                    tier: RiskTier::Tier2,
                    created_at: now - chrono::Duration::minutes(minutes_ago),
                    due_at: now + chrono::Duration::minutes(30),
                })
                .unwrap();
        }

        let latest = store
            .latest_pending_in_category("file_write", now - chrono::Duration::minutes(30))
            .unwrap()
            .unwrap();
        assert!(latest.created_at > now - chrono::Duration::minutes(10));
    }

    #[test]
    fn test_override_expiry_filtered() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .set_override(&TrustOverride {
                category: "financial_augur".to_string(),
                state: OverrideState::Revoked,
                reason: "paper trading only".to_string(),
                expires_at: Some(now + chrono::Duration::hours(1)),
                set_by: "interactive-1".to_string(),
                set_at: now,
            })
            .unwrap();

        assert!(store.get_override("financial_augur", now).unwrap().is_some());
        assert!(store
            .get_override("financial_augur", now + chrono::Duration::hours(2))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_purge_respects_pending() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let mut old = decision("file_write", RiskTier::Tier2, GateDecision::Pass);
        old.timestamp = now - chrono::Duration::days(120);
        store.insert_decision(&old).unwrap();
        store
            .insert_pending_outcome(&PendingOutcome {
                decision_id: old.decision_id.clone(),
                category: "file_write".to_string(),
                tier: RiskTier::Tier2,
                created_at: old.timestamp,
                due_at: old.timestamp + chrono::Duration::minutes(30),
            })
            .unwrap();

        let removed = store
            .purge_decisions_before(now - chrono::Duration::days(90))
            .unwrap();
        assert_eq!(removed, 0);

        store.remove_pending_outcome(&old.decision_id).unwrap();
        let removed = store
            .purge_decisions_before(now - chrono::Duration::days(90))
            .unwrap();
        assert_eq!(removed, 1);
    }
}
