use chrono::{DateTime, Utc};
use cortex_types::{
    Anomaly, AnomalyType, Incident, IncidentAuditEntry, IncidentState, RunbookMode, RunbookState,
    Severity,
};
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use crate::store::{not_found, to_json};
use crate::{Result, Store};

fn incident_from_row(row: &Row) -> rusqlite::Result<(Incident, String, String)> {
    let anomaly_raw: String = row.get(1)?;
    let severity_raw: String = row.get(3)?;
    let state_raw: String = row.get(4)?;
    let audit_raw: String = row.get(11)?;
    let details_raw: String = row.get(12)?;
    let incident = Incident {
        id: row.get(0)?,
        anomaly_type: AnomalyType::parse(&anomaly_raw).unwrap_or(AnomalyType::ProcessDead),
        target_id: row.get(2)?,
        severity: Severity::parse(&severity_raw).unwrap_or(Severity::Low),
        state: IncidentState::parse(&state_raw).unwrap_or(IncidentState::Detected),
        runbook_id: row.get(5)?,
        detected_at: row.get(6)?,
        state_changed_at: row.get(7)?,
        resolved_at: row.get(8)?,
        escalation_tier: row.get::<_, i64>(9)? as u8,
        dismiss_until: row.get(10)?,
        audit_trail: Vec::new(),
        details: serde_json::Value::Null,
    };
    Ok((incident, audit_raw, details_raw))
}

fn finish(triple: (Incident, String, String)) -> Result<Incident> {
    let (mut incident, audit_raw, details_raw) = triple;
    incident.audit_trail = serde_json::from_str(&audit_raw)?;
    incident.details = serde_json::from_str(&details_raw)?;
    Ok(incident)
}

const INCIDENT_COLUMNS: &str = "id, anomaly_type, target_id, severity, state, runbook_id, \
     detected_at, state_changed_at, resolved_at, escalation_tier, dismiss_until, audit_trail, \
     details";

impl Store {
    /// The open (non-terminal) incident for an anomaly key, if any.
    /// The uniqueness invariant means there is at most one.
    pub fn find_open_incident(
        &self,
        anomaly_type: AnomalyType,
        target_id: &str,
    ) -> Result<Option<Incident>> {
        let triple = self
            .conn()
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM incidents
                    WHERE anomaly_type = ?1 AND target_id = ?2
                      AND state NOT IN ('resolved', 'escalated', 'self_resolved', 'dismissed')
                    "#,
                    INCIDENT_COLUMNS
                ),
                params![anomaly_type.as_str(), target_id],
                incident_from_row,
            )
            .optional()?;
        triple.map(finish).transpose()
    }

    /// Latest terminal incident for an anomaly key, used to honor
    /// dismiss_until windows across re-detections.
    pub fn last_terminal_incident(
        &self,
        anomaly_type: AnomalyType,
        target_id: &str,
    ) -> Result<Option<Incident>> {
        let triple = self
            .conn()
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM incidents
                    WHERE anomaly_type = ?1 AND target_id = ?2
                      AND state IN ('resolved', 'escalated', 'self_resolved', 'dismissed')
                    ORDER BY state_changed_at DESC
                    LIMIT 1
                    "#,
                    INCIDENT_COLUMNS
                ),
                params![anomaly_type.as_str(), target_id],
                incident_from_row,
            )
            .optional()?;
        triple.map(finish).transpose()
    }

    /// Open a fresh incident in `detected` state for an anomaly.
    pub fn insert_incident(&self, anomaly: &Anomaly) -> Result<Incident> {
        let now = Utc::now();
        let incident = Incident {
            id: Uuid::new_v4().to_string(),
            anomaly_type: anomaly.anomaly_type,
            target_id: anomaly.target_id.clone(),
            severity: anomaly.severity,
            state: IncidentState::Detected,
            runbook_id: None,
            detected_at: now,
            state_changed_at: now,
            resolved_at: None,
            escalation_tier: 0,
            dismiss_until: None,
            audit_trail: vec![IncidentAuditEntry {
                from: None,
                to: IncidentState::Detected,
                at: now,
                note: None,
            }],
            details: anomaly.details.clone(),
        };
        self.conn().execute(
            &format!(
                r#"
                INSERT INTO incidents ({})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
                INCIDENT_COLUMNS
            ),
            params![
                &incident.id,
                incident.anomaly_type.as_str(),
                &incident.target_id,
                incident.severity.as_str(),
                incident.state.as_str(),
                &incident.runbook_id,
                incident.detected_at,
                incident.state_changed_at,
                incident.resolved_at,
                incident.escalation_tier as i64,
                incident.dismiss_until,
                to_json(&incident.audit_trail)?,
                serde_json::to_string(&incident.details)?,
            ],
        )?;
        Ok(incident)
    }

    /// Transition an incident, appending to its audit trail in the same
    /// logical operation.
    pub fn transition_incident(
        &self,
        id: &str,
        to: IncidentState,
        note: Option<String>,
    ) -> Result<Incident> {
        let incident = self.get_incident(id)?;
        let now = Utc::now();
        let mut audit = incident.audit_trail.clone();
        audit.push(IncidentAuditEntry {
            from: Some(incident.state),
            to,
            at: now,
            note,
        });
        let resolved_at = if to.is_terminal() { Some(now) } else { incident.resolved_at };

        self.conn().execute(
            r#"
            UPDATE incidents
            SET state = ?1, state_changed_at = ?2, resolved_at = ?3, audit_trail = ?4
            WHERE id = ?5
            "#,
            params![to.as_str(), now, resolved_at, to_json(&audit)?, id],
        )?;
        self.get_incident(id)
    }

    /// Re-detection refresh: bump detected_at and audit without duplicating.
    pub fn refresh_incident(&self, id: &str, details: &serde_json::Value) -> Result<Incident> {
        let incident = self.get_incident(id)?;
        let now = Utc::now();
        let mut audit = incident.audit_trail.clone();
        audit.push(IncidentAuditEntry {
            from: Some(incident.state),
            to: incident.state,
            at: now,
            note: Some("re-detected".to_string()),
        });
        self.conn().execute(
            "UPDATE incidents SET detected_at = ?1, audit_trail = ?2, details = ?3 WHERE id = ?4",
            params![now, to_json(&audit)?, serde_json::to_string(details)?, id],
        )?;
        self.get_incident(id)
    }

    pub fn set_incident_runbook(&self, id: &str, runbook_id: &str) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE incidents SET runbook_id = ?1 WHERE id = ?2",
            params![runbook_id, id],
        )?;
        if updated == 0 {
            return not_found("incident", id);
        }
        Ok(())
    }

    pub fn set_incident_escalation(&self, id: &str, tier: u8) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE incidents SET escalation_tier = ?1 WHERE id = ?2",
            params![tier as i64, id],
        )?;
        if updated == 0 {
            return not_found("incident", id);
        }
        Ok(())
    }

    pub fn dismiss_incident(&self, id: &str, until: DateTime<Utc>) -> Result<Incident> {
        self.conn().execute(
            "UPDATE incidents SET dismiss_until = ?1 WHERE id = ?2",
            params![until, id],
        )?;
        self.transition_incident(id, IncidentState::Dismissed, Some("dismissed".to_string()))
    }

    pub fn get_incident(&self, id: &str) -> Result<Incident> {
        let triple = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM incidents WHERE id = ?1", INCIDENT_COLUMNS),
                [id],
                incident_from_row,
            )
            .optional()?;
        match triple {
            Some(triple) => finish(triple),
            None => not_found("incident", id),
        }
    }

    pub fn list_open_incidents(&self) -> Result<Vec<Incident>> {
        let mut stmt = self.conn().prepare(&format!(
            r#"
            SELECT {} FROM incidents
            WHERE state NOT IN ('resolved', 'escalated', 'self_resolved', 'dismissed')
            ORDER BY detected_at DESC
            "#,
            INCIDENT_COLUMNS
        ))?;
        let triples = stmt
            .query_map([], incident_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        triples.into_iter().map(finish).collect()
    }

    pub fn get_runbook_state(&self, id: &str) -> Result<Option<RunbookState>> {
        let state = self
            .conn()
            .query_row(
                "SELECT id, mode, confidence, dry_run_count FROM runbook_state WHERE id = ?1",
                [id],
                |row| {
                    let mode_raw: String = row.get(1)?;
                    Ok(RunbookState {
                        id: row.get(0)?,
                        mode: RunbookMode::parse(&mode_raw).unwrap_or(RunbookMode::DryRun),
                        confidence: row.get(2)?,
                        dry_run_count: row.get::<_, i64>(3)? as u32,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    pub fn upsert_runbook_state(&self, state: &RunbookState) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO runbook_state (id, mode, confidence, dry_run_count)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                mode = ?2, confidence = ?3, dry_run_count = ?4
            "#,
            params![
                &state.id,
                state.mode.as_str(),
                state.confidence,
                state.dry_run_count as i64,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn anomaly() -> Anomaly {
        Anomaly {
            anomaly_type: AnomalyType::DiskPressure,
            target_id: "/".to_string(),
            severity: Severity::High,
            details: json!({"usage_pct": 0.87}),
        }
    }

    #[test]
    fn test_open_incident_uniqueness_lookup() {
        let store = Store::open_in_memory().unwrap();
        assert!(store
            .find_open_incident(AnomalyType::DiskPressure, "/")
            .unwrap()
            .is_none());

        let incident = store.insert_incident(&anomaly()).unwrap();
        let found = store
            .find_open_incident(AnomalyType::DiskPressure, "/")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, incident.id);

        // Terminal incidents no longer match the open lookup
        store
            .transition_incident(&incident.id, IncidentState::Resolved, None)
            .unwrap();
        assert!(store
            .find_open_incident(AnomalyType::DiskPressure, "/")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_transition_appends_audit() {
        let store = Store::open_in_memory().unwrap();
        let incident = store.insert_incident(&anomaly()).unwrap();

        let after = store
            .transition_incident(&incident.id, IncidentState::Diagnosing, None)
            .unwrap();
        let after = store
            .transition_incident(&after.id, IncidentState::Remediating, Some("rb-rotate-logs".to_string()))
            .unwrap();

        assert_eq!(after.state, IncidentState::Remediating);
        assert_eq!(after.audit_trail.len(), 3);
        assert_eq!(after.audit_trail[0].to, IncidentState::Detected);
        assert_eq!(after.audit_trail[1].to, IncidentState::Diagnosing);
        assert_eq!(after.audit_trail[2].from, Some(IncidentState::Diagnosing));
        assert!(after.resolved_at.is_none());
    }

    #[test]
    fn test_refresh_does_not_duplicate() {
        let store = Store::open_in_memory().unwrap();
        let incident = store.insert_incident(&anomaly()).unwrap();
        store
            .refresh_incident(&incident.id, &json!({"usage_pct": 0.89}))
            .unwrap();

        let open = store.list_open_incidents().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].audit_trail.len(), 2);
        assert_eq!(open[0].details["usage_pct"], 0.89);
    }

    #[test]
    fn test_dismiss_sets_window() {
        let store = Store::open_in_memory().unwrap();
        let incident = store.insert_incident(&anomaly()).unwrap();
        let until = Utc::now() + chrono::Duration::hours(4);
        let dismissed = store.dismiss_incident(&incident.id, until).unwrap();

        assert_eq!(dismissed.state, IncidentState::Dismissed);
        assert!(dismissed.dismiss_until.is_some());

        let last = store
            .last_terminal_incident(AnomalyType::DiskPressure, "/")
            .unwrap()
            .unwrap();
        assert_eq!(last.id, incident.id);
    }

    #[test]
    fn test_runbook_state_round_trip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_runbook_state("rb-rotate-logs").unwrap().is_none());

        store
            .upsert_runbook_state(&RunbookState {
                id: "rb-rotate-logs".to_string(),
                mode: RunbookMode::AutoExecute,
                confidence: 0.9,
                dry_run_count: 3,
            })
            .unwrap();
        let state = store.get_runbook_state("rb-rotate-logs").unwrap().unwrap();
        assert_eq!(state.mode, RunbookMode::AutoExecute);
        assert_eq!(state.dry_run_count, 3);
    }
}
