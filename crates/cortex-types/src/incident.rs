use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of anomaly types the self-healing engine recognizes.
///
/// These names double as reason codes in the JSONL event stream, so the
/// set is finite and never extended at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    ProcessDead,
    ProcessZombie,
    SignalStale,
    PhantomPosition,
    PipelineStuck,
    FleetUnreachable,
    DiskPressure,
    DiskCritical,
    MemoryPressure,
    MemoryCritical,
    DbCorruption,
    LogBloat,
    GatewayUnresponsive,
}

impl AnomalyType {
    pub const ALL: [AnomalyType; 13] = [
        AnomalyType::ProcessDead,
        AnomalyType::ProcessZombie,
        AnomalyType::SignalStale,
        AnomalyType::PhantomPosition,
        AnomalyType::PipelineStuck,
        AnomalyType::FleetUnreachable,
        AnomalyType::DiskPressure,
        AnomalyType::DiskCritical,
        AnomalyType::MemoryPressure,
        AnomalyType::MemoryCritical,
        AnomalyType::DbCorruption,
        AnomalyType::LogBloat,
        AnomalyType::GatewayUnresponsive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::ProcessDead => "process_dead",
            AnomalyType::ProcessZombie => "process_zombie",
            AnomalyType::SignalStale => "signal_stale",
            AnomalyType::PhantomPosition => "phantom_position",
            AnomalyType::PipelineStuck => "pipeline_stuck",
            AnomalyType::FleetUnreachable => "fleet_unreachable",
            AnomalyType::DiskPressure => "disk_pressure",
            AnomalyType::DiskCritical => "disk_critical",
            AnomalyType::MemoryPressure => "memory_pressure",
            AnomalyType::MemoryCritical => "memory_critical",
            AnomalyType::DbCorruption => "db_corruption",
            AnomalyType::LogBloat => "log_bloat",
            AnomalyType::GatewayUnresponsive => "gateway_unresponsive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// Incident state machine.
///
/// detected -> diagnosing -> remediating -> verifying -> resolved
/// with branches to self_resolved, dismissed, and
/// remediation_failed -> escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    Detected,
    Diagnosing,
    Remediating,
    Verifying,
    Resolved,
    Escalated,
    SelfResolved,
    RemediationFailed,
    Dismissed,
}

impl IncidentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentState::Detected => "detected",
            IncidentState::Diagnosing => "diagnosing",
            IncidentState::Remediating => "remediating",
            IncidentState::Verifying => "verifying",
            IncidentState::Resolved => "resolved",
            IncidentState::Escalated => "escalated",
            IncidentState::SelfResolved => "self_resolved",
            IncidentState::RemediationFailed => "remediation_failed",
            IncidentState::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "detected" => Some(IncidentState::Detected),
            "diagnosing" => Some(IncidentState::Diagnosing),
            "remediating" => Some(IncidentState::Remediating),
            "verifying" => Some(IncidentState::Verifying),
            "resolved" => Some(IncidentState::Resolved),
            "escalated" => Some(IncidentState::Escalated),
            "self_resolved" => Some(IncidentState::SelfResolved),
            "remediation_failed" => Some(IncidentState::RemediationFailed),
            "dismissed" => Some(IncidentState::Dismissed),
            _ => None,
        }
    }

    /// Terminal states close the incident; a new detection of the same
    /// anomaly opens a fresh one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IncidentState::Resolved
                | IncidentState::Escalated
                | IncidentState::SelfResolved
                | IncidentState::Dismissed
        )
    }
}

/// One append-only audit trail entry for an incident transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentAuditEntry {
    pub from: Option<IncidentState>,
    pub to: IncidentState,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// A uniquely-keyed record of a detected anomaly. At most one non-terminal
/// incident exists per (anomaly_type, target_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub anomaly_type: AnomalyType,
    pub target_id: String,
    pub severity: Severity,
    pub state: IncidentState,
    pub runbook_id: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub escalation_tier: u8,
    pub dismiss_until: Option<DateTime<Utc>>,
    pub audit_trail: Vec<IncidentAuditEntry>,
    pub details: serde_json::Value,
}

/// A classified anomaly, not yet tied to an incident
#[derive(Debug, Clone)]
pub struct Anomaly {
    pub anomaly_type: AnomalyType,
    pub target_id: String,
    pub severity: Severity,
    pub details: serde_json::Value,
}

/// Runbook execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunbookMode {
    DryRun,
    AutoExecute,
}

impl RunbookMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunbookMode::DryRun => "dry_run",
            RunbookMode::AutoExecute => "auto_execute",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dry_run" => Some(RunbookMode::DryRun),
            "auto_execute" => Some(RunbookMode::AutoExecute),
            _ => None,
        }
    }
}

/// Persisted runtime state for a runbook (the step definitions themselves
/// are static; only mode, confidence, and graduation progress persist).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookState {
    pub id: String,
    pub mode: RunbookMode,
    pub confidence: f64,
    pub dry_run_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anomaly_names_closed_set() {
        assert_eq!(AnomalyType::ALL.len(), 13);
        for a in AnomalyType::ALL {
            assert_eq!(AnomalyType::parse(a.as_str()), Some(a));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(IncidentState::Resolved.is_terminal());
        assert!(IncidentState::Dismissed.is_terminal());
        assert!(IncidentState::SelfResolved.is_terminal());
        assert!(IncidentState::Escalated.is_terminal());
        assert!(!IncidentState::Detected.is_terminal());
        assert!(!IncidentState::RemediationFailed.is_terminal());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
