use std::sync::{Arc, Mutex};

use cortex_store::{MetricKind, NewMessage, Store};
use cortex_types::{Incident, MessagePriority, Severity};

use crate::telemetry::Telemetry;

/// Outbound side channel for tier-3 escalations (Signal or similar).
/// Failures are reported as strings; they never panic.
pub trait SignalSender: Send + Sync {
    fn send(&self, channel: &str, text: &str) -> std::result::Result<(), String>;
}

/// Default side channel: shells out to signal-cli when configured.
pub struct SignalCliSender;

impl SignalSender for SignalCliSender {
    fn send(&self, channel: &str, text: &str) -> std::result::Result<(), String> {
        let status = std::process::Command::new("signal-cli")
            .arg("send")
            .arg("-g")
            .arg(channel)
            .arg("-m")
            .arg(text)
            .status()
            .map_err(|e| e.to_string())?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("signal-cli exited with {}", status))
        }
    }
}

/// Escalation tier derived from anomaly severity
pub fn tier_for_severity(severity: Severity) -> u8 {
    match severity {
        Severity::Low => 0,
        Severity::Medium => 1,
        Severity::High => 2,
        Severity::Critical => 3,
    }
}

const HEAL_AGENT: &str = "cortex-heal";

/// Routes incidents to escalation channels by tier:
/// 0 silent metric, 1 info message, 2 approval request, 3 urgent broadcast
/// plus the Signal side channel. Tier-3 channels are independent: a
/// failure on one never suppresses the other.
pub struct EscalationRouter {
    store: Arc<Mutex<Store>>,
    telemetry: Arc<Telemetry>,
    signal: Option<Arc<dyn SignalSender>>,
    signal_channel: Option<String>,
}

impl EscalationRouter {
    pub fn new(
        store: Arc<Mutex<Store>>,
        telemetry: Arc<Telemetry>,
        signal: Option<Arc<dyn SignalSender>>,
        signal_channel: Option<String>,
    ) -> Self {
        Self {
            store,
            telemetry,
            signal,
            signal_channel,
        }
    }

    pub fn escalate(&self, incident: &Incident, tier: u8) {
        let summary = format!(
            "[{}] {} on '{}' ({})",
            incident.severity.as_str(),
            incident.anomaly_type.as_str(),
            incident.target_id,
            incident.state.as_str(),
        );
        self.telemetry.metric(
            MetricKind::Pipeline,
            "escalation",
            tier as f64,
            Some(incident.anomaly_type.as_str()),
        );

        match tier {
            0 => {}
            1 => {
                self.send_message(incident, &summary, MessagePriority::Info, "operator");
            }
            2 => {
                let body = format!("{}\nApproval needed to remediate.", summary);
                self.send_message(incident, &body, MessagePriority::Action, "operator");
            }
            _ => {
                // Both channels attempted independently; errors logged per
                // channel, never masking the other.
                self.send_message(incident, &summary, MessagePriority::Urgent, "all");
                if let (Some(signal), Some(channel)) = (&self.signal, &self.signal_channel) {
                    if let Err(err) = signal.send(channel, &summary) {
                        tracing::error!(error = %err, "tier-3 signal delivery failed");
                        self.telemetry.healing_event(
                            "escalation_channel_failed",
                            incident.anomaly_type.as_str(),
                            &incident.target_id,
                            "signal",
                        );
                    }
                }
            }
        }
    }

    fn send_message(&self, incident: &Incident, body: &str, priority: MessagePriority, to: &str) {
        let result = self
            .store
            .lock()
            .map_err(|_| cortex_store::Error::Unavailable("store lock poisoned".to_string()))
            .and_then(|store| {
                store.send_message(NewMessage {
                    from_agent: HEAL_AGENT.to_string(),
                    to_agent: to.to_string(),
                    subject: format!("incident: {}", incident.anomaly_type.as_str()),
                    body: body.to_string(),
                    priority,
                    thread_id: Some(incident.id.clone()),
                })
            });
        if let Err(err) = result {
            tracing::error!(error = %err, "escalation message delivery failed");
            self.telemetry.healing_event(
                "escalation_channel_failed",
                incident.anomaly_type.as_str(),
                &incident.target_id,
                "messaging",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cortex_types::{AnomalyType, IncidentState};

    struct RecordingSignal {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    impl SignalSender for RecordingSignal {
        fn send(&self, _channel: &str, text: &str) -> std::result::Result<(), String> {
            if self.fail {
                return Err("unreachable".to_string());
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn incident(severity: Severity) -> Incident {
        Incident {
            id: "inc-1".to_string(),
            anomaly_type: AnomalyType::DiskPressure,
            target_id: "/".to_string(),
            severity,
            state: IncidentState::Escalated,
            runbook_id: None,
            detected_at: Utc::now(),
            state_changed_at: Utc::now(),
            resolved_at: None,
            escalation_tier: 0,
            dismiss_until: None,
            audit_trail: Vec::new(),
            details: serde_json::json!({}),
        }
    }

    fn router(
        signal: Option<Arc<dyn SignalSender>>,
    ) -> (EscalationRouter, Arc<Mutex<Store>>, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let telemetry = Arc::new(Telemetry::new(store.clone(), dir.path()));
        (
            EscalationRouter::new(
                store.clone(),
                telemetry,
                signal,
                Some("ops-channel".to_string()),
            ),
            store,
            dir,
        )
    }

    #[test]
    fn test_tier_mapping() {
        assert_eq!(tier_for_severity(Severity::Low), 0);
        assert_eq!(tier_for_severity(Severity::Medium), 1);
        assert_eq!(tier_for_severity(Severity::High), 2);
        assert_eq!(tier_for_severity(Severity::Critical), 3);
    }

    #[test]
    fn test_tier1_sends_info_message() {
        let (router, store, _dir) = router(None);
        router.escalate(&incident(Severity::Medium), 1);
        let inbox = store.lock().unwrap().inbox("operator", true).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].priority, MessagePriority::Info);
    }

    #[test]
    fn test_tier3_broadcasts_and_signals() {
        let signal = Arc::new(RecordingSignal {
            sent: Mutex::new(Vec::new()),
            fail: false,
        });
        let (router, store, _dir) = router(Some(signal.clone()));
        router.escalate(&incident(Severity::Critical), 3);

        let inbox = store.lock().unwrap().inbox("anyone", true).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].priority, MessagePriority::Urgent);
        assert_eq!(signal.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_tier3_signal_failure_does_not_mask_broadcast() {
        let signal = Arc::new(RecordingSignal {
            sent: Mutex::new(Vec::new()),
            fail: true,
        });
        let (router, store, _dir) = router(Some(signal));
        router.escalate(&incident(Severity::Critical), 3);

        // Broadcast still delivered despite the signal failure
        let inbox = store.lock().unwrap().inbox("anyone", true).unwrap();
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn test_tier0_is_metric_only() {
        let (router, store, _dir) = router(None);
        router.escalate(&incident(Severity::Low), 0);
        assert!(store.lock().unwrap().inbox("operator", true).unwrap().is_empty());
        assert_eq!(
            store.lock().unwrap().count_metrics(MetricKind::Pipeline).unwrap(),
            1
        );
    }
}
