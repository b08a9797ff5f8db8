mod classifier;
mod escalation;
mod executor;
mod probes;
mod runbooks;

pub use classifier::classify_reading;
pub use escalation::{EscalationRouter, SignalCliSender, SignalSender, tier_for_severity};
pub use executor::{StepRunner, SubprocessRunner};
pub use probes::{BrainDbProbe, DiskProbe, GatewayProbe, LogBloatProbe, MemoryProbe, ProcessProbe};
pub use runbooks::{CommandTemplate, RunbookDef, RunbookRegistry, RunbookStep, UserUnit};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use cortex_store::Store;
use cortex_types::{Anomaly, AnomalyType, Incident, IncidentState, Reading, RunbookMode};

use crate::config::SelfHealingConfig;
use crate::polling::{DataSourceAdapter, PollingEngine};
use crate::telemetry::Telemetry;
use crate::Result;

/// The anomaly -> incident -> runbook -> verification -> escalation loop.
///
/// Readings arrive from the polling fan-out; everything downstream runs on
/// the delivering thread. Incident state transitions are total-ordered per
/// anomaly key by the store's last-writer semantics.
pub struct SelfHealingEngine {
    store: Arc<Mutex<Store>>,
    config: SelfHealingConfig,
    telemetry: Arc<Telemetry>,
    registry: RunbookRegistry,
    runner: Arc<dyn StepRunner>,
    router: EscalationRouter,
    adapters: Mutex<HashMap<String, Arc<dyn DataSourceAdapter>>>,
}

/// Source that can confirm or clear each anomaly type on re-probe
fn source_for(anomaly_type: AnomalyType) -> &'static str {
    match anomaly_type {
        AnomalyType::DiskPressure | AnomalyType::DiskCritical => "heal.disk",
        AnomalyType::MemoryPressure | AnomalyType::MemoryCritical => "heal.memory",
        AnomalyType::ProcessDead | AnomalyType::ProcessZombie => "heal.process",
        AnomalyType::GatewayUnresponsive => "heal.gateway",
        AnomalyType::DbCorruption => "heal.braindb",
        AnomalyType::LogBloat => "heal.logbloat",
        AnomalyType::SignalStale => "predict.signal",
        AnomalyType::PhantomPosition => "predict.positions",
        AnomalyType::PipelineStuck => "predict.pipeline",
        AnomalyType::FleetUnreachable => "fleet.heartbeat",
    }
}

impl SelfHealingEngine {
    pub fn new(
        store: Arc<Mutex<Store>>,
        config: SelfHealingConfig,
        telemetry: Arc<Telemetry>,
        registry: RunbookRegistry,
        runner: Arc<dyn StepRunner>,
        router: EscalationRouter,
    ) -> Self {
        Self {
            store,
            config,
            telemetry,
            registry,
            runner,
            router,
            adapters: Mutex::new(HashMap::new()),
        }
    }

    /// Register an adapter for re-probing. The same adapter is usually
    /// also registered with the polling engine.
    pub fn register_probe(&self, adapter: Arc<dyn DataSourceAdapter>) {
        self.adapters
            .lock()
            .expect("adapter map poisoned")
            .insert(adapter.source_id().to_string(), adapter);
    }

    /// Subscribe this engine to a polling engine's reading stream.
    pub fn attach(self: &Arc<Self>, polling: &PollingEngine) {
        let engine = Arc::clone(self);
        polling.on_reading(move |reading| engine.handle_reading(reading));
    }

    pub fn registry(&self) -> &RunbookRegistry {
        &self.registry
    }

    pub fn handle_reading(&self, reading: &Reading) {
        if !self.config.enabled {
            return;
        }
        for anomaly in classify_reading(reading) {
            if let Err(err) = self.handle_anomaly(&anomaly) {
                tracing::error!(
                    anomaly_type = anomaly.anomaly_type.as_str(),
                    error = %err,
                    "anomaly handling failed"
                );
            }
        }
    }

    fn store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().expect("store mutex poisoned")
    }

    pub fn handle_anomaly(&self, anomaly: &Anomaly) -> Result<()> {
        // Re-detection refreshes the open incident; it never duplicates.
        if let Some(open) = self
            .store()
            .find_open_incident(anomaly.anomaly_type, &anomaly.target_id)?
        {
            self.store().refresh_incident(&open.id, &anomaly.details)?;
            return Ok(());
        }

        // Dismissed anomalies stay quiet until the window lapses
        if let Some(last) = self
            .store()
            .last_terminal_incident(anomaly.anomaly_type, &anomaly.target_id)?
            && last.state == IncidentState::Dismissed
            && last.dismiss_until.is_some_and(|until| until > Utc::now())
        {
            return Ok(());
        }

        let incident = self.store().insert_incident(anomaly)?;
        self.telemetry.healing_event(
            "detected",
            anomaly.anomaly_type.as_str(),
            &anomaly.target_id,
            anomaly.severity.as_str(),
        );

        match self.registry.for_anomaly(anomaly.anomaly_type) {
            Some(def) => {
                let def = def.clone();
                self.run_runbook(&incident, &def, anomaly)
            }
            None => {
                let tier = tier_for_severity(anomaly.severity);
                let escalated = self.store().transition_incident(
                    &incident.id,
                    IncidentState::Escalated,
                    Some("no runbook applies".to_string()),
                )?;
                self.store().set_incident_escalation(&incident.id, tier)?;
                self.router.escalate(&escalated, tier);
                self.telemetry.healing_event(
                    "escalated",
                    anomaly.anomaly_type.as_str(),
                    &anomaly.target_id,
                    &format!("tier{}", tier),
                );
                Ok(())
            }
        }
    }

    fn run_runbook(&self, incident: &Incident, def: &RunbookDef, anomaly: &Anomaly) -> Result<()> {
        self.store().set_incident_runbook(&incident.id, def.id)?;

        // Pre-verify: the anomaly may have cleared since detection
        if self.probe_clear(anomaly.anomaly_type, &anomaly.target_id) == Some(true) {
            self.store().transition_incident(
                &incident.id,
                IncidentState::SelfResolved,
                Some("cleared before remediation".to_string()),
            )?;
            self.telemetry.healing_event(
                "self_resolved",
                anomaly.anomaly_type.as_str(),
                &anomaly.target_id,
                "none",
            );
            return Ok(());
        }

        self.store()
            .transition_incident(&incident.id, IncidentState::Diagnosing, None)?;
        let mode = self.registry.mode_of(def.id);
        self.store().transition_incident(
            &incident.id,
            IncidentState::Remediating,
            Some(format!("{} ({})", def.id, mode.as_str())),
        )?;

        for step in &def.steps {
            match mode {
                RunbookMode::DryRun => {
                    self.telemetry.healing_event(
                        "dry_run_step",
                        anomaly.anomaly_type.as_str(),
                        &anomaly.target_id,
                        &format!("{}: {}", step.name, step.template.describe()),
                    );
                }
                RunbookMode::AutoExecute => {
                    if let Err(err) = self.runner.run(&step.template.argv(), step.timeout_ms) {
                        tracing::warn!(step = step.name, error = %err, "runbook step failed");
                        return self.fail_remediation(incident, anomaly, def, &err);
                    }
                }
            }
        }

        self.store()
            .transition_incident(&incident.id, IncidentState::Verifying, None)?;
        let clear = self.await_clear(anomaly);
        if clear {
            self.store().transition_incident(
                &incident.id,
                IncidentState::Resolved,
                Some(format!("{} clear readings", self.config.min_clear_readings)),
            )?;
            if mode == RunbookMode::DryRun && self.registry.record_dry_run_verified(def.id)? {
                self.telemetry.healing_event(
                    "graduated",
                    anomaly.anomaly_type.as_str(),
                    &anomaly.target_id,
                    def.id,
                );
            }
            let resolved = self.store().get_incident(&incident.id)?;
            self.router.escalate(&resolved, 1);
            self.telemetry.healing_event(
                "resolved",
                anomaly.anomaly_type.as_str(),
                &anomaly.target_id,
                def.id,
            );
            Ok(())
        } else {
            self.fail_remediation(incident, anomaly, def, "verification did not clear")
        }
    }

    fn fail_remediation(
        &self,
        incident: &Incident,
        anomaly: &Anomaly,
        def: &RunbookDef,
        detail: &str,
    ) -> Result<()> {
        self.store().transition_incident(
            &incident.id,
            IncidentState::RemediationFailed,
            Some(detail.to_string()),
        )?;
        if self.registry.mode_of(def.id) == RunbookMode::AutoExecute {
            self.registry.demote(def.id)?;
        }
        let tier = tier_for_severity(anomaly.severity);
        let escalated = self.store().transition_incident(
            &incident.id,
            IncidentState::Escalated,
            Some(format!("tier {}", tier)),
        )?;
        self.store().set_incident_escalation(&incident.id, tier)?;
        self.router.escalate(&escalated, tier);
        self.telemetry.healing_event(
            "remediation_failed",
            anomaly.anomaly_type.as_str(),
            &anomaly.target_id,
            detail,
        );
        Ok(())
    }

    /// Wait out the verification interval and require the configured number
    /// of consecutive clear probes.
    fn await_clear(&self, anomaly: &Anomaly) -> bool {
        for _ in 0..self.config.min_clear_readings {
            std::thread::sleep(Duration::from_millis(self.config.verification_interval_ms));
            match self.probe_clear(anomaly.anomaly_type, &anomaly.target_id) {
                Some(true) => {}
                _ => return false,
            }
        }
        true
    }

    /// Re-probe the source responsible for an anomaly. Some(true) means the
    /// anomaly is gone; None means no adapter can answer.
    fn probe_clear(&self, anomaly_type: AnomalyType, target_id: &str) -> Option<bool> {
        let adapter = self
            .adapters
            .lock()
            .expect("adapter map poisoned")
            .get(source_for(anomaly_type))
            .cloned()?;
        let reading = adapter.poll();
        let still_present = classify_reading(&reading)
            .iter()
            .any(|a| a.anomaly_type == anomaly_type && a.target_id == target_id);
        Some(!still_present)
    }

    /// Dismiss an open incident, suppressing re-detection for the
    /// configured window.
    pub fn dismiss(&self, incident_id: &str) -> Result<Incident> {
        let until = Utc::now()
            + chrono::Duration::milliseconds(self.config.incident_dismiss_window_ms as i64);
        let incident = self.store().dismiss_incident(incident_id, until)?;
        self.telemetry.healing_event(
            "dismissed",
            incident.anomaly_type.as_str(),
            &incident.target_id,
            "operator",
        );
        Ok(incident)
    }

    pub fn open_incidents(&self) -> Result<Vec<Incident>> {
        Ok(self.store().list_open_incidents()?)
    }

    /// Render a runbook's steps without executing anything
    pub fn dry_run_runbook(&self, id: &str) -> Option<Vec<String>> {
        self.registry.get(id).map(|def| {
            def.steps
                .iter()
                .map(|step| format!("{}: {}", step.name, step.template.describe()))
                .collect()
        })
    }

    /// Execute a runbook's steps directly (operator-confirmed path).
    /// Returns per-step results; the first failure stops the run.
    pub fn execute_runbook(&self, id: &str) -> Result<Vec<String>> {
        let def = self
            .registry
            .get(id)
            .ok_or_else(|| crate::Error::InvalidOperation(format!("unknown runbook '{}'", id)))?
            .clone();
        let mut results = Vec::new();
        for step in &def.steps {
            match self.runner.run(&step.template.argv(), step.timeout_ms) {
                Ok(()) => results.push(format!("{}: ok", step.name)),
                Err(err) => {
                    results.push(format!("{}: failed ({})", step.name, err));
                    return Err(crate::Error::InvalidOperation(format!(
                        "runbook '{}' step '{}' failed: {}",
                        id, step.name, err
                    )));
                }
            }
        }
        Ok(results)
    }
}
