use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use cortex_store::Store;
use cortex_types::{AnomalyType, RunbookMode, RunbookState};

use crate::Result;

// NOTE: Command Safety Rationale
//
// Runbook steps carry a CommandTemplate, a closed enum whose argv is fully
// determined at registry construction. Anomaly details never flow into
// command strings: there is no API that would accept them. Parameters that
// vary (unit names, db path) come from closed enums or config at startup.

/// Closed set of user units a runbook may restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserUnit {
    AugurExecutor,
    Gateway,
    Pipeline,
}

impl UserUnit {
    pub fn unit_name(&self) -> &'static str {
        match self {
            UserUnit::AugurExecutor => "augur-executor.service",
            UserUnit::Gateway => "gateway.service",
            UserUnit::Pipeline => "pipeline.service",
        }
    }

    /// Units keyed by the process names the probes watch
    pub fn for_target(target_id: &str) -> Option<Self> {
        match target_id {
            "augur-executor" => Some(UserUnit::AugurExecutor),
            "gateway" => Some(UserUnit::Gateway),
            "pipeline" => Some(UserUnit::Pipeline),
            _ => None,
        }
    }
}

/// Statically-defined command templates. `argv` takes no anomaly input.
#[derive(Debug, Clone)]
pub enum CommandTemplate {
    JournalVacuum,
    TmpSweep,
    SyncDisks,
    RestartUserUnit(UserUnit),
    BrainDbCheck(PathBuf),
}

impl CommandTemplate {
    pub fn argv(&self) -> Vec<String> {
        match self {
            CommandTemplate::JournalVacuum => ["journalctl", "--user", "--vacuum-size=500M"]
                .map(String::from)
                .to_vec(),
            CommandTemplate::TmpSweep => [
                "find", "/tmp", "-maxdepth", "1", "-name", "cortex-*", "-mtime", "+2", "-delete",
            ]
            .map(String::from)
            .to_vec(),
            CommandTemplate::SyncDisks => vec!["sync".to_string()],
            CommandTemplate::RestartUserUnit(unit) => {
                ["systemctl", "--user", "restart", unit.unit_name()]
                    .map(String::from)
                    .to_vec()
            }
            CommandTemplate::BrainDbCheck(path) => vec![
                "sqlite3".to_string(),
                path.display().to_string(),
                "PRAGMA quick_check;".to_string(),
            ],
        }
    }

    pub fn describe(&self) -> String {
        self.argv().join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct RunbookStep {
    pub name: &'static str,
    pub template: CommandTemplate,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RunbookDef {
    pub id: &'static str,
    pub label: &'static str,
    pub applies_to: Vec<AnomalyType>,
    pub steps: Vec<RunbookStep>,
}

/// Built-in runbook definitions merged with persisted runtime state.
pub struct RunbookRegistry {
    defs: Vec<RunbookDef>,
    states: Mutex<HashMap<String, RunbookState>>,
    store: Arc<Mutex<Store>>,
    graduation_count: u32,
}

impl RunbookRegistry {
    pub fn builtin_defs(brain_db_path: PathBuf) -> Vec<RunbookDef> {
        vec![
            RunbookDef {
                id: "rb-rotate-logs",
                label: "Rotate and vacuum logs",
                applies_to: vec![AnomalyType::DiskPressure, AnomalyType::LogBloat],
                steps: vec![
                    RunbookStep {
                        name: "journal-vacuum",
                        template: CommandTemplate::JournalVacuum,
                        timeout_ms: 30_000,
                    },
                    RunbookStep {
                        name: "tmp-sweep",
                        template: CommandTemplate::TmpSweep,
                        timeout_ms: 30_000,
                    },
                ],
            },
            RunbookDef {
                id: "rb-gc-notify",
                label: "Sync and relieve memory pressure",
                applies_to: vec![AnomalyType::MemoryPressure],
                steps: vec![RunbookStep {
                    name: "sync-disks",
                    template: CommandTemplate::SyncDisks,
                    timeout_ms: 10_000,
                }],
            },
            RunbookDef {
                id: "rb-restart-executor",
                label: "Restart the executor unit",
                applies_to: vec![AnomalyType::ProcessDead, AnomalyType::ProcessZombie],
                steps: vec![RunbookStep {
                    name: "restart-unit",
                    template: CommandTemplate::RestartUserUnit(UserUnit::AugurExecutor),
                    timeout_ms: 60_000,
                }],
            },
            RunbookDef {
                id: "rb-restart-gateway",
                label: "Restart the gateway unit",
                applies_to: vec![AnomalyType::GatewayUnresponsive],
                steps: vec![RunbookStep {
                    name: "restart-unit",
                    template: CommandTemplate::RestartUserUnit(UserUnit::Gateway),
                    timeout_ms: 60_000,
                }],
            },
            RunbookDef {
                id: "rb-resync-pipeline",
                label: "Restart the pipeline unit",
                applies_to: vec![
                    AnomalyType::PipelineStuck,
                    AnomalyType::SignalStale,
                    AnomalyType::PhantomPosition,
                ],
                steps: vec![RunbookStep {
                    name: "restart-unit",
                    template: CommandTemplate::RestartUserUnit(UserUnit::Pipeline),
                    timeout_ms: 60_000,
                }],
            },
            RunbookDef {
                id: "rb-check-braindb",
                label: "Verify store integrity",
                applies_to: vec![AnomalyType::DbCorruption],
                steps: vec![RunbookStep {
                    name: "quick-check",
                    template: CommandTemplate::BrainDbCheck(brain_db_path),
                    timeout_ms: 30_000,
                }],
            },
        ]
    }

    /// Load built-ins, merge persisted state, and apply the whitelist for
    /// runbooks with no persisted state yet.
    pub fn load(
        store: Arc<Mutex<Store>>,
        brain_db_path: PathBuf,
        whitelist: &[String],
        graduation_count: u32,
    ) -> Result<Self> {
        let defs = Self::builtin_defs(brain_db_path);
        let mut states = HashMap::new();
        {
            let guard = store.lock().expect("store mutex poisoned");
            for def in &defs {
                let state = match guard.get_runbook_state(def.id)? {
                    Some(state) => state,
                    None => {
                        let mode = if whitelist.iter().any(|w| w == def.id) {
                            RunbookMode::AutoExecute
                        } else {
                            RunbookMode::DryRun
                        };
                        let state = RunbookState {
                            id: def.id.to_string(),
                            mode,
                            confidence: 0.5,
                            dry_run_count: 0,
                        };
                        guard.upsert_runbook_state(&state)?;
                        state
                    }
                };
                states.insert(def.id.to_string(), state);
            }
        }
        Ok(Self {
            defs,
            states: Mutex::new(states),
            store,
            graduation_count,
        })
    }

    pub fn for_anomaly(&self, anomaly_type: AnomalyType) -> Option<&RunbookDef> {
        self.defs.iter().find(|def| def.applies_to.contains(&anomaly_type))
    }

    pub fn get(&self, id: &str) -> Option<&RunbookDef> {
        self.defs.iter().find(|def| def.id == id)
    }

    pub fn list(&self) -> Vec<(RunbookDef, RunbookState)> {
        let states = self.states.lock().expect("runbook states poisoned");
        self.defs
            .iter()
            .filter_map(|def| states.get(def.id).map(|s| (def.clone(), s.clone())))
            .collect()
    }

    pub fn mode_of(&self, id: &str) -> RunbookMode {
        self.states
            .lock()
            .expect("runbook states poisoned")
            .get(id)
            .map(|s| s.mode)
            .unwrap_or(RunbookMode::DryRun)
    }

    /// A verified dry-run completes. Three in a row graduate the runbook
    /// to auto-execute. Returns true on graduation.
    pub fn record_dry_run_verified(&self, id: &str) -> Result<bool> {
        let mut states = self.states.lock().expect("runbook states poisoned");
        let Some(state) = states.get_mut(id) else {
            return Ok(false);
        };
        state.dry_run_count += 1;
        state.confidence = (state.confidence + 0.1).min(1.0);
        let graduated = state.mode == RunbookMode::DryRun
            && state.dry_run_count >= self.graduation_count;
        if graduated {
            state.mode = RunbookMode::AutoExecute;
        }
        self.store
            .lock()
            .expect("store mutex poisoned")
            .upsert_runbook_state(state)?;
        Ok(graduated)
    }

    /// Explicit operator approval also graduates
    pub fn approve(&self, id: &str) -> Result<bool> {
        let mut states = self.states.lock().expect("runbook states poisoned");
        let Some(state) = states.get_mut(id) else {
            return Ok(false);
        };
        state.mode = RunbookMode::AutoExecute;
        self.store
            .lock()
            .expect("store mutex poisoned")
            .upsert_runbook_state(state)?;
        Ok(true)
    }

    /// Demote a runbook back to dry-run (after a failed auto execution)
    pub fn demote(&self, id: &str) -> Result<()> {
        let mut states = self.states.lock().expect("runbook states poisoned");
        if let Some(state) = states.get_mut(id) {
            state.mode = RunbookMode::DryRun;
            state.dry_run_count = 0;
            state.confidence = (state.confidence - 0.2).max(0.0);
            self.store
                .lock()
                .expect("store mutex poisoned")
                .upsert_runbook_state(state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(whitelist: &[&str]) -> RunbookRegistry {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        RunbookRegistry::load(
            store,
            PathBuf::from("/tmp/brain.db"),
            &whitelist.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            3,
        )
        .unwrap()
    }

    #[test]
    fn test_whitelist_starts_auto() {
        let registry = registry(&["rb-rotate-logs", "rb-gc-notify"]);
        assert_eq!(registry.mode_of("rb-rotate-logs"), RunbookMode::AutoExecute);
        assert_eq!(registry.mode_of("rb-restart-executor"), RunbookMode::DryRun);
    }

    #[test]
    fn test_anomaly_lookup() {
        let registry = registry(&[]);
        assert_eq!(
            registry.for_anomaly(AnomalyType::DiskPressure).unwrap().id,
            "rb-rotate-logs"
        );
        assert_eq!(
            registry.for_anomaly(AnomalyType::SignalStale).unwrap().id,
            "rb-resync-pipeline"
        );
        assert!(registry.for_anomaly(AnomalyType::FleetUnreachable).is_none());
    }

    #[test]
    fn test_graduation_after_three_dry_runs() {
        let registry = registry(&[]);
        assert!(!registry.record_dry_run_verified("rb-restart-executor").unwrap());
        assert!(!registry.record_dry_run_verified("rb-restart-executor").unwrap());
        assert!(registry.record_dry_run_verified("rb-restart-executor").unwrap());
        assert_eq!(registry.mode_of("rb-restart-executor"), RunbookMode::AutoExecute);
    }

    #[test]
    fn test_approval_graduates_immediately() {
        let registry = registry(&[]);
        assert!(registry.approve("rb-restart-gateway").unwrap());
        assert_eq!(registry.mode_of("rb-restart-gateway"), RunbookMode::AutoExecute);
    }

    #[test]
    fn test_templates_are_static() {
        let registry = registry(&[]);
        for (def, _) in registry.list() {
            for step in &def.steps {
                let argv = step.template.argv();
                assert!(!argv.is_empty());
                // No shell involved anywhere
                assert!(!argv[0].contains("sh"));
            }
        }
    }

    #[test]
    fn test_demote_resets_progress() {
        let registry = registry(&["rb-rotate-logs"]);
        registry.demote("rb-rotate-logs").unwrap();
        assert_eq!(registry.mode_of("rb-rotate-logs"), RunbookMode::DryRun);
    }
}
