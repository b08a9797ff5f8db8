use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cortex_engine::{
    ActionContext, CategoryManager, CommandType, EnforcementConfig, KnowledgeBundle, SopEnhancer,
    SopMatch, Verdict, decide, extract_context, serialize_params,
};
use cortex_store::{MetricKind, Store};
use cortex_types::Memory;

use crate::config::PreActionConfig;
use crate::telemetry::Telemetry;
use crate::trust::params_hash;

/// Categories consulted for the memory half of the knowledge race
const LOOKUP_CATEGORIES: [&str; 5] = ["process", "technical", "security", "gotchas", "credentials"];
const LOOKUP_LIMIT: usize = 10;

/// Hook result for `before_tool_call`
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub block: bool,
    pub block_reason: Option<String>,
}

impl GateOutcome {
    fn pass() -> Self {
        Self {
            block: false,
            block_reason: None,
        }
    }

    fn blocked(reason: String) -> Self {
        Self {
            block: true,
            block_reason: Some(reason),
        }
    }
}

enum LookupResult {
    Sops(Vec<SopMatch>),
    Memories(Vec<Memory>),
}

/// The synchronous pre-action interceptor: classify, race the SOP and
/// memory lookups against the latency budget, and decide.
///
/// Internal failures fail open: a broken gate must never stall the agent.
pub struct PreActionGate {
    store: Arc<Mutex<Store>>,
    sop: Arc<SopEnhancer>,
    categories: Arc<Mutex<CategoryManager>>,
    telemetry: Arc<Telemetry>,
    config: PreActionConfig,
    enforcement: EnforcementConfig,
    cooldowns: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl PreActionGate {
    pub fn new(
        store: Arc<Mutex<Store>>,
        sop: Arc<SopEnhancer>,
        categories: Arc<Mutex<CategoryManager>>,
        telemetry: Arc<Telemetry>,
        config: PreActionConfig,
        enforcement: EnforcementConfig,
    ) -> Self {
        Self {
            store,
            sop,
            categories,
            telemetry,
            config,
            enforcement,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// `before_tool_call` contract. Never returns an error: internal
    /// problems are logged, counted, and the call passes through.
    pub fn before_tool_call(&self, tool_name: &str, params: &serde_json::Value) -> GateOutcome {
        match self.evaluate(tool_name, params) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(tool_name, error = %err, "pre-action gate failed open");
                self.telemetry
                    .metric(MetricKind::Cortex, "gate_internal_error", 1.0, Some(tool_name));
                GateOutcome::pass()
            }
        }
    }

    fn evaluate(
        &self,
        tool_name: &str,
        params: &serde_json::Value,
    ) -> crate::Result<GateOutcome> {
        if !self.config.enabled
            || !self.config.intercept_tools.iter().any(|t| t == tool_name)
        {
            return Ok(GateOutcome::pass());
        }

        let context = extract_context(tool_name, params);

        if tool_name == "exec" && context.command_type == CommandType::ReadOnly {
            self.telemetry.metric(
                MetricKind::Sop,
                "read_only_pass",
                1.0,
                params.get("command").and_then(|c| c.as_str()),
            );
            return Ok(GateOutcome::pass());
        }

        let params_str = serialize_params(params);
        let (sops, memories, timed_out) = self.race_lookups(&params_str, &context);
        if timed_out {
            self.telemetry
                .metric(MetricKind::Cortex, "lookup_timed_out", 1.0, Some(tool_name));
        }

        let mut knowledge = KnowledgeBundle { sops, memories };
        if knowledge.is_empty() {
            self.telemetry
                .metric(MetricKind::Cortex, "gate_no_sources", 1.0, Some(tool_name));
            return Ok(GateOutcome::pass());
        }
        rank_memories(&mut knowledge.memories, &context);

        let primary_category = self
            .categories
            .lock()
            .expect("category manager poisoned")
            .detect(&params_str)
            .into_iter()
            .next()
            .unwrap_or_else(|| "general".to_string());

        match decide(&context, &primary_category, &knowledge, &self.enforcement) {
            Verdict::Pass => Ok(GateOutcome::pass()),
            Verdict::Advisory => {
                self.telemetry
                    .metric(MetricKind::Cortex, "gate_advisory", 1.0, Some(&primary_category));
                Ok(GateOutcome::pass())
            }
            Verdict::Bypassed => {
                tracing::warn!(tool_name, "emergency bypass active, gate forced open");
                self.telemetry
                    .metric(MetricKind::Cortex, "gate_bypassed", 1.0, Some(tool_name));
                Ok(GateOutcome::pass())
            }
            Verdict::Block { reason } => {
                let key = format!("{}:{}", tool_name, params_hash(params));
                if self.in_cooldown(&key) {
                    self.telemetry
                        .metric(MetricKind::Cortex, "gate_cooldown_pass", 1.0, Some(tool_name));
                    return Ok(GateOutcome::pass());
                }
                self.record_cooldown(key);
                self.telemetry
                    .metric(MetricKind::Cortex, "gate_blocked", 1.0, Some(&primary_category));
                Ok(GateOutcome::blocked(reason))
            }
        }
    }

    /// Race the SOP table scan and the store search against the latency
    /// budget. On timeout, degrade to SOP-only (scanned inline, the
    /// catalog is warm) with an empty memory list.
    fn race_lookups(
        &self,
        params_str: &str,
        context: &ActionContext,
    ) -> (Vec<SopMatch>, Vec<Memory>, bool) {
        let (tx, rx) = mpsc::channel();

        {
            let tx = tx.clone();
            let sop = Arc::clone(&self.sop);
            let params_str = params_str.to_string();
            std::thread::spawn(move || {
                let _ = tx.send(LookupResult::Sops(sop.find_matches(&params_str)));
            });
        }
        {
            let store = Arc::clone(&self.store);
            let query = context.keywords.join(" ");
            let min_confidence = self.config.confidence_threshold;
            std::thread::spawn(move || {
                let categories: Vec<String> =
                    LOOKUP_CATEGORIES.iter().map(|c| c.to_string()).collect();
                let memories = store
                    .lock()
                    .ok()
                    .and_then(|store| {
                        store
                            .search(&query, Some(&categories), Some(min_confidence), LOOKUP_LIMIT)
                            .ok()
                    })
                    .unwrap_or_default();
                let _ = tx.send(LookupResult::Memories(memories));
            });
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.max_lookup_ms);
        let mut sops: Option<Vec<SopMatch>> = None;
        let mut memories: Option<Vec<Memory>> = None;
        while sops.is_none() || memories.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok(LookupResult::Sops(s)) => sops = Some(s),
                Ok(LookupResult::Memories(m)) => memories = Some(m),
                Err(_) => break,
            }
        }

        let timed_out = sops.is_none() || memories.is_none();
        let sops = sops.unwrap_or_else(|| self.sop.find_matches(params_str));
        (sops, memories.unwrap_or_default(), timed_out)
    }

    fn in_cooldown(&self, key: &str) -> bool {
        let cooldowns = self.cooldowns.lock().expect("cooldown map poisoned");
        cooldowns.get(key).is_some_and(|at| {
            Utc::now() - *at < chrono::Duration::minutes(self.config.cooldown_minutes as i64)
        })
    }

    fn record_cooldown(&self, key: String) {
        let mut cooldowns = self.cooldowns.lock().expect("cooldown map poisoned");
        let horizon = Utc::now() - chrono::Duration::minutes(self.config.cooldown_minutes as i64);
        cooldowns.retain(|_, at| *at > horizon);
        cooldowns.insert(key, Utc::now());
    }
}

/// Memory tie-break for block composition: confidence boosted by category
/// overlap with the action context, descending.
fn rank_memories(memories: &mut [Memory], context: &ActionContext) {
    memories.sort_by(|a, b| {
        let score = |m: &Memory| {
            let overlap = m
                .categories
                .iter()
                .filter(|c| context.keywords.iter().any(|k| k == *c))
                .count() as f64;
            m.confidence * (1.0 + overlap * 0.1)
        };
        score(b).partial_cmp(&score(a)).unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_types::NewMemory;
    use serde_json::json;

    struct Fixture {
        gate: PreActionGate,
        store: Arc<Mutex<Store>>,
        _dir: tempfile::TempDir,
    }

    fn fixture(configure: impl FnOnce(&mut PreActionConfig)) -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("fleet.ai.sop"),
            "preflight:\n    drain connections before restart\ngotchas:\n    mid-epoch restarts lose the batch\n",
        )
        .unwrap();

        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let telemetry = Arc::new(Telemetry::new(store.clone(), dir.path()));
        let sop = Arc::new(SopEnhancer::with_defaults(dir.path().to_path_buf()).unwrap());
        let categories = Arc::new(Mutex::new(CategoryManager::with_defaults()));
        let mut config = PreActionConfig::default();
        configure(&mut config);

        let gate = PreActionGate::new(
            store.clone(),
            sop,
            categories,
            telemetry,
            config,
            EnforcementConfig::default(),
        );
        Fixture {
            gate,
            store,
            _dir: dir,
        }
    }

    #[test]
    fn test_read_only_exec_passes_with_metric() {
        let f = fixture(|_| {});
        let outcome = f.gate.before_tool_call("exec", &json!({"command": "ls -la"}));
        assert!(!outcome.block);

        let (value, context) = f
            .store
            .lock()
            .unwrap()
            .latest_metric(MetricKind::Sop, "read_only_pass")
            .unwrap()
            .unwrap();
        assert_eq!(value, 1.0);
        assert_eq!(context.as_deref(), Some("ls -la"));
    }

    #[test]
    fn test_unintercepted_tool_passes() {
        let f = fixture(|_| {});
        let outcome = f
            .gate
            .before_tool_call("cortex_add", &json!({"content": "note"}));
        assert!(!outcome.block);
    }

    #[test]
    fn test_sop_and_memory_block_lists_both() {
        let f = fixture(|_| {});
        {
            let store = f.store.lock().unwrap();
            let m = store
                .add_memory(
                    NewMemory::new("augur executor restart needs a queue drain first")
                        .with_categories(vec!["process".to_string()]),
                )
                .unwrap();
            store.update_confidence(&m.id, 0.92, "validated execution").unwrap();
            let m2 = store
                .add_memory(
                    NewMemory::new("executor restart mid-epoch loses the batch")
                        .with_categories(vec!["gotchas".to_string()]),
                )
                .unwrap();
            store.update_confidence(&m2.id, 0.71, "age decay").unwrap();
        }

        let outcome = f.gate.before_tool_call(
            "exec",
            &json!({
                "command": "systemctl restart augur-executor",
                "workdir": "/home/u/Projects/augur"
            }),
        );
        assert!(outcome.block);
        let reason = outcome.block_reason.unwrap();
        assert!(reason.contains("fleet.ai.sop"));
        assert!(reason.contains("92%"));
        assert!(reason.contains("71%"));
    }

    #[test]
    fn test_cooldown_suppresses_identical_block() {
        let f = fixture(|_| {});
        let params = json!({"command": "systemctl restart augur-executor"});

        let first = f.gate.before_tool_call("exec", &params);
        assert!(first.block);

        let second = f.gate.before_tool_call("exec", &params);
        assert!(!second.block);
        let (value, _) = f
            .store
            .lock()
            .unwrap()
            .latest_metric(MetricKind::Cortex, "gate_cooldown_pass")
            .unwrap()
            .unwrap();
        assert_eq!(value, 1.0);
    }

    #[test]
    fn test_no_sources_passes() {
        let f = fixture(|_| {});
        let outcome = f
            .gate
            .before_tool_call("exec", &json!({"command": "make harmless-target"}));
        assert!(!outcome.block);
    }

    #[test]
    fn test_disabled_gate_passes_everything() {
        let f = fixture(|c| c.enabled = false);
        let outcome = f
            .gate
            .before_tool_call("exec", &json!({"command": "systemctl restart augur-executor"}));
        assert!(!outcome.block);
    }

    #[test]
    fn test_zero_budget_degrades_to_sop_only() {
        let f = fixture(|c| c.max_lookup_ms = 0);
        let outcome = f
            .gate
            .before_tool_call("exec", &json!({"command": "systemctl restart augur-executor"}));
        // SOP fallback still fires, so the block stands on SOP evidence
        assert!(outcome.block);
        let timed_out = f
            .store
            .lock()
            .unwrap()
            .latest_metric(MetricKind::Cortex, "lookup_timed_out")
            .unwrap();
        assert!(timed_out.is_some());
    }
}
