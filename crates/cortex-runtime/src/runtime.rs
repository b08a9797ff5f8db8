use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use cortex_engine::{
    CategoryManager, HotCandidate, InjectionInputs, SemanticCandidate, SopEnhancer, StmCandidate,
    extract_context, stm_match_score,
};
use cortex_index::{ActiveSessionRing, MemoryIndex, RingRole};
use cortex_store::{NewMemory, Store};
use cortex_types::{AtomField, GateDecision, MemorySource, content_key};
use serde_json::Value;

use crate::capture::extract_salient;
use crate::config::CortexConfig;
use crate::gate::{GateOutcome, PreActionGate};
use crate::healing::{
    BrainDbProbe, DiskProbe, EscalationRouter, GatewayProbe, LogBloatProbe, MemoryProbe,
    ProcessProbe, RunbookRegistry, SelfHealingEngine, SignalSender, SubprocessRunner,
};
use crate::polling::PollingEngine;
use crate::session::{RestoredContext, SessionManager};
use crate::telemetry::Telemetry;
use crate::tools::{ToolResponse, handle_tool};
use crate::trust::TrustGate;
use crate::Result;

const RING_BYTE_CAP: usize = 64 * 1024;
const STM_SCAN_LIMIT: usize = 100;
const STM_CANDIDATES: usize = 10;
const HOT_CANDIDATES: usize = 10;
const SEMANTIC_CANDIDATES: usize = 5;

/// Background engines produced by [`Cortex::enable_self_healing`]. The
/// caller owns the polling lifecycle.
pub struct HealingHandles {
    pub polling: Arc<PollingEngine>,
    pub engine: Arc<SelfHealingEngine>,
}

/// The cortex substrate: one value wiring the store, caches, engines, and
/// hook surface together. The host runtime holds one per process and
/// invokes the hook methods serially per session.
pub struct Cortex {
    pub(crate) config: CortexConfig,
    pub(crate) store: Arc<Mutex<Store>>,
    pub(crate) index: Mutex<MemoryIndex>,
    pub(crate) ring: Mutex<ActiveSessionRing>,
    pub(crate) categories: Arc<Mutex<CategoryManager>>,
    pub(crate) gate: PreActionGate,
    pub(crate) trust: TrustGate,
    pub(crate) sessions: SessionManager,
    pub(crate) telemetry: Arc<Telemetry>,
    pub(crate) healing: Mutex<Option<Arc<SelfHealingEngine>>>,
    pub(crate) preamble: Mutex<Option<String>>,
    pub(crate) agent_id: String,
    workspace: PathBuf,
}

impl Cortex {
    pub fn open(config: CortexConfig, workspace: &Path) -> Result<Self> {
        let store = Store::open(&workspace.join("cortex.db"))?;
        Self::with_store(config, workspace, store)
    }

    /// Assemble around an existing store (tests use the in-memory one)
    pub fn with_store(config: CortexConfig, workspace: &Path, store: Store) -> Result<Self> {
        std::fs::create_dir_all(workspace)?;
        let store = Arc::new(Mutex::new(store));
        let telemetry = Arc::new(Telemetry::new(store.clone(), &workspace.join("events")));

        let mut manager = CategoryManager::with_defaults();
        {
            let guard = store.lock().expect("store mutex poisoned");
            for def in guard.list_categories()? {
                // Persisted definitions extend the defaults; collisions on
                // reload are expected and skipped.
                let _ = manager.add(&def.name, &def.description, def.keywords.clone());
            }
        }
        let categories = Arc::new(Mutex::new(manager));

        let mut index = MemoryIndex::new(config.hot_tier_size, config.stm_capacity);
        index.warmup(&store.lock().expect("store mutex poisoned"))?;

        let sop_dir = config
            .sop_catalog_dir
            .clone()
            .unwrap_or_else(|| workspace.join("sops"));
        let sop = Arc::new(SopEnhancer::with_defaults(sop_dir)?);

        let sessions_dir = config
            .session_persistence
            .sessions_dir
            .clone()
            .unwrap_or_else(|| workspace.join("sessions"));

        let gate = PreActionGate::new(
            store.clone(),
            sop,
            categories.clone(),
            telemetry.clone(),
            config.pre_action_hooks.clone(),
            config.enforcement(),
        );
        let trust = TrustGate::new(store.clone(), config.trust.clone());
        let sessions = SessionManager::new(
            store.clone(),
            config.session_persistence.clone(),
            sessions_dir,
            telemetry.clone(),
        );

        Ok(Self {
            ring: Mutex::new(ActiveSessionRing::new(
                config.episodic_memory_turns,
                RING_BYTE_CAP,
            )),
            index: Mutex::new(index),
            categories,
            gate,
            trust,
            sessions,
            telemetry,
            healing: Mutex::new(None),
            preamble: Mutex::new(None),
            agent_id: "main".to_string(),
            workspace: workspace.to_path_buf(),
            config,
            store,
        })
    }

    pub fn config(&self) -> &CortexConfig {
        &self.config
    }

    /// Handle to the store for embedding hosts and tests. All writes still
    /// go through the store's own typed surface.
    pub fn store_handle(&self) -> Arc<Mutex<Store>> {
        Arc::clone(&self.store)
    }

    pub fn trust_gate(&self) -> &TrustGate {
        &self.trust
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.sessions
    }

    /// Pull store changes into the in-RAM index (best-effort)
    pub(crate) fn sync_index(&self) {
        if !self.config.delta_sync_enabled {
            return;
        }
        let store = self.store.lock().expect("store mutex poisoned");
        if let Err(err) = self.index.lock().expect("index poisoned").delta_sync(&store) {
            tracing::warn!(error = %err, "index delta sync failed");
        }
    }

    // ------------------------------------------------------------------
    // Hook surface
    // ------------------------------------------------------------------

    /// Session lifecycle: crash recovery, restore, continuity preamble.
    pub fn session_start(&self, channel: &str) -> Result<RestoredContext> {
        let restored = self.sessions.start_session(channel)?;
        if let Some(preamble) = &restored.preamble {
            *self.preamble.lock().expect("preamble poisoned") = Some(preamble.clone());
        }
        Ok(restored)
    }

    pub fn session_end(&self) -> Result<()> {
        self.ring.lock().expect("ring poisoned").clear();
        self.sessions.end_session()
    }

    /// `before_agent_start`: compose the tiered context for this turn.
    /// Returns the text to prepend, or None to leave the prompt alone.
    /// Errors never abort the agent turn.
    pub fn before_agent_start(&self, prompt: &str) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        self.sync_index();

        let active_categories = self
            .categories
            .lock()
            .expect("category manager poisoned")
            .detect(prompt);
        let now = Utc::now();
        let scoring = self.config.scoring();

        let pins = self
            .store
            .lock()
            .expect("store mutex poisoned")
            .get_working_memory()
            .unwrap_or_default();

        let session_matches: Vec<(usize, String)> = self
            .ring
            .lock()
            .expect("ring poisoned")
            .search(prompt)
            .into_iter()
            .map(|(score, entry)| (score, entry.text.clone()))
            .collect();

        let index = self.index.lock().expect("index poisoned");
        let hot: Vec<HotCandidate> = index
            .hot_with_scores(HOT_CANDIDATES)
            .into_iter()
            .map(|(memory, smoothed_access)| HotCandidate {
                memory,
                smoothed_access,
            })
            .collect();
        let diversity: Vec<_> = active_categories
            .iter()
            .filter_map(|category| index.get_by_category(category).first().map(|m| (*m).clone()))
            .collect();
        drop(index);

        let (stm, semantic) = {
            let store = self.store.lock().expect("store mutex poisoned");
            let mut stm: Vec<StmCandidate> = store
                .get_recent(STM_SCAN_LIMIT, None)
                .unwrap_or_default()
                .into_iter()
                .map(|memory| {
                    let score =
                        stm_match_score(&memory, prompt, &active_categories, scoring, now);
                    StmCandidate { memory, score }
                })
                .filter(|candidate| candidate.score > 0.0)
                .collect();
            stm.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            stm.truncate(STM_CANDIDATES);

            let semantic: Vec<SemanticCandidate> = store
                .search(prompt, None, None, SEMANTIC_CANDIDATES)
                .unwrap_or_default()
                .into_iter()
                .map(|memory| {
                    let relevance = stm_match_score(&memory, prompt, &active_categories, scoring, now)
                        .clamp(0.0, 1.0);
                    SemanticCandidate { memory, relevance }
                })
                .collect();
            (stm, semantic)
        };

        let preamble = self.preamble.lock().expect("preamble poisoned").take();
        let inputs = InjectionInputs {
            prompt,
            preamble,
            pins,
            session_matches,
            hot,
            stm,
            semantic,
            diversity,
            active_categories,
            now,
        };

        let store = Arc::clone(&self.store);
        let prompt_owned = prompt.to_string();
        let deep = move || -> Option<String> {
            if cortex_engine::classify_query(&prompt_owned) != cortex_engine::QueryClass::Causal {
                return None;
            }
            let guard = store.lock().ok()?;
            let seeds = guard
                .search_atoms_by_field(AtomField::Outcome, &prompt_owned, 1)
                .ok()?;
            let seed = seeds.first()?;
            let chain = guard.find_causes(&seed.id, 3).ok()?;
            cortex_engine::synthesize_insight(&chain, 600)
        };

        let composed = cortex_engine::compose(inputs, &self.config.injector(), Some(&deep))?;
        if composed.injected_memory_ids.len() > 1 {
            self.index
                .lock()
                .expect("index poisoned")
                .record_co_occurrence(&composed.injected_memory_ids);
        }
        // No access recording here: injection must not feed the hot tier.
        Some(composed.text)
    }

    /// `before_tool_call`: trust gate first (tier-4 financial patterns are
    /// checked before any read-only shortcut), then the knowledge gate.
    pub fn before_tool_call(&self, tool_name: &str, params: &Value) -> GateOutcome {
        if !self.config.enabled {
            return GateOutcome {
                block: false,
                block_reason: None,
            };
        }

        match self.trust.evaluate(tool_name, params) {
            Ok(evaluation) => match evaluation.decision {
                GateDecision::Block => {
                    return GateOutcome {
                        block: true,
                        block_reason: Some(format!("Blocked by trust gate: {}", evaluation.rationale)),
                    };
                }
                GateDecision::Pause => {
                    return GateOutcome {
                        block: true,
                        block_reason: Some(format!(
                            "Paused for confirmation: {} (decision {})",
                            evaluation.rationale, evaluation.decision_id
                        )),
                    };
                }
                GateDecision::Pass => {}
            },
            Err(err) => {
                // Fail open: a broken trust gate must not stall the agent
                tracing::warn!(tool_name, error = %err, "trust gate failed open");
            }
        }

        self.gate.before_tool_call(tool_name, params)
    }

    /// `after_tool_call`: outcome attribution, auto-capture, session notes.
    pub fn after_tool_call(&self, tool_name: &str, params: &Value, result_text: &str, is_error: bool) {
        if !self.config.enabled {
            return;
        }
        if is_error {
            let classification = crate::trust::classify_action(tool_name, params);
            if let Err(err) = self.trust.record_tool_error(&classification.category, false) {
                tracing::warn!(error = %err, "tool error attribution failed");
            }
        }

        if self.config.auto_capture && !is_error {
            self.auto_capture(result_text);
        }

        let context = extract_context(tool_name, params);
        let projects: Vec<String> = context.project_path.clone().into_iter().collect();
        self.sessions.note_activity(&context.keywords, &projects);
    }

    /// `agent_end`: episodic update, capture, crash-safe checkpoint.
    pub fn agent_end(&self, assistant_text: &str) {
        if !self.config.enabled {
            return;
        }
        self.ring
            .lock()
            .expect("ring poisoned")
            .push(RingRole::Assistant, assistant_text);
        if self.config.auto_capture {
            self.auto_capture(assistant_text);
        }
        if let Err(err) = self.sessions.incremental_save() {
            tracing::warn!(error = %err, "incremental session save failed");
        }
    }

    /// `message_received`: episodic update and correction detection.
    pub fn message_received(&self, text: &str) {
        if !self.config.enabled {
            return;
        }
        self.ring.lock().expect("ring poisoned").push(RingRole::User, text);

        match self.trust.handle_user_message(text) {
            Ok(Some((decision_id, outcome))) => {
                tracing::info!(
                    decision_id = %decision_id,
                    outcome = outcome.as_str(),
                    "correction attributed to recent decision"
                );
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "correction handling failed"),
        }

        let topics: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 4)
            .take(5)
            .map(str::to_lowercase)
            .collect();
        self.sessions.note_activity(&topics, &[]);
    }

    /// Registered tool dispatch
    pub fn handle_tool(&self, name: &str, args: &Value) -> ToolResponse {
        handle_tool(self, name, args)
    }

    fn auto_capture(&self, text: &str) {
        let candidates = extract_salient(text);
        if candidates.is_empty() {
            return;
        }
        let store = self.store.lock().expect("store mutex poisoned");
        let existing_keys: std::collections::HashSet<String> = store
            .get_recent(STM_SCAN_LIMIT, None)
            .unwrap_or_default()
            .iter()
            .map(|m| content_key(&m.content))
            .collect();

        for candidate in candidates {
            if existing_keys.contains(&content_key(&candidate)) {
                continue;
            }
            let categories = self
                .categories
                .lock()
                .expect("category manager poisoned")
                .detect(&candidate);
            let new = NewMemory::new(candidate)
                .with_categories(categories)
                .with_source(MemorySource::AutoCapture);
            match store.add_memory(new) {
                Ok(memory) => self.sessions.note_learning(&memory.id),
                Err(err) => tracing::warn!(error = %err, "auto-capture insert failed"),
            }
        }
        drop(store);
        self.sync_index();
    }

    /// Periodic maintenance: retention, outcome sweep, cache sync. Driven
    /// by the host scheduler at a few-minute cadence.
    pub fn run_maintenance(&self) -> Result<()> {
        let now = Utc::now();
        let expired = self
            .store
            .lock()
            .expect("store mutex poisoned")
            .expire_memories(now)?;
        if expired > 0 {
            tracing::info!(expired, "retention removed expired memories");
        }
        let (passed, denied) = self.trust.sweep(now)?;
        if passed + denied > 0 {
            tracing::debug!(passed, denied, "outcome sweep resolved pendings");
        }
        self.trust.purge_old_decisions(now)?;
        self.sync_index();
        Ok(())
    }

    /// Build and register the self-healing stack. The returned polling
    /// engine is not yet started; call `polling.start()` to go live.
    pub fn enable_self_healing(
        &self,
        signal: Option<Arc<dyn SignalSender>>,
    ) -> Result<HealingHandles> {
        let config = self.config.self_healing.clone();
        let registry = RunbookRegistry::load(
            self.store.clone(),
            self.workspace.join("cortex.db"),
            &config.auto_execute_whitelist,
            config.dry_run_graduation_count,
        )?;
        let router = EscalationRouter::new(
            self.store.clone(),
            self.telemetry.clone(),
            signal,
            config.tier3_signal_channel.clone(),
        );
        let engine = Arc::new(SelfHealingEngine::new(
            self.store.clone(),
            config.clone(),
            self.telemetry.clone(),
            registry,
            Arc::new(SubprocessRunner),
            router,
        ));

        let interval = |name: &str, default_ms: u64| {
            config.probe_intervals_ms.get(name).copied().unwrap_or(default_ms)
        };
        let probes: Vec<Arc<dyn crate::polling::DataSourceAdapter>> = vec![
            Arc::new(DiskProbe::new(PathBuf::from("/"), interval("heal.disk", 60_000))),
            Arc::new(MemoryProbe::new(interval("heal.memory", 60_000))),
            Arc::new(ProcessProbe::new(
                vec![
                    "augur-executor".to_string(),
                    "gateway".to_string(),
                    "pipeline".to_string(),
                ],
                interval("heal.process", 30_000),
            )),
            Arc::new(GatewayProbe::new(
                "127.0.0.1:8443".to_string(),
                interval("heal.gateway", 30_000),
            )),
            Arc::new(BrainDbProbe::new(
                self.store.clone(),
                interval("heal.braindb", 300_000),
            )),
            Arc::new(LogBloatProbe::new(
                self.workspace.join("events"),
                interval("heal.logbloat", 300_000),
            )),
        ];

        let polling = Arc::new(PollingEngine::new());
        for probe in probes {
            engine.register_probe(probe.clone());
            polling.register_adapter(probe);
        }
        engine.attach(&polling);

        *self.healing.lock().expect("healing handle poisoned") = Some(engine.clone());
        Ok(HealingHandles { polling, engine })
    }
}
