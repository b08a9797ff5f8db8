use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cortex_store::{MetricKind, Store};
use cortex_types::{MAX_PINS, SessionState, WorkingMemoryPin, time_delta_label};
use uuid::Uuid;

use crate::config::SessionPersistenceConfig;
use crate::telemetry::Telemetry;
use crate::Result;

const SCORE_RECENCY_WEIGHT: f64 = 0.40;
const SCORE_TOPIC_WEIGHT: f64 = 0.35;
const SCORE_PENDING_WEIGHT: f64 = 0.25;
const PENDING_SATURATION: f64 = 5.0;

/// Confidence decay over a 7-day horizon for inherited learnings
fn inheritance_decay(age_hours: f64, floor: f64) -> f64 {
    (1.0 - age_hours / 168.0 * 0.4).max(floor)
}

/// What session restore hands to the context injector
#[derive(Debug, Clone)]
pub struct RestoredContext {
    pub session_id: String,
    pub preamble: Option<String>,
    pub pins: Vec<WorkingMemoryPin>,
    pub cold_start: bool,
    pub recovered_sessions: usize,
    pub inherited_pins: usize,
}

struct RestoredInner {
    preamble: String,
    pins: Vec<WorkingMemoryPin>,
    best_session_id: String,
    inherited_pins: usize,
}

/// Session capture, restore, and inheritance.
///
/// Restore runs under a hard wall budget; overruns degrade to a cold
/// start rather than stalling the agent's first turn.
pub struct SessionManager {
    store: Arc<Mutex<Store>>,
    config: SessionPersistenceConfig,
    sessions_dir: PathBuf,
    telemetry: Arc<Telemetry>,
    current: Mutex<Option<SessionState>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<Mutex<Store>>,
        config: SessionPersistenceConfig,
        sessions_dir: PathBuf,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            store,
            config,
            sessions_dir,
            telemetry,
            current: Mutex::new(None),
        }
    }

    fn store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().expect("store mutex poisoned")
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.current
            .lock()
            .expect("session state poisoned")
            .as_ref()
            .map(|s| s.session_id.clone())
    }

    /// Start a session: resolve crashed predecessors, open the new row,
    /// and restore prior context inside the wall budget.
    pub fn start_session(&self, channel: &str) -> Result<RestoredContext> {
        let now = Utc::now();

        let dangling = self.store().dangling_sessions(channel)?;
        let recovered_sessions = dangling.len();
        for session in &dangling {
            self.store().mark_session_recovered(&session.session_id, now)?;
            tracing::info!(session_id = %session.session_id, "recovered crashed session");
        }

        let session = SessionState::open(Uuid::new_v4().to_string(), channel);
        let session_id = session.session_id.clone();
        self.store().upsert_session(&session)?;
        *self.current.lock().expect("session state poisoned") = Some(session);

        if !self.config.enabled {
            return Ok(RestoredContext {
                session_id,
                preamble: None,
                pins: Vec::new(),
                cold_start: true,
                recovered_sessions,
                inherited_pins: 0,
            });
        }

        // Restore under the wall budget; on overrun, cold start.
        let (tx, rx) = mpsc::channel();
        {
            let store = Arc::clone(&self.store);
            let config = self.config.clone();
            let channel = channel.to_string();
            std::thread::spawn(move || {
                let _ = tx.send(restore_from_prior(&store, &config, &channel, Utc::now()));
            });
        }

        let restored = match rx.recv_timeout(Duration::from_millis(self.config.restore_budget_ms)) {
            Ok(Ok(restored)) => restored,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "session restore failed, cold start");
                None
            }
            Err(_) => {
                tracing::warn!(
                    budget_ms = self.config.restore_budget_ms,
                    "session restore exceeded budget, cold start"
                );
                self.telemetry
                    .metric(MetricKind::Cortex, "session_restore_timeout", 1.0, None);
                None
            }
        };

        match restored {
            Some(inner) => {
                self.store().save_working_memory(&inner.pins)?;
                self.store().set_continued_by(&inner.best_session_id, &session_id)?;
                if let Some(current) = self.current.lock().expect("session state poisoned").as_mut()
                {
                    current.previous_session_id = Some(inner.best_session_id.clone());
                    current.working_memory = inner.pins.clone();
                    self.store().upsert_session(current)?;
                }
                let mut preamble = inner.preamble;
                if recovered_sessions > 0 {
                    preamble.push_str("\nA previous session ended unexpectedly and was recovered.");
                }
                Ok(RestoredContext {
                    session_id,
                    preamble: Some(preamble),
                    pins: inner.pins,
                    cold_start: false,
                    recovered_sessions,
                    inherited_pins: inner.inherited_pins,
                })
            }
            None => Ok(RestoredContext {
                session_id,
                preamble: None,
                pins: self.store().get_working_memory()?,
                cold_start: true,
                recovered_sessions,
                inherited_pins: 0,
            }),
        }
    }

    /// Force inheritance from a specific prior session, bypassing scoring.
    pub fn continue_from(&self, prior_session_id: &str) -> Result<RestoredContext> {
        let prior = self.store().get_session(prior_session_id)?;
        let session_id = self
            .current_session_id()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let pins = inherit_pins(&[prior.clone()], &prior, self.config.max_inherited_pins);
        let inherited_pins = pins.len();
        self.store().save_working_memory(&pins)?;
        self.store().set_continued_by(prior_session_id, &session_id)?;
        if let Some(current) = self.current.lock().expect("session state poisoned").as_mut() {
            current.previous_session_id = Some(prior_session_id.to_string());
            current.working_memory = pins.clone();
            self.store().upsert_session(current)?;
        }

        Ok(RestoredContext {
            session_id,
            preamble: Some(compose_preamble(&prior, inherited_pins, Utc::now())),
            pins,
            cold_start: false,
            recovered_sessions: 0,
            inherited_pins,
        })
    }

    /// Track activity during the session (topics, projects)
    pub fn note_activity(&self, topics: &[String], projects: &[String]) {
        let mut guard = self.current.lock().expect("session state poisoned");
        if let Some(session) = guard.as_mut() {
            for topic in topics {
                if !session.hot_topics.contains(topic) {
                    session.hot_topics.push(topic.clone());
                }
            }
            session.hot_topics.truncate(20);
            for project in projects {
                if !session.active_projects.contains(project) {
                    session.active_projects.push(project.clone());
                }
            }
        }
    }

    pub fn note_learning(&self, memory_id: &str) {
        let mut guard = self.current.lock().expect("session state poisoned");
        if let Some(session) = guard.as_mut() {
            session.recent_learnings.push(memory_id.to_string());
        }
    }

    pub fn note_pending_task(&self, task: &str) {
        let mut guard = self.current.lock().expect("session state poisoned");
        if let Some(session) = guard.as_mut()
            && !session.pending_tasks.iter().any(|t| t == task)
        {
            session.pending_tasks.push(task.to_string());
        }
    }

    pub fn note_sop_interaction(&self) {
        let mut guard = self.current.lock().expect("session state poisoned");
        if let Some(session) = guard.as_mut() {
            session.sop_interactions += 1;
        }
    }

    /// Mid-session checkpoint for crash safety (`agent_end` hook)
    pub fn incremental_save(&self) -> Result<()> {
        let guard = self.current.lock().expect("session state poisoned");
        if let Some(session) = guard.as_ref() {
            self.store().upsert_session(session)?;
        }
        Ok(())
    }

    /// Capture the final snapshot and mirror it to JSON. The mirror write
    /// is best-effort and off-thread.
    pub fn end_session(&self) -> Result<()> {
        let mut guard = self.current.lock().expect("session state poisoned");
        let Some(mut session) = guard.take() else {
            return Ok(());
        };
        drop(guard);

        session.end_time = Some(Utc::now());
        session.working_memory = self.store().get_working_memory()?;
        self.store().upsert_session(&session)?;

        let mirror_dir = self.sessions_dir.clone();
        std::thread::spawn(move || {
            if let Err(err) = write_mirror(&mirror_dir, &session) {
                tracing::warn!(error = %err, "session mirror write failed");
            }
        });
        Ok(())
    }
}

fn write_mirror(dir: &PathBuf, session: &SessionState) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", session.session_id));
    let payload = serde_json::to_string_pretty(session)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    std::fs::write(path, payload)
}

/// Relevance score for a prior session: recency, topic overlap against the
/// pooled topics of the candidate set, and pending-task weight.
pub fn score_session(
    session: &SessionState,
    reference_topics: &[String],
    now: DateTime<Utc>,
    lookback_days: i64,
) -> f64 {
    let age_days = (now - session.start_time).num_seconds().max(0) as f64 / 86_400.0;
    let recency = (1.0 - age_days / lookback_days.max(1) as f64).clamp(0.0, 1.0);

    let overlap = if reference_topics.is_empty() {
        0.0
    } else {
        session
            .hot_topics
            .iter()
            .filter(|t| reference_topics.contains(t))
            .count() as f64
            / reference_topics.len() as f64
    };

    let pending = (session.pending_tasks.len() as f64 / PENDING_SATURATION).min(1.0);

    recency * SCORE_RECENCY_WEIGHT + overlap * SCORE_TOPIC_WEIGHT + pending * SCORE_PENDING_WEIGHT
}

fn restore_from_prior(
    store: &Arc<Mutex<Store>>,
    config: &SessionPersistenceConfig,
    channel: &str,
    now: DateTime<Utc>,
) -> cortex_store::Result<Option<RestoredInner>> {
    let since = now - chrono::Duration::days(config.lookback_days);
    let guard = store.lock().expect("store mutex poisoned");
    let candidates = guard.ended_sessions(channel, since, 50)?;
    drop(guard);
    if candidates.is_empty() {
        return Ok(None);
    }

    let reference_topics: Vec<String> = {
        let mut topics = Vec::new();
        for session in &candidates {
            for topic in &session.hot_topics {
                if !topics.contains(topic) {
                    topics.push(topic.clone());
                }
            }
        }
        topics
    };

    let mut scored: Vec<(f64, &SessionState)> = candidates
        .iter()
        .map(|s| (score_session(s, &reference_topics, now, config.lookback_days), s))
        .filter(|(score, _)| *score >= config.relevance_threshold)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(config.max_sessions_scored);
    let Some((_, best)) = scored.first() else {
        return Ok(None);
    };

    // Decay inherited learning confidences on the 7-day horizon
    let guard = store.lock().expect("store mutex poisoned");
    for memory_id in &best.recent_learnings {
        if let Ok(memory) = guard.get_memory(memory_id) {
            let factor = inheritance_decay(memory.age_hours(now), config.decay_min_floor);
            let decayed = (memory.confidence * factor).clamp(0.1, 1.0);
            if decayed < memory.confidence {
                let _ = guard.update_confidence(memory_id, decayed, "session inheritance decay");
            }
        }
    }
    drop(guard);

    let critical_pool: Vec<SessionState> = scored.iter().map(|(_, s)| (*s).clone()).collect();
    let pins = inherit_pins(&critical_pool, best, config.max_inherited_pins);
    let inherited_pins = pins.len();

    Ok(Some(RestoredInner {
        preamble: compose_preamble(best, inherited_pins, now),
        best_session_id: best.session_id.clone(),
        pins,
        inherited_pins,
    }))
}

/// Critical pins survive from every scored prior; the best prior also
/// contributes up to `max_inherited` ordinary pins. Labels dedup, total
/// capped at the pin limit.
fn inherit_pins(
    scored: &[SessionState],
    best: &SessionState,
    max_inherited: usize,
) -> Vec<WorkingMemoryPin> {
    let mut pins: Vec<WorkingMemoryPin> = Vec::new();
    let mut seen_labels: std::collections::HashSet<String> = Default::default();
    let mut push = |pin: &WorkingMemoryPin, pins: &mut Vec<WorkingMemoryPin>| {
        if pins.len() >= MAX_PINS {
            return;
        }
        if let Some(label) = &pin.label
            && !seen_labels.insert(label.clone())
        {
            return;
        }
        if pins.iter().any(|p| p.content == pin.content) {
            return;
        }
        pins.push(pin.clone());
    };

    for session in scored {
        for pin in session.working_memory.iter().filter(|p| p.critical) {
            push(pin, &mut pins);
        }
    }
    let mut ordinary = 0;
    for pin in best.working_memory.iter().filter(|p| !p.critical) {
        if ordinary >= max_inherited {
            break;
        }
        let before = pins.len();
        push(pin, &mut pins);
        if pins.len() > before {
            ordinary += 1;
        }
    }
    pins
}

fn compose_preamble(best: &SessionState, inherited_pins: usize, now: DateTime<Utc>) -> String {
    let ended_label = best
        .end_time
        .map(|t| time_delta_label(t, now))
        .unwrap_or_else(|| "recently".to_string());
    let mut lines = vec![format!(
        "Continuing from session {} (ended {}).",
        &best.session_id[..best.session_id.len().min(8)],
        ended_label
    )];
    if !best.pending_tasks.is_empty() {
        lines.push(format!("Pending tasks: {}", best.pending_tasks.join("; ")));
    }
    if !best.active_projects.is_empty() {
        lines.push(format!("Active projects: {}", best.active_projects.join(", ")));
    }
    if !best.hot_topics.is_empty() {
        lines.push(format!("Recent topics: {}", best.hot_topics.join(", ")));
    }
    if inherited_pins > 0 {
        lines.push(format!("Inherited pins: {}", inherited_pins));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(config: SessionPersistenceConfig) -> (SessionManager, Arc<Mutex<Store>>, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let telemetry = Arc::new(Telemetry::new(store.clone(), dir.path()));
        let manager = SessionManager::new(
            store.clone(),
            config,
            dir.path().join("sessions"),
            telemetry,
        );
        (manager, store, dir)
    }

    fn ended_session(
        id: &str,
        hours_ago: i64,
        topics: &[&str],
        tasks: &[&str],
        pins: Vec<WorkingMemoryPin>,
    ) -> SessionState {
        let now = Utc::now();
        let mut session = SessionState::open(id, "main");
        session.start_time = now - chrono::Duration::hours(hours_ago);
        session.end_time = Some(session.start_time + chrono::Duration::hours(1));
        session.hot_topics = topics.iter().map(|t| t.to_string()).collect();
        session.pending_tasks = tasks.iter().map(|t| t.to_string()).collect();
        session.working_memory = pins;
        session
    }

    #[test]
    fn test_cold_start_with_no_history() {
        let (manager, _, _dir) = manager(SessionPersistenceConfig::default());
        let restored = manager.start_session("main").unwrap();
        assert!(restored.cold_start);
        assert!(restored.preamble.is_none());
        assert_eq!(restored.recovered_sessions, 0);
    }

    #[test]
    fn test_crash_recovery_resolves_dangling() {
        let (manager, store, _dir) = manager(SessionPersistenceConfig::default());
        store
            .lock()
            .unwrap()
            .upsert_session(&SessionState::open("s-crashed", "main"))
            .unwrap();

        let restored = manager.start_session("main").unwrap();
        assert_eq!(restored.recovered_sessions, 1);
        let recovered = store.lock().unwrap().get_session("s-crashed").unwrap();
        assert!(recovered.recovered);
        assert!(!recovered.is_open());
    }

    #[test]
    fn test_restore_prefers_higher_scoring_session() {
        let (manager, store, _dir) = manager(SessionPersistenceConfig::default());
        // Session A: older but has pending tasks and topic overlap
        let a = ended_session(
            "session-a",
            30,
            &["augur", "gateway"],
            &["finish the drain fix", "rotate the token"],
            vec![WorkingMemoryPin::new("gateway drains before restart", Some("drain".to_string()))],
        );
        // Session B: more recent, no tasks, disjoint topics
        let b = ended_session("session-b", 2, &["unrelated"], &[], Vec::new());
        {
            let guard = store.lock().unwrap();
            guard.upsert_session(&a).unwrap();
            guard.upsert_session(&b).unwrap();
        }

        let restored = manager.start_session("main").unwrap();
        assert!(!restored.cold_start);
        let preamble = restored.preamble.unwrap();
        assert!(preamble.contains("session-"));
        assert!(preamble.contains("finish the drain fix"));
        assert_eq!(restored.inherited_pins, 1);
        assert_eq!(restored.pins[0].label.as_deref(), Some("drain"));

        let a_after = store.lock().unwrap().get_session("session-a").unwrap();
        assert_eq!(a_after.continued_by, Some(restored.session_id.clone()));
    }

    #[test]
    fn test_critical_pins_survive_from_lower_scoring_sessions() {
        let (manager, store, _dir) = manager(SessionPersistenceConfig::default());
        let a = ended_session(
            "session-a",
            10,
            &["augur"],
            &["task one", "task two"],
            vec![WorkingMemoryPin::new("ordinary pin", Some("ord".to_string()))],
        );
        let b = ended_session(
            "session-b",
            40,
            &["augur"],
            &["old task"],
            vec![WorkingMemoryPin::new(
                "never trade live on fridays",
                Some("CRITICAL: trading".to_string()),
            )],
        );
        {
            let guard = store.lock().unwrap();
            guard.upsert_session(&a).unwrap();
            guard.upsert_session(&b).unwrap();
        }

        let restored = manager.start_session("main").unwrap();
        let labels: Vec<&str> = restored
            .pins
            .iter()
            .filter_map(|p| p.label.as_deref())
            .collect();
        assert!(labels.contains(&"CRITICAL: trading"));
        assert!(labels.contains(&"ord"));
    }

    #[test]
    fn test_relevance_threshold_filters_weak_sessions() {
        let mut config = SessionPersistenceConfig::default();
        config.relevance_threshold = 0.9;
        let (manager, store, _dir) = manager(config);
        store
            .lock()
            .unwrap()
            .upsert_session(&ended_session("session-weak", 100, &[], &[], Vec::new()))
            .unwrap();

        let restored = manager.start_session("main").unwrap();
        assert!(restored.cold_start);
    }

    #[test]
    fn test_end_session_writes_mirror() {
        let (manager, store, dir) = manager(SessionPersistenceConfig::default());
        let restored = manager.start_session("main").unwrap();
        manager.end_session().unwrap();

        let ended = store.lock().unwrap().get_session(&restored.session_id).unwrap();
        assert!(!ended.is_open());

        // Mirror write is async; allow it a moment
        let path = dir.path().join("sessions").join(format!("{}.json", restored.session_id));
        for _ in 0..50 {
            if path.exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(path.exists());
        let mirrored: SessionState =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(mirrored.session_id, restored.session_id);
    }

    #[test]
    fn test_continue_from_specific_session() {
        let (manager, store, _dir) = manager(SessionPersistenceConfig::default());
        let prior = ended_session(
            "session-prior",
            5,
            &["augur"],
            &["ship the fix"],
            vec![WorkingMemoryPin::new("pin content", None)],
        );
        store.lock().unwrap().upsert_session(&prior).unwrap();
        manager.start_session("other-channel").unwrap();

        let restored = manager.continue_from("session-prior").unwrap();
        assert!(!restored.cold_start);
        assert_eq!(restored.inherited_pins, 1);
        assert!(restored.preamble.unwrap().contains("ship the fix"));
    }

    #[test]
    fn test_score_session_components() {
        let now = Utc::now();
        let topical = ended_session("a", 12, &["augur", "gateway"], &["t1", "t2"], Vec::new());
        let stale = ended_session("b", 160, &[], &[], Vec::new());
        let reference = vec!["augur".to_string(), "gateway".to_string()];

        let high = score_session(&topical, &reference, now, 7);
        let low = score_session(&stale, &reference, now, 7);
        assert!(high > low);
        assert!(high > 0.25);
        assert!(low < 0.25);
    }

    #[test]
    fn test_inheritance_decay_floor() {
        assert!((inheritance_decay(0.0, 0.3) - 1.0).abs() < 1e-9);
        assert!((inheritance_decay(168.0, 0.3) - 0.6).abs() < 1e-9);
        assert_eq!(inheritance_decay(10_000.0, 0.3), 0.3);
    }
}
