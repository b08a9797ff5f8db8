//! End-to-end hook scenarios through the full runtime.

use cortex_runtime::{Cortex, CortexConfig};
use cortex_store::{MetricKind, Store};
use cortex_testing::{TestWorld, ended_session, seeded_memory};
use cortex_types::{DecisionOutcome, GateDecision, OverrideState, RiskTier, WorkingMemoryPin};
use serde_json::json;

fn cortex(world: &TestWorld) -> Cortex {
    let mut config = CortexConfig::default();
    config.sop_catalog_dir = Some(world.sops_dir());
    Cortex::with_store(config, world.path(), Store::open_in_memory().unwrap()).unwrap()
}

#[test]
fn read_only_exec_passes_through() {
    let world = TestWorld::with_sops().unwrap();
    let cortex = cortex(&world);

    let outcome = cortex.before_tool_call("exec", &json!({"command": "ls -la"}));
    assert!(!outcome.block);

    let store = cortex.store_handle();
    let metric = store
        .lock()
        .unwrap()
        .latest_metric(MetricKind::Sop, "read_only_pass")
        .unwrap();
    assert!(metric.is_some());
}

#[test]
fn embedded_financial_pattern_blocks_with_revoked_override() {
    let world = TestWorld::with_sops().unwrap();
    let cortex = cortex(&world);

    cortex
        .trust_gate()
        .set_override(
            "financial_augur",
            OverrideState::Revoked,
            "paper trading only",
            None,
            "interactive-ops",
        )
        .unwrap();

    let outcome = cortex.before_tool_call("exec", &json!({"command": "ls && augur trade --live"}));
    assert!(outcome.block);
    assert!(outcome.block_reason.unwrap().contains("trust gate"));

    // Decision log captured the tier-4 classification, outcome pending
    let store = cortex.store_handle();
    let guard = store.lock().unwrap();
    let decision = guard
        .latest_decision_in_category("financial_augur")
        .unwrap()
        .unwrap();
    assert_eq!(decision.tier, RiskTier::Tier4);
    assert_eq!(decision.gate_decision, GateDecision::Block);
    assert_eq!(decision.outcome, DecisionOutcome::Pending);
    assert!(!decision.tool_params_summary.is_empty());
    assert_eq!(decision.tool_params_hash.len(), 16);
}

#[test]
fn tier4_without_override_pauses() {
    let world = TestWorld::with_sops().unwrap();
    let cortex = cortex(&world);

    let outcome = cortex.before_tool_call("exec", &json!({"command": "augur trade execute --live"}));
    assert!(outcome.block);
    assert!(outcome.block_reason.unwrap().contains("confirmation"));
}

#[test]
fn sop_and_memory_block_lists_both_sources() {
    let world = TestWorld::with_sops().unwrap();
    let cortex = cortex(&world);
    {
        let store = cortex.store_handle();
        let guard = store.lock().unwrap();
        seeded_memory(
            &guard,
            "augur executor restarts need a queue drain first",
            &["process"],
            0.92,
        )
        .unwrap();
        seeded_memory(
            &guard,
            "executor restart mid-epoch loses the batch",
            &["gotchas"],
            0.71,
        )
        .unwrap();
        // Build tier-3 trust so the trust gate passes and the knowledge
        // gate makes the call.
        guard
            .upsert_trust_score(&cortex_types::TrustScore {
                category: "system_control".to_string(),
                tier: RiskTier::Tier3,
                current_score: 0.9,
                decision_count: 20,
                last_updated: chrono::Utc::now(),
            })
            .unwrap();
    }

    let outcome = cortex.before_tool_call(
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
fn context_injection_respects_budget_and_sections() {
    let world = TestWorld::with_sops().unwrap();
    let cortex = cortex(&world);
    {
        let store = cortex.store_handle();
        let guard = store.lock().unwrap();
        guard
            .save_working_memory(&[
                WorkingMemoryPin::new("a".repeat(40), Some("first".to_string())),
                WorkingMemoryPin::new("b".repeat(60), None),
            ])
            .unwrap();
        for i in 0..10 {
            seeded_memory(
                &guard,
                &format!("gateway restart fact number {} for the fleet", i),
                &["process"],
                0.9,
            )
            .unwrap();
        }
    }

    let prompt = "how do I restart the gateway for the fleet";
    let context = cortex.before_agent_start(prompt).unwrap();

    assert!(context.contains("<working-memory>"));
    // No memory content may appear twice across sections
    let store = cortex.store_handle();
    let memories = store.lock().unwrap().get_recent(50, None).unwrap();
    for memory in &memories {
        let occurrences = context.matches(&memory.content).count();
        assert!(occurrences <= 1, "memory injected twice: {}", memory.content);
    }
    // Pins always present
    assert!(context.contains(&"a".repeat(40)));
}

#[test]
fn session_restore_produces_continuity_preamble() {
    let world = TestWorld::with_sops().unwrap();
    let cortex = cortex(&world);
    {
        let store = cortex.store_handle();
        let guard = store.lock().unwrap();
        guard
            .upsert_session(&ended_session(
                "session-a",
                "main",
                30,
                &["augur", "gateway"],
                &["finish the drain fix", "rotate the token"],
                vec![WorkingMemoryPin::new(
                    "gateway drains before restart",
                    Some("drain".to_string()),
                )],
            ))
            .unwrap();
        guard
            .upsert_session(&ended_session("session-b", "main", 2, &["unrelated"], &[], vec![]))
            .unwrap();
    }

    let restored = cortex.session_start("main").unwrap();
    assert!(!restored.cold_start);
    assert_eq!(restored.inherited_pins, 1);

    // The preamble rides into the next turn as the L0 tier, uncharged
    let context = cortex.before_agent_start("continue where we left off").unwrap();
    assert!(context.contains("<session-continuity>"));
    assert!(context.contains("finish the drain fix"));

    // One-shot: the second turn has no preamble
    if let Some(second) = cortex.before_agent_start("next question") {
        assert!(!second.contains("<session-continuity>"));
    }
}

#[test]
fn correction_moves_ewma_after_pass() {
    let world = TestWorld::with_sops().unwrap();
    let cortex = cortex(&world);
    {
        let store = cortex.store_handle();
        store
            .lock()
            .unwrap()
            .upsert_trust_score(&cortex_types::TrustScore {
                category: "file_write".to_string(),
                tier: RiskTier::Tier2,
                current_score: 0.9,
                decision_count: 10,
                last_updated: chrono::Utc::now(),
            })
            .unwrap();
    }

    let outcome = cortex.before_tool_call("write_file", &json!({"path": "/etc/app.toml", "content": "x"}));
    assert!(!outcome.block);

    cortex.message_received("that's wrong, undo");

    let store = cortex.store_handle();
    let score = store
        .lock()
        .unwrap()
        .get_trust_score("file_write")
        .unwrap()
        .unwrap();
    // 0.9 * 0.9 + 0.1 * (-0.5) = 0.76
    assert!((score.current_score - 0.76).abs() < 1e-9);
}

#[test]
fn tool_error_resolves_as_external() {
    let world = TestWorld::with_sops().unwrap();
    let cortex = cortex(&world);

    let outcome = cortex.before_tool_call("exec", &json!({"command": "ls -la"}));
    assert!(!outcome.block);

    cortex.after_tool_call(
        "exec",
        &json!({"command": "ls -la"}),
        "ls: cannot access",
        true,
    );

    let store = cortex.store_handle();
    let guard = store.lock().unwrap();
    // The pending outcome for read_only resolved as an external tool error
    let pending = guard
        .latest_pending_in_category("read_only", chrono::Utc::now() - chrono::Duration::hours(1))
        .unwrap();
    assert!(pending.is_none());
    let score = guard.get_trust_score("read_only").unwrap().unwrap();
    // External errors carry zero weight; alpha 0.08 toward 0.0
    assert!(score.current_score < 0.5);
}

#[test]
fn auto_capture_stores_salient_output() {
    let world = TestWorld::with_sops().unwrap();
    let cortex = cortex(&world);

    cortex.agent_end(
        "The crash loop was resolved by clearing the stale pid file under /run/augur.",
    );

    let store = cortex.store_handle();
    let memories = store.lock().unwrap().get_recent(10, None).unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].source, cortex_types::MemorySource::AutoCapture);

    // The same line again dedupes on the content key
    cortex.agent_end(
        "The crash loop was resolved by clearing the stale pid file under /run/augur.",
    );
    assert_eq!(store.lock().unwrap().count_memories().unwrap(), 1);
}

#[test]
fn outcome_sweep_resolves_expired_pendings() {
    let world = TestWorld::with_sops().unwrap();
    let cortex = cortex(&world);

    let outcome = cortex.before_tool_call("exec", &json!({"command": "git status"}));
    assert!(!outcome.block);

    let (passed, _) = cortex
        .trust_gate()
        .sweep(chrono::Utc::now() + chrono::Duration::minutes(31))
        .unwrap();
    assert_eq!(passed, 1);

    let store = cortex.store_handle();
    let score = store.lock().unwrap().get_trust_score("read_only").unwrap().unwrap();
    assert!(score.current_score > 0.5);
}
