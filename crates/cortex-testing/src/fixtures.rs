//! Builders for sample domain data.

use chrono::{Duration, Utc};
use cortex_store::Store;
use cortex_types::{Memory, NewMemory, Reading, SessionState, WorkingMemoryPin};
use serde_json::json;

/// Store a memory with the given confidence, auditing the adjustment.
pub fn seeded_memory(
    store: &Store,
    content: &str,
    categories: &[&str],
    confidence: f64,
) -> anyhow::Result<Memory> {
    let memory = store.add_memory(
        NewMemory::new(content).with_categories(categories.iter().map(|c| c.to_string()).collect()),
    )?;
    if confidence < 1.0 {
        return Ok(store.update_confidence(&memory.id, confidence, "test seed")?);
    }
    Ok(memory)
}

/// An ended session with topics, tasks, and pins, started `hours_ago`.
pub fn ended_session(
    id: &str,
    channel: &str,
    hours_ago: i64,
    topics: &[&str],
    tasks: &[&str],
    pins: Vec<WorkingMemoryPin>,
) -> SessionState {
    let now = Utc::now();
    let mut session = SessionState::open(id, channel);
    session.start_time = now - Duration::hours(hours_ago);
    session.end_time = Some(session.start_time + Duration::hours(1));
    session.hot_topics = topics.iter().map(|t| t.to_string()).collect();
    session.pending_tasks = tasks.iter().map(|t| t.to_string()).collect();
    session.working_memory = pins;
    session
}

/// A disk probe reading at the given usage fraction
pub fn disk_reading(usage_pct: f64) -> Reading {
    Reading::ok("heal.disk", json!({"usage_pct": usage_pct, "mount": "/"}))
}

/// A process probe reading with one process in the given state
pub fn process_reading(name: &str, status: &str) -> Reading {
    Reading::ok(
        "heal.process",
        json!({"processes": [{"name": name, "status": status}]}),
    )
}

/// Write a minimal SOP catalog into a directory. Returns the paths used by
/// the default pattern table.
pub fn write_sop_catalog(dir: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(
        dir.join("fleet.ai.sop"),
        "fleet executor operations\n\npreflight:\n    drain the queue first\n    confirm no open positions\ngotchas:\n    mid-epoch restarts lose the batch\ncredentials:\n    use the service keyfile\n",
    )?;
    std::fs::write(
        dir.join("systemd.sop"),
        "unit management\n\npreflight:\n    check unit status before restarting\n",
    )?;
    Ok(())
}
