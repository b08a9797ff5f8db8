use rusqlite::Connection;

use crate::Result;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 3;

// NOTE: Storage Design Rationale
//
// Why a single writer surface?
// - FTS shadow tables must stay in sync with content writes; funnelling every
//   write through this crate keeps that a local invariant instead of a
//   distributed convention
// - WAL mode permits concurrent readers from other handles without risking
//   parallel-write corruption
//
// Why JSON columns for lists (categories, audit trails, pins)?
// - These values are read and written whole; relational decomposition would
//   buy nothing but join traffic
// - The authoritative shape lives in cortex-types; the column is a snapshot
//
// Why manual FTS mirror tables (not external-content fts5)?
// - Deletes and edits flow through typed operations anyway, so the mirror is
//   one extra statement per write and stays trivially rebuildable

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version != 0 && current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            categories TEXT NOT NULL,
            importance REAL NOT NULL DEFAULT 1.0,
            confidence REAL NOT NULL DEFAULT 1.0,
            access_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            last_accessed TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            expires_at TEXT,
            source TEXT NOT NULL,
            source_message_id TEXT
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
            content,
            memory_id UNINDEXED
        );

        CREATE TABLE IF NOT EXISTS confidence_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id TEXT NOT NULL,
            old REAL NOT NULL,
            new REAL NOT NULL,
            reason TEXT NOT NULL,
            at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS categories (
            name TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            keywords TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS atoms (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            action TEXT NOT NULL,
            outcome TEXT NOT NULL,
            consequences TEXT NOT NULL,
            confidence REAL NOT NULL,
            validation_count INTEGER NOT NULL DEFAULT 0,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS atoms_fts USING fts5(
            subject,
            action,
            outcome,
            consequences,
            atom_id UNINDEXED
        );

        CREATE TABLE IF NOT EXISTS causal_links (
            from_atom_id TEXT NOT NULL,
            to_atom_id TEXT NOT NULL,
            link_type TEXT NOT NULL,
            strength REAL NOT NULL,
            PRIMARY KEY (from_atom_id, to_atom_id, link_type)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            from_agent TEXT NOT NULL,
            to_agent TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            priority TEXT NOT NULL,
            thread_id TEXT,
            sent_at TEXT NOT NULL,
            read_at TEXT,
            acked_at TEXT,
            ack_body TEXT,
            read_by TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS working_memory (
            slot INTEGER PRIMARY KEY,
            content TEXT NOT NULL,
            label TEXT,
            pinned_at TEXT NOT NULL,
            critical INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            start_time TEXT NOT NULL,
            end_time TEXT,
            channel TEXT NOT NULL,
            working_memory TEXT NOT NULL DEFAULT '[]',
            hot_topics TEXT NOT NULL DEFAULT '[]',
            active_projects TEXT NOT NULL DEFAULT '[]',
            pending_tasks TEXT NOT NULL DEFAULT '[]',
            recent_learnings TEXT NOT NULL DEFAULT '[]',
            sop_interactions INTEGER NOT NULL DEFAULT 0,
            previous_session_id TEXT,
            continued_by TEXT,
            recovered INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS incidents (
            id TEXT PRIMARY KEY,
            anomaly_type TEXT NOT NULL,
            target_id TEXT NOT NULL,
            severity TEXT NOT NULL,
            state TEXT NOT NULL,
            runbook_id TEXT,
            detected_at TEXT NOT NULL,
            state_changed_at TEXT NOT NULL,
            resolved_at TEXT,
            escalation_tier INTEGER NOT NULL DEFAULT 0,
            dismiss_until TEXT,
            audit_trail TEXT NOT NULL DEFAULT '[]',
            details TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS runbook_state (
            id TEXT PRIMARY KEY,
            mode TEXT NOT NULL,
            confidence REAL NOT NULL,
            dry_run_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS decision_log (
            decision_id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            category TEXT NOT NULL,
            tier INTEGER NOT NULL,
            gate_decision TEXT NOT NULL,
            outcome TEXT NOT NULL,
            tool_params_summary TEXT NOT NULL,
            tool_params_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pending_outcomes (
            decision_id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            tier INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            due_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS trust_scores (
            category TEXT PRIMARY KEY,
            tier INTEGER NOT NULL,
            current_score REAL NOT NULL,
            decision_count INTEGER NOT NULL DEFAULT 0,
            last_updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS trust_overrides (
            category TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            reason TEXT NOT NULL,
            expires_at TEXT,
            set_by TEXT NOT NULL,
            set_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            value REAL NOT NULL,
            context TEXT,
            timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memories_updated ON memories(last_updated);
        CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_audit_memory ON confidence_audit(memory_id);
        CREATE INDEX IF NOT EXISTS idx_links_from ON causal_links(from_atom_id);
        CREATE INDEX IF NOT EXISTS idx_links_to ON causal_links(to_atom_id);
        CREATE INDEX IF NOT EXISTS idx_messages_to ON messages(to_agent, sent_at DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_channel ON sessions(channel, start_time DESC);
        CREATE INDEX IF NOT EXISTS idx_incidents_open
            ON incidents(anomaly_type, target_id)
            WHERE state NOT IN ('resolved', 'escalated', 'self_resolved', 'dismissed');
        CREATE INDEX IF NOT EXISTS idx_decisions_cat ON decision_log(category, timestamp, outcome);
        CREATE INDEX IF NOT EXISTS idx_pending_due ON pending_outcomes(due_at);
        CREATE INDEX IF NOT EXISTS idx_metrics_kind ON metrics(kind, timestamp);
        "#,
    )?;

    conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;

    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS metrics;
        DROP TABLE IF EXISTS trust_overrides;
        DROP TABLE IF EXISTS trust_scores;
        DROP TABLE IF EXISTS pending_outcomes;
        DROP TABLE IF EXISTS decision_log;
        DROP TABLE IF EXISTS runbook_state;
        DROP TABLE IF EXISTS incidents;
        DROP TABLE IF EXISTS sessions;
        DROP TABLE IF EXISTS working_memory;
        DROP TABLE IF EXISTS messages;
        DROP TABLE IF EXISTS causal_links;
        DROP TABLE IF EXISTS atoms_fts;
        DROP TABLE IF EXISTS atoms;
        DROP TABLE IF EXISTS categories;
        DROP TABLE IF EXISTS confidence_audit;
        DROP TABLE IF EXISTS memories_fts;
        DROP TABLE IF EXISTS memories;
        "#,
    )?;
    Ok(())
}
