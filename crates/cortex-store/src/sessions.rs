use chrono::{DateTime, Utc};
use cortex_types::{MAX_PINS, SessionState, WorkingMemoryPin};
use rusqlite::{OptionalExtension, Row, params};

use crate::store::{not_found, to_json};
use crate::{Error, Result, Store};

fn session_from_row(row: &Row) -> rusqlite::Result<(SessionState, [String; 5])> {
    let session = SessionState {
        session_id: row.get(0)?,
        start_time: row.get(1)?,
        end_time: row.get(2)?,
        channel: row.get(3)?,
        working_memory: Vec::new(),
        hot_topics: Vec::new(),
        active_projects: Vec::new(),
        pending_tasks: Vec::new(),
        recent_learnings: Vec::new(),
        sop_interactions: row.get::<_, i64>(9)? as u32,
        previous_session_id: row.get(10)?,
        continued_by: row.get(11)?,
        recovered: row.get::<_, i64>(12)? != 0,
    };
    let json_cols = [
        row.get::<_, String>(4)?,
        row.get::<_, String>(5)?,
        row.get::<_, String>(6)?,
        row.get::<_, String>(7)?,
        row.get::<_, String>(8)?,
    ];
    Ok((session, json_cols))
}

fn finish(pair: (SessionState, [String; 5])) -> Result<SessionState> {
    let (mut session, [pins, topics, projects, tasks, learnings]) = pair;
    session.working_memory = serde_json::from_str(&pins)?;
    session.hot_topics = serde_json::from_str(&topics)?;
    session.active_projects = serde_json::from_str(&projects)?;
    session.pending_tasks = serde_json::from_str(&tasks)?;
    session.recent_learnings = serde_json::from_str(&learnings)?;
    Ok(session)
}

const SESSION_COLUMNS: &str = "session_id, start_time, end_time, channel, working_memory, \
     hot_topics, active_projects, pending_tasks, recent_learnings, sop_interactions, \
     previous_session_id, continued_by, recovered";

impl Store {
    pub fn upsert_session(&self, session: &SessionState) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO sessions (session_id, start_time, end_time, channel, working_memory,
                hot_topics, active_projects, pending_tasks, recent_learnings, sop_interactions,
                previous_session_id, continued_by, recovered)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(session_id) DO UPDATE SET
                end_time = ?3,
                working_memory = ?5,
                hot_topics = ?6,
                active_projects = ?7,
                pending_tasks = ?8,
                recent_learnings = ?9,
                sop_interactions = ?10,
                previous_session_id = COALESCE(?11, previous_session_id),
                continued_by = COALESCE(?12, continued_by),
                recovered = ?13
            "#,
            params![
                &session.session_id,
                session.start_time,
                session.end_time,
                &session.channel,
                to_json(&session.working_memory)?,
                to_json(&session.hot_topics)?,
                to_json(&session.active_projects)?,
                to_json(&session.pending_tasks)?,
                to_json(&session.recent_learnings)?,
                session.sop_interactions as i64,
                &session.previous_session_id,
                &session.continued_by,
                session.recovered as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<SessionState> {
        let pair = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM sessions WHERE session_id = ?1", SESSION_COLUMNS),
                [session_id],
                session_from_row,
            )
            .optional()?;
        match pair {
            Some(pair) => finish(pair),
            None => not_found("session", session_id),
        }
    }

    /// Ended sessions on a channel whose start falls inside the lookback
    /// window, newest first.
    pub fn ended_sessions(
        &self,
        channel: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionState>> {
        let mut stmt = self.conn().prepare(&format!(
            r#"
            SELECT {} FROM sessions
            WHERE channel = ?1 AND end_time IS NOT NULL AND start_time >= ?2
            ORDER BY start_time DESC
            LIMIT ?3
            "#,
            SESSION_COLUMNS
        ))?;
        let pairs = stmt
            .query_map(params![channel, since, limit as i64], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        pairs.into_iter().map(finish).collect()
    }

    /// Sessions on a channel that never recorded an end time: crash leftovers.
    pub fn dangling_sessions(&self, channel: &str) -> Result<Vec<SessionState>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM sessions WHERE channel = ?1 AND end_time IS NULL",
            SESSION_COLUMNS
        ))?;
        let pairs = stmt
            .query_map([channel], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        pairs.into_iter().map(finish).collect()
    }

    /// Crash recovery: close a dangling session and mark it recovered.
    pub fn mark_session_recovered(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE sessions SET end_time = ?1, recovered = 1 WHERE session_id = ?2 AND end_time IS NULL",
            params![ended_at, session_id],
        )?;
        if updated == 0 {
            return not_found("dangling session", session_id);
        }
        Ok(())
    }

    pub fn set_continued_by(&self, session_id: &str, successor_id: &str) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE sessions SET continued_by = ?1 WHERE session_id = ?2",
            params![successor_id, session_id],
        )?;
        if updated == 0 {
            return not_found("session", session_id);
        }
        Ok(())
    }

    /// Replace the authoritative working-memory pin set.
    ///
    /// Enforces the pin cap and duplicate-label rule here so no caller can
    /// bypass them.
    pub fn save_working_memory(&self, pins: &[WorkingMemoryPin]) -> Result<()> {
        if pins.len() > MAX_PINS {
            return Err(Error::Validation(format!(
                "{} pins exceed the cap of {}",
                pins.len(),
                MAX_PINS
            )));
        }
        let mut labels = std::collections::HashSet::new();
        for pin in pins {
            if pin.content.chars().count() > cortex_types::MAX_PIN_CONTENT_CHARS {
                return Err(Error::Validation(format!(
                    "pin content exceeds {} chars",
                    cortex_types::MAX_PIN_CONTENT_CHARS
                )));
            }
            if let Some(label) = &pin.label
                && !labels.insert(label.clone())
            {
                return Err(Error::Conflict(format!("duplicate pin label '{}'", label)));
            }
        }

        let tx = self.conn().unchecked_transaction()?;
        tx.execute("DELETE FROM working_memory", [])?;
        for (slot, pin) in pins.iter().enumerate() {
            tx.execute(
                "INSERT INTO working_memory (slot, content, label, pinned_at, critical) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![slot as i64, &pin.content, &pin.label, pin.pinned_at, pin.critical as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_working_memory(&self) -> Result<Vec<WorkingMemoryPin>> {
        let mut stmt = self.conn().prepare(
            "SELECT content, label, pinned_at, critical FROM working_memory ORDER BY slot",
        )?;
        let pins = stmt
            .query_map([], |row| {
                Ok(WorkingMemoryPin {
                    content: row.get(0)?,
                    label: row.get(1)?,
                    pinned_at: row.get(2)?,
                    critical: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_get_session() {
        let store = Store::open_in_memory().unwrap();
        let mut session = SessionState::open("s-1", "main");
        session.pending_tasks = vec!["rotate logs".to_string()];
        store.upsert_session(&session).unwrap();

        let loaded = store.get_session("s-1").unwrap();
        assert!(loaded.is_open());
        assert_eq!(loaded.pending_tasks, vec!["rotate logs"]);
    }

    #[test]
    fn test_dangling_session_recovery() {
        let store = Store::open_in_memory().unwrap();
        let session = SessionState::open("s-crashed", "main");
        store.upsert_session(&session).unwrap();

        let dangling = store.dangling_sessions("main").unwrap();
        assert_eq!(dangling.len(), 1);

        store.mark_session_recovered("s-crashed", Utc::now()).unwrap();
        assert!(store.dangling_sessions("main").unwrap().is_empty());
        let recovered = store.get_session("s-crashed").unwrap();
        assert!(recovered.recovered);
        assert!(!recovered.is_open());
    }

    #[test]
    fn test_working_memory_cap_and_labels() {
        let store = Store::open_in_memory().unwrap();
        let pins: Vec<WorkingMemoryPin> = (0..11)
            .map(|i| WorkingMemoryPin::new(format!("pin {}", i), None))
            .collect();
        assert!(matches!(store.save_working_memory(&pins), Err(Error::Validation(_))));

        let duplicates = vec![
            WorkingMemoryPin::new("one", Some("label".to_string())),
            WorkingMemoryPin::new("two", Some("label".to_string())),
        ];
        assert!(matches!(store.save_working_memory(&duplicates), Err(Error::Conflict(_))));

        let pins = vec![
            WorkingMemoryPin::new("keep the gateway on 8443", Some("gateway".to_string())),
            WorkingMemoryPin::new("deploys freeze on fridays", None),
        ];
        store.save_working_memory(&pins).unwrap();
        let loaded = store.get_working_memory().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].label.as_deref(), Some("gateway"));
    }

    #[test]
    fn test_ended_sessions_window() {
        let store = Store::open_in_memory().unwrap();
        let mut old = SessionState::open("s-old", "main");
        old.start_time = Utc::now() - chrono::Duration::days(30);
        old.end_time = Some(old.start_time + chrono::Duration::hours(1));
        store.upsert_session(&old).unwrap();

        let mut recent = SessionState::open("s-recent", "main");
        recent.end_time = Some(Utc::now());
        store.upsert_session(&recent).unwrap();

        let since = Utc::now() - chrono::Duration::days(7);
        let sessions = store.ended_sessions("main", since, 10).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "s-recent");
    }
}
