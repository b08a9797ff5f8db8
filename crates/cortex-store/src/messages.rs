use chrono::Utc;
use cortex_types::{AgentMessage, BROADCAST_RECIPIENT, MessagePriority};
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use crate::store::{json_list, not_found, to_json};
use crate::{Result, Store};

/// Input for sending a message
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub from_agent: String,
    pub to_agent: String,
    pub subject: String,
    pub body: String,
    pub priority: MessagePriority,
    pub thread_id: Option<String>,
}

fn message_from_row(row: &Row) -> rusqlite::Result<(AgentMessage, String)> {
    let priority_raw: String = row.get(5)?;
    let read_by_raw: String = row.get(11)?;
    let message = AgentMessage {
        id: row.get(0)?,
        from_agent: row.get(1)?,
        to_agent: row.get(2)?,
        subject: row.get(3)?,
        body: row.get(4)?,
        priority: MessagePriority::parse(&priority_raw).unwrap_or(MessagePriority::Info),
        thread_id: row.get(6)?,
        sent_at: row.get(7)?,
        read_at: row.get(8)?,
        acked_at: row.get(9)?,
        ack_body: row.get(10)?,
        read_by: Vec::new(),
    };
    Ok((message, read_by_raw))
}

fn finish(pair: (AgentMessage, String)) -> Result<AgentMessage> {
    let (mut message, read_by_raw) = pair;
    message.read_by = json_list(&read_by_raw)?;
    Ok(message)
}

const MESSAGE_COLUMNS: &str = "id, from_agent, to_agent, subject, body, priority, thread_id, \
     sent_at, read_at, acked_at, ack_body, read_by";

impl Store {
    pub fn send_message(&self, new: NewMessage) -> Result<AgentMessage> {
        let message = AgentMessage {
            id: Uuid::new_v4().to_string(),
            from_agent: new.from_agent,
            to_agent: new.to_agent,
            subject: new.subject,
            body: new.body,
            priority: new.priority,
            thread_id: new.thread_id,
            sent_at: Utc::now(),
            read_at: None,
            acked_at: None,
            ack_body: None,
            read_by: Vec::new(),
        };
        self.conn().execute(
            r#"
            INSERT INTO messages (id, from_agent, to_agent, subject, body, priority,
                thread_id, sent_at, read_by)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '[]')
            "#,
            params![
                &message.id,
                &message.from_agent,
                &message.to_agent,
                &message.subject,
                &message.body,
                message.priority.as_str(),
                &message.thread_id,
                message.sent_at,
            ],
        )?;
        Ok(message)
    }

    /// Unread (or all, with `include_read`) messages addressed to `agent`
    /// or broadcast, newest first.
    pub fn inbox(&self, agent: &str, include_read: bool) -> Result<Vec<AgentMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            r#"
            SELECT {} FROM messages
            WHERE to_agent = ?1 OR to_agent = ?2
            ORDER BY sent_at DESC
            "#,
            MESSAGE_COLUMNS
        ))?;
        let pairs = stmt
            .query_map(params![agent, BROADCAST_RECIPIENT], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut messages = Vec::with_capacity(pairs.len());
        for pair in pairs {
            messages.push(finish(pair)?);
        }
        if !include_read {
            messages.retain(|m| {
                if m.is_broadcast() {
                    !m.is_read_by(agent)
                } else {
                    m.read_at.is_none()
                }
            });
        }
        Ok(messages)
    }

    /// Mark read. Idempotent: re-reading returns the message unchanged.
    pub fn read_message(&self, id: &str, agent: &str) -> Result<AgentMessage> {
        let message = self.get_message(id)?;
        let now = Utc::now();

        let mut read_by = message.read_by.clone();
        if !read_by.iter().any(|a| a == agent) {
            read_by.push(agent.to_string());
        }
        self.conn().execute(
            "UPDATE messages SET read_at = COALESCE(read_at, ?1), read_by = ?2 WHERE id = ?3",
            params![now, to_json(&read_by)?, id],
        )?;
        self.get_message(id)
    }

    /// Acknowledge. Idempotent: a second ack keeps the original timestamp.
    pub fn ack_message(&self, id: &str, agent: &str, body: Option<String>) -> Result<AgentMessage> {
        self.read_message(id, agent)?;
        self.conn().execute(
            "UPDATE messages SET acked_at = COALESCE(acked_at, ?1), ack_body = COALESCE(ack_body, ?2) WHERE id = ?3",
            params![Utc::now(), body, id],
        )?;
        self.get_message(id)
    }

    pub fn message_history(
        &self,
        thread_id: Option<&str>,
        agent: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AgentMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            r#"
            SELECT {} FROM messages
            WHERE (?1 IS NULL OR thread_id = ?1)
              AND (?2 IS NULL OR from_agent = ?2 OR to_agent = ?2)
            ORDER BY sent_at DESC
            LIMIT ?3
            "#,
            MESSAGE_COLUMNS
        ))?;
        let pairs = stmt
            .query_map(params![thread_id, agent, limit as i64], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        pairs.into_iter().map(finish).collect()
    }

    pub fn get_message(&self, id: &str) -> Result<AgentMessage> {
        let pair = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                [id],
                message_from_row,
            )
            .optional()?;
        match pair {
            Some(pair) => finish(pair),
            None => not_found("message", id),
        }
    }

    pub fn count_messages(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: &str, subject: &str) -> NewMessage {
        NewMessage {
            from_agent: "augur".to_string(),
            to_agent: to.to_string(),
            subject: subject.to_string(),
            body: "body".to_string(),
            priority: MessagePriority::Info,
            thread_id: None,
        }
    }

    #[test]
    fn test_send_inbox_read_ack_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let sent = store.send_message(message("scout", "fleet status")).unwrap();

        let inbox = store.inbox("scout", false).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].id, sent.id);
        assert_eq!(inbox[0].priority, MessagePriority::Info);

        let read = store.read_message(&sent.id, "scout").unwrap();
        assert!(read.read_at.is_some());
        assert!(store.inbox("scout", false).unwrap().is_empty());
        assert_eq!(store.inbox("scout", true).unwrap().len(), 1);

        let acked = store.ack_message(&sent.id, "scout", Some("on it".to_string())).unwrap();
        assert!(acked.acked_at.is_some());
        assert_eq!(acked.ack_body.as_deref(), Some("on it"));
    }

    #[test]
    fn test_ack_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let sent = store.send_message(message("scout", "ping")).unwrap();
        let first = store.ack_message(&sent.id, "scout", Some("ack one".to_string())).unwrap();
        let second = store.ack_message(&sent.id, "scout", Some("ack two".to_string())).unwrap();
        assert_eq!(first.acked_at, second.acked_at);
        assert_eq!(second.ack_body.as_deref(), Some("ack one"));
    }

    #[test]
    fn test_broadcast_read_tracking() {
        let store = Store::open_in_memory().unwrap();
        let sent = store.send_message(message("all", "everyone listen")).unwrap();

        store.read_message(&sent.id, "scout").unwrap();
        assert!(store.inbox("scout", false).unwrap().is_empty());
        // Other agents still see the broadcast as unread
        assert_eq!(store.inbox("harvester", false).unwrap().len(), 1);
    }

    #[test]
    fn test_history_filters_by_thread() {
        let store = Store::open_in_memory().unwrap();
        let mut threaded = message("scout", "thread start");
        threaded.thread_id = Some("t-1".to_string());
        store.send_message(threaded.clone()).unwrap();
        threaded.subject = "thread reply".to_string();
        store.send_message(threaded).unwrap();
        store.send_message(message("scout", "unrelated")).unwrap();

        let history = store.message_history(Some("t-1"), None, 10).unwrap();
        assert_eq!(history.len(), 2);
        let all = store.message_history(None, Some("scout"), 10).unwrap();
        assert_eq!(all.len(), 3);
    }
}
