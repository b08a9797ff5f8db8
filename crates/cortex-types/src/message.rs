use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message priority for inter-agent messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Info,
    Action,
    Urgent,
}

impl MessagePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePriority::Info => "info",
            MessagePriority::Action => "action",
            MessagePriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(MessagePriority::Info),
            "action" => Some(MessagePriority::Action),
            "urgent" => Some(MessagePriority::Urgent),
            _ => None,
        }
    }
}

/// Recipient `all` broadcasts to every agent.
pub const BROADCAST_RECIPIENT: &str = "all";

/// Inter-agent message. Lifecycle is send, optional read, optional ack;
/// rows are never mutated beyond these transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub subject: String,
    pub body: String,
    pub priority: MessagePriority,
    pub thread_id: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
    pub ack_body: Option<String>,
    /// Agents that have read this message (relevant for broadcasts)
    pub read_by: Vec<String>,
}

impl AgentMessage {
    pub fn is_broadcast(&self) -> bool {
        self.to_agent == BROADCAST_RECIPIENT
    }

    pub fn is_read_by(&self, agent: &str) -> bool {
        self.read_by.iter().any(|a| a == agent)
    }
}
