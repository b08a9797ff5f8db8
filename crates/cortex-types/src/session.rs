use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of working-memory pins per session
pub const MAX_PINS: usize = 10;
/// Maximum length of pinned content in characters
pub const MAX_PIN_CONTENT_CHARS: usize = 500;

/// A working-memory pin. Pins are budget-exempt in context composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemoryPin {
    pub content: String,
    pub pinned_at: DateTime<Utc>,
    pub label: Option<String>,
    /// Critical pins are inherited across sessions regardless of relevance score
    #[serde(default)]
    pub critical: bool,
}

impl WorkingMemoryPin {
    pub fn new(content: impl Into<String>, label: Option<String>) -> Self {
        let label = label.filter(|l| !l.is_empty());
        let critical = label
            .as_deref()
            .is_some_and(|l| l.to_uppercase().starts_with("CRITICAL"));
        Self {
            content: content.into(),
            pinned_at: Utc::now(),
            label,
            critical,
        }
    }
}

/// Snapshot of a session, persisted at end (and incrementally mid-session
/// for crash safety).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    /// None while the session is open; a dangling None after the process is
    /// gone marks a crashed session.
    pub end_time: Option<DateTime<Utc>>,
    pub channel: String,
    pub working_memory: Vec<WorkingMemoryPin>,
    /// Top-N keywords observed during the session
    pub hot_topics: Vec<String>,
    pub active_projects: Vec<String>,
    pub pending_tasks: Vec<String>,
    /// Ids of memories captured during the session
    pub recent_learnings: Vec<String>,
    pub sop_interactions: u32,
    pub previous_session_id: Option<String>,
    pub continued_by: Option<String>,
    /// Set when crash recovery resolved this session at a later start
    #[serde(default)]
    pub recovered: bool,
}

impl SessionState {
    pub fn open(session_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            start_time: Utc::now(),
            end_time: None,
            channel: channel.into(),
            working_memory: Vec::new(),
            hot_topics: Vec::new(),
            active_projects: Vec::new(),
            pending_tasks: Vec::new(),
            recent_learnings: Vec::new(),
            sop_interactions: 0,
            previous_session_id: None,
            continued_by: None,
            recovered: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_critical_detection() {
        let pin = WorkingMemoryPin::new("never restart the executor mid-epoch", Some("CRITICAL: executor".to_string()));
        assert!(pin.critical);

        let pin = WorkingMemoryPin::new("prefer rsync over scp", Some("transfer".to_string()));
        assert!(!pin.critical);
    }

    #[test]
    fn test_session_open() {
        let state = SessionState::open("s-1", "main");
        assert!(state.is_open());
        assert_eq!(state.channel, "main");
    }
}
