use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lower bound for memory confidence. The store rejects values below this.
pub const CONFIDENCE_MIN: f64 = 0.1;
/// Upper bound for memory confidence.
pub const CONFIDENCE_MAX: f64 = 1.0;
/// Importance range for memories.
pub const IMPORTANCE_MIN: f64 = 1.0;
pub const IMPORTANCE_MAX: f64 = 3.0;

/// Origin of a memory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemorySource {
    Agent,
    AutoCapture,
    Import,
    User,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Agent => "agent",
            MemorySource::AutoCapture => "auto-capture",
            MemorySource::Import => "import",
            MemorySource::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(MemorySource::Agent),
            "auto-capture" => Some(MemorySource::AutoCapture),
            "import" => Some(MemorySource::Import),
            "user" => Some(MemorySource::User),
            _ => None,
        }
    }
}

/// A short-term memory entry with categories and confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    /// Non-empty, ordered. First entry is the primary category.
    pub categories: Vec<String>,
    pub importance: f64,
    pub confidence: f64,
    pub access_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub source: MemorySource,
    pub source_message_id: Option<String>,
}

impl Memory {
    pub fn primary_category(&self) -> &str {
        self.categories.first().map(String::as_str).unwrap_or("general")
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds().max(0) as f64 / 86_400.0
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds().max(0) as f64 / 3_600.0
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Input for creating a memory; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub content: String,
    pub categories: Vec<String>,
    pub importance: f64,
    pub confidence: f64,
    pub expires_at: Option<DateTime<Utc>>,
    pub source: MemorySource,
    pub source_message_id: Option<String>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            categories: Vec::new(),
            importance: IMPORTANCE_MIN,
            confidence: CONFIDENCE_MAX,
            expires_at: None,
            source: MemorySource::Agent,
            source_message_id: None,
        }
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_source(mut self, source: MemorySource) -> Self {
        self.source = source;
        self
    }
}

/// One append-only audit row for a confidence change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceAudit {
    pub memory_id: String,
    pub old: f64,
    pub new: f64,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A memory paired with its retrieval score
#[derive(Debug, Clone)]
pub struct MemoryMatch {
    pub memory: Memory,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_round_trip() {
        for source in [
            MemorySource::Agent,
            MemorySource::AutoCapture,
            MemorySource::Import,
            MemorySource::User,
        ] {
            assert_eq!(MemorySource::parse(source.as_str()), Some(source));
        }
        assert_eq!(MemorySource::parse("bogus"), None);
    }

    #[test]
    fn test_age_days() {
        let now = Utc::now();
        let memory = Memory {
            id: "m1".to_string(),
            content: "test".to_string(),
            categories: vec!["general".to_string()],
            importance: 1.0,
            confidence: 1.0,
            access_count: 0,
            created_at: now - chrono::Duration::days(3),
            last_accessed: now,
            expires_at: None,
            source: MemorySource::Agent,
            source_message_id: None,
        };
        assert!((memory.age_days(now) - 3.0).abs() < 0.01);
        assert!(!memory.is_expired(now));
    }
}
