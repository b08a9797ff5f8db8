use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single adapter or probe output.
///
/// Probes never throw into the fan-out; failure is expressed as
/// `available: false` plus an error string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub source_id: String,
    pub available: bool,
    pub timestamp: DateTime<Utc>,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Reading {
    pub fn ok(source_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            source_id: source_id.into(),
            available: true,
            timestamp: Utc::now(),
            data: Some(data),
            error: None,
        }
    }

    pub fn unavailable(source_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            available: false,
            timestamp: Utc::now(),
            data: None,
            error: Some(error.into()),
        }
    }

    /// Fetch a numeric field from the reading data
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.data.as_ref()?.get(key)?.as_f64()
    }

    /// Fetch a string field from the reading data
    pub fn text(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reading_accessors() {
        let reading = Reading::ok("heal.disk", json!({"usage_pct": 0.87, "mount": "/"}));
        assert!(reading.available);
        assert_eq!(reading.metric("usage_pct"), Some(0.87));
        assert_eq!(reading.text("mount"), Some("/"));
        assert_eq!(reading.metric("missing"), None);
    }

    #[test]
    fn test_unavailable_reading() {
        let reading = Reading::unavailable("heal.gateway", "connect timed out");
        assert!(!reading.available);
        assert!(reading.data.is_none());
        assert_eq!(reading.error.as_deref(), Some("connect timed out"));
    }
}
