use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use cortex_types::strip_control_chars;
use rusqlite::params;

use crate::{Result, Store};

/// Metric kinds form a closed set mirroring the event sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Cortex,
    Synapse,
    Pipeline,
    Sop,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cortex => "cortex",
            MetricKind::Synapse => "synapse",
            MetricKind::Pipeline => "pipeline",
            MetricKind::Sop => "sop",
        }
    }
}

impl Store {
    /// Append a metric record. Context strings are stripped of control
    /// characters before they touch storage.
    pub fn record_metric(
        &self,
        kind: MetricKind,
        name: &str,
        value: f64,
        context: Option<&str>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO metrics (kind, name, value, context, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                kind.as_str(),
                name,
                value,
                context.map(strip_control_chars),
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn count_metrics(&self, kind: MetricKind) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM metrics WHERE kind = ?1",
            [kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn latest_metric(&self, kind: MetricKind, name: &str) -> Result<Option<(f64, Option<String>)>> {
        use rusqlite::OptionalExtension;
        let row = self
            .conn()
            .query_row(
                "SELECT value, context FROM metrics WHERE kind = ?1 AND name = ?2 ORDER BY id DESC LIMIT 1",
                params![kind.as_str(), name],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;
        Ok(row)
    }
}

/// Append-only JSONL sink for structured events (self-healing transitions,
/// routing decisions). One JSON object per line, no free-form interpolation.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, mut event: serde_json::Value) -> Result<()> {
        if let Some(map) = event.as_object_mut() {
            map.insert(
                "ts".to_string(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
            for value in map.values_mut() {
                if let serde_json::Value::String(s) = value {
                    *s = strip_control_chars(s);
                }
            }
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&event)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metric_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_metric(MetricKind::Sop, "read_only_pass", 1.0, Some("ls -la"))
            .unwrap();
        assert_eq!(store.count_metrics(MetricKind::Sop).unwrap(), 1);

        let (value, context) = store
            .latest_metric(MetricKind::Sop, "read_only_pass")
            .unwrap()
            .unwrap();
        assert_eq!(value, 1.0);
        assert_eq!(context.as_deref(), Some("ls -la"));
    }

    #[test]
    fn test_metric_context_strips_control_chars() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_metric(MetricKind::Cortex, "lookup", 1.0, Some("a\x1b[31mb"))
            .unwrap();
        let (_, context) = store.latest_metric(MetricKind::Cortex, "lookup").unwrap().unwrap();
        assert!(!context.unwrap().contains('\x1b'));
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path().join("events/healing.jsonl"));
        sink.append(json!({"event": "state_change", "to": "resolved"})).unwrap();
        sink.append(json!({"event": "state_change", "to": "escalated"})).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("events/healing.jsonl")).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("ts").is_some());
        }
    }
}
