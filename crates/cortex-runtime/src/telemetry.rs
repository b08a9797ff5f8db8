use std::path::Path;
use std::sync::{Arc, Mutex};

use cortex_store::{JsonlSink, MetricKind, Store};
use serde_json::json;

/// Metric and event emission. Metric rows land in the store; structured
/// events go to per-kind JSONL sinks. Emission is best-effort: a failed
/// write warns and moves on, it never fails the calling operation.
pub struct Telemetry {
    store: Arc<Mutex<Store>>,
    healing_events: JsonlSink,
    routing_events: JsonlSink,
}

impl Telemetry {
    pub fn new(store: Arc<Mutex<Store>>, events_dir: &Path) -> Self {
        Self {
            store,
            healing_events: JsonlSink::new(events_dir.join("self_healing.jsonl")),
            routing_events: JsonlSink::new(events_dir.join("routing.jsonl")),
        }
    }

    pub fn metric(&self, kind: MetricKind, name: &str, value: f64, context: Option<&str>) {
        let result = self
            .store
            .lock()
            .map_err(|_| ())
            .and_then(|store| store.record_metric(kind, name, value, context).map_err(|_| ()));
        if result.is_err() {
            tracing::warn!(name, "metric emission failed");
        }
    }

    /// Structured self-healing event with a closed reason-code set
    pub fn healing_event(&self, event: &str, anomaly_type: &str, target_id: &str, detail: &str) {
        let payload = json!({
            "event": event,
            "anomaly_type": anomaly_type,
            "target_id": target_id,
            "detail": detail,
        });
        if self.healing_events.append(payload).is_err() {
            tracing::warn!(event, "healing event emission failed");
        }
    }

    pub fn routing_event(&self, name: &str, reason: &str) {
        let payload = json!({ "name": name, "reason": reason });
        if self.routing_events.append(payload).is_err() {
            tracing::warn!(name, "routing event emission failed");
        }
    }
}

/// Install a default tracing subscriber reading RUST_LOG. Call once from
/// the embedding host; repeated calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_and_events_land() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let telemetry = Telemetry::new(store.clone(), dir.path());

        telemetry.metric(MetricKind::Sop, "read_only_pass", 1.0, Some("ls -la"));
        assert_eq!(store.lock().unwrap().count_metrics(MetricKind::Sop).unwrap(), 1);

        telemetry.healing_event("state_change", "disk_pressure", "/", "resolved");
        let raw = std::fs::read_to_string(dir.path().join("self_healing.jsonl")).unwrap();
        assert!(raw.contains("disk_pressure"));
    }
}
