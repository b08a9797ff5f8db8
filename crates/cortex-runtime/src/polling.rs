use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cortex_types::Reading;

/// Capability contract for a data source: periodic polls producing
/// readings. Probes never panic out of `poll`; failure is an
/// `available: false` reading.
pub trait DataSourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;
    fn poll_interval_ms(&self) -> u64;
    fn freshness_threshold_ms(&self) -> u64 {
        self.poll_interval_ms() * 3
    }
    fn poll(&self) -> Reading;
}

type Subscriber = Box<dyn Fn(&Reading) + Send + Sync>;

/// Fans adapter readings out to subscribers on a background thread.
/// Subscriber panics are contained; they never reach the poll loop.
pub struct PollingEngine {
    adapters: Mutex<Vec<Arc<dyn DataSourceAdapter>>>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for PollingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PollingEngine {
    pub fn new() -> Self {
        Self {
            adapters: Mutex::new(Vec::new()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            stop: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn register_adapter(&self, adapter: Arc<dyn DataSourceAdapter>) {
        self.adapters.lock().expect("adapter list poisoned").push(adapter);
    }

    pub fn on_reading(&self, callback: impl Fn(&Reading) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push(Box::new(callback));
    }

    /// Poll every adapter once and fan out. Used by tests and by callers
    /// that drive their own cadence.
    pub fn poll_once(&self) {
        let adapters: Vec<Arc<dyn DataSourceAdapter>> =
            self.adapters.lock().expect("adapter list poisoned").clone();
        for adapter in adapters {
            let reading = adapter.poll();
            fan_out(&self.subscribers, &reading);
        }
    }

    /// Start the poll loop on a named background thread. Each adapter is
    /// polled on its own interval.
    pub fn start(&self) -> std::io::Result<()> {
        let adapters: Vec<Arc<dyn DataSourceAdapter>> =
            self.adapters.lock().expect("adapter list poisoned").clone();
        let subscribers = Arc::clone(&self.subscribers);
        let stop = Arc::clone(&self.stop);

        let handle = std::thread::Builder::new()
            .name("cortex-polling".to_string())
            .spawn(move || {
                let mut next_due: HashMap<String, Instant> = adapters
                    .iter()
                    .map(|a| (a.source_id().to_string(), Instant::now()))
                    .collect();
                while !stop.load(Ordering::Relaxed) {
                    let now = Instant::now();
                    for adapter in &adapters {
                        let due = next_due
                            .get_mut(adapter.source_id())
                            .expect("adapter registered at start");
                        if now >= *due {
                            let reading = adapter.poll();
                            fan_out(&subscribers, &reading);
                            *due = now + Duration::from_millis(adapter.poll_interval_ms());
                        }
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
            })?;
        *self.handle.lock().expect("handle poisoned") = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().expect("handle poisoned").take() {
            let _ = handle.join();
        }
    }
}

fn fan_out(subscribers: &Arc<Mutex<Vec<Subscriber>>>, reading: &Reading) {
    let subscribers = subscribers.lock().expect("subscriber list poisoned");
    for subscriber in subscribers.iter() {
        if catch_unwind(AssertUnwindSafe(|| subscriber(reading))).is_err() {
            tracing::warn!(source_id = %reading.source_id, "reading subscriber panicked");
        }
    }
}

/// Test adapter with settable data, mirroring the optional `set_mock_data`
/// capability of the adapter contract.
pub struct MockAdapter {
    source_id: String,
    interval_ms: u64,
    data: Mutex<Option<serde_json::Value>>,
}

impl MockAdapter {
    pub fn new(source_id: impl Into<String>, interval_ms: u64) -> Self {
        Self {
            source_id: source_id.into(),
            interval_ms,
            data: Mutex::new(None),
        }
    }

    pub fn set_mock_data(&self, data: serde_json::Value) {
        *self.data.lock().expect("mock data poisoned") = Some(data);
    }

    pub fn clear_mock_data(&self) {
        *self.data.lock().expect("mock data poisoned") = None;
    }
}

impl DataSourceAdapter for MockAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn poll_interval_ms(&self) -> u64 {
        self.interval_ms
    }

    fn poll(&self) -> Reading {
        match self.data.lock().expect("mock data poisoned").clone() {
            Some(data) => Reading::ok(self.source_id.clone(), data),
            None => Reading::unavailable(self.source_id.clone(), "no mock data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_poll_once_fans_out() {
        let engine = PollingEngine::new();
        let adapter = Arc::new(MockAdapter::new("heal.disk", 1_000));
        adapter.set_mock_data(json!({"usage_pct": 0.5}));
        engine.register_adapter(adapter);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.on_reading(move |reading| {
            sink.lock().unwrap().push(reading.source_id.clone());
        });

        engine.poll_once();
        engine.poll_once();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_subscriber_panic_is_contained() {
        let engine = PollingEngine::new();
        let adapter = Arc::new(MockAdapter::new("heal.disk", 1_000));
        adapter.set_mock_data(json!({"usage_pct": 0.5}));
        engine.register_adapter(adapter);

        engine.on_reading(|_| panic!("bad subscriber"));
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        engine.on_reading(move |_| {
            *sink.lock().unwrap() += 1;
        });

        engine.poll_once();
        // The panicking subscriber did not stop delivery to the next one
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_unavailable_reading_from_mock() {
        let adapter = MockAdapter::new("heal.gateway", 1_000);
        let reading = adapter.poll();
        assert!(!reading.available);
        assert!(reading.error.is_some());
    }
}
