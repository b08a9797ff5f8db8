use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cortex_store::Store;
use cortex_types::Reading;
use serde_json::json;

use crate::polling::DataSourceAdapter;

// Supplemental probes shipped with the core. Every probe returns
// `available: false` on failure; none of them panic into the fan-out.

/// Disk usage via `df` on a fixed mount point
pub struct DiskProbe {
    mount: PathBuf,
    interval_ms: u64,
}

impl DiskProbe {
    pub fn new(mount: PathBuf, interval_ms: u64) -> Self {
        Self { mount, interval_ms }
    }
}

impl DataSourceAdapter for DiskProbe {
    fn source_id(&self) -> &str {
        "heal.disk"
    }

    fn poll_interval_ms(&self) -> u64 {
        self.interval_ms
    }

    fn poll(&self) -> Reading {
        let output = Command::new("df")
            .arg("--output=pcent")
            .arg(&self.mount)
            .output();
        match output {
            Ok(output) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout);
                match text
                    .lines()
                    .nth(1)
                    .and_then(|l| l.trim().trim_end_matches('%').parse::<f64>().ok())
                {
                    Some(pct) => Reading::ok(
                        "heal.disk",
                        json!({
                            "usage_pct": pct / 100.0,
                            "mount": self.mount.display().to_string(),
                        }),
                    ),
                    None => Reading::unavailable("heal.disk", "unparseable df output"),
                }
            }
            Ok(output) => Reading::unavailable(
                "heal.disk",
                format!("df exited with {}", output.status),
            ),
            Err(err) => Reading::unavailable("heal.disk", err.to_string()),
        }
    }
}

/// Memory usage from /proc/meminfo
pub struct MemoryProbe {
    interval_ms: u64,
}

impl MemoryProbe {
    pub fn new(interval_ms: u64) -> Self {
        Self { interval_ms }
    }
}

impl DataSourceAdapter for MemoryProbe {
    fn source_id(&self) -> &str {
        "heal.memory"
    }

    fn poll_interval_ms(&self) -> u64 {
        self.interval_ms
    }

    fn poll(&self) -> Reading {
        let meminfo = match std::fs::read_to_string("/proc/meminfo") {
            Ok(content) => content,
            Err(err) => return Reading::unavailable("heal.memory", err.to_string()),
        };
        let field = |name: &str| -> Option<f64> {
            meminfo
                .lines()
                .find(|l| l.starts_with(name))?
                .split_whitespace()
                .nth(1)?
                .parse()
                .ok()
        };
        match (field("MemTotal:"), field("MemAvailable:")) {
            (Some(total), Some(available)) if total > 0.0 => Reading::ok(
                "heal.memory",
                json!({"usage_pct": 1.0 - available / total}),
            ),
            _ => Reading::unavailable("heal.memory", "missing meminfo fields"),
        }
    }
}

/// Process liveness via pgrep over a fixed watch list
pub struct ProcessProbe {
    names: Vec<String>,
    interval_ms: u64,
}

impl ProcessProbe {
    pub fn new(names: Vec<String>, interval_ms: u64) -> Self {
        Self { names, interval_ms }
    }
}

impl DataSourceAdapter for ProcessProbe {
    fn source_id(&self) -> &str {
        "heal.process"
    }

    fn poll_interval_ms(&self) -> u64 {
        self.interval_ms
    }

    fn poll(&self) -> Reading {
        let mut processes = Vec::new();
        for name in &self.names {
            let status = match Command::new("pgrep").arg("-x").arg(name).output() {
                Ok(output) if output.status.success() => "running",
                Ok(_) => "dead",
                Err(err) => {
                    return Reading::unavailable("heal.process", err.to_string());
                }
            };
            processes.push(json!({"name": name, "status": status}));
        }
        Reading::ok("heal.process", json!({"processes": processes}))
    }
}

/// TCP reachability of the gateway endpoint
pub struct GatewayProbe {
    endpoint: String,
    interval_ms: u64,
}

impl GatewayProbe {
    pub fn new(endpoint: String, interval_ms: u64) -> Self {
        Self { endpoint, interval_ms }
    }
}

impl DataSourceAdapter for GatewayProbe {
    fn source_id(&self) -> &str {
        "heal.gateway"
    }

    fn poll_interval_ms(&self) -> u64 {
        self.interval_ms
    }

    fn poll(&self) -> Reading {
        let addrs = match self.endpoint.to_socket_addrs() {
            Ok(addrs) => addrs.collect::<Vec<_>>(),
            Err(err) => return Reading::unavailable("heal.gateway", err.to_string()),
        };
        let reachable = addrs
            .iter()
            .any(|addr| TcpStream::connect_timeout(addr, Duration::from_millis(800)).is_ok());
        Reading::ok(
            "heal.gateway",
            json!({"endpoint": self.endpoint, "reachable": reachable}),
        )
    }
}

/// Structural integrity of the cortex store itself
pub struct BrainDbProbe {
    store: Arc<Mutex<Store>>,
    interval_ms: u64,
}

impl BrainDbProbe {
    pub fn new(store: Arc<Mutex<Store>>, interval_ms: u64) -> Self {
        Self { store, interval_ms }
    }
}

impl DataSourceAdapter for BrainDbProbe {
    fn source_id(&self) -> &str {
        "heal.braindb"
    }

    fn poll_interval_ms(&self) -> u64 {
        self.interval_ms
    }

    fn poll(&self) -> Reading {
        let store = match self.store.lock() {
            Ok(store) => store,
            Err(_) => return Reading::unavailable("heal.braindb", "store lock poisoned"),
        };
        match store.integrity_ok() {
            Ok(ok) => Reading::ok("heal.braindb", json!({"integrity_ok": ok})),
            Err(err) => Reading::unavailable("heal.braindb", err.to_string()),
        }
    }
}

/// Total size of a log directory tree
pub struct LogBloatProbe {
    dir: PathBuf,
    interval_ms: u64,
}

impl LogBloatProbe {
    pub fn new(dir: PathBuf, interval_ms: u64) -> Self {
        Self { dir, interval_ms }
    }
}

impl DataSourceAdapter for LogBloatProbe {
    fn source_id(&self) -> &str {
        "heal.logbloat"
    }

    fn poll_interval_ms(&self) -> u64 {
        self.interval_ms
    }

    fn poll(&self) -> Reading {
        if !self.dir.exists() {
            return Reading::unavailable("heal.logbloat", "log dir missing");
        }
        let total_bytes: u64 = walkdir::WalkDir::new(&self.dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|metadata| metadata.len())
            .sum();
        Reading::ok(
            "heal.logbloat",
            json!({
                "dir": self.dir.display().to_string(),
                "total_mb": (total_bytes / (1024 * 1024)) as f64,
            }),
        )
    }
}
